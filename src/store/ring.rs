// Fixed-capacity circular buffer. Slots are allocated once; pushing at
// capacity overwrites the oldest slot and hands the evicted value back.

#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize, // index of the oldest entry
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let tail = (self.head + self.len) % cap;
            self.slots[tail] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn newest(&self) -> Option<&T> {
        self.iter().next_back()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Up to `n` entries, newest first.
    pub fn newest_first(&self, n: usize) -> Vec<T> {
        self.iter().rev().take(n).cloned().collect()
    }
}
