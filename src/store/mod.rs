pub mod history;
pub mod ring;
pub use history::HistoryStore;
pub use ring::RingBuffer;
