// Convert upstream quote values into prices on a fixed tick grid.
// NSE sends numbers either as JSON numbers or as comma-grouped strings ("24,579.10").

use serde::Deserialize;

/// A quote field as it arrives on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Num(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Normaliser {
    pub price_scale: i64, // e.g. 100 => 2 decimal places
}

impl Normaliser {
    pub fn new(price_decimals: u32) -> Self {
        Self { price_scale: 10i64.saturating_pow(price_decimals) }
    }

    /// Strip grouping separators and parse. Returns None for blanks and "-".
    pub fn parse_decimal(&self, s: &str) -> Option<f64> {
        let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
        if cleaned.is_empty() || cleaned == "-" {
            return None;
        }
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn price_to_ticks(&self, price: f64) -> i64 {
        (price * self.price_scale as f64).round() as i64
    }

    pub fn ticks_to_price(&self, ticks: i64) -> f64 {
        ticks as f64 / self.price_scale as f64
    }

    /// Snap a price onto the tick grid.
    pub fn round_price(&self, price: f64) -> f64 {
        self.ticks_to_price(self.price_to_ticks(price))
    }

    /// Positive, finite price on the tick grid, or None.
    pub fn price(&self, raw: &WireNumber) -> Option<f64> {
        let v = match raw {
            WireNumber::Num(v) => Some(*v),
            WireNumber::Text(s) => self.parse_decimal(s),
        }?;
        (v.is_finite() && v > 0.0).then(|| self.round_price(v))
    }

    pub fn volume(&self, raw: &WireNumber) -> Option<u64> {
        let v = match raw {
            WireNumber::Num(v) => Some(*v),
            WireNumber::Text(s) => self.parse_decimal(s),
        }?;
        (v.is_finite() && v >= 0.0).then(|| v.round() as u64)
    }
}

impl Default for Normaliser {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grouped_strings() {
        let n = Normaliser::default();
        assert_eq!(n.parse_decimal("24,579.10"), Some(24579.10));
        assert_eq!(n.parse_decimal(" 1,23,456 "), Some(123456.0));
        assert_eq!(n.parse_decimal("-"), None);
        assert_eq!(n.parse_decimal(""), None);
        assert_eq!(n.parse_decimal("abc"), None);
    }

    #[test]
    fn test_price_rounds_to_ticks() {
        let n = Normaliser::default();
        assert_eq!(n.price_to_ticks(24579.106), 2457911);
        assert_eq!(n.round_price(24579.104), 24579.10);
        assert_eq!(n.price(&WireNumber::Text("53,661.456".into())), Some(53661.46));
        assert_eq!(n.price(&WireNumber::Num(0.0)), None);
        assert_eq!(n.price(&WireNumber::Num(-3.0)), None);
    }

    #[test]
    fn test_wire_number_untagged() {
        let v: Vec<WireNumber> = serde_json::from_str(r#"[24579.1, "80,157.25"]"#).unwrap();
        let n = Normaliser::default();
        assert_eq!(n.price(&v[0]), Some(24579.1));
        assert_eq!(n.price(&v[1]), Some(80157.25));
        assert_eq!(n.volume(&WireNumber::Text("12,000".into())), Some(12000));
    }
}
