use crate::numeric::decimal_from_f64;
use crate::records::PriceRow;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Lower-cased symbol → price, rebuilt every merge cycle
#[derive(Debug, Clone, Default)]
pub struct PriceMap {
    prices: HashMap<String, Decimal>,
    from_fallback: usize,
}

impl PriceMap {
    /// Primary prices first, later rows overriding earlier ones for the same
    /// symbol; fallback entries only fill symbols still missing
    pub fn build(primary: &[PriceRow], fallback: &[(String, Decimal)]) -> Self {
        let mut prices = HashMap::new();
        for row in primary {
            if let Some(price) = decimal_from_f64(row.price_usdt) {
                prices.insert(row.symbol.to_lowercase(), price);
            }
        }

        let mut from_fallback = 0;
        for (symbol, price) in fallback {
            let key = symbol.to_lowercase();
            if !prices.contains_key(&key) {
                prices.insert(key, *price);
                from_fallback += 1;
            }
        }

        Self { prices, from_fallback }
    }

    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(&symbol.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Symbols resolved only through the fallback source
    pub fn fallback_count(&self) -> usize {
        self.from_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::{dec, price_row};

    #[test]
    fn test_fallback_fills_gaps_only() {
        let primary = vec![price_row("5", "DOT", 7.0), price_row("0", "HDX", 0.25)];
        let fallback = vec![
            ("dot".to_string(), dec("6.5").unwrap()),
            ("vKSM".to_string(), dec("30").unwrap()),
        ];

        let map = PriceMap::build(&primary, &fallback);
        assert_eq!(map.get("Dot"), dec("7"));
        assert_eq!(map.get("VKSM"), dec("30"));
        assert_eq!(map.get("hdx"), dec("0.25"));
        assert_eq!(map.get("GLMR"), None);
        assert_eq!(map.len(), 3);
        assert_eq!(map.fallback_count(), 1);
    }

    #[test]
    fn test_last_primary_row_wins() {
        let primary = vec![
            price_row("5", "DOT", 7.0),
            price_row("5", "dot", 7.5),
            price_row("5", "DOT", f64::NAN),
        ];
        let fallback = vec![("DOT".to_string(), dec("6.5").unwrap())];

        let map = PriceMap::build(&primary, &fallback);
        assert_eq!(map.get("DOT"), dec("7.5"));
        assert_eq!(map.fallback_count(), 0);
    }

    #[test]
    fn test_non_finite_primary_price_falls_through() {
        let primary = vec![price_row("5", "DOT", f64::NAN)];
        let fallback = vec![("DOT".to_string(), dec("6.5").unwrap())];

        let map = PriceMap::build(&primary, &fallback);
        assert_eq!(map.get("dot"), dec("6.5"));
    }
}
