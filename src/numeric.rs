//! Lenient number parsing for values coming from external APIs and stored text

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Parse display-formatted text such as `"1,234.5"` or `"12.5%"`
///
/// Empty strings, `nan`/`inf` spellings and anything `Decimal` cannot hold
/// come back as `None`.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '%' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.to_ascii_lowercase().as_str() {
        "nan" | "none" | "null" | "inf" | "-inf" | "+inf" | "infinity" | "-infinity" => return None,
        _ => {}
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

/// Number or numeric string → `Decimal`
pub fn json_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(decimal_from_f64)
            }
        }
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Number or numeric string → finite `f64`
pub fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let parsed = s.trim().replace(',', "").parse::<f64>().ok()?;
            parsed.is_finite().then_some(parsed)
        }
        _ => None,
    }
}

pub fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_decimal_strips_formatting() {
        assert_eq!(parse_decimal("1,234.50"), Some(Decimal::from_str("1234.5").unwrap()));
        assert_eq!(parse_decimal(" 12.5% "), Some(Decimal::from_str("12.5").unwrap()));
        assert_eq!(parse_decimal("1e3"), Some(Decimal::from(1000)));
        assert_eq!(parse_decimal("nan"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(json_decimal(&json!(7)), Some(Decimal::from(7)));
        assert_eq!(json_decimal(&json!("0.25")), Some(Decimal::from_str("0.25").unwrap()));
        assert_eq!(json_decimal(&json!(null)), None);
        assert_eq!(json_f64(&json!("1,000.5")), Some(1000.5));
        assert_eq!(json_f64(&json!(true)), None);
        assert_eq!(json_i64(&json!("42")), Some(42));
        assert_eq!(json_i64(&json!(3.9)), Some(3));
        assert_eq!(decimal_from_f64(f64::NAN), None);
    }
}
