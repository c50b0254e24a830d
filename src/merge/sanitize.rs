//! Deep sanitization of snapshot payloads
//!
//! The payload is assembled as a [`PayloadValue`] tree so decimals and raw
//! floats survive until the very end; [`sanitize`] then turns it into plain
//! JSON where every number is a finite `f64` or `null`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Largest magnitude kept as a number
pub const MAX_MAGNITUDE: f64 = 1e308;

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Null,
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    List(Vec<PayloadValue>),
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, PayloadValue)>,
        K: Into<String>,
    {
        PayloadValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<Option<Decimal>> for PayloadValue {
    fn from(value: Option<Decimal>) -> Self {
        value.map_or(PayloadValue::Null, PayloadValue::Decimal)
    }
}

impl From<Option<i64>> for PayloadValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(PayloadValue::Null, PayloadValue::Int)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

/// NaN, ±Inf and |x| > 1e308 become `null`
pub fn sanitize_float(value: f64) -> Value {
    if !value.is_finite() || value.abs() > MAX_MAGNITUDE {
        return Value::Null;
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

pub fn sanitize_decimal(value: &Decimal) -> Value {
    value.to_f64().map_or(Value::Null, sanitize_float)
}

/// Recursively convert to JSON, nulling every non-representable number
pub fn sanitize(value: &PayloadValue) -> Value {
    match value {
        PayloadValue::Null => Value::Null,
        PayloadValue::Int(i) => Value::Number((*i).into()),
        PayloadValue::Float(f) => sanitize_float(*f),
        PayloadValue::Decimal(d) => sanitize_decimal(d),
        PayloadValue::Text(s) => Value::String(s.clone()),
        PayloadValue::List(items) => Value::Array(items.iter().map(sanitize).collect()),
        PayloadValue::Map(entries) => {
            let mut map = Map::new();
            for (key, item) in entries {
                map.insert(key.clone(), sanitize(item));
            }
            Value::Object(map)
        }
    }
}
