//! Field extraction helpers for exchange JSON payloads.
//!
//! Exchanges disagree on whether numbers travel as JSON numbers or strings,
//! so every numeric accessor accepts both.

use canonical::parse_decimal;
use gateway_core::GatewayError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

pub fn field<'a>(v: &'a Value, key: &str) -> Result<&'a Value, GatewayError> {
    match v.get(key) {
        Some(Value::Null) | None => Err(GatewayError::malformed(format!("missing field {key}"))),
        Some(x) => Ok(x),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn text(v: &Value, key: &str) -> Result<String, GatewayError> {
    scalar_text(field(v, key)?)
        .ok_or_else(|| GatewayError::malformed(format!("field {key} is not text")))
}

pub fn opt_text(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(scalar_text)
        .filter(|s| !s.is_empty())
}

pub fn value_decimal(v: &Value) -> Option<Decimal> {
    let raw = scalar_text(v)?;
    if raw.is_empty() {
        return None;
    }
    parse_decimal(&raw).ok()
}

pub fn decimal(v: &Value, key: &str) -> Result<Decimal, GatewayError> {
    value_decimal(field(v, key)?)
        .ok_or_else(|| GatewayError::malformed(format!("field {key} is not a decimal")))
}

pub fn opt_decimal(v: &Value, key: &str) -> Option<Decimal> {
    v.get(key).and_then(value_decimal)
}

/// Decimal or zero when the exchange omits the field.
pub fn decimal_or_zero(v: &Value, key: &str) -> Decimal {
    opt_decimal(v, key).unwrap_or(Decimal::ZERO)
}

pub fn value_millis(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

pub fn millis(v: &Value, key: &str) -> Result<u64, GatewayError> {
    value_millis(field(v, key)?)
        .ok_or_else(|| GatewayError::malformed(format!("field {key} is not a timestamp")))
}

pub fn opt_millis(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(value_millis)
}

pub fn uint(v: &Value, key: &str) -> Result<u32, GatewayError> {
    decimal(v, key)?
        .trunc()
        .to_u32()
        .ok_or_else(|| GatewayError::malformed(format!("field {key} is not an integer")))
}

pub fn boolean(v: &Value, key: &str) -> Option<bool> {
    match v.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

pub fn side(v: &Value, key: &str) -> Result<canonical::Side, GatewayError> {
    text(v, key)?
        .parse()
        .map_err(|e: anyhow::Error| GatewayError::malformed(e.to_string()))
}

pub fn as_array(v: &Value) -> Result<&Vec<Value>, GatewayError> {
    v.as_array()
        .ok_or_else(|| GatewayError::malformed("expected an array"))
}

pub fn array<'a>(v: &'a Value, key: &str) -> Result<&'a Vec<Value>, GatewayError> {
    field(v, key)?
        .as_array()
        .ok_or_else(|| GatewayError::malformed(format!("field {key} is not an array")))
}

/// Map every element of an array payload.
pub fn list<T>(
    v: &Value,
    map: impl Fn(&Value) -> Result<T, GatewayError>,
) -> Result<Vec<T>, GatewayError> {
    as_array(v)?.iter().map(map).collect()
}

/// First element of an array payload; an empty array is a domain error
/// carrying `empty`.
pub fn first<'a>(v: &'a Value, empty: &str) -> Result<&'a Value, GatewayError> {
    as_array(v)?
        .first()
        .ok_or_else(|| GatewayError::domain(empty))
}

/// `[t, o, h, l, c, v, ...]` candle row.
pub fn candle_row(row: &Value) -> Result<canonical::Candle, GatewayError> {
    let cell = |i: usize| {
        row.get(i)
            .ok_or_else(|| GatewayError::malformed(format!("candle row missing column {i}")))
    };
    let dec = |i: usize| {
        cell(i).and_then(|c| {
            value_decimal(c).ok_or_else(|| GatewayError::malformed(format!("candle column {i}")))
        })
    };
    Ok(canonical::Candle {
        open_time: cell(0).and_then(|c| {
            value_millis(c).ok_or_else(|| GatewayError::malformed("candle open time"))
        })?,
        open: dec(1)?,
        high: dec(2)?,
        low: dec(3)?,
        close: dec(4)?,
        volume: dec(5)?,
    })
}
