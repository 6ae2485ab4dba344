//! Forgiving field deserializers for wire payloads.
//!
//! Remote snapshots are not trusted to carry the right JSON types. These
//! helpers coerce what they can and fall back to neutral values; range
//! clamping happens afterwards in `Entity::normalize`.

use super::layer::DEFAULT_LAYER_ID;
use crate::clock::Millis;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Any number or numeric string; anything else becomes NaN.
pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value).unwrap_or(f64::NAN))
}

/// Like [`number`], but non-numbers become 0 instead of NaN.
pub fn coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value).filter(|v| v.is_finite()).unwrap_or(0.0))
}

/// Epoch milliseconds, rounding fractional values; invalid input becomes 0.
pub fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Millis, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_millis(&value).unwrap_or(0))
}

pub(crate) fn value_to_millis(value: &Value) -> Option<Millis> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value_to_f64(value)
        .filter(|v| v.is_finite())
        .map(|v| v.round() as Millis)
}

/// Optional paint order; anything that is not an integer-like number is dropped.
pub fn z_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_millis(&value))
}

/// Strings pass through, numbers are stringified, everything else is empty.
pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// A non-empty string, or the default layer id.
pub fn layer_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => s,
        _ => DEFAULT_LAYER_ID.to_string(),
    })
}

pub fn default_layer_id() -> String {
    DEFAULT_LAYER_ID.to_string()
}

/// Booleans that default to `true` when missing or malformed.
pub fn flag_default_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_bool().unwrap_or(true))
}

/// Booleans that default to `false` when missing or malformed.
pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_bool().unwrap_or(false))
}

pub fn default_true() -> bool {
    true
}

/// Any value that fails to parse as `T` becomes `T::default()`.
pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A list whose malformed elements are skipped instead of failing the parent.
pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
