//! Conversion of raw values to the declared leaf types
//!
//! Command-line values arrive as strings: collections use `a,b,c`,
//! mappings `k=v,k2=v2`, optional leaves accept `none`/`null`.
//! File values arrive in the file format's native structures.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::schema::{LeafKind, LeafShape, ScalarKind};

/// Convert a command-line string for the leaf at `path`.
pub(crate) fn from_cli(leaf: &LeafShape, raw: &str, path: &str) -> Result<Value> {
    let fail = || Error::coercion(path, leaf.type_name(), format!("{raw:?}"));

    if leaf.nullable && matches!(raw.trim().to_ascii_lowercase().as_str(), "none" | "null") {
        return Ok(Value::Null);
    }

    let value = match leaf.kind {
        LeafKind::Scalar(kind) => scalar_from_str(kind, raw).ok_or_else(fail)?,
        LeafKind::Sequence(kind) => Value::Array(
            split_items(raw)
                .map(|item| scalar_from_str(kind, item).ok_or_else(fail))
                .collect::<Result<_>>()?,
        ),
        LeafKind::Set(kind) => Value::Array(dedup(
            split_items(raw)
                .map(|item| scalar_from_str(kind, item).ok_or_else(fail))
                .collect::<Result<_>>()?,
        )),
        LeafKind::Mapping(kind) => {
            let mut map = Map::new();
            for item in split_items(raw) {
                let (key, value) = item.split_once('=').ok_or_else(fail)?;
                let value = scalar_from_str(kind, value.trim()).ok_or_else(fail)?;
                map.insert(key.trim().to_string(), value);
            }
            Value::Object(map)
        }
    };

    check_choices(leaf, value, path)
}

/// Convert a value read from a configuration file (or a declared default)
/// for the leaf at `path`.
pub(crate) fn from_file(leaf: &LeafShape, value: &Value, path: &str) -> Result<Value> {
    let fail = || Error::coercion(path, leaf.type_name(), value.to_string());

    if value.is_null() {
        return if leaf.nullable { Ok(Value::Null) } else { Err(fail()) };
    }

    let value = match leaf.kind {
        LeafKind::Scalar(kind) => scalar_from_value(kind, value).ok_or_else(fail)?,
        LeafKind::Sequence(kind) => Value::Array(
            value
                .as_array()
                .ok_or_else(fail)?
                .iter()
                .map(|item| scalar_from_value(kind, item).ok_or_else(fail))
                .collect::<Result<_>>()?,
        ),
        LeafKind::Set(kind) => Value::Array(dedup(
            value
                .as_array()
                .ok_or_else(fail)?
                .iter()
                .map(|item| scalar_from_value(kind, item).ok_or_else(fail))
                .collect::<Result<_>>()?,
        )),
        LeafKind::Mapping(kind) => Value::Object(
            value
                .as_object()
                .ok_or_else(fail)?
                .iter()
                .map(|(k, v)| Ok((k.clone(), scalar_from_value(kind, v).ok_or_else(fail)?)))
                .collect::<Result<_>>()?,
        ),
    };

    check_choices(leaf, value, path)
}

fn split_items(raw: &str) -> impl Iterator<Item = &str> {
    let raw = raw.trim();
    raw.split(',')
        .map(str::trim)
        .filter(move |_| !raw.is_empty())
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// Whether a numeric value fits the declared width.
fn in_range(kind: ScalarKind, value: &Value) -> bool {
    match kind {
        ScalarKind::Integer { bits } if (1..64).contains(&bits) => {
            let max = (1_i64 << (bits - 1)) - 1;
            value.as_i64().is_some_and(|n| (-max - 1..=max).contains(&n))
        }
        ScalarKind::Unsigned { bits } if bits < 64 => value.as_u64().is_some_and(|n| n >> bits == 0),
        ScalarKind::Float { bits: 32 } => value
            .as_f64()
            .is_some_and(|f| f.abs() <= f64::from(f32::MAX)),
        _ => true,
    }
}

fn scalar_from_str(kind: ScalarKind, raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let value = match kind {
        ScalarKind::Integer { .. } => trimmed.parse::<i64>().ok().map(Value::from),
        ScalarKind::Unsigned { .. } => trimmed.parse::<u64>().ok().map(Value::from),
        ScalarKind::Float { .. } => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from),
        ScalarKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        ScalarKind::String | ScalarKind::Path => Some(Value::String(raw.to_string())),
    };
    value.filter(|v| in_range(kind, v))
}

fn scalar_from_value(kind: ScalarKind, value: &Value) -> Option<Value> {
    let value = match kind {
        ScalarKind::Integer { .. } => value.as_i64().map(Value::from),
        ScalarKind::Unsigned { .. } => value.as_u64().map(Value::from),
        ScalarKind::Float { .. } => value.as_f64().map(Value::from),
        ScalarKind::Bool => value.as_bool().map(Value::Bool),
        ScalarKind::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ScalarKind::Path => value.as_str().map(|s| Value::String(s.to_string())),
    };
    value.filter(|v| in_range(kind, v))
}

fn check_choices(leaf: &LeafShape, value: Value, path: &str) -> Result<Value> {
    match &leaf.choices {
        Some(choices) if !value.is_null() && !choices.contains(&value) => {
            let allowed: Vec<String> = choices.iter().map(Value::to_string).collect();
            Err(Error::coercion(
                path,
                format!("one of {}", allowed.join(", ")),
                value.to_string(),
            ))
        }
        _ => Ok(value),
    }
}
