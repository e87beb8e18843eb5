//! Data binding: copying binding-source fields onto a command object.
//!
//! Binding operates on the JSON form of the instance. The resolver
//! serializes the command object, lets a [`DataBinder`] mutate the value,
//! and deserializes the result back.

use crate::error::ResolveError;
use crate::source::BindingSource;
use serde_json::{Map, Number, Value};
use std::collections::HashSet;

/// Which fields a binder may touch.
///
/// `exclude` always wins. When `include` is set, only the listed fields bind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingFilter {
    pub include: Option<HashSet<String>>,
    pub exclude: HashSet<String>,
}

impl BindingFilter {
    /// Binds every field.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include
            .get_or_insert_with(HashSet::new)
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn allows(&self, field: &str) -> bool {
        if self.exclude.contains(field) {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.contains(field))
    }
}

/// Copies fields from a binding source onto the JSON form of an instance.
pub trait DataBinder: Send + Sync {
    fn bind(
        &self,
        target: &mut Value,
        source: &BindingSource,
        filter: &BindingFilter,
    ) -> Result<(), ResolveError>;
}

/// Default binder: top-level field assignment.
///
/// Textual request values are coerced to the shape of the field they
/// replace when the existing value is a number or a boolean and the text
/// parses. A `null` field (an unset `Option`) takes an integer, float or
/// `true`/`false` when the text reads as one, and blank text leaves it
/// `null`. Everything else is assigned as-is; type errors surface when the
/// bound value is converted back into the command object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBinder;

impl DataBinder for JsonBinder {
    fn bind(
        &self,
        target: &mut Value,
        source: &BindingSource,
        filter: &BindingFilter,
    ) -> Result<(), ResolveError> {
        let object = match target {
            Value::Object(object) => object,
            other => {
                return Err(ResolveError::binding(format!(
                    "cannot bind fields onto a non-object value: {}",
                    other
                )))
            }
        };

        for (name, raw) in source.iter() {
            if !filter.allows(name) {
                continue;
            }
            let value = coerce(object, name, raw);
            object.insert(name.clone(), value);
        }
        Ok(())
    }
}

fn coerce(object: &Map<String, Value>, name: &str, raw: &Value) -> Value {
    let (Some(existing), Value::String(text)) = (object.get(name), raw) else {
        return raw.clone();
    };
    let text = text.trim();
    let coerced = match existing {
        Value::Bool(_) => match text {
            "true" | "on" | "1" => Some(Value::Bool(true)),
            "false" | "off" | "0" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(_) => parse_integer(text).or_else(|| parse_float(text)),
        // an unset optional field: guess from the text alone
        Value::Null if text.is_empty() => Some(Value::Null),
        Value::Null => parse_integer(text)
            .or_else(|| parse_float(text))
            .or_else(|| text.parse::<bool>().ok().map(Value::Bool)),
        _ => None,
    };
    coerced.unwrap_or_else(|| raw.clone())
}

/// Integer text, including `u64` values past `i64::MAX` and whole floats
/// such as `3.0`.
fn parse_integer(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::from(n));
    }
    let float = text.parse::<f64>().ok()?;
    if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 {
        Some(Value::from(float as i64))
    } else {
        None
    }
}

fn parse_float(text: &str) -> Option<Value> {
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
