//! Binding sources and identifier extraction.
//!
//! A [`BindingSource`] is the ordered field map that gets copied onto a
//! command object. Three pluggable steps produce it:
//!
//! ```text
//! Request
//!   → BindingSourceFactory   (params or JSON body → BindingSource)
//!   → PrefixScoper           (narrow to the fields for one parameter name)
//!   → FallbackIdentifierExtractor (route `id` when the source has none)
//! ```

use crate::context::Request;
use crate::entity::TargetType;
use crate::error::ResolveError;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

/// Name of the identifier field inside a binding source.
pub const IDENTIFIER_FIELD: &str = "id";

/// Ordered mapping of field name to raw value, plus an optional identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSource {
    fields: IndexMap<String, Value>,
    identifier: Option<Value>,
}

impl BindingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a source from fields, taking the identifier from the `id` field.
    pub fn from_fields(fields: IndexMap<String, Value>) -> Self {
        let identifier = fields.get(IDENTIFIER_FIELD).cloned();
        Self { fields, identifier }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<Value>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The raw identifier, before normalization.
    pub fn identifier_value(&self) -> Option<&Value> {
        self.identifier.as_ref()
    }
}

/// A normalized, present entity identifier.
///
/// Textual identifiers are trimmed; `""` and `"null"` never become an
/// `Identifier`. See [`normalize_identifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier(Value);

impl Identifier {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.0 {
            Value::String(s) => s.parse().ok(),
            other => other.as_i64(),
        }
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Turns a raw identifier value into a present [`Identifier`] or `None`.
///
/// `null`, and text that trims to `""` or to the literal `"null"`
/// (case-sensitive), all mean "no identifier".
pub fn normalize_identifier(raw: Option<Value>) -> Option<Identifier> {
    match raw? {
        Value::Null => None,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "null" {
                None
            } else {
                Some(Identifier(Value::String(trimmed.to_string())))
            }
        }
        other => Some(Identifier(other)),
    }
}

/// Creates the unscoped binding source for a request.
pub trait BindingSourceFactory: Send + Sync {
    /// `Ok(None)` means the request carries nothing bindable.
    fn create(
        &self,
        target: &TargetType,
        request: &Request,
    ) -> Result<Option<BindingSource>, ResolveError>;
}

/// Narrows a binding source to the fields addressed to one parameter name.
pub trait PrefixScoper: Send + Sync {
    fn scope(&self, prefix: &str, source: BindingSource) -> BindingSource;
}

/// Supplies an identifier from outside the binding source (route or plain
/// request parameter).
pub trait FallbackIdentifierExtractor: Send + Sync {
    fn extract(&self, request: &Request) -> Option<Value>;
}

/// Default factory: a JSON object body wins over request parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBindingSourceFactory;

impl BindingSourceFactory for RequestBindingSourceFactory {
    fn create(
        &self,
        target: &TargetType,
        request: &Request,
    ) -> Result<Option<BindingSource>, ResolveError> {
        match &request.body {
            Some(Value::Object(body)) => {
                let fields = body.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Ok(Some(BindingSource::from_fields(fields)))
            }
            Some(Value::Null) | None => Ok(Some(BindingSource::from_fields(request.params.clone()))),
            Some(other) => Err(ResolveError::binding(format!(
                "request body for {} must be an object, got {}",
                target.name(),
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Default scoper for nested parameter naming.
///
/// For prefix `widget`, either a `widget` field holding an object or dotted
/// fields such as `widget.name` select the scoped fields. When neither is
/// present the whole source applies unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedPrefixScoper;

impl PrefixScoper for NestedPrefixScoper {
    fn scope(&self, prefix: &str, source: BindingSource) -> BindingSource {
        if let Some(Value::Object(nested)) = source.get(prefix) {
            let fields = nested.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            return BindingSource::from_fields(fields);
        }

        let dotted = format!("{}.", prefix);
        let fields: IndexMap<String, Value> = source
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(&dotted)
                    .map(|field| (field.to_string(), value.clone()))
            })
            .collect();

        if fields.is_empty() {
            source
        } else {
            BindingSource::from_fields(fields)
        }
    }
}

/// Default fallback: the identifier parameter captured by the route, then
/// the same name among query/form parameters.
#[derive(Debug, Clone)]
pub struct PathIdentifier {
    param: String,
}

impl PathIdentifier {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl Default for PathIdentifier {
    fn default() -> Self {
        Self::new(IDENTIFIER_FIELD)
    }
}

impl FallbackIdentifierExtractor for PathIdentifier {
    fn extract(&self, request: &Request) -> Option<Value> {
        request
            .path_params
            .get(&self.param)
            .map(|id| Value::String(id.clone()))
            .or_else(|| request.params.get(&self.param).cloned())
    }
}
