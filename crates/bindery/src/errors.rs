//! Error collection attached to requests and command objects.
//!
//! An [`ErrorCollection`] is an ordered list of [`FieldError`]s. It is the
//! thing callers inspect after resolution to learn what went wrong; nothing
//! in here aborts a request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single recorded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Where the error came from: a field name, a parameter prefix, or a
    /// message code such as `WidgetController.commandObject.widget.error`.
    pub key: String,
    /// Human-readable message.
    pub message: String,
    /// Value or object the error refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

impl FieldError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            object: None,
        }
    }

    pub fn with_object(mut self, object: impl Into<Value>) -> Self {
        self.object = Some(object.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Ordered collection of errors. `has_errors()` is true iff it is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCollection {
    errors: Vec<FieldError>,
}

impl ErrorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records an error under `key`.
    pub fn reject(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(key, message));
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// All errors recorded under `key`, in insertion order.
    pub fn for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.key == key)
    }

    pub fn first(&self) -> Option<&FieldError> {
        self.errors.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.errors.iter()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

impl Extend<FieldError> for ErrorCollection {
    fn extend<I: IntoIterator<Item = FieldError>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl FromIterator<FieldError> for ErrorCollection {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ErrorCollection {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorCollection {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
