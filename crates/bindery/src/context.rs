//! Request-scoped context.
//!
//! Every inbound request gets exactly one [`RequestContext`]. It owns the
//! request, the response being built, and an [`Attributes`] store that lives
//! exactly as long as the request does.
//!
//! # State Management: Attributes
//!
//! | Key | Value | Accessors |
//! |-----|-------|-----------|
//! | [`ERRORS_KEY`] | [`ErrorCollection`] | `has_errors`, `errors`, `set_errors` |
//! | [`MODEL_AND_VIEW_KEY`] | [`ModelAndView`] | `model_and_view`, `set_model_and_view` |
//!
//! Any other key is free for application use:
//!
//! ```rust
//! use bindery::{HttpMethod, Request, RequestContext};
//!
//! struct UserScope { user_id: u64 }
//!
//! let mut ctx = RequestContext::new(Request::new(HttpMethod::Get));
//! ctx.attributes.insert("user", UserScope { user_id: 42 });
//!
//! let scope = ctx.attributes.get_required::<UserScope>("user")?;
//! assert_eq!(scope.user_id, 42);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::errors::ErrorCollection;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Attribute key holding the active [`ErrorCollection`].
pub const ERRORS_KEY: &str = "ERRORS";

/// Attribute key holding the current [`ModelAndView`].
pub const MODEL_AND_VIEW_KEY: &str = "MODEL_AND_VIEW";

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl HttpMethod {
    /// Returns the canonical upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Returns true for the methods allowed to overwrite a loaded entity
    /// with request data (`PATCH`, `POST`, `PUT`).
    pub fn binds_existing(&self) -> bool {
        matches!(self, HttpMethod::Patch | HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a method name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown HTTP method: {0}")]
pub struct ParseMethodError(pub String);

impl FromStr for HttpMethod {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            "TRACE" => Ok(HttpMethod::Trace),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Inbound request as seen by command-object resolution.
///
/// Parsing of the raw wire request happens elsewhere; this carries the
/// already-decoded parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub method: HttpMethod,
    /// Query and form parameters, in arrival order.
    pub params: IndexMap<String, Value>,
    /// Parameters captured by the route (e.g. `/widgets/{id}`).
    pub path_params: IndexMap<String, String>,
    /// Header names are stored lower-cased.
    pub headers: IndexMap<String, String>,
    /// Decoded request body, if any.
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns a request parameter rendered as text.
    pub fn param_text(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Outbound response under construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    /// Format chosen by [`FormatDispatcher`](crate::FormatDispatcher), if any.
    pub format: Option<String>,
    pub body: String,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: None,
            format: None,
            body: String::new(),
        }
    }
}

impl Response {
    /// Appends text to the response body.
    pub fn write(&mut self, text: impl AsRef<str>) {
        self.body.push_str(text.as_ref());
    }
}

/// Opaque view-selection result produced by request handling logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAndView {
    pub view: Option<String>,
    pub model: IndexMap<String, Value>,
}

impl ModelAndView {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: Some(view.into()),
            model: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model.insert(key.into(), value.into());
        self
    }
}

/// Ordered, request-scoped key/value store.
///
/// Keys keep insertion order. Writing an existing key replaces its value in
/// place and hands the previous value back.
///
/// # Warning: Clone Behavior
///
/// Cloning produces an empty store: `Box<dyn Any>` values cannot be cloned
/// generically.
#[derive(Default)]
pub struct Attributes {
    map: IndexMap<String, Box<dyn Any + Send>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `key`.
    ///
    /// Returns the previous value if it had the same type.
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, val: T) -> Option<T> {
        self.map
            .insert(key.into(), Box::new(val))
            .and_then(downcast_owned)
    }

    /// Returns `None` if the key is missing or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.map.get(key).and_then(|boxed| boxed.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.map.get_mut(key).and_then(|boxed| boxed.downcast_mut())
    }

    /// Like [`get`](Self::get), but reports a missing value as an error.
    pub fn get_required<T: Any>(&self, key: &str) -> Result<&T, anyhow::Error> {
        self.get::<T>(key).ok_or_else(|| {
            anyhow::anyhow!(
                "Attribute missing: no {} stored under '{}'",
                std::any::type_name::<T>(),
                key
            )
        })
    }

    /// Removes a key, keeping the order of the remaining entries.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.map
            .shift_remove(key)
            .and_then(downcast_owned)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

fn downcast_owned<T: Any>(boxed: Box<dyn Any + Send>) -> Option<T> {
    boxed.downcast().ok().map(|b| *b)
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("keys", &self.map.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Clone for Attributes {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Everything scoped to a single inbound request.
///
/// Created by the surrounding framework when a request arrives and dropped
/// when it completes. Nothing in here is shared between requests.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub request: Request,
    pub response: Response,
    pub attributes: Attributes,
}

impl RequestContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: Response::default(),
            attributes: Attributes::new(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.request.method
    }

    /// True iff an error collection is attached and it holds at least one error.
    pub fn has_errors(&self) -> bool {
        self.errors().is_some_and(ErrorCollection::has_errors)
    }

    pub fn errors(&self) -> Option<&ErrorCollection> {
        self.attributes.get(ERRORS_KEY)
    }

    pub fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        self.attributes.get_mut(ERRORS_KEY)
    }

    /// Attaches `errors`, replacing any collection already attached.
    pub fn set_errors(&mut self, errors: ErrorCollection) {
        self.attributes.insert(ERRORS_KEY, errors);
    }

    pub fn take_errors(&mut self) -> Option<ErrorCollection> {
        self.attributes.remove(ERRORS_KEY)
    }

    pub fn model_and_view(&self) -> Option<&ModelAndView> {
        self.attributes.get(MODEL_AND_VIEW_KEY)
    }

    pub fn set_model_and_view(&mut self, mv: ModelAndView) {
        self.attributes.insert(MODEL_AND_VIEW_KEY, mv);
    }

    pub fn clear_model_and_view(&mut self) -> Option<ModelAndView> {
        self.attributes.remove(MODEL_AND_VIEW_KEY)
    }
}
