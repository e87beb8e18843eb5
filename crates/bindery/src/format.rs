//! Format-based response dispatch.
//!
//! [`FormatDispatcher::with_format`] runs exactly one handler out of several
//! registered per format name. Choosing the format is the job of a
//! [`FormatNegotiator`]; the dispatcher only invokes what was chosen.
//!
//! # Negotiation Order ([`AcceptNegotiator`])
//!
//! 1. An explicit `format` request parameter (`?format=json`)
//! 2. The `Accept` header, highest q-value first, mapped through [`MimeTypes`]
//! 3. `all` when neither is present or the header accepts `*/*`
//!
//! A requested format of `all` selects the first registered handler. A
//! format with no handler falls back to the `*` handler, if registered.
//!
//! ```rust
//! use bindery::{FormatDispatcher, FormatHandlers, HttpMethod, Request, RequestContext};
//!
//! let request = Request::new(HttpMethod::Get).with_header("Accept", "application/xml");
//! let mut ctx = RequestContext::new(request);
//!
//! let chosen = FormatDispatcher::default().with_format(
//!     &mut ctx,
//!     FormatHandlers::new()
//!         .on("html", |_ctx| "html")
//!         .on("xml", |ctx| {
//!             ctx.response.write("<widget/>");
//!             "xml"
//!         }),
//! );
//! assert_eq!(chosen, Some("xml"));
//! assert_eq!(ctx.response.body, "<widget/>");
//! ```

use crate::context::{Request, RequestContext};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const FORMAT_TARGET: &str = "bindery::format";

/// Format name meaning "any representation".
pub const ALL_FORMAT: &str = "all";

/// Handler key used when no registered format matches.
pub const WILDCARD_FORMAT: &str = "*";

/// Mapping from format name to the mime types that select it.
///
/// The first mime type listed for a format is its primary type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeTypes {
    formats: IndexMap<String, Vec<String>>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        Self::empty()
            .with("html", ["text/html", "application/xhtml+xml"])
            .with("xml", ["text/xml", "application/xml"])
            .with("text", ["text/plain"])
            .with("js", ["text/javascript"])
            .with("rss", ["application/rss+xml"])
            .with("atom", ["application/atom+xml"])
            .with("css", ["text/css"])
            .with("csv", ["text/csv"])
            .with("json", ["application/json", "text/json"])
            .with("hal", ["application/hal+json", "application/hal+xml"])
            .with("form", ["application/x-www-form-urlencoded"])
            .with("multipartForm", ["multipart/form-data"])
    }
}

impl MimeTypes {
    pub fn empty() -> Self {
        Self {
            formats: IndexMap::new(),
        }
    }

    /// Adds or replaces the mime types for `format`.
    pub fn with<I, S>(mut self, format: impl Into<String>, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formats.insert(
            format.into(),
            mime_types.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Finds the format for a mime type, ignoring parameters and case.
    pub fn format_for(&self, mime_type: &str) -> Option<&str> {
        let essence = mime_type.split(';').next().unwrap_or("").trim();
        if essence == "*/*" {
            return Some(ALL_FORMAT);
        }
        self.formats
            .iter()
            .find(|(_, types)| types.iter().any(|t| t.eq_ignore_ascii_case(essence)))
            .map(|(format, _)| format.as_str())
    }

    /// Primary mime type of `format`.
    pub fn primary_type(&self, format: &str) -> Option<&str> {
        self.formats
            .get(format)
            .and_then(|types| types.first())
            .map(String::as_str)
    }

    pub fn contains(&self, format: &str) -> bool {
        self.formats.contains_key(format)
    }
}

/// Chooses which registered format serves a request.
pub trait FormatNegotiator: Send + Sync {
    /// Picks one of `available` (handler keys in registration order), or
    /// `None` to dispatch nothing.
    fn negotiate(&self, request: &Request, available: &[&str]) -> Option<String>;

    /// Content type to announce for `format`, if known.
    fn content_type(&self, _format: &str) -> Option<String> {
        None
    }
}

/// Default negotiator: `format` parameter, then `Accept` header.
#[derive(Debug, Clone)]
pub struct AcceptNegotiator {
    mime_types: MimeTypes,
    format_param: String,
}

impl Default for AcceptNegotiator {
    fn default() -> Self {
        Self::new(MimeTypes::default())
    }
}

impl AcceptNegotiator {
    pub fn new(mime_types: MimeTypes) -> Self {
        Self {
            mime_types,
            format_param: "format".to_string(),
        }
    }

    pub fn format_param(mut self, name: impl Into<String>) -> Self {
        self.format_param = name.into();
        self
    }

    /// Formats the request asks for, most preferred first.
    pub fn requested_formats(&self, request: &Request) -> Vec<String> {
        if let Some(format) = request.param_text(&self.format_param) {
            let format = format.trim();
            if !format.is_empty() {
                return vec![format.to_string()];
            }
        }

        let Some(accept) = request.header("accept") else {
            return vec![ALL_FORMAT.to_string()];
        };

        let mut ranked: Vec<(f32, &str)> = accept
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let mime = parts.next()?.trim();
                if mime.is_empty() {
                    return None;
                }
                let quality = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((quality, mime))
            })
            .filter(|(quality, _)| *quality > 0.0)
            .collect();
        // stable: equal q-values keep header order
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut formats: Vec<String> = Vec::new();
        for (_, mime) in ranked {
            if let Some(format) = self.mime_types.format_for(mime) {
                if !formats.iter().any(|f| f == format) {
                    formats.push(format.to_string());
                }
            }
        }
        if formats.is_empty() {
            formats.push(ALL_FORMAT.to_string());
        }
        formats
    }
}

impl FormatNegotiator for AcceptNegotiator {
    fn negotiate(&self, request: &Request, available: &[&str]) -> Option<String> {
        for requested in self.requested_formats(request) {
            if requested == ALL_FORMAT {
                return available
                    .iter()
                    .find(|f| **f != WILDCARD_FORMAT)
                    .or_else(|| available.first())
                    .map(|f| f.to_string());
            }
            if available.contains(&requested.as_str()) {
                return Some(requested);
            }
        }
        available
            .iter()
            .find(|f| **f == WILDCARD_FORMAT)
            .map(|f| f.to_string())
    }

    fn content_type(&self, format: &str) -> Option<String> {
        self.mime_types.primary_type(format).map(str::to_string)
    }
}

type FormatHandler<'a, R> = Box<dyn FnOnce(&mut RequestContext) -> R + 'a>;

/// Handlers keyed by format name, in registration order.
pub struct FormatHandlers<'a, R> {
    handlers: IndexMap<String, FormatHandler<'a, R>>,
}

impl<'a, R> Default for FormatHandlers<'a, R> {
    fn default() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }
}

impl<'a, R> FormatHandlers<'a, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `format`, replacing an earlier one in place.
    pub fn on<F>(mut self, format: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce(&mut RequestContext) -> R + 'a,
    {
        self.handlers.insert(format.into(), Box::new(handler));
        self
    }

    /// Registers the fallback handler for formats with no handler of their own.
    pub fn otherwise<F>(self, handler: F) -> Self
    where
        F: FnOnce(&mut RequestContext) -> R + 'a,
    {
        self.on(WILDCARD_FORMAT, handler)
    }

    pub fn formats(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<R> fmt::Debug for FormatHandlers<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatHandlers")
            .field("formats", &self.formats())
            .finish()
    }
}

/// Invokes the handler registered for the negotiated format.
#[derive(Clone)]
pub struct FormatDispatcher {
    negotiator: Arc<dyn FormatNegotiator>,
}

impl Default for FormatDispatcher {
    fn default() -> Self {
        Self::new(AcceptNegotiator::default())
    }
}

impl fmt::Debug for FormatDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDispatcher").finish_non_exhaustive()
    }
}

impl FormatDispatcher {
    pub fn new<N: FormatNegotiator + 'static>(negotiator: N) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
        }
    }

    pub fn from_shared(negotiator: Arc<dyn FormatNegotiator>) -> Self {
        Self { negotiator }
    }

    /// Runs the one handler matching the request's negotiated format.
    ///
    /// Returns `None`, having run nothing, when negotiation selects no
    /// registered handler. The chosen format is recorded on the response;
    /// its content type is set unless a handler already set one.
    pub fn with_format<R>(
        &self,
        ctx: &mut RequestContext,
        mut handlers: FormatHandlers<'_, R>,
    ) -> Option<R> {
        let available = handlers.formats();
        let Some(format) = self.negotiator.negotiate(&ctx.request, &available) else {
            debug!(target: FORMAT_TARGET, ?available, "no handler matches the negotiated format");
            return None;
        };
        let Some(handler) = handlers.handlers.shift_remove(&format) else {
            debug!(target: FORMAT_TARGET, %format, "negotiator chose an unregistered format");
            return None;
        };

        debug!(target: FORMAT_TARGET, %format, "dispatching format handler");
        ctx.response.format = Some(format.clone());
        let result = handler(ctx);
        if ctx.response.content_type.is_none() {
            ctx.response.content_type = self.negotiator.content_type(&format);
        }
        Some(result)
    }
}
