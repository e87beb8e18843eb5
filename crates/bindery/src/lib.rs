//! Command-object resolution and format dispatch for request handlers.
//!
//! `bindery` turns an inbound request into typed, populated, dependency-injected
//! "command objects" for handler logic, and picks one response handler per
//! negotiated format. It does not parse HTTP, route URLs, or serialize
//! response bodies; those belong to the surrounding framework.
//!
//! # Features
//!
//! - **Command objects**: Load-by-id for persistent entities, default
//!   construction otherwise, method-aware data binding, autowiring
//! - **Graceful failure**: Load failures become request errors; other failures
//!   become an error-annotated default instance unless the controller
//!   registered a handler for them
//! - **Request context**: Ordered per-request attributes with error and
//!   view-selection accessors
//! - **Format dispatch**: Exactly one handler per negotiated format
//!
//! # Binding Rules
//!
//! | Identifier | Type | Method | Instance | Bound |
//! |------------|------|--------|----------|-------|
//! | present | entity | PATCH/POST/PUT | loaded | yes |
//! | present | entity | other | loaded | no |
//! | absent | entity | POST | new | yes |
//! | absent | entity | other | none | - |
//! | - | plain | any | new | yes |
//!
//! # Usage
//!
//! ```rust
//! use bindery::{CommandObject, CommandObjectResolver, HttpMethod, Request, RequestContext};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct SearchForm { query: String, page: u32 }
//!
//! impl CommandObject for SearchForm {}
//!
//! let resolver = CommandObjectResolver::builder("SearchController").build();
//!
//! let request = Request::new(HttpMethod::Get)
//!     .with_param("query", "gears")
//!     .with_param("page", "2");
//! let mut ctx = RequestContext::new(request);
//!
//! let form: SearchForm = resolver.resolve(&mut ctx, "search")?.unwrap();
//! assert_eq!(form.query, "gears");
//! assert_eq!(form.page, 2);
//! # Ok::<(), bindery::ResolveError>(())
//! ```

mod binder;
mod config;
mod context;
mod entity;
mod error;
mod errors;
mod exception;
mod format;
mod inject;
mod resolver;
mod source;

pub use binder::{BindingFilter, DataBinder, JsonBinder};

pub use config::{ConfigError, ResolverConfig};

pub use context::{
    Attributes, HttpMethod, ModelAndView, ParseMethodError, Request, RequestContext, Response,
    ERRORS_KEY, MODEL_AND_VIEW_KEY,
};

pub use entity::{EntityClassifier, EntityLoader, EntityRegistry, EntityStore, TargetType};

pub use error::{ErrorKind, LoadError, ResolveError};

pub use errors::{ErrorCollection, FieldError};

pub use exception::{ExceptionHandlerLookup, ExceptionHandlers};

pub use format::{
    AcceptNegotiator, FormatDispatcher, FormatHandlers, FormatNegotiator, MimeTypes, ALL_FORMAT,
    WILDCARD_FORMAT,
};

pub use inject::{Dependencies, Dependency, DependencyInjector};

pub use resolver::{CommandObject, CommandObjectResolver, ResolverBuilder};

pub use source::{
    normalize_identifier, BindingSource, BindingSourceFactory, FallbackIdentifierExtractor,
    Identifier, NestedPrefixScoper, PathIdentifier, PrefixScoper, RequestBindingSourceFactory,
    IDENTIFIER_FIELD,
};
