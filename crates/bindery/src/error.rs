//! Failures raised while resolving command objects.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The class of a [`ResolveError`].
///
/// Controllers register interest in kinds through
/// [`ExceptionHandlers`](crate::ExceptionHandlers). Matching is exact: a
/// handler for `Custom("TypeMismatch")` does not see `Binding` failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Building the binding source or copying request data onto the instance failed.
    Binding,
    /// Dependency injection failed.
    Injection,
    /// The instance could not be constructed or converted.
    Instantiation,
    /// Application-defined kind raised by a custom binder or injector.
    Custom(Cow<'static, str>),
}

impl ErrorKind {
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        ErrorKind::Custom(name.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Binding => write!(f, "binding"),
            ErrorKind::Injection => write!(f, "injection"),
            ErrorKind::Instantiation => write!(f, "instantiation"),
            ErrorKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Error raised by a resolution step that is not handled inline.
#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct ResolveError {
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    #[source]
    pub source: Option<BoxedSource>,
}

impl ResolveError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Binding, message)
    }

    pub fn injection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Injection, message)
    }

    pub fn instantiation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Instantiation, message)
    }

    /// Sets the source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        self.source = Some(source.into());
        self
    }
}

/// Failure to load a persistent entity by identifier.
///
/// Load failures never abort resolution; they are recorded in the request's
/// [`ErrorCollection`](crate::ErrorCollection).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid id '{id}' for {entity}: {message}")]
    InvalidId {
        entity: &'static str,
        id: String,
        message: String,
    },

    #[error("no loader registered for {0}")]
    NoLoader(&'static str),

    #[error("loader for {0} produced an instance of another type")]
    TypeMismatch(&'static str),

    #[error("{0}")]
    Store(#[source] BoxedSource),
}

impl LoadError {
    pub fn store<E>(error: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        LoadError::Store(error.into())
    }
}
