//! Caller-registered exception handling.
//!
//! A controller that wants to handle a failure itself registers the
//! [`ErrorKind`] it handles. Resolution then propagates that failure instead
//! of recovering from it.

use crate::error::ErrorKind;
use std::collections::{HashMap, HashSet};

/// Answers "does `owner` declare a handler for failures of this kind?".
pub trait ExceptionHandlerLookup: Send + Sync {
    fn has_handler(&self, owner: &str, kind: &ErrorKind) -> bool;
}

/// Explicit handler table keyed by owner name.
///
/// Matching is exact on the kind: registering `Custom("Parse")` does not
/// claim `Binding` failures, and there is no wildcard.
#[derive(Debug, Clone, Default)]
pub struct ExceptionHandlers {
    table: HashMap<String, HashSet<ErrorKind>>,
}

impl ExceptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, owner: impl Into<String>, kind: ErrorKind) {
        self.table.entry(owner.into()).or_default().insert(kind);
    }

    pub fn handle(mut self, owner: impl Into<String>, kind: ErrorKind) -> Self {
        self.register(owner, kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl ExceptionHandlerLookup for ExceptionHandlers {
    fn has_handler(&self, owner: &str, kind: &ErrorKind) -> bool {
        self.table
            .get(owner)
            .is_some_and(|kinds| kinds.contains(kind))
    }
}
