//! Resolver configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```rust
//! use bindery::ResolverConfig;
//!
//! let config = ResolverConfig::from_json_str(r#"{ "identifier_param": "widgetId" }"#)?;
//! assert_eq!(config.identifier_param, "widgetId");
//! assert_eq!(config.format_param, "format");
//! # Ok::<(), bindery::ConfigError>(())
//! ```

use crate::format::{AcceptNegotiator, MimeTypes};
use crate::source::{PathIdentifier, IDENTIFIER_FIELD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Request parameter consulted when the binding source carries no identifier.
    pub identifier_param: String,
    /// Request parameter that forces a response format.
    pub format_param: String,
    pub mime_types: MimeTypes,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            identifier_param: IDENTIFIER_FIELD.to_string(),
            format_param: "format".to_string(),
            mime_types: MimeTypes::default(),
        }
    }
}

impl ResolverConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn fallback_identifier(&self) -> PathIdentifier {
        PathIdentifier::new(self.identifier_param.clone())
    }

    pub fn negotiator(&self) -> AcceptNegotiator {
        AcceptNegotiator::new(self.mime_types.clone()).format_param(self.format_param.clone())
    }
}
