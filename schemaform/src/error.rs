//! Error types for the form runtime.
//!
//! Only a small part of the runtime is fallible. Load failures are reported
//! as `error` events, binding mistakes are logged and ignored, and validation
//! problems are collected as data. What remains here are the failures a caller
//! has to handle explicitly.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the form runtime.
#[derive(Error, Debug)]
pub enum FormError {
    /// The rendered markup violates the array container contract.
    ///
    /// Continuing would corrupt array bookkeeping, so this is the one class of
    /// error raised out of mutation operations.
    #[error("array container `{container}` is malformed: {reason}")]
    Structural { container: String, reason: String },

    /// Reading a schema, data or config file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML document could not be parsed.
    #[error("invalid TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// The file extension does not map to a supported format.
    #[error("unsupported file extension: {0:?}")]
    UnsupportedFormat(String),

    /// A schema URL was given but remote loading is not compiled in.
    #[error("remote schema loading is disabled, cannot fetch {0}")]
    RemoteDisabled(String),

    /// Fetching a remote schema failed.
    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FormError {
    pub(crate) fn structural(container: impl Into<String>, reason: impl Into<String>) -> Self {
        FormError::Structural {
            container: container.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormError>;
