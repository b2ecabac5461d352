//! Runtime configuration and initial data files.
//!
//! Configuration is stored in TOML:
//!
//! ```toml
//! max_cascade_depth = 16
//! history_view_limit = 10
//! validate_on_submit = true
//! ```
//!
//! Missing keys take their defaults.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FormError, Result};

/// Tunables of a [`FormRuntime`](crate::FormRuntime).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Evaluation passes run for mutations queued by event handlers, per
    /// external stimulus. Queued mutations beyond this are dropped.
    pub max_cascade_depth: usize,
    /// Number of entries shown by the most-recent history view.
    pub history_view_limit: usize,
    /// Run validation before emitting `submit`.
    pub validate_on_submit: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_cascade_depth: 16,
            history_view_limit: 10,
            validate_on_submit: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| FormError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// The JSON Schema of the configuration itself.
    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(RuntimeConfig)).unwrap_or(Value::Null)
    }
}

/// Parse initial form data, choosing the format by file extension.
pub fn parse_data(content: &str, extension: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value = match extension {
        "json" => serde_json::from_str(content)?,
        "toml" => {
            let v: toml::Value = toml::from_str(content)?;
            serde_json::to_value(v)?
        }
        ext => return Err(FormError::UnsupportedFormat(ext.to_string())),
    };
    Ok(value)
}

/// Load initial form data from a `.json` or `.toml` file.
pub fn load_data(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    if !matches!(ext, "json" | "toml") {
        return Err(FormError::UnsupportedFormat(ext.to_string()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| FormError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("loading initial data from {}", path.display());
    parse_data(&content, ext)
}
