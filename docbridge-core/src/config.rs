//! Adapter-level configuration shared by every registered collection.

use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;

/// Options that influence how criteria are compiled and how collections are registered.
///
/// Missing keys fall back to their defaults, so an empty JSON object is a valid config.
///
/// # Example
///
/// ```ignore
/// use docbridge::config::AdapterConfig;
///
/// let config = AdapterConfig::from_json(r#"{ "caseSensitive": false }"#)?;
/// assert!(!config.case_sensitive);
/// assert!(config.install_indexes);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterConfig {
    /// When false, string equality and pattern operators match case-insensitively.
    pub case_sensitive: bool,
    /// When true, `register_collection` hands derived index specs to the store.
    pub install_indexes: bool,
}

impl AdapterConfig {
    /// Parses a config from a JSON string.
    pub fn from_json(input: &str) -> AdapterResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            install_indexes: true,
        }
    }
}
