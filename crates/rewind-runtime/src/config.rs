#![forbid(unsafe_code)]

//! Configuration for the undo engine.
//!
//! [`UndoConfig`] captures the history caps as data so hosts can tune them
//! without recompiling. With the `config` feature it loads from TOML or JSON.
//!
//! # Loading
//!
//! ```toml
//! # rewind.toml
//! default_max_count = 200
//!
//! [contexts]
//! editor = 500
//! inspector = 20
//! ```
//!
//! ```rust,ignore
//! let config = UndoConfig::from_toml_file("rewind.toml")?;
//! let service = UndoService::with_config(&config);
//! ```
//!
//! # Defaults
//!
//! `UndoConfig::default()` leaves every context unbounded, which is the same
//! behavior as `UndoService::new()`.

use std::collections::BTreeMap;
#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::undo::HistoryConfig;

/// History caps for an [`UndoService`](crate::undo::UndoService).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct UndoConfig {
    /// Cap applied to every context without its own entry.
    pub default_max_count: usize,

    /// Per-context caps, keyed by context name.
    pub contexts: BTreeMap<String, usize>,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            default_max_count: HistoryConfig::default().max_count,
            contexts: BTreeMap::new(),
        }
    }
}

impl UndoConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, UndoConfigError> {
        toml::from_str(s).map_err(UndoConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, UndoConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(UndoConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, UndoConfigError> {
        serde_json::from_str(s).map_err(UndoConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, UndoConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(UndoConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Set the cap for contexts without their own entry.
    #[must_use]
    pub fn with_default_max_count(mut self, max_count: usize) -> Self {
        self.default_max_count = max_count;
        self
    }

    /// Set the cap for one named context.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, max_count: usize) -> Self {
        self.contexts.insert(key.into(), max_count);
        self
    }

    /// Validate all parameters.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.default_max_count == 0 {
            errors.push("default_max_count must be at least 1".to_string());
        }
        for (key, max_count) in &self.contexts {
            if key.trim().is_empty() {
                errors.push("context names must not be blank".to_string());
            }
            if *max_count == 0 {
                errors.push(format!("contexts.{key} must be at least 1"));
            }
        }

        errors
    }

    /// Validate, turning any problem into an error.
    pub fn validated(self) -> Result<Self, UndoConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(UndoConfigError::Validation(errors))
        }
    }

    /// History configuration for contexts without their own entry.
    #[must_use]
    pub fn to_history_config(&self) -> HistoryConfig {
        HistoryConfig::new(self.default_max_count)
    }
}

/// Errors that can occur when loading an undo configuration.
#[derive(Debug)]
pub enum UndoConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "config")]
    Toml(toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "config")]
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for UndoConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "config")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            #[cfg(feature = "config")]
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for UndoConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "config")]
            Self::Toml(e) => Some(e),
            #[cfg(feature = "config")]
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
