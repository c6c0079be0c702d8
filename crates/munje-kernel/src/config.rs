//! Editor configuration.
//!
//! Timing knobs for autosave and export plus a few interaction thresholds.
//! Loaded from RON; every field has a default, so an empty file (or no file)
//! yields the stock behavior.
//!
//! ```ron
//! (
//!     autosave_debounce_ms: 2000,
//!     export_settle_ms: 100,
//!     export_max_attempts: 3,
//!     export_backoff_ms: [150, 300],
//!     drag_threshold_px: 5.0,
//!     auto_confirm: false,
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label used for a parent group with no children yet.
pub const DEFAULT_PLACEHOLDER_LABEL: &str = "모문제";

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing editor config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid editor config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Quiet period before a scheduled autosave fires.
    pub autosave_debounce_ms: u64,
    /// Delay between the group write and the first export attempt.
    pub export_settle_ms: u64,
    /// Total export attempts, including the first.
    pub export_max_attempts: u32,
    /// Sleep before each retry; the last step repeats if attempts outnumber steps.
    pub export_backoff_ms: Vec<u64>,
    /// Drags shorter than this (screen px, larger axis) are clicks.
    pub drag_threshold_px: f64,
    /// Export every newly created group straight away.
    pub auto_confirm: bool,
    /// Parent label before any child exists.
    pub placeholder_label: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 2000,
            export_settle_ms: 100,
            export_max_attempts: 3,
            export_backoff_ms: vec![150, 300],
            drag_threshold_px: 5.0,
            auto_confirm: false,
            placeholder_label: DEFAULT_PLACEHOLDER_LABEL.to_string(),
        }
    }
}

impl EditorConfig {
    /// Parse from RON text and validate.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "export_max_attempts must be at least 1".into(),
            ));
        }
        if self.drag_threshold_px < 0.0 {
            return Err(ConfigError::Invalid(
                "drag_threshold_px must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn export_settle(&self) -> Duration {
        Duration::from_millis(self.export_settle_ms)
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let idx = (retry.saturating_sub(1) as usize).min(self.export_backoff_ms.len().saturating_sub(1));
        Duration::from_millis(self.export_backoff_ms.get(idx).copied().unwrap_or(0))
    }
}
