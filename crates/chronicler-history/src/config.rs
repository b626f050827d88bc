/// Configuration for the history engine.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time window in milliseconds after the last coalesced edit before the
/// chain closes and the next edit starts a new record.
const DEFAULT_COALESCE_DELAY_MS: u64 = 312;

/// Label shown for records and groups recorded without a name.
const DEFAULT_UNNAMED_LABEL: &str = "unnamed record";

/// Configuration for a [`History`](crate::History).
///
/// Serializable so an editor can embed it as a section of its own config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Coalescing window in milliseconds used by `coalesce` when no explicit delay is given.
    pub coalesce_delay_ms: u64,
    /// Label used by `list()` for unnamed entries.
    pub unnamed_label: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            coalesce_delay_ms: DEFAULT_COALESCE_DELAY_MS,
            unnamed_label: DEFAULT_UNNAMED_LABEL.to_string(),
        }
    }
}

impl HistoryConfig {
    /// The default coalescing window as a `Duration`.
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    /// Loads config from a JSON file at `path`.
    ///
    /// Returns defaults on any error (missing file, parse error, etc.).
    /// Fields absent from the file keep their default values.
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HistoryConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse history config at {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read history config at {}: {e}", path.display());
                Self::default()
            }
        }
    }
}
