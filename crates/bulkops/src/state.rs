//! Saved snapshot of a bulk run.
//!
//! The snapshot is for inspection and audit. Loading it restores the
//! counters and the success/failure sets; it does not resume a run.

use crate::error::{Error, Result};
use crate::outcome::{RunCounters, RunResult};
use crate::range::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Flat key/value snapshot of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSavedState {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,

    #[serde(default)]
    pub success_ids: Vec<Id>,

    #[serde(default)]
    pub failed_ids: Vec<Id>,

    pub saved_at: DateTime<Utc>,
}

impl BulkSavedState {
    /// Snapshot a finished run.
    pub fn from_result(result: &RunResult<Id>) -> Self {
        Self {
            total: result.total(),
            succeeded: result.succeeded(),
            failed: result.failed(),
            skipped: result.skipped(),
            success_ids: result.succeeded_keys(),
            failed_ids: result.failed_keys(),
            saved_at: Utc::now(),
        }
    }

    pub fn counters(&self) -> RunCounters {
        RunCounters {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
        }
    }

    /// Write the snapshot as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| Error::Io {
                action: "Failed to create state directory",
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|source| Error::Io {
            action: "Failed to write state file",
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Saved bulk state to {}", path.display());
        Ok(())
    }

    /// Read a snapshot written by [`BulkSavedState::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Io {
            action: "Failed to read state file",
            path: path.to_path_buf(),
            source,
        })?;

        let state: Self = toml::from_str(&content).map_err(|e| Error::StateFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if state.succeeded + state.failed + state.skipped > state.total {
            return Err(Error::StateFormat {
                path: path.to_path_buf(),
                message: format!(
                    "counters exceed total ({} + {} + {} > {})",
                    state.succeeded, state.failed, state.skipped, state.total
                ),
            });
        }

        log::debug!("Loaded bulk state from {}", path.display());
        Ok(state)
    }
}
