//! Run report: the final outcome of one controller run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use capsflip_types::{CapsflipError, ReconfigureStrategy, Result};

use crate::reconfigure::ReconfigureOutcome;

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// End of stream with no engine error.
    Completed,
    /// The engine posted an error event.
    EngineError { source_name: String, message: String },
    /// A fatal condition stopped the run.
    Aborted { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub strategy: ReconfigureStrategy,
    pub outcome: RunOutcome,
    pub error_occurred: bool,
    pub events_processed: usize,
    pub reconfiguration: Option<ReconfigureOutcome>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    /// Report for a run whose pipeline could not be built.
    pub fn construction_failed(strategy: ReconfigureStrategy, err: &CapsflipError) -> Self {
        let now = chrono::Utc::now();
        Self {
            strategy,
            outcome: RunOutcome::Aborted {
                reason: err.to_string(),
            },
            error_occurred: false,
            events_processed: 0,
            reconfiguration: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Success iff no engine error was seen and the stream ended normally.
    pub fn is_success(&self) -> bool {
        !self.error_occurred && self.outcome == RunOutcome::Completed
    }

    /// Serialize this report to JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a report from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let report: Self = serde_json::from_str(&data)?;
        Ok(report)
    }
}
