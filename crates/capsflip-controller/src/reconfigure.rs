//! One-shot stream format change on a named stage.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use capsflip_types::{
    CapsflipError, FormatDescriptor, PipelineState, ReconfigureStrategy, Result,
};

use crate::engine::Engine;

/// What a reconfiguration attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconfigureOutcome {
    /// The new format was handed to the stage.
    Applied,
    /// The pipeline refused to halt, so nothing was assigned.
    HaltFailed,
    /// An earlier attempt already spent the guard.
    AlreadyAttempted,
}

/// Applies the target format to one stage, at most once per run.
#[derive(Debug, Clone)]
pub struct Reconfigurator {
    strategy: ReconfigureStrategy,
    stage_name: String,
    target: FormatDescriptor,
    done: bool,
}

impl Reconfigurator {
    pub fn new(
        strategy: ReconfigureStrategy,
        stage_name: impl Into<String>,
        target: FormatDescriptor,
    ) -> Self {
        Self {
            strategy,
            stage_name: stage_name.into(),
            target,
            done: false,
        }
    }

    pub fn strategy(&self) -> ReconfigureStrategy {
        self.strategy
    }

    /// `true` once an attempt has been made, whatever its result.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Run the configured strategy against `engine`.
    ///
    /// The guard is spent by the first call even when the halt is refused.
    /// A missing stage is returned as [`CapsflipError::StageNotFound`].
    pub fn apply<E: Engine>(&mut self, engine: &mut E) -> Result<ReconfigureOutcome> {
        if self.done {
            return Ok(ReconfigureOutcome::AlreadyAttempted);
        }
        self.done = true;

        match self.strategy {
            ReconfigureStrategy::Live => {
                self.assign(engine)?;
                Ok(ReconfigureOutcome::Applied)
            }
            ReconfigureStrategy::Halted => {
                info!("Setting pipeline to NULL before the format change");
                if let Err(failure) = engine.set_state(PipelineState::Null) {
                    warn!("Failed to stop pipeline: {}", CapsflipError::from(failure));
                    return Ok(ReconfigureOutcome::HaltFailed);
                }

                self.assign(engine)?;

                info!("Setting pipeline to PLAYING after the format change");
                if let Err(failure) = engine.set_state(PipelineState::Playing) {
                    warn!("Failed to restart pipeline: {}", CapsflipError::from(failure));
                }
                Ok(ReconfigureOutcome::Applied)
            }
        }
    }

    fn assign<E: Engine>(&self, engine: &mut E) -> Result<()> {
        let stage = engine
            .lookup_stage(&self.stage_name)
            .ok_or_else(|| CapsflipError::StageNotFound {
                name: self.stage_name.clone(),
            })?;
        info!(stage = %self.stage_name, "Assigning format {}", self.target);
        engine.set_stage_format(&stage, &self.target);
        Ok(())
    }
}
