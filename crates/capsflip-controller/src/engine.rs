//! The engine adapter seam.
//!
//! The controller never touches frames or buffers. It drives an [`Engine`]:
//! state requests, a stage lookup, a format assignment, and a blocking wait
//! for the next event.

use async_trait::async_trait;

use capsflip_types::{CapsflipError, FormatDescriptor, PipelineState};

use crate::events::{EngineEvent, EventKind};

/// How the engine accepted a state request. The change itself is confirmed
/// later through a `StateChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Success,
    Async,
    /// Accepted, but live sources do not preroll in `Paused`.
    NoPreroll,
}

/// The engine refused a state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeFailure {
    pub target: PipelineState,
}

impl From<StateChangeFailure> for CapsflipError {
    fn from(failure: StateChangeFailure) -> Self {
        CapsflipError::StateChangeFailed {
            target: failure.target,
        }
    }
}

#[async_trait]
pub trait Engine: Send {
    /// Handle to a named stage. Only held for the duration of one
    /// reconfiguration.
    type Stage: Send;

    /// Name of the pipeline object itself, as it appears in event sources.
    fn pipeline_name(&self) -> &str;

    /// Request a pipeline-wide state transition.
    fn set_state(&mut self, target: PipelineState) -> Result<StateChange, StateChangeFailure>;

    /// Find a stage by name.
    fn lookup_stage(&mut self, name: &str) -> Option<Self::Stage>;

    /// Replace the stage's active format. Fire and forget: the engine reports
    /// renegotiation trouble, if any, as a later event.
    fn set_stage_format(&mut self, stage: &Self::Stage, format: &FormatDescriptor);

    /// Wait for the next event of one of `kinds`. Returns `None` once the
    /// event source is closed.
    async fn next_event(&mut self, kinds: &[EventKind]) -> Option<EngineEvent>;

    /// Release the pipeline. Called once, after the final `Null` request.
    fn release(&mut self) {}
}
