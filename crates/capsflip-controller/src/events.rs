//! Engine event model.
//!
//! The engine reports everything that happens inside the pipeline as an
//! [`EngineEvent`]. The controller only ever asks for the kinds listed in
//! [`EventKind::SUBSCRIBED`], and handles each of them explicitly.

use capsflip_types::PipelineState;
use serde::{Deserialize, Serialize};

/// The kinds of engine events the controller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EndOfStream,
    Error,
    Warning,
    Info,
    StateChanged,
}

impl EventKind {
    /// Every kind the controller dispatches on.
    pub const SUBSCRIBED: &'static [EventKind] = &[
        EventKind::EndOfStream,
        EventKind::Error,
        EventKind::Warning,
        EventKind::Info,
        EventKind::StateChanged,
    ];
}

/// Events emitted by the engine, one at a time, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    EndOfStream,
    Error {
        source_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debug: Option<String>,
    },
    Warning {
        source_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debug: Option<String>,
    },
    Info {
        source_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debug: Option<String>,
    },
    StateChanged {
        source_name: String,
        old_state: PipelineState,
        new_state: PipelineState,
    },
}

impl EngineEvent {
    pub fn error(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineEvent::Error {
            source_name: source_name.into(),
            message: message.into(),
            debug: None,
        }
    }

    pub fn warning(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineEvent::Warning {
            source_name: source_name.into(),
            message: message.into(),
            debug: None,
        }
    }

    pub fn info(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineEvent::Info {
            source_name: source_name.into(),
            message: message.into(),
            debug: None,
        }
    }

    pub fn state_changed(
        source_name: impl Into<String>,
        old_state: PipelineState,
        new_state: PipelineState,
    ) -> Self {
        EngineEvent::StateChanged {
            source_name: source_name.into(),
            old_state,
            new_state,
        }
    }

    /// Attach debug detail to an error, warning or info event. Other kinds
    /// are returned unchanged.
    pub fn with_debug(mut self, detail: impl Into<String>) -> Self {
        match &mut self {
            EngineEvent::Error { debug, .. }
            | EngineEvent::Warning { debug, .. }
            | EngineEvent::Info { debug, .. } => *debug = Some(detail.into()),
            EngineEvent::EndOfStream | EngineEvent::StateChanged { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::EndOfStream => EventKind::EndOfStream,
            EngineEvent::Error { .. } => EventKind::Error,
            EngineEvent::Warning { .. } => EventKind::Warning,
            EngineEvent::Info { .. } => EventKind::Info,
            EngineEvent::StateChanged { .. } => EventKind::StateChanged,
        }
    }

    /// Name of the pipeline object that posted the event, if any.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            EngineEvent::EndOfStream => None,
            EngineEvent::Error { source_name, .. }
            | EngineEvent::Warning { source_name, .. }
            | EngineEvent::Info { source_name, .. }
            | EngineEvent::StateChanged { source_name, .. } => Some(source_name),
        }
    }
}
