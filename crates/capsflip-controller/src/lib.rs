//! Pipeline controller: start a media pipeline, watch its events, apply a
//! one-shot stream format change once it is playing, and tear it down.
//!
//! The controller talks to the media framework only through the [`Engine`]
//! trait. Three engines ship with the crate: [`SimEngine`] simulates a launch
//! description in-process, [`ScriptedEngine`] replays recorded events, and
//! `GstEngine` (feature `gstreamer`) drives a real GStreamer pipeline.

pub mod config;
pub mod controller;
pub mod engine;
pub mod events;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod reconfigure;
pub mod report;
pub mod scripted;
pub mod sim;

pub use config::{
    default_target, resolve_target, ControllerConfig, DEFAULT_STAGE, DEFAULT_TARGET_FRAMERATE,
    DEFAULT_TOPOLOGY,
};
pub use controller::{run_pipeline, Controller, ControllerPhase};
pub use engine::{Engine, StateChange, StateChangeFailure};
pub use events::{EngineEvent, EventKind};
#[cfg(feature = "gstreamer")]
pub use gst::GstEngine;
pub use reconfigure::{ReconfigureOutcome, Reconfigurator};
pub use report::{RunOutcome, RunReport};
pub use scripted::{EngineCall, ScriptedEngine};
pub use sim::{default_registry, ElementRole, FactoryInfo, FactoryRegistry, SimEngine};
