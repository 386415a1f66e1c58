//! [`Engine`] over a real GStreamer pipeline.

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer::MessageView;
use tracing::warn;

use capsflip_types::{CapsflipError, FormatDescriptor, PipelineState, Result};

use crate::engine::{Engine, StateChange, StateChangeFailure};
use crate::events::{EngineEvent, EventKind};

pub struct GstEngine {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
    name: String,
}

impl GstEngine {
    /// Initialise GStreamer and build a pipeline from a launch description.
    pub fn launch(description: &str) -> Result<Self> {
        gst::init().map_err(|e| CapsflipError::Construction(e.to_string()))?;
        let element = gst::parse::launch(description)
            .map_err(|e| CapsflipError::Construction(e.to_string()))?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| CapsflipError::Construction("launch did not yield a pipeline".into()))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| CapsflipError::Construction("pipeline has no bus".into()))?;
        let name = pipeline.name().to_string();
        Ok(Self {
            pipeline,
            bus,
            name,
        })
    }
}

fn to_gst_state(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> PipelineState {
    match state {
        gst::State::Ready => PipelineState::Ready,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Playing => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

fn message_types(kinds: &[EventKind]) -> Vec<gst::MessageType> {
    kinds
        .iter()
        .map(|kind| match kind {
            EventKind::EndOfStream => gst::MessageType::Eos,
            EventKind::Error => gst::MessageType::Error,
            EventKind::Warning => gst::MessageType::Warning,
            EventKind::Info => gst::MessageType::Info,
            EventKind::StateChanged => gst::MessageType::StateChanged,
        })
        .collect()
}

fn to_event(msg: &gst::Message) -> Option<EngineEvent> {
    let source_name = msg
        .src()
        .map(|s| s.name().to_string())
        .unwrap_or_default();
    let event = match msg.view() {
        MessageView::Eos(_) => EngineEvent::EndOfStream,
        MessageView::Error(err) => EngineEvent::Error {
            source_name,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        MessageView::Warning(w) => EngineEvent::Warning {
            source_name,
            message: w.error().to_string(),
            debug: w.debug().map(|d| d.to_string()),
        },
        MessageView::Info(i) => EngineEvent::Info {
            source_name,
            message: i.error().to_string(),
            debug: i.debug().map(|d| d.to_string()),
        },
        MessageView::StateChanged(sc) => EngineEvent::state_changed(
            source_name,
            from_gst_state(sc.old()),
            from_gst_state(sc.current()),
        ),
        _ => return None,
    };
    Some(event)
}

#[async_trait]
impl Engine for GstEngine {
    type Stage = gst::Element;

    fn pipeline_name(&self) -> &str {
        &self.name
    }

    fn set_state(&mut self, target: PipelineState) -> std::result::Result<StateChange, StateChangeFailure> {
        match self.pipeline.set_state(to_gst_state(target)) {
            Ok(gst::StateChangeSuccess::Success) => Ok(StateChange::Success),
            Ok(gst::StateChangeSuccess::Async) => Ok(StateChange::Async),
            Ok(gst::StateChangeSuccess::NoPreroll) => Ok(StateChange::NoPreroll),
            Err(_) => Err(StateChangeFailure { target }),
        }
    }

    fn lookup_stage(&mut self, name: &str) -> Option<gst::Element> {
        self.pipeline.by_name(name)
    }

    fn set_stage_format(&mut self, stage: &gst::Element, format: &FormatDescriptor) {
        let caps = gst::Caps::builder(format.media_type.as_str())
            .field("format", format.format.as_str())
            .field("width", format.width)
            .field("height", format.height)
            .field(
                "framerate",
                gst::Fraction::new(format.framerate.numer, format.framerate.denom),
            )
            .build();
        stage.set_property("caps", &caps);
    }

    async fn next_event(&mut self, kinds: &[EventKind]) -> Option<EngineEvent> {
        let types = message_types(kinds);
        loop {
            let bus = self.bus.clone();
            let filter = types.clone();
            let msg = match tokio::task::spawn_blocking(move || {
                bus.timed_pop_filtered(gst::ClockTime::NONE, &filter)
            })
            .await
            {
                Ok(Some(msg)) => msg,
                Ok(None) => return None,
                Err(e) => {
                    warn!("bus wait task failed: {e}");
                    return None;
                }
            };
            if let Some(event) = to_event(&msg) {
                return Some(event);
            }
        }
    }

    fn release(&mut self) {
        // Drop queued messages.
        self.bus.set_flushing(true);
    }
}
