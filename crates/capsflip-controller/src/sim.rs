//! A deterministic in-process engine built from a launch description.
//!
//! No media flows. The simulation models what the controller can observe:
//! state changes stepping through every intermediate state, end of stream
//! after the sink's `num-buffers`, and a negotiation failure when caps change
//! under a running element that cannot renegotiate.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tracing::debug;

use capsflip_launch::{Caps, Topology};
use capsflip_types::{CapsflipError, FormatDescriptor, PipelineState, Result};

use crate::engine::{Engine, StateChange, StateChangeFailure};
use crate::events::{EngineEvent, EventKind};

// ---------------------------------------------------------------------------
// Element factories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    Source,
    Filter,
    Encoder,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryInfo {
    pub role: ElementRole,
    /// Whether the element accepts new caps while running.
    pub renegotiates: bool,
}

impl FactoryInfo {
    pub const fn new(role: ElementRole) -> Self {
        Self {
            role,
            renegotiates: true,
        }
    }

    pub const fn fixed(role: ElementRole) -> Self {
        Self {
            role,
            renegotiates: false,
        }
    }
}

/// Element factories the simulation knows how to instantiate.
pub struct FactoryRegistry {
    factories: HashMap<String, FactoryInfo>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: impl Into<String>, info: FactoryInfo) {
        self.factories.insert(factory.into(), info);
    }

    pub fn get(&self, factory: &str) -> Option<FactoryInfo> {
        self.factories.get(factory).copied()
    }

    pub fn has(&self, factory: &str) -> bool {
        self.factories.contains_key(factory)
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_registry() -> FactoryRegistry {
    use ElementRole::*;

    let mut reg = FactoryRegistry::new();
    reg.register("videotestsrc", FactoryInfo::new(Source));
    for filter in [
        "capsfilter",
        "videoconvert",
        "videoscale",
        "videorate",
        "nvvidconv",
        "queue",
        "identity",
        "h264parse",
    ] {
        reg.register(filter, FactoryInfo::new(Filter));
    }
    reg.register("x264enc", FactoryInfo::new(Encoder));
    // Hardware encoders allocate device buffers for the negotiated format.
    reg.register("nvv4l2h264enc", FactoryInfo::fixed(Encoder));
    reg.register("nvv4l2h265enc", FactoryInfo::fixed(Encoder));
    for sink in ["fakesink", "filesink", "autovideosink"] {
        reg.register(sink, FactoryInfo::new(Sink));
    }
    reg
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SimElement {
    name: String,
    info: FactoryInfo,
    caps: Option<Caps>,
}

pub struct SimEngine {
    elements: Vec<SimElement>,
    state: PipelineState,
    live: bool,
    num_buffers: Option<i64>,
    queue: VecDeque<EngineEvent>,
    failing_targets: HashSet<PipelineState>,
    released: bool,
}

impl SimEngine {
    pub const PIPELINE_NAME: &'static str = "pipeline0";

    /// Build a pipeline from `description` using the built-in factories.
    pub fn launch(description: &str) -> Result<Self> {
        Self::launch_with(description, &default_registry())
    }

    pub fn launch_with(description: &str, registry: &FactoryRegistry) -> Result<Self> {
        let topology = capsflip_launch::parse(description)?;
        Self::from_topology(&topology, registry)
    }

    pub fn from_topology(topology: &Topology, registry: &FactoryRegistry) -> Result<Self> {
        let elements = topology
            .elements
            .iter()
            .map(|decl| {
                let info = registry
                    .get(&decl.factory)
                    .ok_or_else(|| CapsflipError::UnknownElement {
                        factory: decl.factory.clone(),
                    })?;
                if decl.name == Self::PIPELINE_NAME {
                    return Err(CapsflipError::Construction(format!(
                        "element name '{}' is reserved for the pipeline",
                        decl.name
                    )));
                }
                let caps = topology.caps_of(&decl.name).cloned();
                Ok(SimElement {
                    name: decl.name.clone(),
                    info,
                    caps,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (Some(first), Some(last)) = (elements.first(), elements.last()) else {
            return Err(CapsflipError::Construction("empty pipeline".into()));
        };
        if first.info.role != ElementRole::Source {
            return Err(CapsflipError::Construction(format!(
                "'{}' cannot start a pipeline, it is not a source",
                first.name
            )));
        }
        if last.info.role != ElementRole::Sink {
            return Err(CapsflipError::Construction(format!(
                "'{}' cannot end a pipeline, it is not a sink",
                last.name
            )));
        }

        let live = topology
            .source()
            .and_then(|source| source.bool_property("is-live"))
            .unwrap_or(false);
        let num_buffers = topology
            .sink()
            .and_then(|sink| sink.int_property("num-buffers"))
            .filter(|n| *n >= 0);

        debug!(
            elements = elements.len(),
            live,
            ?num_buffers,
            "simulated pipeline constructed"
        );

        Ok(Self {
            elements,
            state: PipelineState::Null,
            live,
            num_buffers,
            queue: VecDeque::new(),
            failing_targets: HashSet::new(),
            released: false,
        })
    }

    /// Refuse every request to enter `target`.
    pub fn fail_state_change(mut self, target: PipelineState) -> Self {
        self.failing_targets.insert(target);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Caps currently configured on the named element.
    pub fn stage_caps(&self, name: &str) -> Option<&Caps> {
        self.elements
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.caps.as_ref())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn source_name(&self) -> &str {
        self.elements
            .first()
            .map(|e| e.name.as_str())
            .unwrap_or(Self::PIPELINE_NAME)
    }

    /// Queue one step's state changes, sink first, then the pipeline itself.
    fn step(&mut self, next: PipelineState) {
        let old = self.state;
        for element in self.elements.iter().rev() {
            self.queue
                .push_back(EngineEvent::state_changed(&element.name, old, next));
        }
        self.queue
            .push_back(EngineEvent::state_changed(Self::PIPELINE_NAME, old, next));
        self.state = next;
    }
}

#[async_trait]
impl Engine for SimEngine {
    type Stage = usize;

    fn pipeline_name(&self) -> &str {
        Self::PIPELINE_NAME
    }

    fn set_state(&mut self, target: PipelineState) -> std::result::Result<StateChange, StateChangeFailure> {
        if self.failing_targets.contains(&target) {
            return Err(StateChangeFailure { target });
        }

        if target == PipelineState::Null {
            // Nobody reads a stopped pipeline's bus.
            self.queue.clear();
            self.state = PipelineState::Null;
            return Ok(StateChange::Success);
        }

        while let Some(next) = self.state.step_towards(target) {
            self.step(next);
        }
        if self.state == PipelineState::Playing && self.num_buffers.is_some() {
            self.queue.push_back(EngineEvent::EndOfStream);
        }

        Ok(match target {
            PipelineState::Paused | PipelineState::Playing if self.live => StateChange::NoPreroll,
            PipelineState::Paused | PipelineState::Playing => StateChange::Async,
            PipelineState::Null | PipelineState::Ready => StateChange::Success,
        })
    }

    fn lookup_stage(&mut self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }

    fn set_stage_format(&mut self, stage: &usize, format: &FormatDescriptor) {
        let index = *stage;
        let new_caps = Caps::from(format);
        let Some(element) = self.elements.get_mut(index) else {
            return;
        };
        let changed = element.caps.as_ref() != Some(&new_caps);
        element.caps = Some(new_caps);

        if !changed || self.state != PipelineState::Playing {
            return;
        }

        let blocker = self.elements[index + 1..]
            .iter()
            .find(|e| !e.info.renegotiates);
        if let Some(blocker) = blocker {
            let detail = format!(
                "streaming stopped, reason not-negotiated (-4): {} cannot accept {} while running",
                blocker.name, format
            );
            let error = EngineEvent::error(self.source_name(), "Internal data stream error.")
                .with_debug(detail);
            self.queue.push_front(error);
        }
    }

    async fn next_event(&mut self, kinds: &[EventKind]) -> Option<EngineEvent> {
        tokio::task::yield_now().await;
        while let Some(event) = self.queue.pop_front() {
            if kinds.contains(&event.kind()) {
                return Some(event);
            }
        }
        None
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_target, DEFAULT_STAGE, DEFAULT_TOPOLOGY};

    async fn drain(engine: &mut SimEngine) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = engine.next_event(EventKind::SUBSCRIBED).await {
            events.push(event);
        }
        events
    }

    #[test]
    fn unknown_factory_fails_construction() {
        let err = SimEngine::launch("videotestsrc ! bogusenc ! fakesink").err().unwrap();
        assert!(matches!(err, CapsflipError::UnknownElement { ref factory } if factory == "bogusenc"));
    }

    #[test]
    fn parse_errors_propagate() {
        let err = SimEngine::launch("videotestsrc ! ! fakesink").err().unwrap();
        assert!(matches!(err, CapsflipError::ParseError { .. }));
    }

    #[test]
    fn custom_registry() {
        let mut reg = FactoryRegistry::new();
        reg.register("src", FactoryInfo::new(ElementRole::Source));
        reg.register("sink", FactoryInfo::new(ElementRole::Sink));
        assert!(reg.has("src"));
        assert!(SimEngine::launch_with("src ! sink", &reg).is_ok());
        assert!(SimEngine::launch_with("videotestsrc ! sink", &reg).is_err());
    }

    #[test]
    fn chain_must_run_from_source_to_sink() {
        let err = SimEngine::launch("videoconvert ! fakesink").err().unwrap();
        assert!(matches!(err, CapsflipError::Construction(ref m) if m.contains("videoconvert0")));

        let err = SimEngine::launch("videotestsrc ! x264enc").err().unwrap();
        assert!(matches!(err, CapsflipError::Construction(ref m) if m.contains("x264enc0")));
    }

    #[test]
    fn pipeline_name_is_reserved() {
        let err = SimEngine::launch("videotestsrc ! identity name=pipeline0 ! fakesink")
            .err()
            .unwrap();
        assert!(matches!(err, CapsflipError::Construction(ref m) if m.contains("pipeline0")));
    }

    #[tokio::test]
    async fn playing_steps_through_every_state_then_ends() {
        let mut engine = SimEngine::launch("videotestsrc ! fakesink num-buffers=10").unwrap();

        assert_eq!(engine.set_state(PipelineState::Playing), Ok(StateChange::Async));
        let events = drain(&mut engine).await;

        // Two elements plus the pipeline, three steps, then EOS.
        assert_eq!(events.len(), 10);
        assert_eq!(
            events[0],
            EngineEvent::state_changed("fakesink0", PipelineState::Null, PipelineState::Ready)
        );
        assert_eq!(
            events[8],
            EngineEvent::state_changed("pipeline0", PipelineState::Paused, PipelineState::Playing)
        );
        assert_eq!(events[9], EngineEvent::EndOfStream);
        assert_eq!(engine.state(), PipelineState::Playing);
    }

    #[tokio::test]
    async fn live_source_does_not_preroll() {
        let mut engine = SimEngine::launch(DEFAULT_TOPOLOGY).unwrap();
        assert_eq!(engine.set_state(PipelineState::Playing), Ok(StateChange::NoPreroll));
        assert_eq!(engine.set_state(PipelineState::Ready), Ok(StateChange::Success));
    }

    #[tokio::test]
    async fn without_num_buffers_the_source_closes() {
        let mut engine = SimEngine::launch("videotestsrc ! fakesink").unwrap();
        engine.set_state(PipelineState::Playing).unwrap();
        let events = drain(&mut engine).await;
        assert!(!events.contains(&EngineEvent::EndOfStream));
        assert_eq!(engine.next_event(EventKind::SUBSCRIBED).await, None);
    }

    #[tokio::test]
    async fn null_flushes_pending_events() {
        let mut engine = SimEngine::launch("videotestsrc ! fakesink num-buffers=1").unwrap();
        engine.set_state(PipelineState::Playing).unwrap();
        engine.set_state(PipelineState::Null).unwrap();
        assert_eq!(engine.state(), PipelineState::Null);
        assert_eq!(engine.next_event(EventKind::SUBSCRIBED).await, None);
    }

    #[test]
    fn failing_target_is_refused() {
        let mut engine = SimEngine::launch("videotestsrc ! fakesink")
            .unwrap()
            .fail_state_change(PipelineState::Null);
        assert_eq!(
            engine.set_state(PipelineState::Null),
            Err(StateChangeFailure {
                target: PipelineState::Null
            })
        );
    }

    #[tokio::test]
    async fn live_caps_change_before_fixed_encoder_fails_negotiation() {
        let mut engine = SimEngine::launch(DEFAULT_TOPOLOGY).unwrap();
        engine.set_state(PipelineState::Playing).unwrap();

        let stage = engine.lookup_stage(DEFAULT_STAGE).unwrap();
        engine.set_stage_format(&stage, &default_target());

        match engine.next_event(EventKind::SUBSCRIBED).await {
            Some(EngineEvent::Error {
                source_name,
                debug,
                ..
            }) => {
                assert_eq!(source_name, "videotestsrc0");
                assert!(debug.unwrap().contains("not-negotiated"));
            }
            other => panic!("expected a negotiation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn caps_change_while_stopped_is_accepted() {
        let mut engine = SimEngine::launch(DEFAULT_TOPOLOGY).unwrap();
        let stage = engine.lookup_stage(DEFAULT_STAGE).unwrap();
        engine.set_stage_format(&stage, &default_target());

        assert_eq!(engine.next_event(EventKind::SUBSCRIBED).await, None);
        assert_eq!(
            engine.stage_caps(DEFAULT_STAGE),
            Some(&Caps::from(&default_target()))
        );
    }

    #[tokio::test]
    async fn renegotiating_downstream_accepts_live_change() {
        let mut engine = SimEngine::launch(
            "videotestsrc ! capsfilter name=f caps=video/x-raw,format=RGBA,width=640,height=480,framerate=15/1 ! x264enc ! fakesink num-buffers=5",
        )
        .unwrap();
        engine.set_state(PipelineState::Playing).unwrap();
        let stage = engine.lookup_stage("f").unwrap();
        engine.set_stage_format(&stage, &default_target());

        let events = drain(&mut engine).await;
        assert!(events.iter().all(|e| e.kind() != EventKind::Error));
    }

    #[test]
    fn lookup_of_missing_stage() {
        let mut engine = SimEngine::launch("videotestsrc ! fakesink").unwrap();
        assert_eq!(engine.lookup_stage("src_caps_filter"), None);
        assert_eq!(engine.lookup_stage("fakesink0"), Some(1));
    }
}
