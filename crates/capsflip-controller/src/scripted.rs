//! An engine that replays a fixed event script and records every call.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capsflip_types::{FormatDescriptor, PipelineState, Result};

use crate::config::DEFAULT_STAGE;
use crate::engine::{Engine, StateChange, StateChangeFailure};
use crate::events::{EngineEvent, EventKind};

/// One call the controller made into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineCall {
    SetState(PipelineState),
    LookupStage(String),
    SetStageFormat {
        stage: String,
        format: FormatDescriptor,
    },
    NextEvent,
    Release,
}

pub struct ScriptedEngine {
    pipeline_name: String,
    events: VecDeque<EngineEvent>,
    stages: HashSet<String>,
    failing_targets: HashSet<PipelineState>,
    calls: Vec<EngineCall>,
}

impl ScriptedEngine {
    pub const PIPELINE_NAME: &'static str = "pipeline0";

    /// Replay `events` in order. The default reconfiguration stage exists.
    pub fn new(events: impl IntoIterator<Item = EngineEvent>) -> Self {
        Self {
            pipeline_name: Self::PIPELINE_NAME.to_string(),
            events: events.into_iter().collect(),
            stages: HashSet::from([DEFAULT_STAGE.to_string()]),
            failing_targets: HashSet::new(),
            calls: Vec::new(),
        }
    }

    /// Parse a JSON array of events.
    pub fn from_json(json: &str) -> Result<Self> {
        let events: Vec<EngineEvent> = serde_json::from_str(json)?;
        Ok(Self::new(events))
    }

    /// Read a JSON event script from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn with_stage(mut self, name: impl Into<String>) -> Self {
        self.stages.insert(name.into());
        self
    }

    pub fn without_stage(mut self, name: &str) -> Self {
        self.stages.remove(name);
        self
    }

    /// Refuse every request to enter `target`.
    pub fn fail_state_change(mut self, target: PipelineState) -> Self {
        self.failing_targets.insert(target);
        self
    }

    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    pub fn format_assignments(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, EngineCall::SetStageFormat { .. }))
            .count()
    }

    /// Events not yet handed out.
    pub fn remaining_events(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    type Stage = String;

    fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    fn set_state(&mut self, target: PipelineState) -> std::result::Result<StateChange, StateChangeFailure> {
        self.calls.push(EngineCall::SetState(target));
        if self.failing_targets.contains(&target) {
            return Err(StateChangeFailure { target });
        }
        Ok(StateChange::Success)
    }

    fn lookup_stage(&mut self, name: &str) -> Option<String> {
        self.calls.push(EngineCall::LookupStage(name.to_string()));
        self.stages.get(name).cloned()
    }

    fn set_stage_format(&mut self, stage: &String, format: &FormatDescriptor) {
        self.calls.push(EngineCall::SetStageFormat {
            stage: stage.clone(),
            format: format.clone(),
        });
    }

    async fn next_event(&mut self, kinds: &[EventKind]) -> Option<EngineEvent> {
        self.calls.push(EngineCall::NextEvent);
        while let Some(event) = self.events.pop_front() {
            if kinds.contains(&event.kind()) {
                return Some(event);
            }
        }
        None
    }

    fn release(&mut self) {
        self.calls.push(EngineCall::Release);
    }
}
