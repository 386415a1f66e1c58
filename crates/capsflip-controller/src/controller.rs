//! The controller state machine: start, dispatch events, reconfigure once,
//! tear down, and derive the outcome.

use tracing::{debug, error, info, warn};

use capsflip_types::{CapsflipError, PipelineState, Result};

use crate::config::ControllerConfig;
use crate::engine::Engine;
use crate::events::{EngineEvent, EventKind};
use crate::reconfigure::{ReconfigureOutcome, Reconfigurator};
use crate::report::{RunOutcome, RunReport};

/// Lifecycle of the controller itself, distinct from the pipeline's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    NotStarted,
    Running,
    Terminated,
}

/// Why the event loop stopped.
#[derive(Debug)]
enum Termination {
    EndOfStream,
    EngineError { source_name: String, message: String },
    Fatal(CapsflipError),
}

/// What the loop does after dispatching one event.
enum Flow {
    Continue,
    Stop(Termination),
}

/// Drives one engine through a single run.
pub struct Controller<'e, E: Engine> {
    engine: &'e mut E,
    reconfigurator: Reconfigurator,
    phase: ControllerPhase,
    error_occurred: bool,
    events_processed: usize,
    reconfiguration: Option<ReconfigureOutcome>,
}

impl<'e, E: Engine> Controller<'e, E> {
    pub fn new(engine: &'e mut E, config: &ControllerConfig) -> Self {
        Self {
            engine,
            reconfigurator: Reconfigurator::new(
                config.strategy,
                config.stage_name.clone(),
                config.target.clone(),
            ),
            phase: ControllerPhase::NotStarted,
            error_occurred: false,
            events_processed: 0,
            reconfiguration: None,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Start the pipeline, process events until end of stream, an error, or a
    /// fatal condition, then halt and release it.
    ///
    /// A controller runs once; later calls report an aborted run without
    /// touching the engine.
    pub async fn run(&mut self) -> RunReport {
        let started_at = chrono::Utc::now();

        let termination = if self.phase == ControllerPhase::NotStarted {
            self.start();
            let termination = self.event_loop().await;
            self.teardown();
            termination
        } else {
            Termination::Fatal(CapsflipError::Other("controller already ran".into()))
        };

        RunReport {
            strategy: self.reconfigurator.strategy(),
            outcome: Self::derive_outcome(termination),
            error_occurred: self.error_occurred,
            events_processed: self.events_processed,
            reconfiguration: self.reconfiguration,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    fn start(&mut self) {
        info!("Setting pipeline to PLAYING");
        if let Err(failure) = self.engine.set_state(PipelineState::Playing) {
            // The engine posts the cause as an error event.
            warn!("{}", CapsflipError::from(failure));
        }
        self.phase = ControllerPhase::Running;
    }

    async fn event_loop(&mut self) -> Termination {
        loop {
            let Some(event) = self.engine.next_event(EventKind::SUBSCRIBED).await else {
                error!("Event source closed before end of stream");
                break Termination::Fatal(CapsflipError::EventSourceClosed);
            };
            self.events_processed += 1;
            debug!(kind = ?event.kind(), "dispatching event");

            match self.dispatch(event) {
                Flow::Continue => {}
                Flow::Stop(termination) => break termination,
            }
        }
    }

    fn dispatch(&mut self, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::EndOfStream => {
                info!("Received end of stream");
                Flow::Stop(Termination::EndOfStream)
            }
            EngineEvent::Error {
                source_name,
                message,
                debug: detail,
            } => {
                error!("ERROR from element {source_name}: {message}");
                if let Some(detail) = detail {
                    error!("Debug info: {detail}");
                }
                self.error_occurred = true;
                Flow::Stop(Termination::EngineError {
                    source_name,
                    message,
                })
            }
            EngineEvent::Warning {
                source_name,
                message,
                debug: detail,
            } => {
                warn!("WARNING from element {source_name}: {message}");
                if let Some(detail) = detail {
                    warn!("Debug info: {detail}");
                }
                Flow::Continue
            }
            EngineEvent::Info {
                source_name,
                message,
                debug: detail,
            } => {
                info!("INFO from element {source_name}: {message}");
                if let Some(detail) = detail {
                    info!("Debug info: {detail}");
                }
                Flow::Continue
            }
            EngineEvent::StateChanged {
                source_name,
                old_state,
                new_state,
            } => {
                info!("Element {source_name} changed state from {old_state} to {new_state}");
                if self.should_reconfigure(&source_name, new_state) {
                    info!(
                        strategy = %self.reconfigurator.strategy(),
                        "Pipeline is playing, changing the stream format"
                    );
                    if let Err(err) = self.reconfigure() {
                        error!("{err}");
                        return Flow::Stop(Termination::Fatal(err));
                    }
                }
                Flow::Continue
            }
        }
    }

    /// Only the pipeline itself entering `Playing` triggers the change, and
    /// only until the first attempt.
    fn should_reconfigure(&self, source_name: &str, new_state: PipelineState) -> bool {
        new_state == PipelineState::Playing
            && source_name == self.engine.pipeline_name()
            && !self.reconfigurator.is_done()
    }

    fn reconfigure(&mut self) -> Result<()> {
        let outcome = self.reconfigurator.apply(&mut *self.engine)?;
        if outcome == ReconfigureOutcome::HaltFailed {
            warn!("Format change skipped, the pipeline could not be halted");
        }
        self.reconfiguration = Some(outcome);
        Ok(())
    }

    fn teardown(&mut self) {
        info!("Setting pipeline to NULL");
        if let Err(failure) = self.engine.set_state(PipelineState::Null) {
            warn!("{}", CapsflipError::from(failure));
        }
        self.engine.release();
        self.phase = ControllerPhase::Terminated;
    }

    fn derive_outcome(termination: Termination) -> RunOutcome {
        match termination {
            Termination::EndOfStream => RunOutcome::Completed,
            Termination::EngineError {
                source_name,
                message,
            } => RunOutcome::EngineError {
                source_name,
                message,
            },
            Termination::Fatal(err) => RunOutcome::Aborted {
                reason: err.to_string(),
            },
        }
    }
}

/// Build the pipeline with `build`, then run a controller over it.
///
/// A build failure ends the run before any event is processed.
pub async fn run_pipeline<E, F>(config: &ControllerConfig, build: F) -> RunReport
where
    E: Engine,
    F: FnOnce(&str) -> Result<E>,
{
    let mut engine = match build(&config.topology) {
        Ok(engine) => engine,
        Err(err) => {
            error!(
                "Unable to build pipeline from \"{}\": {err}",
                config.topology
            );
            return RunReport::construction_failed(config.strategy, &err);
        }
    };
    Controller::new(&mut engine, config).run().await
}
