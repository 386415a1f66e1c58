//! End-to-end tests for the controller.
//!
//! Scripted runs feed a synthetic event sequence and inspect the calls the
//! controller made. Simulated runs drive the demo topology through
//! [`SimEngine`].

use capsflip_controller::{
    default_target, run_pipeline, Controller, ControllerConfig, ControllerPhase, EngineCall,
    EngineEvent, ReconfigureOutcome, RunOutcome, RunReport, ScriptedEngine, SimEngine,
    DEFAULT_STAGE,
};
use capsflip_launch::Caps;
use capsflip_types::{PipelineState, ReconfigureStrategy};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pipeline_playing() -> EngineEvent {
    EngineEvent::state_changed("pipeline0", PipelineState::Paused, PipelineState::Playing)
}

fn config(strategy: ReconfigureStrategy) -> ControllerConfig {
    ControllerConfig::default().with_strategy(strategy)
}

async fn run_script(engine: &mut ScriptedEngine, strategy: ReconfigureStrategy) -> RunReport {
    let config = config(strategy);
    let mut controller = Controller::new(engine, &config);
    let report = controller.run().await;
    assert_eq!(controller.phase(), ControllerPhase::Terminated);
    report
}

fn count(calls: &[EngineCall], wanted: &EngineCall) -> usize {
    calls.iter().filter(|c| *c == wanted).count()
}

// ---------------------------------------------------------------------------
// Playing then end of stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn live_change_then_end_of_stream_succeeds() {
    let mut engine = ScriptedEngine::new([pipeline_playing(), EngineEvent::EndOfStream]);

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(report.is_success());
    assert_eq!(engine.format_assignments(), 1);
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::Applied));
    assert_eq!(
        engine.calls().iter().find(|c| matches!(c, EngineCall::SetStageFormat { .. })),
        Some(&EngineCall::SetStageFormat {
            stage: DEFAULT_STAGE.into(),
            format: default_target(),
        })
    );
}

// ---------------------------------------------------------------------------
// Engine error after the change
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_error_after_change_fails_the_run() {
    let mut engine = ScriptedEngine::new([
        pipeline_playing(),
        EngineEvent::error("enc0", "device busy"),
    ]);

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(!report.is_success());
    assert!(report.error_occurred);
    assert_eq!(
        report.outcome,
        RunOutcome::EngineError {
            source_name: "enc0".into(),
            message: "device busy".into(),
        }
    );
    assert_eq!(engine.format_assignments(), 1);
}

#[tokio::test]
async fn events_after_an_error_are_not_consumed() {
    let mut engine = ScriptedEngine::new([
        EngineEvent::error("enc0", "device busy").with_debug("ioctl returned -16"),
        EngineEvent::EndOfStream,
    ]);

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(!report.is_success());
    assert_eq!(report.events_processed, 1);
    assert_eq!(engine.remaining_events(), 1);
}

// ---------------------------------------------------------------------------
// Missing stage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_stage_aborts_after_teardown() {
    let mut engine = ScriptedEngine::new([
        pipeline_playing(),
        EngineEvent::info("src", "never read"),
        EngineEvent::EndOfStream,
    ])
    .without_stage(DEFAULT_STAGE);

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(!report.is_success());
    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted { ref reason } if reason.contains(DEFAULT_STAGE)
    ));
    assert_eq!(engine.remaining_events(), 2);
    assert_eq!(engine.format_assignments(), 0);

    let calls = engine.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[EngineCall::SetState(PipelineState::Null), EngineCall::Release]
    );
}

// ---------------------------------------------------------------------------
// Halted strategy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn halted_strategy_stops_assigns_and_restarts() {
    let mut engine = ScriptedEngine::new([pipeline_playing(), EngineEvent::EndOfStream]);

    let report = run_script(&mut engine, ReconfigureStrategy::Halted).await;

    assert!(report.is_success());
    let calls = engine.calls();
    let halt = calls
        .iter()
        .position(|c| *c == EngineCall::SetState(PipelineState::Null))
        .unwrap();
    assert!(matches!(calls[halt + 1], EngineCall::LookupStage(_)));
    assert!(matches!(calls[halt + 2], EngineCall::SetStageFormat { .. }));
    assert_eq!(calls[halt + 3], EngineCall::SetState(PipelineState::Playing));
}

#[tokio::test]
async fn failed_halt_skips_change_and_keeps_running() {
    let mut engine = ScriptedEngine::new([
        pipeline_playing(),
        EngineEvent::warning("queue0", "late buffer"),
        EngineEvent::EndOfStream,
    ])
    .fail_state_change(PipelineState::Null);

    let report = run_script(&mut engine, ReconfigureStrategy::Halted).await;

    assert!(report.is_success());
    assert_eq!(report.events_processed, 3);
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::HaltFailed));
    assert_eq!(engine.format_assignments(), 0);
    // Only the initial start request targets Playing.
    assert_eq!(
        count(engine.calls(), &EngineCall::SetState(PipelineState::Playing)),
        1
    );
}

#[tokio::test]
async fn failed_restart_is_logged_and_the_run_continues() {
    let mut engine = ScriptedEngine::new([pipeline_playing(), EngineEvent::EndOfStream])
        .fail_state_change(PipelineState::Playing);

    let report = run_script(&mut engine, ReconfigureStrategy::Halted).await;

    assert!(report.is_success());
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::Applied));
    assert_eq!(engine.format_assignments(), 1);
    assert_eq!(engine.remaining_events(), 0);
}

#[tokio::test]
async fn failed_halt_is_not_retried_on_a_later_playing() {
    let mut engine = ScriptedEngine::new([
        pipeline_playing(),
        EngineEvent::state_changed("pipeline0", PipelineState::Playing, PipelineState::Paused),
        pipeline_playing(),
        EngineEvent::EndOfStream,
    ])
    .fail_state_change(PipelineState::Null);

    let report = run_script(&mut engine, ReconfigureStrategy::Halted).await;

    assert!(report.is_success());
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::HaltFailed));
    assert_eq!(engine.format_assignments(), 0);

    let calls = engine.calls();
    let release = calls
        .iter()
        .position(|c| *c == EngineCall::Release)
        .unwrap();
    // One halt from the policy, one from teardown.
    assert_eq!(count(calls, &EngineCall::SetState(PipelineState::Null)), 2);
    assert_eq!(calls[release - 1], EngineCall::SetState(PipelineState::Null));
    assert_eq!(
        count(&calls[..release - 1], &EngineCall::SetState(PipelineState::Null)),
        1
    );
}

#[tokio::test]
async fn live_strategy_never_halts_before_assigning() {
    let mut engine = ScriptedEngine::new([pipeline_playing(), EngineEvent::EndOfStream]);

    run_script(&mut engine, ReconfigureStrategy::Live).await;

    let calls = engine.calls();
    let assign = calls
        .iter()
        .position(|c| matches!(c, EngineCall::SetStageFormat { .. }))
        .unwrap();
    assert!(!calls[..assign].contains(&EngineCall::SetState(PipelineState::Null)));
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn change_is_applied_at_most_once() {
    for strategy in [ReconfigureStrategy::Live, ReconfigureStrategy::Halted] {
        let mut engine = ScriptedEngine::new([
            pipeline_playing(),
            EngineEvent::state_changed("pipeline0", PipelineState::Playing, PipelineState::Paused),
            pipeline_playing(),
            EngineEvent::EndOfStream,
        ]);

        let report = run_script(&mut engine, strategy).await;

        assert!(report.is_success());
        assert_eq!(engine.format_assignments(), 1, "strategy {strategy}");
    }
}

#[tokio::test]
async fn substage_playing_never_triggers_change() {
    let mut engine = ScriptedEngine::new([
        EngineEvent::state_changed("src_caps_filter", PipelineState::Paused, PipelineState::Playing),
        EngineEvent::state_changed("fakesink0", PipelineState::Paused, PipelineState::Playing),
        EngineEvent::EndOfStream,
    ]);

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(report.is_success());
    assert_eq!(report.reconfiguration, None);
    assert_eq!(engine.format_assignments(), 0);
}

#[tokio::test]
async fn error_wins_over_later_end_of_stream() {
    let mut engine = ScriptedEngine::new([
        EngineEvent::warning("src", "slow"),
        EngineEvent::error("src", "no device"),
        EngineEvent::EndOfStream,
    ]);

    let report = run_script(&mut engine, ReconfigureStrategy::Halted).await;

    assert!(!report.is_success());
    assert!(report.error_occurred);
}

// ---------------------------------------------------------------------------
// Scripts from JSON
// ---------------------------------------------------------------------------

#[tokio::test]
async fn json_script_drives_a_run() {
    let mut engine = ScriptedEngine::from_json(
        r#"[
            {"kind": "state_changed", "source_name": "pipeline0", "old_state": "paused", "new_state": "playing"},
            {"kind": "info", "source_name": "videotestsrc0", "message": "pattern ball"},
            {"kind": "end_of_stream"}
        ]"#,
    )
    .unwrap();

    let report = run_script(&mut engine, ReconfigureStrategy::Live).await;

    assert!(report.is_success());
    assert_eq!(report.events_processed, 3);
}

// ---------------------------------------------------------------------------
// Simulated demo topology
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sim_live_change_fails_negotiation() {
    let config = config(ReconfigureStrategy::Live);

    let report = run_pipeline(&config, SimEngine::launch).await;

    assert!(!report.is_success());
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::Applied));
    match report.outcome {
        RunOutcome::EngineError { source_name, .. } => assert_eq!(source_name, "videotestsrc0"),
        other => panic!("expected an engine error, got {other:?}"),
    }
}

#[tokio::test]
async fn sim_halted_change_completes() {
    let config = config(ReconfigureStrategy::Halted);
    let mut engine = SimEngine::launch(&config.topology).unwrap();

    let report = Controller::new(&mut engine, &config).run().await;

    assert!(report.is_success());
    assert_eq!(report.reconfiguration, Some(ReconfigureOutcome::Applied));
    assert_eq!(engine.state(), PipelineState::Null);
    assert!(engine.is_released());
    assert_eq!(
        engine.stage_caps(DEFAULT_STAGE),
        Some(&Caps::from(&default_target()))
    );
}

#[tokio::test]
async fn sim_unknown_factory_fails_before_running() {
    let config = ControllerConfig {
        topology: "videotestsrc ! nosuchenc ! fakesink".into(),
        ..ControllerConfig::default()
    };

    let report = run_pipeline(&config, SimEngine::launch).await;

    assert!(!report.is_success());
    assert_eq!(report.events_processed, 0);
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted {
            reason: "No element \"nosuchenc\"".into()
        }
    );
}

#[tokio::test]
async fn sim_failed_start_aborts() {
    let config = config(ReconfigureStrategy::Live);
    let mut engine = SimEngine::launch(&config.topology)
        .unwrap()
        .fail_state_change(PipelineState::Playing);

    let report = Controller::new(&mut engine, &config).run().await;

    assert!(!report.is_success());
    assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
}

// ---------------------------------------------------------------------------
// Bundled demo scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn demo_scripts_produce_expected_outcomes() {
    let cases = [
        (include_str!("../../../demos/playing_then_eos.json"), true, 1),
        (include_str!("../../../demos/encoder_error.json"), false, 1),
        (include_str!("../../../demos/repeated_playing.json"), true, 1),
    ];

    for (script, success, assignments) in cases {
        let mut engine = ScriptedEngine::from_json(script).unwrap();
        let report = run_script(&mut engine, ReconfigureStrategy::Live).await;
        assert_eq!(report.is_success(), success, "script: {script}");
        assert_eq!(engine.format_assignments(), assignments);
    }
}
