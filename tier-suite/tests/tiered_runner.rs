//! Tiered runner behavior against the scripted engine

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{case, silent_reporter, ScriptedEngine};
use tier_suite::runner::RunSettings;
use tier_suite::{
    CaseOptions, CaseOutcome, EngineCall, HarnessError, StateCheckPolicy, TestCase, TierEnd, TieredRunner,
};

async fn run(engine: &Arc<ScriptedEngine>, case: TestCase) -> Result<CaseOutcome, HarnessError> {
    run_with(engine, RunSettings::default(), case).await
}

async fn run_with(
    engine: &Arc<ScriptedEngine>,
    settings: RunSettings,
    case: TestCase,
) -> Result<CaseOutcome, HarnessError> {
    let runner = TieredRunner::new(engine.clone(), settings);
    let module: Arc<[u8]> = match &case.source {
        tier_suite::CaseSource::Binary(bytes) => Arc::from(bytes.clone()),
        tier_suite::CaseSource::Text(text) => Arc::from(text.as_bytes().to_vec()),
    };
    runner.run_case(Arc::new(case), module, &mut silent_reporter()).await
}

fn options(text: &str) -> CaseOptions {
    CaseOptions::parse(text).unwrap()
}

#[tokio::test]
async fn test_add42_passes_every_tier() {
    let engine = ScriptedEngine::new();
    let outcome = run(&engine, case("add42", "return int 42", "int 42")).await.unwrap();

    let iterations: Vec<u32> = outcome.tiers.iter().map(|t| t.iterations).collect();
    assert_eq!(iterations, vec![1, 3, 3, 100_000]);
    assert!(outcome.tiers.iter().all(|t| t.end == TierEnd::Completed));

    let journal = engine.journal();
    assert_eq!(journal.main_calls, vec![1, 3, 3, 100_000]);
    assert_eq!(outcome.tiers[3].checkpoints, StateCheckPolicy::default().checkpoints_in(100_000));
}

#[tokio::test]
async fn test_contexts_use_tier_flags() {
    let engine = ScriptedEngine::new();
    let settings = RunSettings { log_level: Some("FINE".into()), ..RunSettings::default() };
    let case = case("flags", "return int 1", "int 1").with_options(options("async-iterations=1"));
    run_with(&engine, settings, case).await.unwrap();

    let contexts = engine.journal().contexts;
    assert_eq!(contexts.len(), 4);
    assert!(!contexts[0].compilation_enabled);
    assert!(contexts[1].compile_immediately && !contexts[1].inlining_enabled);
    assert!(contexts[2].compile_immediately && contexts[2].inlining_enabled);
    assert!(contexts[3].background_compilation_enabled && !contexts[3].compile_immediately);
    assert!(contexts.iter().all(|c| c.log_level.as_deref() == Some("FINE")));
    assert!(contexts.iter().all(|c| c.external_modules == "testutil:testutil"));
}

#[tokio::test]
async fn test_expected_error_ends_each_tier() {
    let engine = ScriptedEngine::new();
    let halt = case("halt", "trap division by zero", "exception division by zero");
    let outcome = run(&engine, halt).await.unwrap();

    assert_eq!(outcome.tiers.len(), 4);
    for tier in &outcome.tiers {
        assert_eq!(
            tier.end,
            TierEnd::ExpectedError { iteration: 0, message: "division by zero".into() }
        );
        assert_eq!(tier.iterations, 0);
    }
    assert_eq!(engine.journal().main_calls, vec![1, 1, 1, 1]);
}

#[tokio::test]
async fn test_expected_error_during_evaluation() {
    let engine = ScriptedEngine::new();
    let case = case("bad-start", "evaluate-trap unreachable", "exception unreachable");
    let outcome = run(&engine, case).await.unwrap();

    assert_eq!(outcome.tiers.len(), 4);
    assert_eq!(engine.journal().main_calls, vec![0, 0, 0, 0]);
}

#[tokio::test]
async fn test_wrong_error_message_fails_case() {
    let engine = ScriptedEngine::new();
    let case = case("halt", "trap integer overflow", "exception division by zero");
    let err = run(&engine, case).await.unwrap_err();

    assert_eq!(err.class(), "UnexpectedRuntimeError");
    assert!(err.to_string().contains("integer overflow"));
    // Remaining tiers are not attempted
    assert_eq!(engine.journal().contexts.len(), 1);
}

#[tokio::test]
async fn test_unexpected_error_without_expectation() {
    let engine = ScriptedEngine::new();
    let err = run(&engine, case("oops", "trap out of bounds", "int 0")).await.unwrap_err();
    assert_eq!(err.class(), "UnexpectedRuntimeError");
}

#[tokio::test]
async fn test_throws_case_that_returns_fails() {
    let engine = ScriptedEngine::new();
    let err = run(&engine, case("noisy", "return int 3", "exception division by zero"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), "ValidationFailure");
    assert!(err.to_string().contains("Test was not expected to return a value"));
}

#[tokio::test]
async fn test_async_iterations_override() {
    let engine = ScriptedEngine::new();
    let case = case("short", "return long 7", "long 7").with_options(options("async-iterations=5"));
    let outcome = run(&engine, case).await.unwrap();

    assert_eq!(outcome.tiers[3].iterations, 5);
    assert_eq!(engine.journal().main_calls[3], 5);
}

#[tokio::test]
async fn test_state_drift_is_detected() {
    let engine = ScriptedEngine::new();
    let case = case("drift", "return int 1\ndrift-at 2000", "int 1")
        .with_options(options("async-iterations=2500"));
    let err = run(&engine, case).await.unwrap_err();

    match &err {
        HarnessError::StateInconsistency { phase, iteration, message } => {
            assert_eq!(phase, "async,multi");
            assert_eq!(*iteration, 2000);
            assert_eq!(message, "memory differs at 0x10");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(engine.journal().main_calls[3], 2001);
}

#[tokio::test]
async fn test_disabled_periodic_checks_miss_late_drift() {
    let engine = ScriptedEngine::new();
    let case = case("drift", "return int 1\ndrift-at 2000", "int 1")
        .with_options(options("async-iterations=2500 state-check-period=0"));
    let outcome = run(&engine, case).await.unwrap();
    assert_eq!(outcome.tiers[3].checkpoints, 10);
}

#[tokio::test]
async fn test_memory_zeroed_only_before_checkpoints() {
    let engine = ScriptedEngine::new();
    let case = case("zero", "return int 0", "int 0").with_options(options("async-iterations=2500"));
    let outcome = run(&engine, case).await.unwrap();

    let resets = &engine.journal().resets[3];
    assert_eq!(resets.len(), 2500);
    let zeroed: Vec<usize> = resets.iter().enumerate().filter(|(_, z)| **z).map(|(i, _)| i).collect();
    assert_eq!(zeroed, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 1999]);
    assert_eq!(outcome.tiers[3].zeroing_resets, 10);
    assert_eq!(outcome.tiers[3].checkpoints, 11);
}

#[tokio::test]
async fn test_zero_memory_option_zeroes_every_reset() {
    let engine = ScriptedEngine::new();
    let case = case("zero", "return int 0", "int 0")
        .with_options(options("async-iterations=50\nzero-memory=true"));
    run(&engine, case).await.unwrap();

    let journal = engine.journal();
    assert!(journal.resets.iter().flatten().all(|zero| *zero));
}

#[tokio::test]
async fn test_output_is_captured_per_iteration() {
    let engine = ScriptedEngine::new();
    let case = case("hello", "print Hello", "stdout Hello\n").with_options(options("async-iterations=20"));
    let outcome = run(&engine, case).await.unwrap();
    assert_eq!(outcome.tiers.iter().map(|t| t.iterations).sum::<u32>(), 27);
}

#[tokio::test]
async fn test_output_mismatch_reports_diff() {
    let engine = ScriptedEngine::new();
    let err = run(&engine, case("hello", "print Hallo", "stdout Hello\n")).await.unwrap_err();

    assert_eq!(err.class(), "ValidationFailure");
    let diff = err.diff().unwrap();
    assert!(diff.contains("-Hello"));
    assert!(diff.contains("+Hallo"));
}

#[tokio::test]
async fn test_initializer_runs_every_iteration() {
    let engine = ScriptedEngine::new();
    let case = case("seeded", "return int 5", "int 5")
        .with_initializer("seed 7")
        .with_options(options("async-iterations=5"));
    run(&engine, case).await.unwrap();

    let initializations = engine.journal().initializations;
    assert_eq!(initializations.len(), 1 + 3 + 3 + 5);
    assert!(initializations.iter().all(|payload| payload == "seed 7"));
}

#[tokio::test]
async fn test_hung_call_times_out() {
    let engine = ScriptedEngine::new();
    let settings = RunSettings { call_timeout: Some(Duration::from_millis(100)), ..RunSettings::default() };
    let err = run_with(&engine, settings, case("spin", "hang", "int 0")).await.unwrap_err();

    match err {
        HarnessError::Timeout { phase, call, elapsed } => {
            assert_eq!(phase, "interpreter");
            assert_eq!(call, EngineCall::Main);
            assert!(elapsed > Duration::from_millis(100));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_engine_panic_fails_case() {
    let engine = ScriptedEngine::new();
    let err = run(&engine, case("boom", "panic", "int 0")).await.unwrap_err();
    assert_eq!(err.class(), "UnexpectedRuntimeError");
    assert!(err.to_string().contains("engine panicked: scripted panic"));
}

#[tokio::test]
async fn test_missing_export_is_load_error() {
    let engine = ScriptedEngine::new();
    let case = case("partial", "return int 0\nmissing __testutil_save_context", "int 0");
    let err = run(&engine, case).await.unwrap_err();
    assert_eq!(err.class(), "LoadError");
    assert!(err.to_string().contains("__testutil_save_context"));
}
