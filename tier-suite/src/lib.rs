//! # Tier Suite
//!
//! A differential execution harness for language runtimes. Every case is run
//! under four execution tiers (interpreter, synchronous compilation without
//! and with inlining, background compilation) and each tier must produce the
//! observable result the case expects while keeping the engine's mutable
//! state identical across checkpointed iterations.
//!
//! ## Architecture
//!
//! The framework is organized into several modules:
//! - `engine`: the contract the engine under test implements
//! - `cases` / `repository`: test case model and bundle loading
//! - `assembler`: build step for text cases
//! - `tiers`: the four execution tier profiles and the state-check cadence
//! - `runner`: drives one case through every tier
//! - `capture` / `watchdog`: per-iteration output buffers and per-call timeouts
//! - `validation`: return value and captured output checks
//! - `reporting`: progress line, failure map and final summary
//! - `harness`: suite orchestration
//! - `bench`: single benchmark timing
//! - `config` / `cli`: configuration and process-level entry point

pub mod assembler;
pub mod bench;
pub mod capture;
pub mod cases;
pub mod cli;
pub mod config;
pub mod engine;
pub mod harness;
pub mod reporting;
pub mod repository;
pub mod runner;
pub mod tiers;
pub mod validation;
pub mod watchdog;

use std::time::Duration;

// Re-exports for easier access
pub use bench::{BenchmarkReport, BenchmarkRunner};
pub use cases::{CaseOptions, CaseSource, ExpectedResult, Scalar, TestCase};
pub use config::HarnessConfig;
pub use engine::{
    ContextConfig, EngineContext, EngineError, EngineFactory, ExportNames, ExportRef,
    ModuleExports, ModuleHandle, Opaque, Value,
};
pub use harness::{Suite, SuiteBuilder, SuiteHarness};
pub use reporting::{CaseFailure, ProgressReporter, SuiteReport};
pub use repository::CaseRepository;
pub use runner::{CaseOutcome, TierEnd, TierSummary, TieredRunner};
pub use tiers::{StateCheckPolicy, Tier, TierConfig};
pub use watchdog::{CancelToken, EngineCall};

/// Current version of the harness
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Harness errors.
///
/// Per-case variants are recorded in the suite's failure map; `Config` and
/// repository `Load`/`Parse` errors raised while collecting cases abort the
/// whole run before any case executes.
#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    #[error("{0}")]
    Load(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Error during test phase '{phase}' (iteration {iteration}): {message}")]
    Validation { phase: String, iteration: u32, message: String, diff: Option<String> },

    #[error("Error during test phase '{phase}' (iteration {iteration}): context state differs from the first checkpoint: {message}")]
    StateInconsistency { phase: String, iteration: u32, message: String },

    #[error("Error during test phase '{phase}': {message}")]
    UnexpectedRuntime { phase: String, message: String },

    #[error("Error during test phase '{phase}': call to {call} did not return within {elapsed:?}")]
    Timeout { phase: String, call: EngineCall, elapsed: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),
}

impl HarnessError {
    /// Stable failure class name used in reports
    pub fn class(&self) -> &'static str {
        match self {
            Self::Load(_) | Self::Io(_) => "LoadError",
            Self::Config(_) | Self::Parse(_) | Self::Template(_) => "ConfigurationError",
            Self::Validation { .. } => "ValidationFailure",
            Self::StateInconsistency { .. } => "StateInconsistency",
            Self::UnexpectedRuntime { .. } => "UnexpectedRuntimeError",
            Self::Timeout { .. } => "Timeout",
        }
    }

    /// Textual diff attached to an output mismatch, if any
    pub fn diff(&self) -> Option<&str> {
        match self {
            Self::Validation { diff, .. } => diff.as_deref(),
            _ => None,
        }
    }
}
