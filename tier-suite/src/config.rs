//! Configuration and settings for the harness

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::assembler::{Assembler, CommandAssembler, Utf8Assembler};
use crate::engine::ExportNames;
use crate::runner::RunSettings;
use crate::tiers::{StateCheckPolicy, INITIAL_STATE_CHECK_ITERATIONS, STATE_CHECK_PERIODICITY};
use crate::HarnessError;

pub const DEFAULT_EXTERNAL_MODULES: &str = "testutil:testutil";
pub const DEFAULT_SUITE_NAME: &str = "TierSuite";

/// Configuration for a harness run
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "tier-suite")]
#[command(about = "Differential tiered-execution test harness")]
pub struct HarnessConfig {
    /// Directory holding the case bundles
    #[arg(short, long, env = "TIER_CASES_DIR")]
    pub cases_dir: PathBuf,

    /// Bundle to load cases from
    #[arg(short, long)]
    pub bundle: Option<String>,

    /// Name shown in progress and failure output
    #[arg(long, default_value = DEFAULT_SUITE_NAME)]
    pub suite_name: String,

    /// Only run cases whose name matches this regex
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Run a single case as a benchmark instead of the suite
    #[arg(long, env = "TIER_BENCHMARK_NAME")]
    pub benchmark: Option<String>,

    /// Log level forwarded to the engine
    #[arg(long, env = "TIER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Built-in modules the engine exposes to cases
    #[arg(long, default_value = DEFAULT_EXTERNAL_MODULES)]
    pub external_modules: String,

    /// Command turning text cases into binaries, with {input} and {output} placeholders
    #[arg(long)]
    pub assembler: Option<String>,

    /// Timeout for the assembler command in seconds
    #[arg(long, default_value_t = 60)]
    pub assembler_timeout: u64,

    /// Timeout for a single engine call in seconds (0 = wait forever)
    #[arg(long, default_value_t = 300)]
    pub call_timeout: u64,

    /// Iterations at the start of a tier that are always state checked
    #[arg(long, default_value_t = INITIAL_STATE_CHECK_ITERATIONS)]
    pub state_check_initial: u32,

    /// Period of state checks after the initial window (0 = none)
    #[arg(long, default_value_t = STATE_CHECK_PERIODICITY)]
    pub state_check_period: u32,

    /// Untimed benchmark iterations
    #[arg(long, default_value_t = 10)]
    pub warmup_iterations: u32,

    /// Timed benchmark iterations
    #[arg(long, default_value_t = 10)]
    pub measurement_iterations: u32,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print failures and the final tally
    #[arg(short, long)]
    pub quiet: bool,

    /// Write a JSON report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Export names the runner resolves (not exposed as CLI arg)
    #[clap(skip)]
    #[serde(default)]
    pub export_names: ExportNames,
}

impl HarnessConfig {
    /// Create a new configuration with defaults
    pub fn new(cases_dir: impl Into<PathBuf>) -> Self {
        Self {
            cases_dir: cases_dir.into(),
            bundle: None,
            suite_name: DEFAULT_SUITE_NAME.to_string(),
            filter: None,
            benchmark: None,
            log_level: None,
            external_modules: DEFAULT_EXTERNAL_MODULES.to_string(),
            assembler: None,
            assembler_timeout: 60,
            call_timeout: 300,
            state_check_initial: INITIAL_STATE_CHECK_ITERATIONS,
            state_check_period: STATE_CHECK_PERIODICITY,
            warmup_iterations: 10,
            measurement_iterations: 10,
            verbose: false,
            quiet: false,
            report: None,
            export_names: ExportNames::default(),
        }
    }

    /// Suite-wide state check cadence
    pub fn state_check_policy(&self) -> StateCheckPolicy {
        StateCheckPolicy::new(self.state_check_initial, self.state_check_period)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout > 0).then(|| Duration::from_secs(self.call_timeout))
    }

    /// Settings shared by every tier run
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            policy: self.state_check_policy(),
            export_names: self.export_names.clone(),
            log_level: self.log_level.clone(),
            external_modules: self.external_modules.clone(),
            call_timeout: self.call_timeout(),
        }
    }

    /// Compiled name filter, if one is configured
    pub fn name_filter(&self) -> Result<Option<Regex>, HarnessError> {
        self.filter
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| HarnessError::Config(format!("Invalid filter '{}': {}", pattern, e)))
            })
            .transpose()
    }

    /// Build step for text cases
    pub fn assembler(&self) -> Arc<dyn Assembler> {
        match &self.assembler {
            Some(command) => Arc::new(CommandAssembler::new(
                command.clone(),
                Duration::from_secs(self.assembler_timeout),
            )),
            None => Arc::new(Utf8Assembler),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.bundle.is_some() && !self.cases_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "Cases directory not found or not a directory: {}",
                self.cases_dir.display()
            )));
        }

        if let Some(command) = &self.assembler {
            if command.trim().is_empty() {
                return Err(HarnessError::Config("Assembler command is empty".to_string()));
            }
        }

        if self.measurement_iterations == 0 {
            return Err(HarnessError::Config(
                "Measurement iterations must be greater than 0".to_string(),
            ));
        }

        self.name_filter()?;
        Ok(())
    }
}
