//! Process-level entry point
//!
//! The engine under test is linked in by the embedding binary, so this crate
//! ships the driver rather than a `main`:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # fn engine() -> Arc<dyn tier_suite::EngineFactory> { unimplemented!() }
//! fn main() -> std::process::ExitCode {
//!     tier_suite::cli::main_with(engine())
//! }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use crate::bench::BenchmarkRunner;
use crate::config::HarnessConfig;
use crate::engine::EngineFactory;
use crate::harness::SuiteHarness;

/// Parse the command line, run, and map the outcome to an exit status
pub fn main_with(factory: Arc<dyn EngineFactory>) -> ExitCode {
    let config = match HarnessConfig::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, factory)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Test execution failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run the suite or the selected benchmark. Returns whether everything passed.
pub async fn run(config: HarnessConfig, factory: Arc<dyn EngineFactory>) -> Result<bool> {
    if config.benchmark.is_some() {
        return run_benchmark(config, factory).await;
    }

    let harness = SuiteHarness::new(config, factory).context("Failed to create test harness")?;
    let suite = harness.configured_suite()?;
    let report = harness.run(&suite).await?;

    if harness.config().verbose {
        print!("{}", report);
    }
    if let Some(path) = &harness.config().report {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(report.passed())
}

async fn run_benchmark(config: HarnessConfig, factory: Arc<dyn EngineFactory>) -> Result<bool> {
    let runner = BenchmarkRunner::new(&config, factory).context("Failed to create benchmark runner")?;
    let report = runner.run(config.benchmark.as_deref()).await?;

    print!("{}", report);
    if let Some(path) = &config.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    Ok(true)
}

fn init_logging(config: &HarnessConfig) {
    let default_level = if config.verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .try_init();
}
