//! Single-case benchmark mode
//!
//! Runs one named case in one context configured like the background
//! compilation tier and times its entry point.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assembler::Assembler;
use crate::capture::OutputCapture;
use crate::cases::TestCase;
use crate::config::HarnessConfig;
use crate::engine::{resolve_export, ContextConfig, EngineError, EngineFactory, ExportNames, Value};
use crate::repository::CaseRepository;
use crate::tiers::{Tier, TierConfig};
use crate::watchdog::CancelToken;
use crate::HarnessError;

const BENCHMARK_PHASE: &str = "benchmark";

/// Timing results of a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub name: String,
    pub warmup_iterations: u32,
    pub execution_times: Vec<Duration>,
    pub mean_time: Duration,
    pub median_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
    pub standard_deviation: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BenchmarkReport {
    /// Summarize measured iteration times
    pub fn from_times(
        name: impl Into<String>,
        warmup_iterations: u32,
        execution_times: Vec<Duration>,
    ) -> Result<Self, HarnessError> {
        if execution_times.is_empty() {
            return Err(HarnessError::Config("Benchmark has no measured iterations".to_string()));
        }

        let count = execution_times.len() as u128;
        let mean_time = Duration::from_nanos(
            (execution_times.iter().map(|d| d.as_nanos()).sum::<u128>() / count) as u64,
        );

        let mut sorted_times = execution_times.clone();
        sorted_times.sort();
        let median_time = sorted_times[sorted_times.len() / 2];
        let min_time = sorted_times[0];
        let max_time = sorted_times[sorted_times.len() - 1];

        let variance = execution_times
            .iter()
            .map(|time| {
                let diff = time.as_nanos() as i128 - mean_time.as_nanos() as i128;
                (diff * diff) as u128
            })
            .sum::<u128>()
            / count;
        let standard_deviation = Duration::from_nanos((variance as f64).sqrt() as u64);

        Ok(Self {
            name: name.into(),
            warmup_iterations,
            execution_times,
            mean_time,
            median_time,
            min_time,
            max_time,
            standard_deviation,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Export report as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark: {}", self.name)?;
        writeln!(
            f,
            "  Iterations: {} measured after {} warmup",
            self.execution_times.len(),
            self.warmup_iterations
        )?;
        writeln!(f, "  Mean:   {:.3?}", self.mean_time)?;
        writeln!(f, "  Median: {:.3?}", self.median_time)?;
        writeln!(f, "  Min:    {:.3?}", self.min_time)?;
        writeln!(f, "  Max:    {:.3?}", self.max_time)?;
        writeln!(f, "  StdDev: {:.3?}", self.standard_deviation)
    }
}

/// Runs a single case as a benchmark
pub struct BenchmarkRunner {
    factory: Arc<dyn EngineFactory>,
    repository: CaseRepository,
    assembler: Arc<dyn Assembler>,
    bundle: Option<String>,
    export_names: ExportNames,
    log_level: Option<String>,
    external_modules: String,
    warmup_iterations: u32,
    measurement_iterations: u32,
    show_progress: bool,
}

impl BenchmarkRunner {
    pub fn new(config: &HarnessConfig, factory: Arc<dyn EngineFactory>) -> Result<Self, HarnessError> {
        config.validate()?;

        Ok(Self {
            factory,
            repository: CaseRepository::new(&config.cases_dir),
            assembler: config.assembler(),
            bundle: config.bundle.clone(),
            export_names: config.export_names.clone(),
            log_level: config.log_level.clone(),
            external_modules: config.external_modules.clone(),
            warmup_iterations: config.warmup_iterations,
            measurement_iterations: config.measurement_iterations,
            show_progress: !config.quiet,
        })
    }

    /// Look up the named case in the configured bundle
    pub fn find_benchmark(&self, name: Option<&str>) -> Result<TestCase, HarnessError> {
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| HarnessError::Config("Benchmark name is not set".to_string()))?;
        let bundle = self
            .bundle
            .as_deref()
            .ok_or_else(|| HarnessError::Config("No bundle selected for benchmark".to_string()))?;

        self.repository
            .find_case(bundle, name)?
            .ok_or_else(|| HarnessError::Config(format!("Unknown benchmark '{}' in bundle {}", name, bundle)))
    }

    /// Load, warm up and time the named case
    pub async fn run(&self, name: Option<&str>) -> Result<BenchmarkReport, HarnessError> {
        let case = self.find_benchmark(name)?;
        let module = case.create_binary(self.assembler.as_ref()).await?;

        let total = total_iterations(self.warmup_iterations, self.measurement_iterations);
        let progress = if self.show_progress {
            let pb = indicatif::ProgressBar::new(total);
            pb.set_style(indicatif::ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )?);
            pb.set_message(case.name.clone());
            Some(pb)
        } else {
            None
        };

        info!(
            "Benchmark {}: {} warmup and {} measured iterations",
            case.name, self.warmup_iterations, self.measurement_iterations
        );

        let session = BenchmarkSession {
            factory: self.factory.clone(),
            config: ContextConfig::for_tier(
                &TierConfig::canonical(Tier::AsyncMulti),
                self.log_level.clone(),
                &self.external_modules,
            ),
            export_names: self.export_names.clone(),
            initializer: case.initializer.clone(),
            module,
            warmup_iterations: self.warmup_iterations,
            measurement_iterations: self.measurement_iterations,
            progress: progress.clone(),
        };

        let times = tokio::task::spawn_blocking(move || session.run())
            .await
            .map_err(|e| HarnessError::UnexpectedRuntime {
                phase: BENCHMARK_PHASE.to_string(),
                message: format!("benchmark thread failed: {}", e),
            })??;

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }

        BenchmarkReport::from_times(case.name, self.warmup_iterations, times)
    }
}

/// State moved onto the benchmark thread
struct BenchmarkSession {
    factory: Arc<dyn EngineFactory>,
    config: ContextConfig,
    export_names: ExportNames,
    initializer: Option<String>,
    module: Vec<u8>,
    warmup_iterations: u32,
    measurement_iterations: u32,
    progress: Option<indicatif::ProgressBar>,
}

impl BenchmarkSession {
    fn run(self) -> Result<Vec<Duration>, HarnessError> {
        let cancel = CancelToken::new();
        let mut context = self.factory.create_context(&self.config).map_err(failure)?;

        let mut evaluation_output = OutputCapture::new();
        let module = context.evaluate(&self.module, &mut evaluation_output).map_err(failure)?;
        let main = resolve_export(context.as_ref(), module, &self.export_names.main)?;
        let reset = resolve_export(context.as_ref(), module, &self.export_names.reset_context)?;
        let initialize = resolve_export(context.as_ref(), module, &self.export_names.run_custom_initialization)?;

        let mut execution_times = Vec::with_capacity(self.measurement_iterations as usize);
        let warmup = u64::from(self.warmup_iterations);
        for iteration in 0..total_iterations(self.warmup_iterations, self.measurement_iterations) {
            let mut output = OutputCapture::new();

            if let Some(initializer) = &self.initializer {
                let args = [Value::Text(initializer.clone())];
                context.call(initialize, &args, &mut output, &cancel).map_err(failure)?;
            }

            let start = Instant::now();
            context.call(main, &[], &mut output, &cancel).map_err(failure)?;
            let elapsed = start.elapsed();

            context.call(reset, &[Value::Bool(true)], &mut output, &cancel).map_err(failure)?;

            if iteration >= warmup {
                debug!("Measured iteration {} took {:?}", iteration - warmup + 1, elapsed);
                execution_times.push(elapsed);
            }
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        Ok(execution_times)
    }
}

/// Warmup plus measured iterations, without overflowing `u32`
fn total_iterations(warmup: u32, measurement: u32) -> u64 {
    u64::from(warmup) + u64::from(measurement)
}

fn failure(error: EngineError) -> HarnessError {
    match error {
        EngineError::Load(message) => HarnessError::Load(message),
        EngineError::Runtime(message) => {
            HarnessError::UnexpectedRuntime { phase: BENCHMARK_PHASE.to_string(), message }
        }
        EngineError::Cancelled => HarnessError::UnexpectedRuntime {
            phase: BENCHMARK_PHASE.to_string(),
            message: "benchmark was cancelled".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_statistics() {
        let report = BenchmarkReport::from_times("fib", 10, vec![ms(4), ms(2), ms(6), ms(8)]).unwrap();
        assert_eq!(report.mean_time, ms(5));
        assert_eq!(report.median_time, ms(6));
        assert_eq!(report.min_time, ms(2));
        assert_eq!(report.max_time, ms(8));
        // sqrt(5) ms
        let deviation = report.standard_deviation.as_micros();
        assert!((2235..=2237).contains(&deviation), "{}", deviation);
        assert_eq!(report.execution_times.len(), 4);
    }

    #[test]
    fn test_single_measurement() {
        let report = BenchmarkReport::from_times("one", 0, vec![ms(3)]).unwrap();
        assert_eq!(report.standard_deviation, Duration::ZERO);
        assert!(report.to_string().contains("Benchmark: one"));
    }

    #[test]
    fn test_iteration_total_does_not_overflow() {
        assert_eq!(total_iterations(10, 10), 20);
        assert_eq!(total_iterations(u32::MAX, 2), u64::from(u32::MAX) + 2);
        assert_eq!(total_iterations(u32::MAX, u32::MAX), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn test_empty_measurements_rejected() {
        let err = BenchmarkReport::from_times("none", 10, Vec::new()).unwrap_err();
        assert_eq!(err.class(), "ConfigurationError");
    }
}
