//! Suite orchestration: collect, filter and run cases, then report

use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assembler::Assembler;
use crate::cases::TestCase;
use crate::config::HarnessConfig;
use crate::engine::EngineFactory;
use crate::reporting::{ProgressReporter, SuiteReport};
use crate::repository::CaseRepository;
use crate::runner::{CaseOutcome, TieredRunner};
use crate::HarnessError;

type NameFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A named collection of cases
#[derive(Clone)]
pub struct Suite {
    name: String,
    bundle: Option<String>,
    cases: Vec<TestCase>,
    filter: Option<NameFilter>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), bundle: None, cases: Vec::new(), filter: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load cases from this bundle after the programmatic ones
    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Only run cases whose name the predicate accepts
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_name_pattern(self, pattern: Regex) -> Self {
        self.with_filter(move |name| pattern.is_match(name))
    }

    fn accepts(&self, name: &str) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(name))
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("bundle", &self.bundle)
            .field("cases", &self.cases.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Runs suites against one engine
pub struct SuiteHarness {
    config: HarnessConfig,
    repository: CaseRepository,
    runner: TieredRunner,
    assembler: Arc<dyn Assembler>,
    name_filter: Option<Regex>,
}

impl SuiteHarness {
    /// Create a new harness
    pub fn new(config: HarnessConfig, factory: Arc<dyn EngineFactory>) -> Result<Self, HarnessError> {
        config.validate()?;

        let name_filter = config.name_filter()?;
        let repository = CaseRepository::new(&config.cases_dir);
        let runner = TieredRunner::new(factory, config.run_settings());
        let assembler = config.assembler();

        Ok(Self { config, repository, runner, assembler, name_filter })
    }

    /// Get the harness configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn repository(&self) -> &CaseRepository {
        &self.repository
    }

    /// Suite described by the configuration: its bundle and name
    pub fn configured_suite(&self) -> Result<Suite, HarnessError> {
        let bundle = self
            .config
            .bundle
            .clone()
            .ok_or_else(|| HarnessError::Config("No bundle selected".to_string()))?;
        Ok(Suite::new(self.config.suite_name.clone()).with_bundle(bundle))
    }

    /// Run a suite with progress on the standard streams
    pub async fn run(&self, suite: &Suite) -> Result<SuiteReport, HarnessError> {
        let mut reporter = ProgressReporter::stdout().quiet(self.config.quiet);
        self.run_with_reporter(suite, &mut reporter).await
    }

    /// Run every case of a suite. Only collecting the cases can fail; case
    /// failures end up in the report.
    pub async fn run_with_reporter(
        &self,
        suite: &Suite,
        reporter: &mut ProgressReporter,
    ) -> Result<SuiteReport, HarnessError> {
        let start_time = Instant::now();

        let cases = self.collect_cases(suite)?;
        let total = cases.len();
        let selected: Vec<Arc<TestCase>> = cases
            .into_iter()
            .filter(|case| suite.accepts(&case.name) && self.accepts(&case.name))
            .map(Arc::new)
            .collect();

        info!("Suite {}: running {} of {} cases", suite.name(), selected.len(), total);
        let mut report = SuiteReport::new(suite.name(), selected.len(), total);
        reporter.suite_started(suite.name(), selected.len(), total);

        for case in selected {
            reporter.case_started(&case.name);
            match self.run_case(case.clone(), reporter).await {
                Ok(outcome) => {
                    reporter.case_finished(true);
                    report.record_pass(outcome);
                }
                Err(e) => {
                    warn!("Case {} failed: {}", case.name, e);
                    reporter.case_finished(false);
                    report.record_failure(case.name.clone(), &e);
                }
            }
        }

        report.duration = start_time.elapsed();
        reporter.suite_finished(&report);
        Ok(report)
    }

    /// Programmatic cases first, then bundle cases in index order
    fn collect_cases(&self, suite: &Suite) -> Result<Vec<TestCase>, HarnessError> {
        if suite.cases.is_empty() && suite.bundle.is_none() {
            return Err(HarnessError::Config(format!("Suite {} has no cases", suite.name())));
        }

        let mut cases = suite.cases.clone();
        if let Some(bundle) = &suite.bundle {
            let loaded = self.repository.load_bundle(bundle)?;
            debug!("Loaded {} cases from bundle {}", loaded.len(), bundle);
            cases.extend(loaded);
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = cases.iter().find(|case| !seen.insert(case.name.as_str())) {
            return Err(HarnessError::Config(format!(
                "Suite {} has more than one case named {}",
                suite.name(),
                duplicate.name
            )));
        }
        Ok(cases)
    }

    fn accepts(&self, name: &str) -> bool {
        self.name_filter.as_ref().map_or(true, |pattern| pattern.is_match(name))
    }

    async fn run_case(
        &self,
        case: Arc<TestCase>,
        reporter: &mut ProgressReporter,
    ) -> Result<CaseOutcome, HarnessError> {
        let module = case.create_binary(self.assembler.as_ref()).await?;
        self.runner.run_case(case, Arc::from(module), reporter).await
    }
}

/// Builder pattern for creating harnesses
pub struct SuiteBuilder {
    config: HarnessConfig,
    factory: Arc<dyn EngineFactory>,
}

impl SuiteBuilder {
    /// Start building a harness over the given cases directory
    pub fn new(cases_dir: impl AsRef<Path>, factory: Arc<dyn EngineFactory>) -> Self {
        Self { config: HarnessConfig::new(cases_dir.as_ref()), factory }
    }

    /// Start from an existing configuration
    pub fn from_config(config: HarnessConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self { config, factory }
    }

    pub fn bundle(mut self, bundle: impl Into<String>) -> Self {
        self.config.bundle = Some(bundle.into());
        self
    }

    pub fn suite_name(mut self, name: impl Into<String>) -> Self {
        self.config.suite_name = name.into();
        self
    }

    /// Only run cases matching this regex
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.config.filter = Some(pattern.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = Some(level.into());
        self
    }

    pub fn external_modules(mut self, modules: impl Into<String>) -> Self {
        self.config.external_modules = modules.into();
        self
    }

    pub fn assembler(mut self, command: impl Into<String>) -> Self {
        self.config.assembler = Some(command.into());
        self
    }

    /// Limit for a single engine call; zero waits forever
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout.as_secs();
        self
    }

    pub fn state_checks(mut self, initial: u32, period: u32) -> Self {
        self.config.state_check_initial = initial;
        self.config.state_check_period = period;
        self
    }

    /// Enable quiet mode
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    /// Build the harness
    pub fn build(self) -> Result<SuiteHarness, HarnessError> {
        SuiteHarness::new(self.config, self.factory)
    }
}
