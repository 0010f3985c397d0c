//! Tiered runner: drives one case through every execution tier
//!
//! Tiers run strictly one after another. Each tier gets a fresh engine
//! context, owned by a dedicated thread, in which the module is evaluated
//! once and the entry point is then called `iteration_count` times. Engine
//! state persists across iterations until it is reset, and the state saved
//! at every checkpoint must equal the state saved at the first one.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use crate::capture::OutputCapture;
use crate::cases::TestCase;
use crate::engine::{
    ContextConfig, EngineContext, EngineError, EngineFactory, ExportNames, ExportRef,
    ModuleExports, Value,
};
use crate::reporting::ProgressReporter;
use crate::tiers::{StateCheckPolicy, Tier, TierConfig, PHASE_PARSE_ICON};
use crate::validation::validate;
use crate::watchdog::{CallClock, CancelToken, EngineCall};
use crate::HarnessError;

/// How often the watchdog looks at the in-flight call
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// Suite-wide settings every tier run shares
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub policy: StateCheckPolicy,
    pub export_names: ExportNames,
    pub log_level: Option<String>,
    pub external_modules: String,
    /// Limit for a single engine call; `None` waits forever
    pub call_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            policy: StateCheckPolicy::default(),
            export_names: ExportNames::default(),
            log_level: None,
            external_modules: "testutil:testutil".to_string(),
            call_timeout: None,
        }
    }
}

/// How a tier finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierEnd {
    /// Every iteration ran and validated
    Completed,
    /// The program raised the error the case expects
    ExpectedError { iteration: u32, message: String },
}

/// What happened in one tier of a passing case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub iterations: u32,
    pub checkpoints: u32,
    pub zeroing_resets: u32,
    pub end: TierEnd,
    pub duration: Duration,
}

/// Every tier of a passing case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub case_name: String,
    pub tiers: Vec<TierSummary>,
}

/// Runs cases through all tiers against one engine
#[derive(Clone)]
pub struct TieredRunner {
    factory: Arc<dyn EngineFactory>,
    settings: Arc<RunSettings>,
}

impl TieredRunner {
    pub fn new(factory: Arc<dyn EngineFactory>, settings: RunSettings) -> Self {
        Self { factory, settings: Arc::new(settings) }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run a case through every tier, stopping at the first failing tier
    pub async fn run_case(
        &self,
        case: Arc<TestCase>,
        module: Arc<[u8]>,
        reporter: &mut ProgressReporter,
    ) -> Result<CaseOutcome, HarnessError> {
        let policy = self.settings.policy.for_case(&case.options);
        let mut tiers = Vec::new();

        for tier in TierConfig::plan_for(&case.options) {
            debug!(
                "{}: running tier {} for {} iterations ({} checkpoints)",
                case.name,
                tier.phase_label,
                tier.iteration_count,
                policy.checkpoints_in(tier.iteration_count)
            );
            reporter.phase(PHASE_PARSE_ICON, "parsing");
            let summary = self.run_tier(case.clone(), module.clone(), tier, policy, reporter).await?;
            tiers.push(summary);
        }

        Ok(CaseOutcome { case_name: case.name.clone(), tiers })
    }

    /// Run one tier on its own thread while watching for stuck engine calls
    async fn run_tier(
        &self,
        case: Arc<TestCase>,
        module: Arc<[u8]>,
        tier: TierConfig,
        policy: StateCheckPolicy,
        reporter: &mut ProgressReporter,
    ) -> Result<TierSummary, HarnessError> {
        let clock = Arc::new(CallClock::new());
        let cancel = CancelToken::new();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = oneshot::channel();

        let phase = tier.phase_label;
        let icon = tier.phase_icon;
        let worker = TierWorker {
            factory: self.factory.clone(),
            settings: self.settings.clone(),
            case,
            module,
            tier,
            policy,
            clock: clock.clone(),
            cancel: cancel.clone(),
            events: events_tx,
        };

        std::thread::Builder::new().name(format!("tier-{}", phase)).spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| worker.run())).unwrap_or_else(|panic| {
                Err(HarnessError::UnexpectedRuntime {
                    phase: phase.to_string(),
                    message: format!("engine panicked: {}", panic_message(panic.as_ref())),
                })
            });
            let _ = done_tx.send(result);
        })?;

        let mut tick = tokio::time::interval(WATCHDOG_TICK);
        loop {
            tokio::select! {
                result = &mut done_rx => {
                    return result.unwrap_or_else(|_| {
                        Err(HarnessError::UnexpectedRuntime {
                            phase: phase.to_string(),
                            message: "tier thread exited without a result".to_string(),
                        })
                    });
                }
                Some(TierEvent::Evaluated) = events_rx.recv() => {
                    reporter.phase(icon, phase);
                }
                _ = tick.tick() => {
                    let Some(limit) = self.settings.call_timeout else { continue };
                    if let Some((call, elapsed)) = clock.overdue(limit) {
                        warn!("Call to {} in tier {} exceeded {:?}, abandoning the tier", call, phase, limit);
                        cancel.cancel();
                        return Err(HarnessError::Timeout { phase: phase.to_string(), call, elapsed });
                    }
                }
            }
        }
    }
}

/// Progress notifications from a tier thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierEvent {
    Evaluated,
}

/// Everything a tier thread owns
struct TierWorker {
    factory: Arc<dyn EngineFactory>,
    settings: Arc<RunSettings>,
    case: Arc<TestCase>,
    module: Arc<[u8]>,
    tier: TierConfig,
    policy: StateCheckPolicy,
    clock: Arc<CallClock>,
    cancel: CancelToken,
    events: mpsc::UnboundedSender<TierEvent>,
}

/// Running totals for a tier
#[derive(Debug, Default)]
struct Counters {
    iterations: u32,
    checkpoints: u32,
    zeroing_resets: u32,
}

impl TierWorker {
    fn phase(&self) -> String {
        self.tier.phase_label.to_string()
    }

    fn run(self) -> Result<TierSummary, HarnessError> {
        let started = Instant::now();
        let mut counters = Counters::default();
        let config = ContextConfig::for_tier(
            &self.tier,
            self.settings.log_level.clone(),
            &self.settings.external_modules,
        );

        let mut context = {
            let _guard = self.clock.enter(EngineCall::CreateContext);
            self.factory.create_context(&config)
        }
        .map_err(|e| self.engine_failure(EngineCall::CreateContext, e))?;

        let mut evaluation_output = OutputCapture::new();
        let evaluated = {
            let _guard = self.clock.enter(EngineCall::Evaluate);
            context.evaluate(&self.module, &mut evaluation_output)
        };
        if let Some(line) = evaluation_log(&self.case.name, &evaluation_output) {
            debug!("{}", line);
        }
        let module = match evaluated {
            Ok(module) => module,
            Err(e) => return self.program_error(EngineCall::Evaluate, e, 0, counters, started),
        };
        let exports = ModuleExports::resolve(context.as_ref(), module, &self.settings.export_names)?;
        let _ = self.events.send(TierEvent::Evaluated);

        info!("{}: tier {} started", self.case.name, self.tier.phase_label);

        let mut baseline: Option<Value> = None;
        for iteration in 0..self.tier.iteration_count {
            if self.cancel.is_cancelled() {
                return Err(HarnessError::UnexpectedRuntime {
                    phase: self.phase(),
                    message: "tier was cancelled".to_string(),
                });
            }

            // Dropped at the end of the iteration on every path
            let mut capture = OutputCapture::new();

            if let Some(initializer) = &self.case.initializer {
                let args = [Value::Text(initializer.clone())];
                let initialized = self.call(
                    context.as_mut(),
                    EngineCall::RunCustomInitialization,
                    exports.run_custom_initialization,
                    &args,
                    &mut capture,
                );
                if let Err(e) = initialized {
                    return self.program_error(EngineCall::RunCustomInitialization, e, iteration, counters, started);
                }
            }

            let result = match self.call(context.as_mut(), EngineCall::Main, exports.main, &[], &mut capture) {
                Ok(value) => value,
                Err(e) => return self.program_error(EngineCall::Main, e, iteration, counters, started),
            };

            if self.policy.needs_check(iteration) {
                let snapshot = self
                    .call(context.as_mut(), EngineCall::SaveContext, exports.save_context, &[], &mut capture)
                    .map_err(|e| self.engine_failure(EngineCall::SaveContext, e))?;
                counters.checkpoints += 1;

                match &baseline {
                    None => baseline = Some(snapshot),
                    Some(first) => {
                        let args = [first.clone(), snapshot];
                        self.call(
                            context.as_mut(),
                            EngineCall::CompareContexts,
                            exports.compare_contexts,
                            &args,
                            &mut capture,
                        )
                        .map_err(|e| match e {
                            EngineError::Runtime(message) => {
                                warn!(
                                    "{}: state mismatch in tier {} at iteration {}",
                                    self.case.name, self.tier.phase_label, iteration
                                );
                                HarnessError::StateInconsistency { phase: self.phase(), iteration, message }
                            }
                            other => self.engine_failure(EngineCall::CompareContexts, other),
                        })?;
                    }
                }
            }

            // Only pay for zeroing when the next iteration is compared against the baseline
            let zero_memory = self.policy.needs_check(iteration + 1) || self.case.options.zero_memory();
            if zero_memory {
                counters.zeroing_resets += 1;
            }
            self.call(
                context.as_mut(),
                EngineCall::ResetContext,
                exports.reset_context,
                &[Value::Bool(zero_memory)],
                &mut capture,
            )
            .map_err(|e| self.engine_failure(EngineCall::ResetContext, e))?;

            validate(&self.case.expected, &result, &capture.text()).map_err(|failure| {
                HarnessError::Validation {
                    phase: self.phase(),
                    iteration,
                    message: failure.message,
                    diff: failure.diff,
                }
            })?;

            counters.iterations += 1;
        }

        Ok(self.summary(counters, TierEnd::Completed, started))
    }

    /// Issue one engine call under the watchdog clock
    fn call(
        &self,
        context: &mut dyn EngineContext,
        call: EngineCall,
        export: ExportRef,
        args: &[Value],
        capture: &mut OutputCapture,
    ) -> Result<Value, EngineError> {
        let _guard = self.clock.enter(call);
        context.call(export, args, capture, &self.cancel)
    }

    /// An error raised while the program itself was running. Only here can
    /// it be the error the case expects.
    fn program_error(
        &self,
        call: EngineCall,
        error: EngineError,
        iteration: u32,
        counters: Counters,
        started: Instant,
    ) -> Result<TierSummary, HarnessError> {
        match (&error, self.case.expected.expected_error()) {
            (EngineError::Runtime(message), Some(expected)) if message == expected => {
                debug!(
                    "{}: expected error in tier {} at iteration {}: {}",
                    self.case.name, self.tier.phase_label, iteration, message
                );
                let end = TierEnd::ExpectedError { iteration, message: message.clone() };
                Ok(self.summary(counters, end, started))
            }
            _ => Err(self.engine_failure(call, error)),
        }
    }

    fn engine_failure(&self, call: EngineCall, error: EngineError) -> HarnessError {
        match error {
            EngineError::Load(message) => {
                HarnessError::Load(format!("Test {} failed: {}", self.case.name, message))
            }
            EngineError::Runtime(message) => HarnessError::UnexpectedRuntime { phase: self.phase(), message },
            EngineError::Cancelled => HarnessError::UnexpectedRuntime {
                phase: self.phase(),
                message: format!("call to {} was cancelled", call),
            },
        }
    }

    fn summary(&self, counters: Counters, end: TierEnd, started: Instant) -> TierSummary {
        TierSummary {
            tier: self.tier.tier,
            iterations: counters.iterations,
            checkpoints: counters.checkpoints,
            zeroing_resets: counters.zeroing_resets,
            end,
            duration: started.elapsed(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Debug line for output printed while evaluating; it is never validated
fn evaluation_log(case_name: &str, output: &OutputCapture) -> Option<String> {
    if output.is_empty() {
        return None;
    }
    Some(format!("{}: evaluation printed {:?}", case_name, output.text()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_output_is_logged_verbatim() {
        use std::io::Write;

        assert_eq!(evaluation_log("quiet", &OutputCapture::new()), None);

        let mut output = OutputCapture::new();
        write!(output, "loading\n").unwrap();
        let line = evaluation_log("start", &output).unwrap();
        assert_eq!(line, "start: evaluation printed \"loading\\n\"");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_default_settings() {
        let settings = RunSettings::default();
        assert_eq!(settings.policy, StateCheckPolicy::default());
        assert_eq!(settings.external_modules, "testutil:testutil");
        assert!(settings.call_timeout.is_none());
    }
}
