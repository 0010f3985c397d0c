//! Execution tier profiles and the state-check cadence

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cases::CaseOptions;

pub const PHASE_PARSE_ICON: &str = "\u{1F4D6}";
pub const PHASE_INTERPRETER_ICON: &str = "\u{1F916}";
pub const PHASE_SYNC_NO_INLINE_ICON: &str = "\u{1F539}";
pub const PHASE_SYNC_INLINE_ICON: &str = "\u{1F537}";
pub const PHASE_ASYNC_ICON: &str = "\u{1F536}";

pub const DEFAULT_INTERPRETER_ITERATIONS: u32 = 1;
pub const DEFAULT_SYNC_NOINLINE_ITERATIONS: u32 = 3;
pub const DEFAULT_SYNC_INLINE_ITERATIONS: u32 = 3;
pub const DEFAULT_ASYNC_ITERATIONS: u32 = 100_000;

pub const INITIAL_STATE_CHECK_ITERATIONS: u32 = 10;
pub const STATE_CHECK_PERIODICITY: u32 = 2000;

/// Execution tiers, in the order a case runs through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Pure interpretation, populates profiles
    Interpreter,
    /// Compiled on first call, no inlining
    SyncNoInline,
    /// Compiled on first call, with inlining
    SyncInline,
    /// Regular background compilation
    AsyncMulti,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Interpreter, Tier::SyncNoInline, Tier::SyncInline, Tier::AsyncMulti];

    /// Case option that overrides this tier's iteration count
    pub fn option_key(&self) -> &'static str {
        match self {
            Self::Interpreter => "interpreter-iterations",
            Self::SyncNoInline => "sync-noinline-iterations",
            Self::SyncInline => "sync-inline-iterations",
            Self::AsyncMulti => "async-iterations",
        }
    }

    pub fn default_iterations(&self) -> u32 {
        match self {
            Self::Interpreter => DEFAULT_INTERPRETER_ITERATIONS,
            Self::SyncNoInline => DEFAULT_SYNC_NOINLINE_ITERATIONS,
            Self::SyncInline => DEFAULT_SYNC_INLINE_ITERATIONS,
            Self::AsyncMulti => DEFAULT_ASYNC_ITERATIONS,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Interpreter => "interpreter",
            Self::SyncNoInline => "sync,no-inl",
            Self::SyncInline => "sync,inl",
            Self::AsyncMulti => "async,multi",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Interpreter => PHASE_INTERPRETER_ICON,
            Self::SyncNoInline => PHASE_SYNC_NO_INLINE_ICON,
            Self::SyncInline => PHASE_SYNC_INLINE_ICON,
            Self::AsyncMulti => PHASE_ASYNC_ICON,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Engine configuration and iteration budget for one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub tier: Tier,
    pub compilation_enabled: bool,
    pub background_compilation_enabled: bool,
    pub compile_immediately: bool,
    pub inlining_enabled: bool,
    pub iteration_count: u32,
    pub phase_label: &'static str,
    pub phase_icon: &'static str,
}

impl TierConfig {
    /// The fixed profile for a tier with its default iteration count
    pub fn canonical(tier: Tier) -> Self {
        let (compilation, background, immediately, inlining) = match tier {
            Tier::Interpreter => (false, false, false, false),
            Tier::SyncNoInline => (true, false, true, false),
            Tier::SyncInline => (true, false, true, true),
            Tier::AsyncMulti => (true, true, false, true),
        };

        Self {
            tier,
            compilation_enabled: compilation,
            background_compilation_enabled: background,
            compile_immediately: immediately,
            inlining_enabled: inlining,
            iteration_count: tier.default_iterations(),
            phase_label: tier.label(),
            phase_icon: tier.icon(),
        }
    }

    pub fn with_iterations(mut self, iteration_count: u32) -> Self {
        self.iteration_count = iteration_count;
        self
    }

    /// All four tiers with the case's iteration overrides applied
    pub fn plan_for(options: &CaseOptions) -> Vec<TierConfig> {
        Tier::ALL
            .iter()
            .map(|tier| {
                let config = Self::canonical(*tier);
                match options.iterations(*tier) {
                    Some(count) => config.with_iterations(count),
                    None => config,
                }
            })
            .collect()
    }
}

/// Decides on which iterations the engine state is snapshotted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCheckPolicy {
    /// Every iteration below this index is a checkpoint
    pub initial: u32,
    /// After that, every multiple of this index is a checkpoint; 0 disables
    pub period: u32,
}

impl Default for StateCheckPolicy {
    fn default() -> Self {
        Self { initial: INITIAL_STATE_CHECK_ITERATIONS, period: STATE_CHECK_PERIODICITY }
    }
}

impl StateCheckPolicy {
    pub fn new(initial: u32, period: u32) -> Self {
        Self { initial, period }
    }

    pub fn needs_check(&self, iteration: u32) -> bool {
        iteration < self.initial || (self.period != 0 && iteration % self.period == 0)
    }

    /// Apply a case's overrides on top of this policy
    pub fn for_case(&self, options: &CaseOptions) -> Self {
        Self {
            initial: options.state_check_initial().unwrap_or(self.initial),
            period: options.state_check_period().unwrap_or(self.period),
        }
    }

    /// Number of checkpoints taken in a run of `iterations`
    pub fn checkpoints_in(&self, iterations: u32) -> u32 {
        let initial = self.initial.min(iterations);
        if self.period == 0 || iterations <= self.initial {
            return initial;
        }
        // Multiples of the period at or above the initial window
        let periodic = (iterations - 1) / self.period + 1;
        let already_counted = if self.initial == 0 { 0 } else { (self.initial - 1) / self.period + 1 };
        initial + periodic - already_counted
    }
}
