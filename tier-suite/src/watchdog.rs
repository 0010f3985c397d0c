//! Per-call timeouts for engine calls
//!
//! The tier thread stamps a shared [`CallClock`] around every engine call.
//! The orchestrator polls the clock while it waits for the tier and gives up
//! on a call that has been in flight for longer than the limit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine operations the runner issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineCall {
    CreateContext,
    Evaluate,
    Main,
    ResetContext,
    RunCustomInitialization,
    SaveContext,
    CompareContexts,
}

impl EngineCall {
    const ALL: [EngineCall; 7] = [
        EngineCall::CreateContext,
        EngineCall::Evaluate,
        EngineCall::Main,
        EngineCall::ResetContext,
        EngineCall::RunCustomInitialization,
        EngineCall::SaveContext,
        EngineCall::CompareContexts,
    ];

    fn index(self) -> u8 {
        self as u8
    }

    fn from_index(index: u8) -> Self {
        Self::ALL.get(index as usize).copied().unwrap_or(EngineCall::Main)
    }
}

impl fmt::Display for EngineCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineCall::CreateContext => "create-context",
            EngineCall::Evaluate => "evaluate",
            EngineCall::Main => "main",
            EngineCall::ResetContext => "resetContext",
            EngineCall::RunCustomInitialization => "runCustomInitialization",
            EngineCall::SaveContext => "saveContext",
            EngineCall::CompareContexts => "compareContexts",
        };
        f.write_str(name)
    }
}

/// Shared flag engines may poll to abandon work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records which engine call is in flight and since when
#[derive(Debug)]
pub struct CallClock {
    epoch: Instant,
    in_flight: AtomicBool,
    started_nanos: AtomicU64,
    call: AtomicU8,
}

impl Default for CallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CallClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            in_flight: AtomicBool::new(false),
            started_nanos: AtomicU64::new(0),
            call: AtomicU8::new(0),
        }
    }

    /// Mark a call as started; it ends when the guard drops
    pub fn enter(&self, call: EngineCall) -> CallGuard<'_> {
        let now = self.epoch.elapsed().as_nanos() as u64;
        self.call.store(call.index(), Ordering::SeqCst);
        self.started_nanos.store(now, Ordering::SeqCst);
        self.in_flight.store(true, Ordering::SeqCst);
        CallGuard { clock: self }
    }

    /// The in-flight call and how long it has run, if any
    pub fn in_flight(&self) -> Option<(EngineCall, Duration)> {
        if !self.in_flight.load(Ordering::SeqCst) {
            return None;
        }
        let started = Duration::from_nanos(self.started_nanos.load(Ordering::SeqCst));
        let call = EngineCall::from_index(self.call.load(Ordering::SeqCst));
        Some((call, self.epoch.elapsed().saturating_sub(started)))
    }

    /// The in-flight call if it has exceeded `limit`
    pub fn overdue(&self, limit: Duration) -> Option<(EngineCall, Duration)> {
        self.in_flight().filter(|(_, elapsed)| *elapsed > limit)
    }
}

/// Ends the current call on drop, on every exit path
pub struct CallGuard<'a> {
    clock: &'a CallClock,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.clock.in_flight.store(false, Ordering::SeqCst);
    }
}
