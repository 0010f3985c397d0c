//! Progress line, failure map and final summary

use console::style;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use crate::runner::CaseOutcome;
use crate::HarnessError;

const MOVE_LEFT: &str = "\u{1b}[1D";
const TEST_PASSED_ICON: &str = "\u{1F60D}";
const TEST_FAILED_ICON: &str = "\u{1F621}";
const TEST_IN_PROGRESS_ICON: &str = "?";
const STATUS_ICON_WIDTH: usize = 2;
const STATUS_LABEL_WIDTH: usize = 11;
const DEFAULT_TERMINAL_WIDTH: usize = 80;
const RULE: &str = "--------------------------------------------------------------------------------";

/// Why a case failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFailure {
    pub class: String,
    pub message: String,
    pub diff: Option<String>,
}

impl From<&HarnessError> for CaseFailure {
    fn from(error: &HarnessError) -> Self {
        Self {
            class: error.class().to_string(),
            message: error.to_string(),
            diff: error.diff().map(str::to_string),
        }
    }
}

/// Result of a whole suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite_name: String,
    /// Cases that passed the name filter and were run
    pub qualifying: usize,
    /// Cases collected before filtering
    pub total: usize,
    /// Failed cases, in the order they ran
    pub failures: IndexMap<String, CaseFailure>,
    /// Passing cases with their tier summaries
    pub outcomes: Vec<CaseOutcome>,
    pub duration: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SuiteReport {
    pub fn new(suite_name: impl Into<String>, qualifying: usize, total: usize) -> Self {
        Self {
            suite_name: suite_name.into(),
            qualifying,
            total,
            failures: IndexMap::new(),
            outcomes: Vec::new(),
            duration: Duration::ZERO,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn record_pass(&mut self, outcome: CaseOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record_failure(&mut self, case_name: impl Into<String>, error: &HarnessError) {
        self.failures.insert(case_name.into(), CaseFailure::from(error));
    }

    /// The suite passes only if no case failed
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn passed_count(&self) -> usize {
        self.qualifying - self.failures.len()
    }

    pub fn failure(&self, case_name: &str) -> Option<&CaseFailure> {
        self.failures.get(case_name)
    }

    pub fn outcome(&self, case_name: &str) -> Option<&CaseOutcome> {
        self.outcomes.iter().find(|o| o.case_name == case_name)
    }

    /// Export report as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save report to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), HarnessError> {
        let json = self
            .to_json()
            .map_err(|e| HarnessError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suite: {}", self.suite_name)?;
        writeln!(f, "  Passed: {}/{}", self.passed_count(), self.qualifying)?;
        for (name, failure) in &self.failures {
            writeln!(f, "  Failed: {} ({})", name, failure.class)?;
        }
        writeln!(f, "  Duration: {:.2?}", self.duration)?;
        Ok(())
    }
}

/// Presentation state of the current case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Idle,
    InProgress,
    Passed,
    Failed,
}

/// Overwrite-in-place progress line
///
/// Each case prints its name followed by a status slot that is redrawn with
/// the current phase, and is finally replaced by a single pass/fail icon.
/// Write errors are swallowed: rendering never aborts a run.
pub struct ProgressReporter {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    width: usize,
    position: usize,
    state: CaseState,
    current_width: usize,
    enabled: bool,
    write_failed: bool,
}

impl ProgressReporter {
    /// Reporter on the process's standard streams
    pub fn stdout() -> Self {
        let width = console::Term::stdout()
            .size_checked()
            .map(|(_, columns)| columns as usize)
            .unwrap_or(DEFAULT_TERMINAL_WIDTH);
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()), width)
    }

    pub fn with_writers(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, width: usize) -> Self {
        Self {
            out,
            err,
            width,
            position: 0,
            state: CaseState::Idle,
            current_width: 0,
            enabled: true,
            write_failed: false,
        }
    }

    /// Suppress the progress line; the failure summary is still printed
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.enabled = !quiet;
        self
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn suite_started(&mut self, suite_name: &str, qualifying: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let counts = if qualifying != total {
            format!("({}/{} tests - you have enabled filters)", qualifying, total)
        } else {
            format!("({} tests)", qualifying)
        };
        self.emit(&format!("\n{}\nRunning: {} {}\n{}\n", RULE, suite_name, counts, RULE));
    }

    /// Print the case name behind its status slot, so the name stays on
    /// screen if the process dies mid-case
    pub fn case_started(&mut self, case_name: &str) {
        self.state = CaseState::InProgress;
        if !self.enabled {
            return;
        }

        let extra_width = 1 + STATUS_ICON_WIDTH + STATUS_LABEL_WIDTH;
        self.current_width = case_name.chars().count() + extra_width;
        if self.position + self.current_width >= self.width {
            self.emit("\n");
            self.position = 0;
        }

        let line = format!(" {}{}{}", case_name, TEST_IN_PROGRESS_ICON, " ".repeat(extra_width - 2));
        self.emit(&line);
    }

    /// Redraw the status slot with a phase icon and label
    pub fn phase(&mut self, icon: &str, label: &str) {
        if !self.enabled || self.state != CaseState::InProgress {
            return;
        }
        let formatted = format_label(label);
        let erase = MOVE_LEFT.repeat(STATUS_ICON_WIDTH + STATUS_LABEL_WIDTH);
        self.emit(&format!("{}{}{}", erase, icon, formatted));
    }

    /// Replace the case name and status slot with the final icon
    pub fn case_finished(&mut self, passed: bool) {
        self.state = if passed { CaseState::Passed } else { CaseState::Failed };
        if !self.enabled {
            return;
        }

        let erase = format!("{} {}", MOVE_LEFT, MOVE_LEFT).repeat(self.current_width);
        let icon = if passed { TEST_PASSED_ICON } else { TEST_FAILED_ICON };
        self.emit(&format!("{}{}", erase, icon));
        self.position += 1;
        self.state = CaseState::Idle;
    }

    /// Print every failure to the error stream and the final tally
    pub fn suite_finished(&mut self, report: &SuiteReport) {
        if self.enabled {
            self.emit(&format!("\nFinished running: {}\n", report.suite_name));
        }

        for (case_name, failure) in &report.failures {
            let mut block = format!(
                "Failure in: {}.{}\n{}: {}\n",
                report.suite_name, case_name, failure.class, failure.message
            );
            if let Some(diff) = &failure.diff {
                block.push_str(diff);
                if !diff.ends_with('\n') {
                    block.push('\n');
                }
            }
            self.emit_err(&block);
        }

        let tally = format!("{}/{} tests passed.", report.passed_count(), report.qualifying);
        if report.passed() {
            self.emit(&format!("\u{1F340} {}\n\n", style(tally).green()));
        } else {
            self.emit_err(&format!("\u{1F4A5} {}\n\n", style(tally).red()));
        }
    }

    fn emit(&mut self, text: &str) {
        let result = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush());
        self.note_failure(result);
    }

    fn emit_err(&mut self, text: &str) {
        let result = self.err.write_all(text.as_bytes()).and_then(|_| self.err.flush());
        self.note_failure(result);
    }

    fn note_failure(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            if !self.write_failed {
                debug!("Progress output failed: {}", e);
                self.write_failed = true;
            }
        }
    }
}

/// Truncate or pad a phase label to the status slot
fn format_label(label: &str) -> String {
    let truncated: String = label.chars().take(STATUS_LABEL_WIDTH).collect();
    format!("{:<width$}", truncated, width = STATUS_LABEL_WIDTH)
}
