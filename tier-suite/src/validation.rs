//! Result validation: return values and captured output

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::cases::{ExpectedResult, Scalar};
use crate::engine::Value;

/// An observable result did not match the expectation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub message: String,
    /// Unified diff for output mismatches
    pub diff: Option<String>,
}

impl ValidationFailure {
    fn new(message: String) -> Self {
        Self { message, diff: None }
    }
}

/// Check one iteration's return value and captured output
pub fn validate(expected: &ExpectedResult, result: &Value, output: &str) -> Result<(), ValidationFailure> {
    match expected {
        ExpectedResult::StdoutMatch(text) => {
            if text == output {
                Ok(())
            } else {
                Err(ValidationFailure {
                    message: format!("Failure: stdout: expected:<{}> but was:<{}>", text, output),
                    diff: Some(unified_diff(text, output)),
                })
            }
        }
        ExpectedResult::ScalarMatch(scalar) => {
            if scalar_matches(scalar, result) {
                Ok(())
            } else {
                Err(ValidationFailure::new(format!(
                    "Failure: result: expected:<{} {}> but was:<{} {}>",
                    scalar.type_name(),
                    scalar,
                    result.type_name(),
                    result
                )))
            }
        }
        ExpectedResult::ThrowsMatch(message) => Err(ValidationFailure::new(format!(
            "Test was not expected to return a value (expected error '{}', got {} {})",
            message,
            result.type_name(),
            result
        ))),
    }
}

/// Type-exact equality. Floats compare by representation, with every NaN
/// equal to every other NaN.
pub fn scalar_matches(expected: &Scalar, actual: &Value) -> bool {
    match (expected, actual) {
        (Scalar::Int(e), Value::I32(a)) => e == a,
        (Scalar::Long(e), Value::I64(a)) => e == a,
        (Scalar::Float(e), Value::F32(a)) => (e.is_nan() && a.is_nan()) || e.to_bits() == a.to_bits(),
        (Scalar::Double(e), Value::F64(a)) => (e.is_nan() && a.is_nan()) || e.to_bits() == a.to_bits(),
        _ => false,
    }
}

/// Line-oriented unified diff between expected and actual text
pub fn unified_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_lines(expected, actual);
    let mut output = String::from("--- expected\n+++ actual\n");

    for group in diff.grouped_ops(3) {
        if let Some((first, last)) = group.first().zip(group.last()) {
            let old_start = first.old_range().start;
            let new_start = first.new_range().start;
            output.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                old_start + 1,
                last.old_range().end - old_start,
                new_start + 1,
                last.new_range().end - new_start,
            ));
        }

        for op in group {
            for change in diff.iter_changes(&op) {
                let prefix = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                output.push_str(prefix);
                output.push_str(change.value());
                if change.missing_newline() {
                    output.push_str("\n\\ No newline at end of file\n");
                }
            }
        }
    }

    output
}
