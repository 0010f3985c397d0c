//! Test case model and descriptor parsing

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::assembler::Assembler;
use crate::tiers::Tier;
use crate::HarnessError;

/// Expected scalar return value
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Scalar {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "int",
            Scalar::Long(_) => "long",
            Scalar::Float(_) => "float",
            Scalar::Double(_) => "double",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
            Scalar::Double(v) => write!(f, "{v:?}"),
        }
    }
}

/// What a case must produce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExpectedResult {
    /// Captured output must equal the text exactly
    StdoutMatch(String),
    /// Return value must equal the scalar, type included
    ScalarMatch(Scalar),
    /// Execution must raise an error with exactly this message
    ThrowsMatch(String),
}

impl ExpectedResult {
    /// Message of the error the case expects, if it expects one
    pub fn expected_error(&self) -> Option<&str> {
        match self {
            ExpectedResult::ThrowsMatch(message) => Some(message),
            _ => None,
        }
    }
}

impl FromStr for ExpectedResult {
    type Err = HarnessError;

    /// Parse a one-line result descriptor such as `int 42` or `stdout Hello`.
    ///
    /// The text after `stdout` and `exception` is kept verbatim, trailing
    /// newline included.
    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let descriptor = descriptor.trim_start();
        let (kind, value) = match descriptor.find(char::is_whitespace) {
            Some(pos) => {
                let rest = &descriptor[pos..];
                (&descriptor[..pos], rest.trim_start())
            }
            None => (descriptor, ""),
        };

        let parse_error = |e: &dyn fmt::Display| {
            HarnessError::Parse(format!("Invalid {} in result descriptor '{}': {}", kind, value.trim(), e))
        };

        let expected = match kind {
            "stdout" => ExpectedResult::StdoutMatch(value.to_string()),
            "exception" => ExpectedResult::ThrowsMatch(value.to_string()),
            "int" => ExpectedResult::ScalarMatch(Scalar::Int(
                value.trim().parse().map_err(|e| parse_error(&e))?,
            )),
            "long" => ExpectedResult::ScalarMatch(Scalar::Long(
                value.trim().parse().map_err(|e| parse_error(&e))?,
            )),
            "float" => ExpectedResult::ScalarMatch(Scalar::Float(
                parse_float_literal(value.trim()).map_err(|e| parse_error(&e))?,
            )),
            "double" => ExpectedResult::ScalarMatch(Scalar::Double(
                parse_float_literal(value.trim()).map_err(|e| parse_error(&e))?,
            )),
            other => {
                return Err(HarnessError::Parse(format!(
                    "Unknown type in result descriptor: {}",
                    other
                )))
            }
        };

        Ok(expected)
    }
}

/// Float parsing that also accepts the `Infinity` spelling and an `f`/`d` suffix
fn parse_float_literal<T: FromStr>(text: &str) -> Result<T, T::Err> {
    let text = text.strip_suffix(['f', 'F', 'd', 'D']).unwrap_or(text);
    let normalized = match text {
        "Infinity" | "+Infinity" => "inf",
        "-Infinity" => "-inf",
        other => other,
    };
    normalized.parse()
}

/// Per-case tuning options
///
/// Recognised keys are validated when the options are parsed; unknown keys
/// are kept so engines or embedders can read them through [`CaseOptions::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, String>", into = "IndexMap<String, String>")]
pub struct CaseOptions {
    values: IndexMap<String, String>,
}

impl TryFrom<IndexMap<String, String>> for CaseOptions {
    type Error = HarnessError;

    fn try_from(values: IndexMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(values)
    }
}

impl From<CaseOptions> for IndexMap<String, String> {
    fn from(options: CaseOptions) -> Self {
        options.values
    }
}

impl CaseOptions {
    /// Parse `key=value` entries separated by newlines or whitespace. `#`
    /// starts a comment line.
    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let mut values = IndexMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            for (key, value) in split_entries(line)? {
                values.insert(key, value);
            }
        }

        Self::from_pairs(values)
    }

    /// Build options from key/value pairs, validating recognised keys
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let options = Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        };

        for tier in Tier::ALL {
            options.parse_count(tier.option_key())?;
        }
        options.parse_count("state-check-initial")?;
        options.parse_count("state-check-period")?;
        options.parse_flag("zero-memory")?;

        Ok(options)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iteration override for a tier
    pub fn iterations(&self, tier: Tier) -> Option<u32> {
        self.parse_count(tier.option_key()).ok().flatten()
    }

    /// Whether every reset must zero memory
    pub fn zero_memory(&self) -> bool {
        self.parse_flag("zero-memory").ok().flatten().unwrap_or(false)
    }

    pub fn state_check_initial(&self) -> Option<u32> {
        self.parse_count("state-check-initial").ok().flatten()
    }

    pub fn state_check_period(&self) -> Option<u32> {
        self.parse_count("state-check-period").ok().flatten()
    }

    fn parse_count(&self, key: &str) -> Result<Option<u32>, HarnessError> {
        self.get(key)
            .map(|value| {
                value.trim().parse::<u32>().map_err(|e| {
                    HarnessError::Parse(format!("Invalid value '{}' for option {}: {}", value, key, e))
                })
            })
            .transpose()
    }

    fn parse_flag(&self, key: &str) -> Result<Option<bool>, HarnessError> {
        self.get(key)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" | "" => Ok(false),
                _ => Err(HarnessError::Parse(format!(
                    "Invalid value '{}' for option {}: expected true or false",
                    value, key
                ))),
            })
            .transpose()
    }
}

/// Split one options line into entries. `key = value` with spaces around the
/// equals sign is a single entry; otherwise whitespace separates entries.
fn split_entries(line: &str) -> Result<Vec<(String, String)>, HarnessError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() == 3 && tokens[1] == "=" {
        return Ok(vec![(tokens[0].to_string(), tokens[2].to_string())]);
    }

    tokens
        .into_iter()
        .map(|token| match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(HarnessError::Parse(format!("Invalid option entry: {}", token))),
        })
        .collect()
}

/// Program content of a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseSource {
    /// Textual source that still has to be assembled
    Text(String),
    /// Ready-to-load module bytes
    Binary(Vec<u8>),
}

/// A single named test or benchmark case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub expected: ExpectedResult,
    /// Payload for the custom initialization export
    pub initializer: Option<String>,
    pub options: CaseOptions,
    pub source: CaseSource,
}

impl TestCase {
    pub fn new(name: impl Into<String>, expected: ExpectedResult, source: CaseSource) -> Self {
        Self {
            name: name.into(),
            expected,
            initializer: None,
            options: CaseOptions::default(),
            source,
        }
    }

    /// Case whose captured output must match
    pub fn expected_stdout(name: impl Into<String>, output: impl Into<String>, source: CaseSource) -> Self {
        Self::new(name, ExpectedResult::StdoutMatch(output.into()), source)
    }

    /// Case whose return value must match
    pub fn expected(name: impl Into<String>, value: Scalar, source: CaseSource) -> Self {
        Self::new(name, ExpectedResult::ScalarMatch(value), source)
    }

    /// Case that must raise an error with the given message
    pub fn expected_throws(name: impl Into<String>, message: impl Into<String>, source: CaseSource) -> Self {
        Self::new(name, ExpectedResult::ThrowsMatch(message.into()), source)
    }

    pub fn with_initializer(mut self, initializer: impl Into<String>) -> Self {
        self.initializer = Some(initializer.into());
        self
    }

    pub fn with_options(mut self, options: CaseOptions) -> Self {
        self.options = options;
        self
    }

    /// Produce the module bytes to load
    pub async fn create_binary(&self, assembler: &dyn Assembler) -> Result<Vec<u8>, HarnessError> {
        match &self.source {
            CaseSource::Binary(bytes) => Ok(bytes.clone()),
            CaseSource::Text(text) => assembler.assemble(&self.name, text).await,
        }
    }
}
