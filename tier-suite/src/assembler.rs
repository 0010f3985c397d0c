//! Turning textual case sources into loadable module bytes

use log::debug;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::HarnessError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Build step applied to text cases before they are loaded
pub trait Assembler: Send + Sync {
    fn assemble<'a>(
        &'a self,
        case_name: &'a str,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, HarnessError>>;
}

/// Hands the source text to the engine unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Assembler;

impl Assembler for Utf8Assembler {
    fn assemble<'a>(
        &'a self,
        _case_name: &'a str,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, HarnessError>> {
        Box::pin(async move { Ok(source.as_bytes().to_vec()) })
    }
}

/// Runs an external tool, e.g. `wat2wasm {input} -o {output}`
///
/// `{input}` is replaced by a temporary file holding the source and
/// `{output}` by the path the tool must write the module to.
#[derive(Debug, Clone)]
pub struct CommandAssembler {
    command: String,
    timeout: Duration,
}

impl CommandAssembler {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self { command: command.into(), timeout }
    }

    async fn run(&self, case_name: &str, source: &str) -> Result<Vec<u8>, HarnessError> {
        let load_error =
            |what: &str, e: &dyn std::fmt::Display| HarnessError::Load(format!("Test {} failed: {}: {}", case_name, what, e));

        let workdir = tempfile::tempdir().map_err(|e| load_error("failed to create temp dir", &e))?;
        let input_path = workdir.path().join(format!("{}.src", sanitize(case_name)));
        let output_path = workdir.path().join(format!("{}.bin", sanitize(case_name)));

        let mut input = std::fs::File::create(&input_path)
            .map_err(|e| load_error("failed to create temp file", &e))?;
        input.write_all(source.as_bytes()).map_err(|e| load_error("failed to write temp file", &e))?;
        drop(input);

        let command = self
            .command
            .replace("{input}", &input_path.to_string_lossy())
            .replace("{output}", &output_path.to_string_lossy());

        let mut parts = shlex::split(&command)
            .ok_or_else(|| HarnessError::Config(format!("Failed to parse assembler command: {}", self.command)))?;
        if parts.is_empty() {
            return Err(HarnessError::Config("Empty assembler command".to_string()));
        }
        let program = parts.remove(0);

        debug!("Assembling {} with: {}", case_name, command);

        let child = TokioCommand::new(&program)
            .args(&parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| load_error(&format!("failed to spawn {}", program), &e))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| load_error("assembler error", &e))?,
            Err(_) => return Err(HarnessError::Load(format!("Test {} failed: assembler timed out", case_name))),
        };

        if !output.status.success() {
            return Err(HarnessError::Load(format!(
                "Test {} failed: assembler exited with {}: {}",
                case_name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tokio::fs::read(&output_path).await.map_err(|e| load_error("failed to read assembled module", &e))
    }
}

impl Assembler for CommandAssembler {
    fn assemble<'a>(
        &'a self,
        case_name: &'a str,
        source: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, HarnessError>> {
        Box::pin(self.run(case_name, source))
    }
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}
