//! Scripted engine shared by the integration tests
//!
//! A module is UTF-8 text, one directive per line:
//! - `print <text>`: main writes the line to its output
//! - `return <int|long|float|double> <n>`: main returns that value (default unit)
//! - `trap <message>`: main raises a runtime error
//! - `evaluate-trap <message>`: evaluating the module raises a runtime error
//! - `drift-at <n>`: snapshots taken from iteration `n` on differ from earlier ones
//! - `hang`: main spins until cancelled
//! - `panic`: main panics
//! - `missing <export>`: the module does not export that name

#![allow(dead_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tier_suite::{
    CancelToken, ContextConfig, EngineContext, EngineError, EngineFactory, ExportNames, ExportRef,
    ExpectedResult, ModuleHandle, ProgressReporter, TestCase, Value, CaseSource,
};

const MAIN: usize = 0;
const RESET: usize = 1;
const INIT: usize = 2;
const SAVE: usize = 3;
const COMPARE: usize = 4;

/// Everything the engine saw, per context
#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub contexts: Vec<ContextConfig>,
    pub main_calls: Vec<u32>,
    pub resets: Vec<Vec<bool>>,
    pub initializations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Program {
    prints: Vec<String>,
    returns: Option<Value>,
    trap: Option<String>,
    evaluate_trap: Option<String>,
    drift_at: Option<u32>,
    hang: bool,
    panic: bool,
    missing: Vec<String>,
}

impl Program {
    fn parse(text: &str) -> Result<Self, EngineError> {
        let mut program = Program::default();
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let (directive, rest) = line.split_once(' ').unwrap_or((line, ""));
            match directive {
                "print" => program.prints.push(rest.to_string()),
                "return" => program.returns = Some(parse_value(rest)?),
                "trap" => program.trap = Some(rest.to_string()),
                "evaluate-trap" => program.evaluate_trap = Some(rest.to_string()),
                "drift-at" => {
                    program.drift_at = Some(rest.parse().map_err(|_| EngineError::Load(line.to_string()))?)
                }
                "hang" => program.hang = true,
                "panic" => program.panic = true,
                "missing" => program.missing.push(rest.to_string()),
                _ => return Err(EngineError::Load(format!("unknown directive: {}", line))),
            }
        }
        Ok(program)
    }
}

fn parse_value(text: &str) -> Result<Value, EngineError> {
    let bad = || EngineError::Load(format!("bad value: {}", text));
    let (kind, value) = text.split_once(' ').ok_or_else(bad)?;
    Ok(match kind {
        "int" => Value::I32(value.parse().map_err(|_| bad())?),
        "long" => Value::I64(value.parse().map_err(|_| bad())?),
        "float" => Value::F32(value.parse().map_err(|_| bad())?),
        "double" => Value::F64(value.parse().map_err(|_| bad())?),
        _ => return Err(bad()),
    })
}

/// Engine factory driven by textual programs
#[derive(Default)]
pub struct ScriptedEngine {
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn journal(&self) -> Journal {
        self.journal.lock().unwrap().clone()
    }
}

impl EngineFactory for ScriptedEngine {
    fn create_context(&self, config: &ContextConfig) -> Result<Box<dyn EngineContext>, EngineError> {
        let mut journal = self.journal.lock().unwrap();
        journal.contexts.push(config.clone());
        journal.main_calls.push(0);
        journal.resets.push(Vec::new());
        Ok(Box::new(ScriptedContext {
            id: journal.contexts.len() - 1,
            journal: self.journal.clone(),
            program: Program::default(),
            main_calls: 0,
        }))
    }
}

struct ScriptedContext {
    id: usize,
    journal: Arc<Mutex<Journal>>,
    program: Program,
    main_calls: u32,
}

impl ScriptedContext {
    fn main(&mut self, stdout: &mut dyn Write, cancel: &CancelToken) -> Result<Value, EngineError> {
        self.main_calls += 1;
        self.journal.lock().unwrap().main_calls[self.id] += 1;

        if self.program.panic {
            panic!("scripted panic");
        }
        if self.program.hang {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            return Err(EngineError::Cancelled);
        }
        for line in &self.program.prints {
            writeln!(stdout, "{}", line).map_err(|e| EngineError::Runtime(e.to_string()))?;
        }
        if let Some(message) = &self.program.trap {
            return Err(EngineError::Runtime(message.clone()));
        }
        Ok(self.program.returns.clone().unwrap_or(Value::Unit))
    }
}

impl EngineContext for ScriptedContext {
    fn evaluate(&mut self, module: &[u8], _stdout: &mut dyn Write) -> Result<ModuleHandle, EngineError> {
        let text = std::str::from_utf8(module).map_err(|e| EngineError::Load(e.to_string()))?;
        self.program = Program::parse(text)?;
        if let Some(message) = &self.program.evaluate_trap {
            return Err(EngineError::Runtime(message.clone()));
        }
        Ok(ModuleHandle(0))
    }

    fn lookup(&self, _module: ModuleHandle, name: &str) -> Option<ExportRef> {
        if self.program.missing.iter().any(|missing| missing == name) {
            return None;
        }
        let names = ExportNames::default();
        let slot = [
            &names.main,
            &names.reset_context,
            &names.run_custom_initialization,
            &names.save_context,
            &names.compare_contexts,
        ]
        .iter()
        .position(|export| export.as_str() == name)?;
        Some(ExportRef(slot))
    }

    fn call(
        &mut self,
        export: ExportRef,
        args: &[Value],
        stdout: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<Value, EngineError> {
        match export.0 {
            MAIN => self.main(stdout, cancel),
            RESET => {
                let zero = matches!(args, [Value::Bool(true)]);
                self.journal.lock().unwrap().resets[self.id].push(zero);
                Ok(Value::Unit)
            }
            INIT => {
                if let [Value::Text(payload)] = args {
                    self.journal.lock().unwrap().initializations.push(payload.clone());
                }
                Ok(Value::Unit)
            }
            SAVE => {
                let drifted = self.program.drift_at.map_or(false, |n| self.main_calls > n);
                Ok(Value::I64(if drifted { 1 } else { 0 }))
            }
            COMPARE => match args {
                [Value::I64(a), Value::I64(b)] if a == b => Ok(Value::Unit),
                _ => Err(EngineError::Runtime("memory differs at 0x10".to_string())),
            },
            other => Err(EngineError::Runtime(format!("no export {}", other))),
        }
    }
}

/// Case whose module is the given program
pub fn case(name: &str, program: &str, expected: &str) -> TestCase {
    let expected: ExpectedResult = expected.parse().unwrap();
    TestCase::new(name, expected, CaseSource::Binary(program.as_bytes().to_vec()))
}

/// Reporter that discards everything
pub fn silent_reporter() -> ProgressReporter {
    ProgressReporter::with_writers(Box::new(io::sink()), Box::new(io::sink()), 80)
}

/// Write one bundle: `(name, program, result descriptor, options)`
pub fn write_bundle(root: &Path, bundle: &str, cases: &[(&str, &str, &str, Option<&str>)]) {
    let dir = root.join(bundle);
    fs::create_dir_all(&dir).unwrap();

    let index: Vec<&str> = cases.iter().map(|(name, ..)| *name).collect();
    fs::write(dir.join("test_index"), index.join("\n")).unwrap();

    for (name, program, result, options) in cases {
        fs::write(dir.join(format!("{}.wat", name)), program).unwrap();
        fs::write(dir.join(format!("{}.result", name)), result).unwrap();
        if let Some(options) = options {
            fs::write(dir.join(format!("{}.opts", name)), options).unwrap();
        }
    }
}
