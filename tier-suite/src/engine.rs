//! Contract between the harness and the engine under test
//!
//! The harness never looks inside the engine. It creates one context per
//! tier, evaluates the case's module once in it, resolves a fixed set of
//! exports and then only issues calls through [`EngineContext::call`].

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tiers::TierConfig;
use crate::watchdog::CancelToken;
use crate::HarnessError;

/// Errors raised by the engine
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The module could not be decoded, validated or linked
    #[error("{0}")]
    Load(String),

    /// The program raised an error while running
    #[error("{0}")]
    Runtime(String),

    /// The call observed a raised [`CancelToken`] and gave up
    #[error("call cancelled")]
    Cancelled,
}

/// Engine-owned value the harness holds without inspecting
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// Values crossing the engine boundary
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Opaque(Opaque),
}

impl Value {
    /// Short type name used in mismatch messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::I32(_) => "int",
            Value::I64(_) => "long",
            Value::F32(_) => "float",
            Value::F64(_) => "double",
            Value::Text(_) => "text",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v:?}"),
            Value::F64(v) => write!(f, "{v:?}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

/// Handle to a module evaluated in a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub usize);

/// Handle to a resolved export of an evaluated module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportRef(pub usize);

/// Options an engine receives when a context is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub compilation_enabled: bool,
    pub background_compilation_enabled: bool,
    pub compile_immediately: bool,
    pub inlining_enabled: bool,
    /// Engine log verbosity, forwarded untouched
    pub log_level: Option<String>,
    /// Comma separated `name:module` list of built-in modules to expose
    pub external_modules: String,
}

impl ContextConfig {
    pub fn for_tier(tier: &TierConfig, log_level: Option<String>, external_modules: &str) -> Self {
        Self {
            compilation_enabled: tier.compilation_enabled,
            background_compilation_enabled: tier.background_compilation_enabled,
            compile_immediately: tier.compile_immediately,
            inlining_enabled: tier.inlining_enabled,
            log_level,
            external_modules: external_modules.to_string(),
        }
    }
}

/// Creates engine contexts. Shared by every tier of every case.
pub trait EngineFactory: Send + Sync {
    fn create_context(&self, config: &ContextConfig)
        -> Result<Box<dyn EngineContext>, EngineError>;
}

/// One isolated engine instance
///
/// Contexts never leave the thread that created them.
pub trait EngineContext {
    /// Evaluate module bytes. Output produced while evaluating goes to `stdout`;
    /// the runner logs it at debug level and never validates it.
    fn evaluate(
        &mut self,
        module: &[u8],
        stdout: &mut dyn Write,
    ) -> Result<ModuleHandle, EngineError>;

    /// Resolve an export by name
    fn lookup(&self, module: ModuleHandle, name: &str) -> Option<ExportRef>;

    /// Call a resolved export. Long running engines should poll `cancel`.
    fn call(
        &mut self,
        export: ExportRef,
        args: &[Value],
        stdout: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<Value, EngineError>;
}

/// Well-known export names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNames {
    pub main: String,
    pub reset_context: String,
    pub run_custom_initialization: String,
    pub save_context: String,
    pub compare_contexts: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            main: "_main".to_string(),
            reset_context: "__testutil_reset_context".to_string(),
            run_custom_initialization: "__testutil_run_custom_initialization".to_string(),
            save_context: "__testutil_save_context".to_string(),
            compare_contexts: "__testutil_compare_contexts".to_string(),
        }
    }
}

/// Exports the runner needs, resolved once per evaluated module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleExports {
    pub main: ExportRef,
    pub reset_context: ExportRef,
    pub run_custom_initialization: ExportRef,
    pub save_context: ExportRef,
    pub compare_contexts: ExportRef,
}

impl ModuleExports {
    /// Resolve every required export, failing on the first missing one
    pub fn resolve(
        context: &dyn EngineContext,
        module: ModuleHandle,
        names: &ExportNames,
    ) -> Result<Self, HarnessError> {
        let find = |name: &str| resolve_export(context, module, name);

        Ok(Self {
            main: find(&names.main)?,
            reset_context: find(&names.reset_context)?,
            run_custom_initialization: find(&names.run_custom_initialization)?,
            save_context: find(&names.save_context)?,
            compare_contexts: find(&names.compare_contexts)?,
        })
    }
}

/// Resolve a single export by name
pub fn resolve_export(
    context: &dyn EngineContext,
    module: ModuleHandle,
    name: &str,
) -> Result<ExportRef, HarnessError> {
    context
        .lookup(module, name)
        .ok_or_else(|| HarnessError::Load(format!("Module does not export '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lookup(Vec<&'static str>);

    impl EngineContext for Lookup {
        fn evaluate(&mut self, _: &[u8], _: &mut dyn Write) -> Result<ModuleHandle, EngineError> {
            Ok(ModuleHandle(0))
        }

        fn lookup(&self, _: ModuleHandle, name: &str) -> Option<ExportRef> {
            self.0.iter().position(|n| *n == name).map(ExportRef)
        }

        fn call(
            &mut self,
            _: ExportRef,
            _: &[Value],
            _: &mut dyn Write,
            _: &CancelToken,
        ) -> Result<Value, EngineError> {
            Ok(Value::Unit)
        }
    }

    #[test]
    fn test_resolve_all_exports() {
        let names = ExportNames::default();
        let context = Lookup(vec![
            "_main",
            "__testutil_reset_context",
            "__testutil_run_custom_initialization",
            "__testutil_save_context",
            "__testutil_compare_contexts",
        ]);

        let exports = ModuleExports::resolve(&context, ModuleHandle(0), &names).unwrap();
        assert_eq!(exports.main, ExportRef(0));
        assert_eq!(exports.compare_contexts, ExportRef(4));
    }

    #[test]
    fn test_missing_export_is_load_error() {
        let names = ExportNames::default();
        let context = Lookup(vec!["_main", "__testutil_reset_context"]);

        let err = ModuleExports::resolve(&context, ModuleHandle(0), &names).unwrap_err();
        assert_eq!(err.class(), "LoadError");
        assert!(err.to_string().contains("__testutil_run_custom_initialization"));
    }

    #[test]
    fn test_opaque_downcast() {
        let value = Opaque::new(vec![1u8, 2, 3]);
        assert_eq!(value.downcast_ref::<Vec<u8>>(), Some(&vec![1u8, 2, 3]));
        assert!(value.downcast_ref::<String>().is_none());
    }
}
