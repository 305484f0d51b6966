//! Script sandbox.
//!
//! Runs an untrusted snippet with the execution context bound as global
//! variables. Each call builds a fresh interpreter, so nothing leaks between
//! calls and the sandbox can be shared freely across invocations.

use std::time::{Duration, Instant};

use base64::Engine as _;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Scope};
use schemata_core::config::SandboxConfig;
use serde_json::{Map, Value};

use crate::error::{ActionError, ScriptBudget};

/// Executes script snippets against a context.
pub trait ScriptSandbox: Send + Sync {
    /// Run `script` with every context entry visible as a global name.
    /// A script yielding unit or null produces `Value::Null`.
    fn run(&self, script: &str, context: &Map<String, Value>) -> Result<Value, ActionError>;
}

/// Sandbox backed by the `rhai` interpreter.
#[derive(Debug, Clone, Default)]
pub struct RhaiSandbox {
    config: SandboxConfig,
}

impl RhaiSandbox {
    /// Create a sandbox with the given limits.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        if self.config.max_operations > 0 {
            engine.set_max_operations(self.config.max_operations);
        }
        engine.set_max_call_levels(self.config.max_call_depth);

        if self.config.timeout_ms > 0 {
            let started = Instant::now();
            let budget = Duration::from_millis(self.config.timeout_ms);
            engine.on_progress(move |_ops| {
                if started.elapsed() > budget {
                    Some(Dynamic::UNIT)
                } else {
                    None
                }
            });
        }

        engine.register_fn("btoa", |data: ImmutableString| -> String {
            base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
        });
        engine.register_fn("btoa", |data: rhai::Blob| -> String {
            base64::engine::general_purpose::STANDARD.encode(data)
        });
        engine.register_fn("uuid", || -> String { uuid::Uuid::new_v4().to_string() });
        engine
    }

    fn scope(context: &Map<String, Value>) -> Result<Scope<'static>, String> {
        let mut scope = Scope::new();
        for (name, value) in context {
            if !is_identifier(name) {
                continue;
            }
            let dynamic = rhai::serde::to_dynamic(value).map_err(|e| e.to_string())?;
            scope.push_dynamic(name.as_str(), dynamic);
        }
        Ok(scope)
    }

    fn classify(&self, script: &str, err: Box<EvalAltResult>) -> ActionError {
        match *err {
            EvalAltResult::ErrorTerminated(..) => ActionError::ScriptTimeout {
                script: script.to_string(),
                budget: ScriptBudget::WallClock(self.config.timeout_ms),
            },
            EvalAltResult::ErrorTooManyOperations(..) => ActionError::ScriptTimeout {
                script: script.to_string(),
                budget: ScriptBudget::Operations(self.config.max_operations),
            },
            other => ActionError::ScriptError {
                script: script.to_string(),
                cause: other.to_string(),
            },
        }
    }
}

impl ScriptSandbox for RhaiSandbox {
    fn run(&self, script: &str, context: &Map<String, Value>) -> Result<Value, ActionError> {
        let engine = self.engine();
        let mut scope = Self::scope(context).map_err(|cause| ActionError::ScriptError {
            script: script.to_string(),
            cause,
        })?;

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, script)
            .map_err(|e| self.classify(script, e))?;

        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic::<Value>(&result).map_err(|e| ActionError::ScriptError {
            script: script.to_string(),
            cause: e.to_string(),
        })
    }
}

/// Whether a context key can be bound as a script variable.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
