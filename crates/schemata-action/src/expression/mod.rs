//! Expression evaluator.
//!
//! Resolves one attribute template against the execution context. Templates
//! starting with a control code (`!`, `{{ }}`, `js:`) run in the script
//! sandbox, `~` templates are raw path lookups and everything else is text
//! with `$reference` substitutions.
//!
//! `Ok(None)` is the nil result: the caller prunes the key instead of
//! storing a null. Only scripts and `~` paths produce it; substitution always
//! yields a string.

pub mod parser;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::sandbox::ScriptSandbox;
use crate::store::display_value;

pub use parser::{Expression, PathStep, Segment};

#[derive(Clone)]
pub struct Evaluator {
    sandbox: Arc<dyn ScriptSandbox>,
}

impl Evaluator {
    /// Create an evaluator that runs scripts in `sandbox`.
    pub fn new(sandbox: Arc<dyn ScriptSandbox>) -> Self {
        Self { sandbox }
    }

    /// Resolve one attribute template against `context`.
    ///
    /// Substituted references that are missing or null render as empty
    /// text. A missing intermediate segment, indexing a non-array or an
    /// index past the end is an error.
    pub fn evaluate(
        &self,
        template: &str,
        context: &Map<String, Value>,
    ) -> Result<Option<Value>, ActionError> {
        match parser::parse(template) {
            Expression::Empty => Ok(Some(Value::String(String::new()))),
            Expression::Script(script) => match self.sandbox.run(&script, context)? {
                Value::Null => Ok(None),
                value => Ok(Some(value)),
            },
            Expression::Path(parts) => Ok(lookup_path(&parts, context)),
            Expression::Template(segments) => substitute(template, &segments, context),
        }
    }
}

/// Walk `parts` through nested objects. Any gap yields nil.
fn lookup_path(parts: &[String], context: &Map<String, Value>) -> Option<Value> {
    let (last, intermediate) = parts.split_last()?;
    let mut current = context;
    for part in intermediate {
        match current.get(part) {
            Some(Value::Object(next)) => current = next,
            _ => return None,
        }
    }
    match current.get(last) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

fn substitute(
    template: &str,
    segments: &[Segment],
    context: &Map<String, Value>,
) -> Result<Option<Value>, ActionError> {
    let mut out = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference { steps, .. } => {
                let value = resolve_reference(template, steps, context)?.unwrap_or(Value::Null);
                out.push_str(&display_value(&value));
            }
        }
    }
    Ok(Some(Value::String(out)))
}

/// Resolve a `$` reference. A missing leaf or a null anywhere along the
/// path is `None`; structural problems are errors.
fn resolve_reference(
    template: &str,
    steps: &[PathStep],
    context: &Map<String, Value>,
) -> Result<Option<Value>, ActionError> {
    let mut current = context;
    let last = steps.len().saturating_sub(1);

    for (i, step) in steps.iter().enumerate() {
        let is_last = i == last;
        let mut value = match current.get(&step.key) {
            Some(value) => value,
            None if is_last => return Ok(None),
            None => {
                return Err(ActionError::PathResolutionFailed {
                    template: template.to_string(),
                    segment: step.key.clone(),
                })
            }
        };

        if let Some(index) = step.index {
            let items = match value {
                Value::Array(items) => items,
                Value::Null => return Ok(None),
                _ => {
                    return Err(ActionError::TypeMismatch {
                        template: template.to_string(),
                        segment: step.key.clone(),
                    })
                }
            };
            value = items.get(index).ok_or_else(|| ActionError::OutOfRange {
                template: template.to_string(),
                index,
                len: items.len(),
            })?;
        }

        if is_last {
            return Ok(match value {
                Value::Null => None,
                value => Some(value.clone()),
            });
        }

        match value {
            Value::Object(next) => current = next,
            Value::Null => return Ok(None),
            _ => {
                return Err(ActionError::TypeMismatch {
                    template: template.to_string(),
                    segment: step.key.clone(),
                })
            }
        }
    }
    Ok(None)
}
