//! Execution context and the attribute template builder.

use serde_json::{Map, Value};
use tracing::debug;

use schemata_core::types::ActionResponse;

use crate::error::ActionError;
use crate::expression::Evaluator;
use crate::store::{REFERENCE_ID, TYPE_FIELD};

/// Resolves an outcome's attribute template tree against a context.
#[derive(Clone)]
pub struct ContextBuilder {
    evaluator: Evaluator,
}

impl ContextBuilder {
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Resolve `template`. Map entries that resolve to nil are dropped; array
    /// elements keep their position and become null. The first evaluation
    /// error aborts the whole build.
    pub fn build(&self, template: &Value, context: &Map<String, Value>) -> Result<Value, ActionError> {
        match template {
            Value::String(text) => Ok(self
                .evaluator
                .evaluate(text, context)?
                .unwrap_or(Value::Null)),
            Value::Object(_) | Value::Array(_) => {
                Ok(self.resolve(template, context)?.unwrap_or(Value::Null))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Resolve a template into a map. A non-object result is an empty map.
    pub fn build_map(
        &self,
        template: &Value,
        context: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ActionError> {
        match self.build(template, context)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn resolve(&self, template: &Value, context: &Map<String, Value>) -> Result<Option<Value>, ActionError> {
        match template {
            Value::String(text) => self.evaluator.evaluate(text, context),
            Value::Object(entries) => {
                let mut out = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    if let Some(resolved) = self.resolve(value, context)? {
                        out.insert(key.clone(), resolved);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.resolve(item, context)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(out)))
            }
            scalar => Ok(Some(scalar.clone())),
        }
    }
}

/// Per-invocation namespace. Keys are only ever added or replaced.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from validated inputs, the full attribute map, the caller's user
    /// record and the subject.
    pub fn seed(
        inputs: &Map<String, Value>,
        attributes: &Map<String, Value>,
        user: Option<Value>,
        subject: Option<(&str, Value)>,
    ) -> Self {
        let mut values = inputs.clone();
        values.insert("attributes".to_string(), Value::Object(attributes.clone()));
        if let Some(user) = user {
            values.insert("user".to_string(), user);
        }
        if let Some((subject_type, mut subject)) = subject {
            if let Value::Object(row) = &mut subject {
                row.insert(TYPE_FIELD.to_string(), Value::String(subject_type.to_string()));
                if let Some(id) = row.get(REFERENCE_ID).cloned() {
                    values.insert(format!("{}_id", subject_type), id);
                }
            }
            values.insert("subject".to_string(), subject);
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Publish an outcome's output under `reference`. The whole delta is
    /// computed first and applied in one step.
    pub fn publish(&mut self, reference: &str, result: Option<&Value>, responses: &[ActionResponse]) {
        let delta = Self::delta(reference, result, responses);
        debug!(reference, keys = delta.len(), "publishing outcome result");
        self.values.extend(delta);
    }

    fn delta(reference: &str, result: Option<&Value>, responses: &[ActionResponse]) -> Map<String, Value> {
        let mut delta = Map::new();

        if !responses.is_empty() {
            let mut all = Vec::with_capacity(responses.len());
            for (i, response) in responses.iter().enumerate() {
                delta.insert(
                    format!("response.{}[{}]", reference, i),
                    response.attributes.clone(),
                );
                all.push(response.attributes.clone());
            }
            delta.insert(reference.to_string(), Value::Array(all));
        }

        match result {
            Some(Value::Object(row)) => {
                delta.insert(reference.to_string(), Value::Object(row.clone()));
            }
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    delta.insert(format!("{}[{}]", reference, i), item.clone());
                }
                delta.insert(reference.to_string(), Value::Array(items.clone()));
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                delta.insert(reference.to_string(), other.clone());
            }
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RhaiSandbox;
    use serde_json::json;
    use std::sync::Arc;

    fn builder() -> ContextBuilder {
        ContextBuilder::new(Evaluator::new(Arc::new(RhaiSandbox::default())))
    }

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    // ---- build ----

    #[test]
    fn test_build_resolves_nested_tree() {
        let context = ctx(json!({"order": {"reference_id": "abc", "total": 12}}));
        let template = json!({
            "order_id": "$order.reference_id",
            "meta": {"total": "~order.total", "fixed": 7, "flag": true},
            "items": ["$order.reference_id", 1, {"raw": "~order.total"}]
        });
        let built = builder().build(&template, &context).unwrap();
        assert_eq!(
            built,
            json!({
                "order_id": "abc",
                "meta": {"total": 12, "fixed": 7, "flag": true},
                "items": ["abc", 1, {"raw": 12}]
            })
        );
    }

    #[test]
    fn test_build_prunes_nil_map_entries() {
        let context = ctx(json!({"order": {"reference_id": "abc"}}));
        let template = json!({
            "id": "$order.reference_id",
            "missing": "~order.nothing",
            "nested": {"gone": "~order.nothing"},
            "explicit_null": null
        });
        let built = builder().build(&template, &context).unwrap();
        assert_eq!(
            built,
            json!({"id": "abc", "nested": {}, "explicit_null": null})
        );
        // pruning is stable
        let again = builder().build(&built, &context).unwrap();
        assert_eq!(again, built);
    }

    #[test]
    fn test_build_keeps_text_with_missing_references() {
        let context = ctx(json!({"user": {"name": "Ada"}}));
        let template = json!({"message": "Hello $user.nickname, order shipped"});
        let built = builder().build(&template, &context).unwrap();
        assert_eq!(built, json!({"message": "Hello , order shipped"}));
    }

    #[test]
    fn test_build_keeps_array_positions() {
        let template = json!(["~a.missing", "x"]);
        let built = builder().build(&template, &Map::new()).unwrap();
        assert_eq!(built, json!([null, "x"]));
    }

    #[test]
    fn test_build_scalars_pass_through() {
        assert_eq!(builder().build(&json!(42), &Map::new()).unwrap(), json!(42));
        assert_eq!(builder().build(&json!(null), &Map::new()).unwrap(), json!(null));
    }

    #[test]
    fn test_build_aborts_on_first_error() {
        let context = ctx(json!({"list": []}));
        let template = json!({"ok": "fine", "bad": "$list[0]"});
        let err = builder().build(&template, &context).unwrap_err();
        assert!(matches!(err, ActionError::OutOfRange { .. }));
    }

    #[test]
    fn test_build_map_of_non_object_is_empty() {
        let map = builder().build_map(&json!("text"), &Map::new()).unwrap();
        assert!(map.is_empty());
    }

    // ---- execution context ----

    #[test]
    fn test_seed() {
        let inputs = ctx(json!({"status": "shipped"}));
        let attributes = ctx(json!({"status": "shipped", "order_id": "abc"}));
        let context = ExecutionContext::seed(
            &inputs,
            &attributes,
            Some(json!({"reference_id": "u-1"})),
            Some(("order", json!({"reference_id": "abc", "status": "pending"}))),
        );
        assert_eq!(context.get("status"), Some(&json!("shipped")));
        assert_eq!(context.get("attributes"), Some(&Value::Object(attributes)));
        assert_eq!(context.get("user"), Some(&json!({"reference_id": "u-1"})));
        assert_eq!(context.get("order_id"), Some(&json!("abc")));
        assert_eq!(
            context.get("subject"),
            Some(&json!({"reference_id": "abc", "status": "pending", "__type": "order"}))
        );
    }

    #[test]
    fn test_seed_without_user_or_subject() {
        let context = ExecutionContext::seed(&Map::new(), &Map::new(), None, None);
        assert!(!context.contains("user"));
        assert!(!context.contains("subject"));
        assert!(context.contains("attributes"));
    }

    #[test]
    fn test_publish_object_result() {
        let mut context = ExecutionContext::new();
        context.publish("order", Some(&json!({"reference_id": "abc"})), &[]);
        assert_eq!(context.get("order"), Some(&json!({"reference_id": "abc"})));
    }

    #[test]
    fn test_publish_array_result() {
        let mut context = ExecutionContext::new();
        context.publish("rows", Some(&json!([{"a": 1}, {"a": 2}])), &[]);
        assert_eq!(context.get("rows[0]"), Some(&json!({"a": 1})));
        assert_eq!(context.get("rows[1]"), Some(&json!({"a": 2})));
        assert_eq!(context.get("rows"), Some(&json!([{"a": 1}, {"a": 2}])));
    }

    #[test]
    fn test_publish_responses_only() {
        let mut context = ExecutionContext::new();
        let responses = vec![
            ActionResponse::new("mail", json!({"sent": true})),
            ActionResponse::new("mail", json!({"sent": false})),
        ];
        context.publish("mail", None, &responses);
        assert_eq!(context.get("response.mail[0]"), Some(&json!({"sent": true})));
        assert_eq!(context.get("response.mail[1]"), Some(&json!({"sent": false})));
        assert_eq!(
            context.get("mail"),
            Some(&json!([{"sent": true}, {"sent": false}]))
        );
    }

    #[test]
    fn test_publish_result_wins_over_response_list() {
        let mut context = ExecutionContext::new();
        let responses = vec![ActionResponse::new("order", json!({"reference_id": "abc"}))];
        context.publish("order", Some(&json!({"reference_id": "abc"})), &responses);
        assert_eq!(context.get("order"), Some(&json!({"reference_id": "abc"})));
        assert!(context.contains("response.order[0]"));
    }

    #[test]
    fn test_publish_replaces_same_reference() {
        let mut context = ExecutionContext::new();
        context.publish("step", Some(&json!({"n": 1})), &[]);
        context.publish("step", Some(&json!({"n": 2})), &[]);
        assert_eq!(context.get("step"), Some(&json!({"n": 2})));
    }
}
