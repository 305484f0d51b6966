//! Outcome dispatcher.
//!
//! Executes one resolved outcome: entity CRUD through the store, a
//! pass-through response, or a named performer.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use schemata_core::types::{ActionResponse, Method, Outcome};

use crate::error::ActionError;
use crate::expression::Evaluator;
use crate::performer::become_admin::BECOME_ADMIN;
use crate::performer::PerformerRegistry;
use crate::store::{display_value, EntityStore, ListQuery, StoreError, REFERENCE_ID, TYPE_FIELD};

/// Outcome types that are always answered as plain responses.
const RESPONSE_TYPES: [&str; 4] = [
    "client.notify",
    "client.redirect",
    "client.store.set",
    "action.response",
];

/// An outcome's attributes after template resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub type_name: String,
    pub data: Map<String, Value>,
}

impl ResolvedModel {
    pub fn new(type_name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            type_name: type_name.into(),
            data,
        }
    }

    fn reference_id(&self, outcome: &Outcome) -> Result<String, ActionError> {
        match self.data.get(REFERENCE_ID) {
            Some(Value::Null) | None => Err(ActionError::InvalidOutcome {
                outcome_type: outcome.entity_type.clone(),
                message: format!("{} is required", REFERENCE_ID),
            }),
            Some(id) => Ok(display_value(id)),
        }
    }

    fn included_relations(&self) -> Vec<String> {
        match self.data.get("included_relations") {
            Some(Value::String(list)) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Output of one dispatched outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    pub result: Option<Value>,
    pub responses: Vec<ActionResponse>,
}

impl DispatchResult {
    fn entity(response_type: impl Into<String>, entity: Value) -> Self {
        Self {
            responses: vec![ActionResponse::new(response_type, entity.clone())],
            result: Some(entity),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn EntityStore>,
    performers: Arc<PerformerRegistry>,
    evaluator: Evaluator,
}

impl Dispatcher {
    /// Create a dispatcher over the given store and performers.
    pub fn new(
        store: Arc<dyn EntityStore>,
        performers: Arc<PerformerRegistry>,
        evaluator: Evaluator,
    ) -> Self {
        Self {
            store,
            performers,
            evaluator,
        }
    }

    /// The method actually used for an outcome. Some outcome types force
    /// their method regardless of what was declared.
    pub fn effective_method(outcome: &Outcome) -> Method {
        if RESPONSE_TYPES.contains(&outcome.entity_type.as_str()) {
            Method::ActionResponse
        } else if outcome.entity_type == BECOME_ADMIN {
            Method::Execute
        } else {
            outcome.method.clone()
        }
    }

    /// Whether the outcome's condition allows it to run. An empty condition
    /// always does; evaluation failures count as false.
    pub fn condition_holds(&self, outcome: &Outcome, context: &Map<String, Value>) -> bool {
        let condition = outcome.condition.as_str();
        if condition.is_empty() {
            return true;
        }
        let holds = match self.evaluator.evaluate(condition, context) {
            Ok(Some(Value::Bool(b))) => b,
            Ok(Some(Value::String(s))) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            Ok(_) => false,
            Err(e) => {
                warn!(outcome = %outcome.entity_type, condition, error = %e, "Condition failed to evaluate");
                false
            }
        };
        debug!(outcome = %outcome.entity_type, condition, holds, "Evaluated condition");
        holds
    }

    /// Execute one outcome against its resolved model.
    ///
    /// Entity methods go to the store; `EXECUTE` and custom methods go to
    /// the registered performer. Store failures become `DispatchFailed`. A
    /// missing performer is logged and yields an empty result.
    pub async fn execute(
        &self,
        outcome: &Outcome,
        model: ResolvedModel,
    ) -> Result<DispatchResult, ActionError> {
        let method = Self::effective_method(outcome);
        debug!(outcome = %outcome.entity_type, method = %method, "Dispatching outcome");
        let failed = |source: StoreError| ActionError::DispatchFailed {
            outcome_type: outcome.entity_type.clone(),
            method: method.to_string(),
            source,
        };

        match &method {
            Method::Post => {
                let entity = self
                    .store
                    .create(&outcome.entity_type, model.data)
                    .await
                    .map_err(failed)?;
                Ok(DispatchResult::entity(response_type(&entity, outcome), entity))
            }
            Method::Get => {
                let query = ListQuery::from_fields(&model.data);
                let rows = self
                    .store
                    .list(&outcome.entity_type, &query)
                    .await
                    .map_err(failed)?;
                Ok(DispatchResult::entity(
                    outcome.entity_type.clone(),
                    Value::Array(rows),
                ))
            }
            Method::GetById => {
                let id = model.reference_id(outcome)?;
                let relations = model.included_relations();
                let entity = self
                    .store
                    .fetch_by_id(&outcome.entity_type, &id, &relations)
                    .await
                    .map_err(failed)?;
                Ok(DispatchResult::entity(outcome.entity_type.clone(), entity))
            }
            Method::Patch => {
                let id = model.reference_id(outcome)?;
                let entity = self
                    .store
                    .update(&outcome.entity_type, &id, model.data)
                    .await
                    .map_err(failed)?;
                Ok(DispatchResult::entity(response_type(&entity, outcome), entity))
            }
            Method::Delete => {
                let id = model.reference_id(outcome)?;
                self.store
                    .delete(&outcome.entity_type, &id)
                    .await
                    .map_err(failed)?;
                Ok(DispatchResult {
                    result: None,
                    responses: vec![ActionResponse::notify(
                        "success",
                        format!("Deleted {} {}", outcome.entity_type, id),
                        "Success",
                    )],
                })
            }
            Method::ActionResponse => Ok(DispatchResult {
                result: None,
                responses: vec![ActionResponse::new(
                    outcome.entity_type.clone(),
                    Value::Object(model.data),
                )],
            }),
            Method::Execute => {
                let name = model.type_name.clone();
                self.perform(&name, outcome, model).await
            }
            Method::Custom(_) => self.perform(&outcome.entity_type, outcome, model).await,
        }
    }

    async fn perform(
        &self,
        name: &str,
        outcome: &Outcome,
        model: ResolvedModel,
    ) -> Result<DispatchResult, ActionError> {
        let Some(performer) = self.performers.get(name) else {
            warn!(performer = name, "No performer registered, skipping outcome");
            return Ok(DispatchResult::default());
        };
        let output = performer.perform(outcome, &model.data).await?;
        Ok(DispatchResult {
            result: output.result,
            responses: output.responses,
        })
    }
}

/// Response type for a written entity: its own `__type`, else the outcome's.
fn response_type(entity: &Value, outcome: &Outcome) -> String {
    entity
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .unwrap_or(&outcome.entity_type)
        .to_string()
}
