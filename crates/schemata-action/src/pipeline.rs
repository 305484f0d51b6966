//! Action pipeline.
//!
//! Runs one action invocation end to end: authorize the caller, validate and
//! conform the inputs, then execute the outcomes strictly in declaration
//! order while publishing each result into the shared execution context.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use schemata_core::config::PipelineConfig;
use schemata_core::types::{Action, ActionRequest, ActionResponse, Caller, Method, Outcome};
use schemata_core::ActionCatalog;

use crate::context::{ContextBuilder, ExecutionContext};
use crate::dispatcher::{DispatchResult, Dispatcher, ResolvedModel};
use crate::error::{ActionError, InvocationError};
use crate::expression::Evaluator;
use crate::performer::PerformerRegistry;
use crate::permission::PermissionEvaluator;
use crate::sandbox::ScriptSandbox;
use crate::store::{display_value, EntityStore, StoreError, REFERENCE_ID};
use crate::validation;

/// Result of the authorization step.
struct Authorized {
    action: Arc<Action>,
    subject: Option<Value>,
    user: Option<Value>,
}

/// Executes action invocations against the configured collaborators.
pub struct ActionPipeline {
    catalog: Arc<ActionCatalog>,
    store: Arc<dyn EntityStore>,
    permissions: Arc<dyn PermissionEvaluator>,
    dispatcher: Dispatcher,
    builder: ContextBuilder,
    config: PipelineConfig,
}

impl ActionPipeline {
    /// Create a new pipeline.
    ///
    /// The catalog is read-only; store, permissions and performers are
    /// shared with every concurrent invocation.
    pub fn new(
        catalog: Arc<ActionCatalog>,
        store: Arc<dyn EntityStore>,
        permissions: Arc<dyn PermissionEvaluator>,
        performers: Arc<PerformerRegistry>,
        sandbox: Arc<dyn ScriptSandbox>,
        config: PipelineConfig,
    ) -> Self {
        let evaluator = Evaluator::new(sandbox);
        Self {
            catalog,
            dispatcher: Dispatcher::new(Arc::clone(&store), performers, evaluator.clone()),
            builder: ContextBuilder::new(evaluator),
            store,
            permissions,
            config,
        }
    }

    /// Invoke one action. On failure the error carries every response
    /// produced before it.
    pub async fn invoke(
        &self,
        request: ActionRequest,
        caller: &Caller,
    ) -> Result<Vec<ActionResponse>, InvocationError> {
        info!(
            on_type = %request.on_type,
            action = %request.action,
            user = %caller.reference(),
            "Invoking action"
        );

        let authorized = self.authorize(&request, caller).await.map_err(|e| {
            warn!(on_type = %request.on_type, action = %request.action, error = %e, "Invocation rejected");
            InvocationError::rejected(e)
        })?;
        let action = Arc::clone(&authorized.action);

        let (inputs, attributes) = Self::prepare_inputs(&action, &request).map_err(|e| {
            warn!(action = %action.key(), error = %e, "Invalid input");
            InvocationError::rejected(e)
        })?;

        let mut context = ExecutionContext::seed(
            &inputs,
            &attributes,
            authorized.user,
            authorized
                .subject
                .map(|subject| (request.on_type.as_str(), subject)),
        );

        let responses = self
            .run_outcomes(&action, &request.on_type, &mut context)
            .await?;
        info!(action = %action.key(), responses = responses.len(), "Action completed");
        Ok(responses)
    }

    // ---- authorize ----

    async fn authorize(
        &self,
        request: &ActionRequest,
        caller: &Caller,
    ) -> Result<Authorized, ActionError> {
        let action = self
            .catalog
            .get(&request.on_type, &request.action)
            .ok_or_else(|| ActionError::NoSuchAction {
                on_type: request.on_type.clone(),
                action: request.action.clone(),
            })?;

        let user_ref = caller.reference();
        let subject = match request.attributes.get(&request.subject_key()) {
            None | Some(Value::Null) => None,
            Some(id) => {
                let id = display_value(id);
                if id.is_empty() {
                    None
                } else {
                    let subject = self
                        .store
                        .fetch_by_id(&request.on_type, &id, &action.request_subject_relations)
                        .await
                        .map_err(|e| {
                            debug!(subject = %id, error = %e, "Subject lookup failed");
                            subject_lookup_error(&request.on_type, &id, e)
                        })?;
                    if !self
                        .permissions
                        .can_execute(user_ref, &caller.groups, &subject)
                        .await
                    {
                        return Err(ActionError::Forbidden(format!(
                            "cannot execute {} on {} {}",
                            action.key(),
                            request.on_type,
                            id
                        )));
                    }
                    Some(subject)
                }
            }
        };

        if !self.permissions.is_admin(user_ref).await
            && !self
                .permissions
                .is_action_allowed(user_ref, &caller.groups, &action.on_type, &action.name)
                .await
        {
            return Err(ActionError::Forbidden(format!(
                "action {} is not allowed",
                action.key()
            )));
        }

        if subject.is_none() && !action.instance_optional {
            return Err(ActionError::SubjectNotFound(request.subject_key()));
        }

        let user = match caller.user_reference_id.as_deref() {
            None | Some("") => None,
            Some(reference) => Some(
                self.store
                    .fetch_by_id(&self.config.user_type, reference, &[])
                    .await
                    .map_err(|_| ActionError::UnknownUser(reference.to_string()))?,
            ),
        };

        Ok(Authorized {
            action,
            subject,
            user,
        })
    }

    // ---- inputs ----

    /// Assemble, validate and conform the inputs. Returns the declared
    /// in-field values and the full attribute map.
    fn prepare_inputs(
        action: &Action,
        request: &ActionRequest,
    ) -> Result<(Map<String, Value>, Map<String, Value>), ActionError> {
        let mut attributes = request.attributes.clone();

        for field in &action.in_fields {
            if present(attributes.get(&field.name)) {
                continue;
            }
            if let Some(value) = request.form.get(&field.name).filter(|v| present(Some(v))) {
                attributes.insert(field.name.clone(), value.clone());
            } else if let Some(default) = &field.default_value {
                attributes.insert(field.name.clone(), default.clone());
            } else if !field.is_nullable {
                return Err(ActionError::FieldRequired(field.name.clone()));
            }
        }

        validation::validate(&action.validations, &attributes)?;
        validation::conform_all(&action.conformations, &mut attributes);

        let inputs = action
            .in_fields
            .iter()
            .filter_map(|field| {
                attributes
                    .get(&field.name)
                    .map(|value| (field.name.clone(), value.clone()))
            })
            .collect();
        Ok((inputs, attributes))
    }

    // ---- outcomes ----

    async fn run_outcomes(
        &self,
        action: &Action,
        request_type: &str,
        context: &mut ExecutionContext,
    ) -> Result<Vec<ActionResponse>, InvocationError> {
        let mut responses = Vec::new();

        for (index, outcome) in action.out_fields.iter().enumerate() {
            if !self.dispatcher.condition_holds(outcome, context.as_map()) {
                debug!(action = %action.key(), index, outcome = %outcome.entity_type, "Skipping outcome");
                continue;
            }

            match self.run_outcome(outcome, request_type, context).await {
                Ok(output) => {
                    if !outcome.reference.is_empty() {
                        context.publish(&outcome.reference, output.result.as_ref(), &output.responses);
                    }
                    if outcome.skip_in_response {
                        debug!(index, outcome = %outcome.entity_type, "Responses withheld");
                    } else {
                        responses.extend(output.responses);
                    }
                }
                Err(e) if outcome.continue_on_error => {
                    warn!(
                        action = %action.key(),
                        index,
                        outcome = %outcome.entity_type,
                        error = %e,
                        "Outcome failed, continuing"
                    );
                    responses.push(ActionResponse::notify("error", e.to_string(), "Failed"));
                }
                Err(e) => {
                    error!(
                        action = %action.key(),
                        index,
                        outcome = %outcome.entity_type,
                        error = %e,
                        "Outcome failed, aborting"
                    );
                    return Err(InvocationError::new(responses, e));
                }
            }
        }
        Ok(responses)
    }

    async fn run_outcome(
        &self,
        outcome: &Outcome,
        request_type: &str,
        context: &ExecutionContext,
    ) -> Result<DispatchResult, ActionError> {
        let mut data = self.builder.build_map(&outcome.attributes, context.as_map())?;

        // Writes against the request's own type default to the subject.
        let targets_instance = matches!(
            Dispatcher::effective_method(outcome),
            Method::Patch | Method::Delete | Method::GetById
        );
        if targets_instance && outcome.entity_type == request_type && !data.contains_key(REFERENCE_ID) {
            if let Some(id) = context.get(&format!("{}_id", request_type)) {
                data.insert(REFERENCE_ID.to_string(), id.clone());
            }
        }

        debug!(outcome = %outcome.entity_type, fields = data.len(), "Resolved outcome model");
        self.dispatcher
            .execute(outcome, ResolvedModel::new(outcome.entity_type.clone(), data))
            .await
    }
}

fn present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

/// Only a missing row means the subject does not exist; other store
/// failures keep their meaning.
fn subject_lookup_error(entity_type: &str, id: &str, error: StoreError) -> ActionError {
    match error {
        StoreError::NotFound { .. } => ActionError::SubjectNotFound(id.to_string()),
        StoreError::Forbidden(message) => ActionError::Forbidden(message),
        source => ActionError::DispatchFailed {
            outcome_type: entity_type.to_string(),
            method: Method::GetById.to_string(),
            source,
        },
    }
}
