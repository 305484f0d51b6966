//! `__become_admin` performer.
//!
//! Lets the calling user claim administrator rights while the installation
//! has no administrator yet.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use schemata_core::types::{ActionResponse, Outcome};

use crate::error::ActionError;
use crate::performer::{ActionPerformer, PerformerOutput};
use crate::permission::PermissionEvaluator;
use crate::store::REFERENCE_ID;

pub const BECOME_ADMIN: &str = "__become_admin";

pub struct BecomeAdminPerformer {
    permissions: Arc<dyn PermissionEvaluator>,
}

impl BecomeAdminPerformer {
    pub fn new(permissions: Arc<dyn PermissionEvaluator>) -> Self {
        Self { permissions }
    }
}

#[async_trait]
impl ActionPerformer for BecomeAdminPerformer {
    fn name(&self) -> &str {
        BECOME_ADMIN
    }

    async fn perform(
        &self,
        _outcome: &Outcome,
        fields: &Map<String, Value>,
    ) -> Result<PerformerOutput, ActionError> {
        if !self.permissions.can_become_admin().await {
            return Err(ActionError::Forbidden(
                "an administrator already exists".to_string(),
            ));
        }

        let user_reference_id = fields
            .get("user")
            .and_then(|user| user.get(REFERENCE_ID))
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Forbidden("no user to promote".to_string()))?;

        if !self.permissions.become_admin(user_reference_id).await {
            return Err(ActionError::Forbidden(format!(
                "user {} could not become administrator",
                user_reference_id
            )));
        }

        tracing::info!(user = %user_reference_id, "User promoted to administrator");

        Ok(PerformerOutput::empty().with_response(ActionResponse::new(
            "client.redirect",
            json!({"location": "/", "window": "self", "delay": 7000}),
        )))
    }
}
