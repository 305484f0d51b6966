//! Action performer registry and trait definition.
//!
//! Performers carry the side effects that are not plain entity CRUD. The
//! dispatcher looks them up by name for `EXECUTE` outcomes and for outcomes
//! with an unrecognised method.

pub mod become_admin;
pub mod detached;
pub mod integration;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use schemata_core::config::IntegrationConfig;
use schemata_core::types::{ActionResponse, Outcome};

use crate::error::ActionError;
use crate::permission::PermissionEvaluator;

pub use become_admin::BecomeAdminPerformer;
pub use detached::Detached;
pub use integration::IntegrationPerformer;

/// What a performer hands back to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformerOutput {
    pub result: Option<Value>,
    pub responses: Vec<ActionResponse>,
}

impl PerformerOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            responses: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: ActionResponse) -> Self {
        self.responses.push(response);
        self
    }
}

#[async_trait]
pub trait ActionPerformer: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Run the side effect with the outcome's resolved fields.
    async fn perform(
        &self,
        outcome: &Outcome,
        fields: &Map<String, Value>,
    ) -> Result<PerformerOutput, ActionError>;
}

/// Named performers, built once at startup and shared by reference.
#[derive(Default, Clone)]
pub struct PerformerRegistry {
    performers: HashMap<String, Arc<dyn ActionPerformer>>,
}

impl PerformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in performers.
    pub fn with_defaults(permissions: Arc<dyn PermissionEvaluator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BecomeAdminPerformer::new(permissions)));
        registry
    }

    /// Register a performer under its own name, replacing any previous one.
    pub fn register(&mut self, performer: Arc<dyn ActionPerformer>) {
        let name = performer.name().to_string();
        if self.performers.insert(name.clone(), performer).is_some() {
            tracing::warn!(performer = %name, "Replaced existing performer");
        }
    }

    /// Register one HTTP integration performer per configured integration.
    pub fn register_integrations(
        &mut self,
        integrations: &[IntegrationConfig],
    ) -> Result<(), ActionError> {
        for config in integrations {
            tracing::info!(
                integration = %config.name,
                operations = config.operations.len(),
                "Registering integration"
            );
            self.register(Arc::new(IntegrationPerformer::new(config.clone())?));
        }
        Ok(())
    }

    /// Register a performer that runs in the background.
    pub fn register_detached(&mut self, performer: Arc<dyn ActionPerformer>) {
        self.register(Arc::new(Detached::new(performer)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionPerformer>> {
        self.performers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.performers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.performers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.performers.keys().cloned().collect();
        names.sort();
        names
    }
}
