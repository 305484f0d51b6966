//! Fire-and-forget wrapper.
//!
//! The wrapped performer is spawned on the runtime and the dispatcher gets
//! a "scheduled" notification back straight away. Completion is only
//! logged; nothing orders it against the rest of the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use schemata_core::types::{ActionResponse, Outcome};

use crate::error::ActionError;
use crate::performer::{ActionPerformer, PerformerOutput};

pub struct Detached {
    inner: Arc<dyn ActionPerformer>,
}

impl Detached {
    pub fn new(inner: Arc<dyn ActionPerformer>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ActionPerformer for Detached {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn perform(
        &self,
        outcome: &Outcome,
        fields: &Map<String, Value>,
    ) -> Result<PerformerOutput, ActionError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ActionError::PerformerFailed {
                performer: self.inner.name().to_string(),
                message: format!("no runtime to schedule on: {}", e),
            }
        })?;

        let inner = Arc::clone(&self.inner);
        let outcome = outcome.clone();
        let fields = fields.clone();
        handle.spawn(async move {
            match inner.perform(&outcome, &fields).await {
                Ok(output) => tracing::info!(
                    performer = %inner.name(),
                    responses = output.responses.len(),
                    "Background performer finished"
                ),
                Err(e) => tracing::error!(
                    performer = %inner.name(),
                    error = %e,
                    "Background performer failed"
                ),
            }
        });

        tracing::debug!(performer = %self.inner.name(), "Scheduled background performer");
        Ok(PerformerOutput::empty().with_response(ActionResponse::notify(
            "success",
            format!("{} scheduled", self.inner.name()),
            "Scheduled",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::types::Method;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Signal {
        tx: mpsc::UnboundedSender<Value>,
    }

    #[async_trait]
    impl ActionPerformer for Signal {
        fn name(&self) -> &str {
            "signal"
        }

        async fn perform(
            &self,
            _outcome: &Outcome,
            fields: &Map<String, Value>,
        ) -> Result<PerformerOutput, ActionError> {
            let _ = self.tx.send(Value::Object(fields.clone()));
            Ok(PerformerOutput::with_result(json!({"done": true})))
        }
    }

    #[tokio::test]
    async fn test_detached_returns_immediately_and_runs_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let detached = Detached::new(Arc::new(Signal { tx }));
        assert_eq!(detached.name(), "signal");

        let outcome = Outcome::new("signal", Method::Execute, json!({}));
        let mut fields = Map::new();
        fields.insert("job".to_string(), json!("sync"));

        let output = detached.perform(&outcome, &fields).await.unwrap();
        assert!(output.result.is_none());
        assert_eq!(output.responses.len(), 1);
        assert_eq!(output.responses[0].response_type, "client.notify");
        assert_eq!(output.responses[0].attributes["title"], json!("Scheduled"));

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen, json!({"job": "sync"}));
    }
}
