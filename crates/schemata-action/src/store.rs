//! Entity store collaborator.
//!
//! The engine only needs generic create/read/update/delete over untyped
//! entities. `MemoryStore` is a complete in-process implementation used by
//! the binary and the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Field holding an entity's public identifier.
pub const REFERENCE_ID: &str = "reference_id";
/// Field holding an entity's type name.
pub const TYPE_FIELD: &str = "__type";

/// Structured store failures, distinguishable by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {entity_type} {reference_id}")]
    NotFound {
        entity_type: String,
        reference_id: String,
    },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Filters for a list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Plain query parameters, already stringified.
    pub params: BTreeMap<String, String>,
    /// Structured filter passed through a field literally named `query`.
    pub query: Option<Value>,
}

impl ListQuery {
    /// Build a list query from resolved outcome attributes.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let mut query = ListQuery::default();
        for (key, value) in fields {
            if key == "query" {
                query.query = Some(value.clone());
            } else {
                query.params.insert(key.clone(), display_value(value));
            }
        }
        query
    }
}

/// Render a JSON value the way it appears inside text: strings unquoted,
/// null as empty, containers as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Generic entity storage.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create(&self, entity_type: &str, data: Map<String, Value>)
        -> Result<Value, StoreError>;

    async fn fetch_by_id(
        &self,
        entity_type: &str,
        reference_id: &str,
        included_relations: &[String],
    ) -> Result<Value, StoreError>;

    async fn list(&self, entity_type: &str, query: &ListQuery) -> Result<Vec<Value>, StoreError>;

    async fn update(
        &self,
        entity_type: &str,
        reference_id: &str,
        data: Map<String, Value>,
    ) -> Result<Value, StoreError>;

    async fn delete(&self, entity_type: &str, reference_id: &str) -> Result<(), StoreError>;
}

/// In-memory entity store with per-type ordered collections.
pub struct MemoryStore {
    entities: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
}

impl MemoryStore {
    /// Create a new empty MemoryStore.
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(HashMap::new()),
        }
    }

    /// Insert entities as-is, assigning missing reference ids and types.
    pub fn seed(&self, entity_type: &str, rows: Vec<Value>) -> Result<usize, StoreError> {
        let mut entities = self.lock()?;
        let table = entities.entry(entity_type.to_string()).or_default();
        let mut inserted = 0;
        for row in rows {
            let Value::Object(mut row) = row else {
                return Err(StoreError::Invalid(format!(
                    "seed rows for {} must be objects",
                    entity_type
                )));
            };
            stamp(&mut row, entity_type);
            table.push(row);
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Number of stored entities of one type.
    pub fn count(&self, entity_type: &str) -> usize {
        match self.entities.lock() {
            Ok(e) => e.get(entity_type).map(Vec::len).unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Map<String, Value>>>>, StoreError>
    {
        self.entities
            .lock()
            .map_err(|e| StoreError::Backend(format!("Lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn stamp(row: &mut Map<String, Value>, entity_type: &str) {
    let has_id = matches!(row.get(REFERENCE_ID), Some(Value::String(s)) if !s.is_empty());
    if !has_id {
        row.insert(
            REFERENCE_ID.to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    row.insert(TYPE_FIELD.to_string(), Value::String(entity_type.to_string()));
}

fn reference_of(row: &Map<String, Value>) -> Option<&str> {
    row.get(REFERENCE_ID).and_then(Value::as_str)
}

fn matches_query(row: &Map<String, Value>, query: &ListQuery) -> bool {
    let params_match = query
        .params
        .iter()
        .all(|(k, v)| row.get(k).map(display_value).as_deref() == Some(v.as_str()));
    let filter_match = match &query.query {
        Some(Value::Object(filter)) => filter.iter().all(|(k, v)| row.get(k) == Some(v)),
        _ => true,
    };
    params_match && filter_match
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn create(
        &self,
        entity_type: &str,
        mut data: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let mut entities = self.lock()?;
        let table = entities.entry(entity_type.to_string()).or_default();
        if let Some(id) = reference_of(&data) {
            if table.iter().any(|row| reference_of(row) == Some(id)) {
                return Err(StoreError::Conflict(format!(
                    "{} {} already exists",
                    entity_type, id
                )));
            }
        }
        stamp(&mut data, entity_type);
        table.push(data.clone());
        tracing::debug!(entity_type, "Entity created");
        Ok(Value::Object(data))
    }

    async fn fetch_by_id(
        &self,
        entity_type: &str,
        reference_id: &str,
        included_relations: &[String],
    ) -> Result<Value, StoreError> {
        let entities = self.lock()?;
        let not_found = || StoreError::NotFound {
            entity_type: entity_type.to_string(),
            reference_id: reference_id.to_string(),
        };
        let mut row = entities
            .get(entity_type)
            .and_then(|t| t.iter().find(|row| reference_of(row) == Some(reference_id)))
            .cloned()
            .ok_or_else(not_found)?;

        for relation in included_relations {
            let Some(related_id) = row
                .get(&format!("{}_id", relation))
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let related = entities.get(relation.as_str()).and_then(|t| {
                t.iter()
                    .find(|r| reference_of(r) == Some(related_id.as_str()))
                    .cloned()
            });
            if let Some(related) = related {
                row.insert(relation.clone(), Value::Object(related));
            }
        }
        Ok(Value::Object(row))
    }

    async fn list(&self, entity_type: &str, query: &ListQuery) -> Result<Vec<Value>, StoreError> {
        let entities = self.lock()?;
        Ok(entities
            .get(entity_type)
            .map(|t| {
                t.iter()
                    .filter(|row| matches_query(row, query))
                    .cloned()
                    .map(Value::Object)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        entity_type: &str,
        reference_id: &str,
        data: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let mut entities = self.lock()?;
        let row = entities
            .get_mut(entity_type)
            .and_then(|t| {
                t.iter_mut()
                    .find(|row| reference_of(row) == Some(reference_id))
            })
            .ok_or_else(|| StoreError::NotFound {
                entity_type: entity_type.to_string(),
                reference_id: reference_id.to_string(),
            })?;
        for (key, value) in data {
            if key == REFERENCE_ID || key == TYPE_FIELD {
                continue;
            }
            row.insert(key, value);
        }
        tracing::debug!(entity_type, reference_id, "Entity updated");
        Ok(Value::Object(row.clone()))
    }

    async fn delete(&self, entity_type: &str, reference_id: &str) -> Result<(), StoreError> {
        let mut entities = self.lock()?;
        let table = entities
            .get_mut(entity_type)
            .ok_or_else(|| StoreError::NotFound {
                entity_type: entity_type.to_string(),
                reference_id: reference_id.to_string(),
            })?;
        let before = table.len();
        table.retain(|row| reference_of(row) != Some(reference_id));
        if table.len() == before {
            return Err(StoreError::NotFound {
                entity_type: entity_type.to_string(),
                reference_id: reference_id.to_string(),
            });
        }
        tracing::debug!(entity_type, reference_id, "Entity deleted");
        Ok(())
    }
}
