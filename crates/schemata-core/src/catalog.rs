//! Registry of loaded action definitions.
//!
//! Definitions are keyed by `(on_type, name)` and never change after
//! loading, so a catalog can be shared behind an `Arc` by concurrent
//! invocations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SchemataError};
use crate::types::Action;

/// On-disk shape of a catalog file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    actions: Vec<Action>,
}

/// Immutable set of action definitions.
#[derive(Debug, Default, Clone)]
pub struct ActionCatalog {
    actions: HashMap<(String, String), Arc<Action>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from definitions. A later definition with the same
    /// `(on_type, name)` replaces an earlier one.
    pub fn from_actions(actions: Vec<Action>) -> Self {
        let mut map = HashMap::with_capacity(actions.len());
        for action in actions {
            let key = (action.on_type.clone(), action.name.clone());
            if map.insert(key, Arc::new(action)).is_some() {
                warn!("Duplicate action definition replaced");
            }
        }
        Self { actions: map }
    }

    /// Load a catalog from a TOML (`[[actions]]`) or JSON (`{"actions": []}`)
    /// file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CatalogFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| SchemataError::Catalog(format!("{}: {}", path.display(), e)))?,
            other => {
                return Err(SchemataError::Catalog(format!(
                    "unsupported catalog format {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };
        let catalog = Self::from_actions(file.actions);
        info!(path = %path.display(), actions = catalog.len(), "Action catalog loaded");
        Ok(catalog)
    }

    pub fn get(&self, on_type: &str, name: &str) -> Option<Arc<Action>> {
        self.actions
            .get(&(on_type.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All definitions, ordered by `type:name` for stable listings.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Action>> {
        let mut all: Vec<&Arc<Action>> = self.actions.values().collect();
        all.sort_by_key(|a| a.key());
        all.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Method;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_get_by_type_and_name() {
        let catalog = ActionCatalog::from_actions(vec![
            Action::new("order", "ship"),
            Action::new("order", "cancel"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("order", "ship").is_some());
        assert!(catalog.get("order", "refund").is_none());
        assert!(catalog.get("invoice", "ship").is_none());
    }

    #[test]
    fn test_duplicate_replaces_earlier() {
        let mut second = Action::new("order", "ship");
        second.label = "Ship it".to_string();
        let catalog = ActionCatalog::from_actions(vec![Action::new("order", "ship"), second]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("order", "ship").unwrap().label, "Ship it");
    }

    #[test]
    fn test_iter_is_sorted() {
        let catalog = ActionCatalog::from_actions(vec![
            Action::new("user_account", "signup"),
            Action::new("order", "ship"),
        ]);
        let keys: Vec<String> = catalog.iter().map(|a| a.key()).collect();
        assert_eq!(keys, vec!["order:ship", "user_account:signup"]);
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "actions.toml",
            r#"
[[actions]]
on_type = "order"
name = "ship"

[[actions.out_fields]]
type = "order"
method = "PATCH"
attributes = { status = "shipped" }

[[actions.out_fields]]
type = "notify_performer"
method = "EXECUTE"
"#,
        );
        let catalog = ActionCatalog::load(&path).unwrap();
        let action = catalog.get("order", "ship").unwrap();
        assert_eq!(action.out_fields.len(), 2);
        assert_eq!(action.out_fields[1].method, Method::Execute);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "actions.json",
            r#"{"actions": [{"on_type": "user_account", "name": "signup", "instance_optional": true}]}"#,
        );
        let catalog = ActionCatalog::load(&path).unwrap();
        assert!(catalog.get("user_account", "signup").unwrap().instance_optional);
    }

    #[test]
    fn test_load_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "actions.yaml", "actions: []");
        let err = ActionCatalog::load(&path).unwrap_err();
        assert!(matches!(err, SchemataError::Catalog(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ActionCatalog::load(Path::new("/nonexistent/actions.toml")).unwrap_err();
        assert!(matches!(err, SchemataError::Io(_)));
    }
}
