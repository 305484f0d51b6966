//! Permission evaluator collaborator.
//!
//! `StaticPermissions` answers from the `[access]` configuration section and
//! keeps the administrator set in memory so `__become_admin` can extend it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use schemata_core::config::AccessConfig;
use serde_json::Value;

/// Row field naming the owning user's reference id.
pub const OWNER_FIELD: &str = "owner_reference_id";

#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    /// Whether the caller may run actions against this entity.
    async fn can_execute(&self, user_reference_id: &str, groups: &[String], entity: &Value)
        -> bool;

    /// Whether the caller may invoke `on_type:action` at all.
    async fn is_action_allowed(
        &self,
        user_reference_id: &str,
        groups: &[String],
        on_type: &str,
        action: &str,
    ) -> bool;

    async fn is_admin(&self, user_reference_id: &str) -> bool;

    /// Whether a user may currently promote themselves to administrator.
    async fn can_become_admin(&self) -> bool {
        false
    }

    /// Promote a user to administrator. Returns whether the promotion
    /// happened.
    async fn become_admin(&self, _user_reference_id: &str) -> bool {
        false
    }
}

/// Configuration-driven permission evaluator.
pub struct StaticPermissions {
    admins: RwLock<HashSet<String>>,
    public_actions: HashSet<String>,
    group_actions: HashMap<String, HashSet<String>>,
    allow_become_admin: bool,
}

impl StaticPermissions {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            admins: RwLock::new(config.admins.iter().cloned().collect()),
            public_actions: config.public_actions.iter().cloned().collect(),
            group_actions: config
                .group_actions
                .iter()
                .map(|(group, actions)| (group.clone(), actions.iter().cloned().collect()))
                .collect(),
            allow_become_admin: config.allow_become_admin,
        }
    }

    /// Evaluator that lets everyone do everything. Used by tools and tests
    /// that do not exercise authorization.
    pub fn allow_all() -> Self {
        let mut config = AccessConfig::default();
        config.public_actions.push("*".to_string());
        Self::new(&config)
    }

    fn admin_set(&self) -> HashSet<String> {
        match self.admins.read() {
            Ok(admins) => admins.clone(),
            Err(_) => HashSet::new(),
        }
    }

    fn grants(set: &HashSet<String>, key: &str) -> bool {
        set.contains("*") || set.contains(key)
    }
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self::new(&AccessConfig::default())
    }
}

#[async_trait]
impl PermissionEvaluator for StaticPermissions {
    async fn can_execute(
        &self,
        user_reference_id: &str,
        _groups: &[String],
        entity: &Value,
    ) -> bool {
        if self.is_admin(user_reference_id).await {
            return true;
        }
        match entity.get(OWNER_FIELD).and_then(Value::as_str) {
            None | Some("") => true,
            Some(owner) => owner == user_reference_id,
        }
    }

    async fn is_action_allowed(
        &self,
        _user_reference_id: &str,
        groups: &[String],
        on_type: &str,
        action: &str,
    ) -> bool {
        let key = format!("{}:{}", on_type, action);
        if Self::grants(&self.public_actions, &key) {
            return true;
        }
        groups.iter().any(|group| {
            self.group_actions
                .get(group)
                .is_some_and(|actions| Self::grants(actions, &key))
        })
    }

    async fn is_admin(&self, user_reference_id: &str) -> bool {
        !user_reference_id.is_empty() && self.admin_set().contains(user_reference_id)
    }

    async fn can_become_admin(&self) -> bool {
        self.allow_become_admin && self.admin_set().is_empty()
    }

    async fn become_admin(&self, user_reference_id: &str) -> bool {
        if user_reference_id.is_empty() || !self.allow_become_admin {
            return false;
        }
        // Check and insert under one guard so only the first caller wins.
        match self.admins.write() {
            Ok(mut admins) if admins.is_empty() => admins.insert(user_reference_id.to_string()),
            _ => false,
        }
    }
}
