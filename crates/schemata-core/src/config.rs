use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SchemataError};

/// Top-level configuration for the action engine.
///
/// Loaded from `schemata.toml` by default. Every section falls back to its
/// defaults when absent, so a partial file is always valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemataConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub access: AccessConfig,
    /// External HTTP APIs exposed as performers, one per entry.
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

impl SchemataConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchemataConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SchemataError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Path of the action catalog (TOML or JSON).
    pub actions_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            actions_path: "actions.toml".to_string(),
        }
    }
}

/// Limits applied to every script evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget per script in milliseconds. 0 disables the limit.
    pub timeout_ms: u64,
    /// Interpreter operation budget per script. 0 means unlimited.
    pub max_operations: u64,
    /// Maximum function call nesting inside a script.
    pub max_call_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            max_operations: 100_000,
            max_call_depth: 32,
        }
    }
}

/// Pipeline executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Entity type that stores user records.
    pub user_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_type: "user_account".to_string(),
        }
    }
}

/// Static access rules for the built-in permission evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// User reference ids with administrator rights.
    pub admins: Vec<String>,
    /// `type:action` pairs anyone may invoke.
    pub public_actions: Vec<String>,
    /// Group name to the `type:action` pairs its members may invoke.
    pub group_actions: HashMap<String, Vec<String>>,
    /// Whether a user may promote themselves while no administrator exists.
    pub allow_become_admin: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            public_actions: Vec::new(),
            group_actions: HashMap::new(),
            allow_become_admin: true,
        }
    }
}

/// An external HTTP API callable from outcomes.
///
/// The integration is registered as a performer under `name`. An outcome
/// selects one of its `operations` through its method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub name: String,
    /// Scheme, host and optional path prefix, without a trailing slash.
    pub base_url: String,
    #[serde(default)]
    pub auth: IntegrationAuth,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_integration_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub operations: HashMap<String, IntegrationOperation>,
}

fn default_integration_timeout_ms() -> u64 {
    30_000
}

/// One callable endpoint of an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationOperation {
    /// HTTP method: GET, POST, PUT, PATCH or DELETE.
    #[serde(default = "default_operation_method")]
    pub method: String,
    /// Path appended to the base url. `{name}` segments are filled from
    /// the outcome's fields.
    pub path: String,
    /// Static headers sent with every call.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_operation_method() -> String {
    "POST".to_string()
}

/// Credentials attached to integration calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationAuth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        name: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
    Cookie,
}
