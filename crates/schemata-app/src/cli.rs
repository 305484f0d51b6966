//! CLI argument definitions for the Schemata application.
//!
//! Uses `clap` with derive macros. Config path priority: CLI flag > env var >
//! `./schemata.toml`.

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use schemata_core::types::{ActionRequest, Caller};

/// Schemata: run declarative actions against an in-memory entity store.
#[derive(Parser, Debug)]
#[command(name = "schemata", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the action catalog and list its actions.
    Check {
        /// Catalog file, overriding `general.actions_path`.
        #[arg(long = "actions")]
        actions: Option<PathBuf>,
    },
    /// Invoke one action and print its responses as JSON.
    Invoke(InvokeArgs),
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Entity type the action is defined on.
    #[arg(long = "type")]
    pub on_type: String,

    /// Action name.
    #[arg(long = "action")]
    pub action: String,

    /// Request attribute as `key=value`. Values that parse as JSON are
    /// used as JSON, anything else as a string.
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attrs: Vec<String>,

    /// Request attributes as one JSON object, merged before `--attr`.
    #[arg(long = "attrs-json")]
    pub attrs_json: Option<String>,

    /// JSON file of `{"type": [entity, ...]}` used to seed the store.
    #[arg(long = "fixtures")]
    pub fixtures: Option<PathBuf>,

    /// Reference id of the calling user.
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Group of the calling user. Repeatable.
    #[arg(long = "group")]
    pub groups: Vec<String>,

    /// Catalog file, overriding `general.actions_path`.
    #[arg(long = "actions")]
    pub actions: Option<PathBuf>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SCHEMATA_CONFIG env var > ./schemata.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SCHEMATA_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("schemata.toml")
    }
}

impl InvokeArgs {
    /// Build the action request from the attribute flags.
    pub fn to_request(&self) -> Result<ActionRequest, String> {
        let mut attributes = match &self.attrs_json {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err("--attrs-json must be a JSON object".to_string()),
                Err(e) => return Err(format!("invalid --attrs-json: {}", e)),
            },
            None => Map::new(),
        };

        for pair in &self.attrs {
            let (key, value) = parse_attr(pair)?;
            attributes.insert(key, value);
        }

        let mut request = ActionRequest::new(&self.on_type, &self.action);
        request.attributes = attributes;
        Ok(request)
    }

    pub fn caller(&self) -> Caller {
        let caller = match &self.user {
            Some(user) => Caller::user(user),
            None => Caller::anonymous(),
        };
        caller.with_groups(self.groups.clone())
    }
}

/// Split `key=value`, reading the value as JSON when it parses.
pub fn parse_attr(pair: &str) -> Result<(String, Value), String> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in {:?}", pair));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
