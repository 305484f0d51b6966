mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command, InvokeArgs};
use schemata_action::{
    ActionPipeline, MemoryStore, PerformerRegistry, PermissionEvaluator, RhaiSandbox,
    StaticPermissions,
};
use schemata_core::{ActionCatalog, SchemataConfig};

/// Load the catalog from `--actions` or the configured path.
fn load_catalog(
    flag: Option<&Path>,
    config: &SchemataConfig,
) -> Result<ActionCatalog, Box<dyn std::error::Error>> {
    let path = flag
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.general.actions_path));
    Ok(ActionCatalog::load(&path)?)
}

/// Seed the store from a `{"type": [entity, ...]}` JSON file.
fn seed_fixtures(store: &MemoryStore, path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let Value::Object(types) = serde_json::from_str::<Value>(&content)? else {
        return Err(format!("{} must hold a JSON object", path.display()).into());
    };

    let mut total = 0;
    for (entity_type, rows) in types {
        let Value::Array(rows) = rows else {
            return Err(format!("fixtures for {} must be an array", entity_type).into());
        };
        total += store.seed(&entity_type, rows)?;
    }
    tracing::info!(path = %path.display(), entities = total, "Fixtures loaded");
    Ok(total)
}

fn run_check(actions: Option<&Path>, config: &SchemataConfig) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = load_catalog(actions, config)?;
    for action in catalog.iter() {
        println!("{}\t{} outcomes", action.key(), action.out_fields.len());
    }
    println!("{} actions", catalog.len());
    Ok(())
}

async fn run_invoke(args: &InvokeArgs, config: &SchemataConfig) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = load_catalog(args.actions.as_deref(), config)?;
    let request = args.to_request()?;

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &args.fixtures {
        seed_fixtures(&store, path)?;
    }

    let permissions: Arc<dyn PermissionEvaluator> = Arc::new(StaticPermissions::new(&config.access));
    let mut performers = PerformerRegistry::with_defaults(Arc::clone(&permissions));
    performers.register_integrations(&config.integrations)?;
    tracing::debug!(performers = ?performers.names(), "Performers registered");

    let pipeline = ActionPipeline::new(
        Arc::new(catalog),
        store,
        permissions,
        Arc::new(performers),
        Arc::new(RhaiSandbox::new(config.sandbox.clone())),
        config.pipeline.clone(),
    );

    match pipeline.invoke(request, &args.caller()).await {
        Ok(responses) => {
            println!("{}", serde_json::to_string_pretty(&responses)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.responses)?);
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let preloaded = SchemataConfig::load(&config_file).ok();

    // Tracing. RUST_LOG wins, then --log-level, then the configured level.
    let level = args
        .log_level
        .clone()
        .or_else(|| preloaded.as_ref().map(|c| c.general.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Schemata v{}", env!("CARGO_PKG_VERSION"));

    let config = match preloaded {
        Some(config) => config,
        None => SchemataConfig::load_or_default(&config_file),
    };

    match &args.command {
        Command::Check { actions } => run_check(actions.as_deref(), &config),
        Command::Invoke(invoke) => run_invoke(invoke, &config).await,
    }
}
