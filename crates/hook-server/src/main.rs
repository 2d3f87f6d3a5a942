use anyhow::Result;
use clap::Parser;
use hook_config::{ConfigLoader, GlobalConfig};
use hook_rule::DefinitionSet;
use hook_server::{AppState, Operation};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding global.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// JSON file with entities, actions and rules
    #[arg(short, long)]
    definitions: Option<PathBuf>,

    /// JSON list of record operations to replay
    #[arg(short, long)]
    operations: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", GlobalConfig::default().to_toml_string()?);
        return Ok(());
    }

    let loader = ConfigLoader::new(&args.config_dir);
    loader.validate()?;
    let config = loader.load_global()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        name = %config.system.name,
        version = %config.system.version,
        config = %loader.global_path().display(),
        use_async = config.actions.celery_use_async,
        "Starting"
    );

    let definitions = match &args.definitions {
        Some(path) => DefinitionSet::from_file(path)?,
        None => DefinitionSet::default(),
    };
    let state = AppState::build(&config, definitions)?;

    if let Some(path) = &args.operations {
        let operations = Operation::load_all(path)?;
        let failures = state.replay(&operations);
        tracing::info!(total = operations.len(), failures, "Replay finished");
    }

    println!("{}", serde_json::to_string_pretty(&state.snapshot())?);
    Ok(())
}
