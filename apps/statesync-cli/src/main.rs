use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use statesync_kernel::{EngineConfig, StateEngine};
use statesync_persist::StorageKind;
use statesync_tools::StateInspector;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statesync", about = "Inspect and edit persisted statesync state")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding persisted state
    #[arg(short, long, default_value = ".statesync")]
    store: PathBuf,

    /// Storage key (overrides the config file)
    #[arg(short, long)]
    key: Option<String>,

    /// YAML engine configuration (initial state, persistent keys)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine and storage summary
    Info,
    /// Print the whole state, or the value at a dot path
    Get {
        /// Dot path such as `todos.0.title`
        path: Option<String>,
    },
    /// Write a value at a dot path
    Set {
        path: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
    },
    /// Replace the whole state (defaults to an empty mapping)
    Reset {
        /// JSON mapping
        state: Option<String>,
    },
    /// Remove the persisted entry
    Clear,
    /// List top-level keys
    Keys,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let engine = open_engine(&cli)?;

    match cli.command {
        Commands::Info => {
            println!("statesync v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", StateInspector::summary(&engine));
            if let Some(keys) = engine.persistence().persistent_keys() {
                println!("persistent keys: {}", keys.join(", "));
            } else {
                println!("persistent keys: <all>");
            }
        }
        Commands::Get { path } => match path {
            None => println!("{}", serde_json::to_string_pretty(&engine.get_state())?),
            Some(path) => match StateInspector::inspect(&engine, &path) {
                Some(info) => println!("{info}"),
                None => anyhow::bail!("no value at '{path}'"),
            },
        },
        Commands::Set { path, value } => {
            let mut patch = Map::new();
            patch.insert(path.clone(), parse_value(&value));
            engine
                .set_state(patch)
                .with_context(|| format!("failed to write '{path}'"))?;
            if let Some(info) = StateInspector::inspect(&engine, &path) {
                println!("{info}");
            }
            ensure_stored(&engine);
        }
        Commands::Reset { state } => {
            let state = match state {
                Some(text) => serde_json::from_str(&text).context("reset state must be JSON")?,
                None => json!({}),
            };
            let state = engine.reset(state)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            ensure_stored(&engine);
        }
        Commands::Clear => {
            if engine.persistence().clear() {
                println!("cleared '{}'", engine.persistence().key());
            } else {
                anyhow::bail!("failed to clear stored state");
            }
        }
        Commands::Keys => {
            for key in StateInspector::list_keys(&engine) {
                println!("{key}");
            }
        }
    }

    Ok(())
}

/// Build an engine that persists to `--store`, layering CLI flags over the
/// optional config file.
fn open_engine(cli: &Cli) -> anyhow::Result<StateEngine> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.persistence.enabled = true;
    config.persistence.storage = StorageKind::Local {
        dir: cli.store.clone(),
    };
    if let Some(key) = &cli.key {
        config.persistence.key = key.clone();
    }
    tracing::debug!(store = %cli.store.display(), key = %config.persistence.key, "opening engine");
    Ok(StateEngine::with_config(config)?)
}

fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

fn ensure_stored(engine: &StateEngine) {
    if !engine.persistence().exists() {
        tracing::warn!("state was not persisted; see earlier errors");
    }
}
