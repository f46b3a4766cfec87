//! poolgridctl — inspect and resize autoscaler node groups.
//!
//! Operates directly on a PoolGrid store. Results are printed to stdout
//! as JSON; logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! poolgridctl import cluster.json
//! poolgridctl node-groups
//! poolgridctl increase-size MachineSet/openshift-machine-api/workers 2
//! poolgridctl delete-nodes MachineSet/openshift-machine-api/workers aws:///us-east-1a/i-0abc
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{debug, info};

mod commands;
mod config;
mod fixture;

use commands::Context;
use config::{LogConfig, PoolgridConfig};

#[derive(Parser)]
#[command(
    name = "poolgridctl",
    about = "PoolGrid — autoscaler node groups over machine sets and deployments",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to poolgrid.toml (default: ./poolgrid.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overriding [store].path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load scalable resources, machines and nodes from a JSON fixture
    Import { path: PathBuf },
    /// List the node groups the autoscaler may act on
    NodeGroups,
    /// List the members of a node group
    Nodes { id: String },
    /// Show a node group's current target size
    TargetSize { id: String },
    /// Raise a node group's target size
    IncreaseSize { id: String, delta: i32 },
    /// Lower a node group's target size without removing members
    DecreaseTargetSize {
        id: String,
        /// Negative amount to lower the target size by
        #[arg(allow_negative_numbers = true)]
        delta: i32,
    },
    /// Remove specific members by provider id
    DeleteNodes {
        id: String,
        #[arg(required = true)]
        provider_ids: Vec<String>,
    },
    /// Show the scale-from-zero node template of a node group
    Template { id: String },
    /// Compare two registered nodes
    Similar { a: String, b: String },
    /// List node groups similar to one, or all similarity classes
    SimilarGroups { id: Option<String> },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PoolgridConfig::load(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    init_tracing(&config.log)?;

    let store = open_store(&config.store.path)?;

    let controller = poolgrid_nodegroup::MachineController::synced(store, config.annotation_keys())?;
    debug!(
        machines = controller.registry().machine_count(),
        nodes = controller.registry().node_count(),
        "member registry loaded"
    );
    let ctx = Context {
        controller,
        similarity: config.similarity.clone(),
    };
    let output = run(&ctx, cli.command)?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run(ctx: &Context, command: Commands) -> anyhow::Result<serde_json::Value> {
    match command {
        Commands::Import { path } => commands::import(ctx.controller.store(), &path),
        Commands::NodeGroups => commands::node_groups(ctx),
        Commands::Nodes { id } => commands::nodes(ctx, &id),
        Commands::TargetSize { id } => commands::target_size(ctx, &id),
        Commands::IncreaseSize { id, delta } => commands::increase_size(ctx, &id, delta),
        Commands::DecreaseTargetSize { id, delta } => {
            commands::decrease_target_size(ctx, &id, delta)
        }
        Commands::DeleteNodes { id, provider_ids } => {
            commands::delete_nodes(ctx, &id, &provider_ids)
        }
        Commands::Template { id } => commands::template(ctx, &id),
        Commands::Similar { a, b } => commands::similar(ctx, &a, &b),
        Commands::SimilarGroups { id } => commands::similar_groups(ctx, id.as_deref()),
    }
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log.filter))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

fn open_store(path: &Path) -> anyhow::Result<poolgrid_state::StateStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = poolgrid_state::StateStore::open(path)?;
    info!(path = ?path, "store opened");
    Ok(store)
}
