//! LineageFlow CLI
//!
//! Thin command-line caller over the lineage service. Results are printed to
//! stdout as pretty JSON; logs go to stderr.
//!
//! Storage: PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory
//! store that lives for one invocation (seed it with `--graph`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lineageflow::discovery::StaticSignalSource;
use lineageflow::models::{CandidateStatus, ColumnRef, ImpactDirection, NodeKey, TransformationSide};
use lineageflow::seed::GraphSeed;
use lineageflow::store::{LineageStore, MemoryStore, PgStore};
use lineageflow::{LineageService, Settings};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lineageflow")]
#[command(about = "Data lineage graph and impact analysis", long_about = None)]
struct Cli {
    /// JSON file of nodes, edges, rules and signals to load first
    #[arg(short, long, global = true)]
    graph: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a resource with everything up- and downstream of it
    Lineage {
        /// Resource key (system:resource_type:resource_id)
        key: NodeKey,

        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Analyze the impact of changing a resource
    Impact {
        key: NodeKey,

        /// upstream, downstream or both
        #[arg(long, default_value = "downstream")]
        direction: ImpactDirection,

        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Shortest path from a resource into another system
    Path {
        key: NodeKey,

        /// Target system
        #[arg(long)]
        system: String,
    },

    /// All paths between two resources
    Paths {
        source: NodeKey,
        target: NodeKey,

        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Run discovery rules (all enabled rules unless one is given)
    Discover {
        #[arg(long)]
        rule: Option<Uuid>,
    },

    /// List discovered candidate edges
    Candidates {
        /// Only candidates awaiting verification
        #[arg(long)]
        pending: bool,
    },

    /// Promote a discovered candidate to a canonical edge
    Verify { id: Uuid },

    /// Past impact analyses of a resource, newest first
    History {
        key: NodeKey,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Edges entering or leaving a system
    CrossSystem { system: String },

    /// Column-level lineage of one column
    Columns {
        /// Column reference (system:table.column)
        column: ColumnRef,

        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Latest captured logic deriving one resource from another
    Transformation { source: NodeKey, target: NodeKey },

    /// Captured logic reading from (or producing) a resource
    Transformations {
        key: NodeKey,

        /// source or target
        #[arg(long, default_value = "source")]
        side: TransformationSide,
    },

    /// Dump every node and edge
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = Settings::load().context("Failed to load configuration")?;

    let store: Arc<dyn LineageStore> = match &settings.database {
        Some(db) => {
            let store = PgStore::connect(db).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let signals = Arc::new(StaticSignalSource::new());
    let service = LineageService::new(store, signals.clone(), &settings);

    if let Some(path) = &cli.graph {
        GraphSeed::load(path).await?.apply(&service, &signals).await?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match cli.command {
        Commands::Lineage { key, max_depth } => {
            print_json(&service.get_lineage(&key, max_depth, &cancel).await?)?
        }
        Commands::Impact {
            key,
            direction,
            max_depth,
        } => print_json(
            &service
                .analyze_impact(&key, direction, max_depth, &cancel)
                .await?,
        )?,
        Commands::Path { key, system } => {
            print_json(&service.find_path(&key, &system, &cancel).await?)?
        }
        Commands::Paths {
            source,
            target,
            max_depth,
        } => print_json(
            &service
                .find_paths(&source, &target, max_depth, &cancel)
                .await?,
        )?,
        Commands::Discover { rule } => print_json(&service.run_discovery(rule, &cancel).await?)?,
        Commands::Candidates { pending } => {
            let status = pending.then_some(CandidateStatus::Candidate);
            print_json(&service.list_candidates(status).await?)?
        }
        Commands::Verify { id } => print_json(&service.verify_discovered_edge(id).await?)?,
        Commands::History { key, limit } => {
            print_json(&service.impact_history(&key, Some(limit)).await?)?
        }
        Commands::CrossSystem { system } => {
            print_json(&service.cross_system_lineage(&system).await?)?
        }
        Commands::Columns { column, max_depth } => {
            print_json(&service.column_lineage(&column, max_depth, &cancel).await?)?
        }
        Commands::Transformation { source, target } => {
            print_json(&service.get_transformation(&source, &target).await?)?
        }
        Commands::Transformations { key, side } => {
            print_json(&service.list_transformations(&key, side).await?)?
        }
        Commands::Export => print_json(&service.full_graph().await?)?,
    }

    Ok(())
}

/// Initialize tracing, writing to stderr so stdout stays machine-readable
fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lineageflow=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    }
}

/// Cancel in-flight work on Ctrl+C; partial results are still printed
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, cancelling");
        cancel.cancel();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
