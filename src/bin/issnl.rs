//! ISSN identity graph operator CLI
//!
//! # Usage
//!
//! ```bash
//! # Nightly reconciliation against the registry and crossref datasets
//! issnl import
//!
//! # Same run against an in-memory copy of the canonical table
//! issnl import --dry-run
//!
//! # Fill titles, publishers and payloads for new linking identifiers
//! issnl enrich --limit 500
//!
//! # Lookups and corrections
//! issnl resolve 0000-0051 --trace
//! issnl merge 0000-0019 0000-0043
//! issnl move 0000-0051 0000-0043 --yes
//! issnl supersede 1111-1111 2291-5222
//! issnl supersede-notices 1111-1111 2222-2222
//! issnl retain --from-file keep.txt
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use issnl::config::DEFAULT_CONFIG_PATH;
use issnl::{IssnlConfig, Sources};
use issnl_core::{
    EnrichmentService, IdentityError, IdentityGraphMutators, IdentityResolver, IdentityStore,
    Issn, MappingStore, MemoryStore, ReconciliationPipeline,
};
use issnl_postgres::PgIdentityStore;

#[derive(Parser)]
#[command(name = "issnl")]
#[command(version)]
#[command(about = "Reconcile and correct the ISSN → ISSN-L identity graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML configuration file
    #[arg(long, short, global = true, env = "ISSNL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Run a full reconciliation (load, reconcile, diff, rebuild)
    Import {
        /// Reconcile against an in-memory copy of the canonical mappings
        #[arg(long)]
        dry_run: bool,
    },

    /// Enrich metadata rows that were never enriched
    Enrich {
        /// Stop after this many rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Resolve any known identifier to its journal
    Resolve {
        issn: String,
        /// Report which lookup matched
        #[arg(long)]
        trace: bool,
    },

    /// Fold one linking identifier's group into another
    Merge { from: Issn, to: Issn },

    /// Re-map one identifier onto another linking identifier
    Move {
        issn: Issn,
        to: Issn,
        /// Confirm deletion of the identifier's current group
        #[arg(long)]
        yes: bool,
    },

    /// Graft a cancelled identifier onto its replacement's group
    Supersede { old: Issn, new: Issn },

    /// Supersede every identifier whose registry record names a replacement
    SupersedeNotices {
        #[arg(required = true)]
        issns: Vec<Issn>,
    },

    /// Delete metadata rows whose linking identifier is not listed
    Retain {
        issns: Vec<Issn>,
        /// File with one linking identifier per line
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "issnl=info,issnl_core=info,issnl_postgres=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            let code = e
                .downcast_ref::<IdentityError>()
                .map_or(1, IdentityError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = if cli.config.exists() {
        IssnlConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        IssnlConfig::default()
    };

    match cli.command {
        Command::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await.context("Migration failed")?;
            tracing::info!("migrations applied");
        }

        Command::Import { dry_run } => {
            let sources = Sources::from_config(&config)?;
            let store: Arc<dyn IdentityStore> = if dry_run {
                Arc::new(dry_run_store(&config).await?)
            } else {
                Arc::new(connect(&config).await?)
            };
            let pipeline = ReconciliationPipeline::new(store, sources.registry, sources.crossref)
                .with_minimum_records(config.registry.minimum_records)
                .with_ignore_list(config.ignore_list()?);
            let report = pipeline.run().await.context("Reconciliation run failed")?;
            print_json(&report)?;
        }

        Command::Enrich { limit } => {
            let store = connect(&config).await?;
            let sources = Sources::from_config(&config)?;
            let summary = EnrichmentService::new(config.enrichment.batch_size)
                .run(&store, sources.descriptions.as_ref(), limit)
                .await?;
            print_json(&summary)?;
        }

        Command::Resolve { issn, trace } => {
            let store = connect(&config).await?;
            let resolver = IdentityResolver::new(&store);
            let Ok(identifier) = Issn::parse(&issn) else {
                println!("null");
                return Ok(());
            };
            if trace {
                let resolved = resolver.resolve_traced(identifier).await?;
                print_json(&resolved.map(|(journal, via)| {
                    serde_json::json!({ "journal": journal, "via": via })
                }))?;
            } else {
                print_json(&resolver.resolve(identifier).await?)?;
            }
        }

        Command::Merge { from, to } => {
            let store = connect(&config).await?;
            let plan = IdentityGraphMutators::new(&store).merge(from, to).await?;
            print_json(&plan)?;
        }

        Command::Move { issn, to, yes } => {
            let store = connect(&config).await?;
            let plan = IdentityGraphMutators::new(&store)
                .move_identifier(issn, to, yes)
                .await?;
            print_json(&plan)?;
        }

        Command::Supersede { old, new } => {
            let store = connect(&config).await?;
            let outcome = IdentityGraphMutators::new(&store).supersede(old, new).await?;
            print_json(&outcome)?;
        }

        Command::SupersedeNotices { issns } => {
            let store = connect(&config).await?;
            let sources = Sources::from_config(&config)?;
            let report = IdentityGraphMutators::new(&store)
                .supersede_from_notices(sources.descriptions.as_ref(), &issns)
                .await?;
            print_json(&report)?;
        }

        Command::Retain { mut issns, from_file } => {
            if let Some(path) = from_file {
                issns.extend(read_identifier_file(&path)?);
            }
            let store = connect(&config).await?;
            let deleted = IdentityGraphMutators::new(&store)
                .retain_metadata(&issns)
                .await?;
            print_json(&serde_json::json!({ "kept": issns.len(), "deleted": deleted }))?;
        }
    }
    Ok(())
}

async fn connect(config: &IssnlConfig) -> Result<PgIdentityStore> {
    let url = config.database.url()?;
    let store = PgIdentityStore::connect(
        &url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await
    .context("Failed to connect to database")?;
    Ok(store)
}

/// Copy the canonical mappings into memory so a run can be inspected
/// without writing.
async fn dry_run_store(config: &IssnlConfig) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    match connect(config).await {
        Ok(pg) => {
            let pairs: Vec<_> = pg
                .active_mappings()
                .await?
                .iter()
                .map(|m| m.pair())
                .collect();
            tracing::info!(mappings = pairs.len(), "seeded dry run from database");
            store.seed_mappings(&pairs).await;
        }
        Err(e) => {
            tracing::warn!("dry run starts from an empty graph: {e:#}");
        }
    }
    Ok(store)
}

fn read_identifier_file(path: &Path) -> Result<Vec<Issn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| Issn::parse(line).with_context(|| format!("{}", path.display())))
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
