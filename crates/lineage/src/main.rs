//! lineage CLI
//!
//! Command-line tool for managing revision-based database migrations.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lineage::executor::applied_revision;
use lineage::prelude::*;

/// Revision-graph database migrations.
#[derive(Parser)]
#[command(name = "lineage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Directory holding the revision files.
    #[arg(short, long, default_value = "migrations")]
    scripts: PathBuf,

    /// SQL dialect used to render operations.
    #[arg(long, default_value = "sqlite")]
    dialect: String,

    /// Name of the table recording the applied revision.
    #[arg(long, default_value = lineage::compare::DEFAULT_VERSION_TABLE)]
    version_table: String,

    /// Commit after every revision instead of once per run.
    #[arg(long)]
    transaction_per_migration: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the script directory and the version table.
    Init,

    /// Create a new revision file on top of the current head.
    Revision {
        /// Revision message.
        #[arg(short, long, default_value = "")]
        message: String,

        /// Use this id instead of a random one.
        #[arg(long)]
        rev_id: Option<String>,

        /// Fill the revision from the difference between the database and
        /// the target schema.
        #[arg(long, requires = "target")]
        autogenerate: bool,

        /// Target schema as a JSON snapshot.
        #[arg(long)]
        target: Option<PathBuf>,
    },

    /// Upgrade to a later revision.
    Upgrade {
        /// Destination: `head`, an id, an id prefix or `+N`. With `--sql`,
        /// `start:destination` sets the starting point.
        #[arg(default_value = "head", allow_hyphen_values = true)]
        revision: String,

        /// Print the SQL instead of running it.
        #[arg(long)]
        sql: bool,
    },

    /// Revert to an earlier revision.
    Downgrade {
        /// Destination: `base`, an id, an id prefix or `-N`. With `--sql`,
        /// `start:destination` is required.
        #[arg(allow_hyphen_values = true)]
        revision: String,

        /// Print the SQL instead of running it.
        #[arg(long)]
        sql: bool,
    },

    /// Record a revision as applied without running any migration.
    Stamp {
        /// Revision to record: `head`, `base`, an id or an id prefix.
        revision: String,
    },

    /// Show the revision the database is at.
    Current,

    /// Show the head revisions.
    Heads,

    /// Show the revisions with more than one child.
    Branches,

    /// List revisions from the heads down to the bases.
    History {
        /// Only show `lower:upper`.
        #[arg(short, long, allow_hyphen_values = true)]
        range: Option<String>,
    },

    /// Fail if the database differs from the target schema.
    Check {
        /// Target schema as a JSON snapshot.
        #[arg(long)]
        target: PathBuf,
    },
}

async fn connect(database: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database)
        .with_context(|| format!("invalid database URL '{database}'"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn split_range(spec: &str) -> (Option<&str>, &str) {
    match spec.split_once(':') {
        Some((start, destination)) => (Some(start), destination),
        None => (None, spec),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dialect = DialectRegistry::with_builtin().get(&cli.dialect)?;
    let scripts = ScriptDirectory::new(&cli.scripts);
    let mode = if cli.transaction_per_migration {
        TransactionMode::PerMigration
    } else {
        TransactionMode::PerRun
    };
    let runner = |pool: SqlitePool| {
        MigrationRunner::new(pool, Arc::clone(&dialect))
            .with_version_table(VersionTable::new(&cli.version_table))
            .with_transaction_mode(mode)
    };

    match cli.command {
        Commands::Init => {
            scripts.init()?;
            let pool = connect(&cli.database).await?;
            runner(pool).init().await?;
            info!(table = %cli.version_table, "Version table ready");
        }

        Commands::Revision {
            message,
            rev_id,
            autogenerate,
            target,
        } => {
            let (upgrade, downgrade) = match target {
                Some(target) if autogenerate => {
                    let target = SchemaSnapshot::load(&target)?;
                    let pool = connect(&cli.database).await?;
                    let inspector = SqliteInspector::new(pool);
                    let options = CompareOptions::new().with_version_table(&cli.version_table);
                    let diffs =
                        compare_metadata(&inspector, Arc::clone(&dialect), &target, options)
                            .await?;
                    if diffs.is_empty() {
                        info!("No changes in schema detected");
                    }
                    (upgrade_operations(&diffs), downgrade_operations(&diffs))
                }
                _ => (Vec::new(), Vec::new()),
            };
            let path = scripts.generate_revision(&message, rev_id.as_deref(), upgrade, downgrade)?;
            println!("Generating {}", path.display());
        }

        Commands::Upgrade { revision, sql } => {
            let graph = scripts.graph()?;
            if sql {
                let pool = SqlitePoolOptions::new().connect_lazy("sqlite::memory:")?;
                let (start, destination) = split_range(&revision);
                let start = start.map(|s| s.parse::<RevisionSpec>()).transpose()?;
                let start = match start {
                    Some(spec) => spec.resolve(&graph)?,
                    None => None,
                };
                for statement in runner(pool).upgrade_sql(&graph, start, destination)? {
                    println!("{statement};\n");
                }
            } else {
                let pool = connect(&cli.database).await?;
                let applied = runner(pool).upgrade(&graph, &revision).await?;
                if applied.is_empty() {
                    info!("Already at {revision}");
                }
            }
        }

        Commands::Downgrade { revision, sql } => {
            let graph = scripts.graph()?;
            if sql {
                let (Some(start), destination) = split_range(&revision) else {
                    bail!("offline downgrade needs a starting point: use start:destination");
                };
                let start = start.parse::<RevisionSpec>()?.resolve(&graph)?;
                let Some(start) = start else {
                    bail!("offline downgrade cannot start at base");
                };
                let pool = SqlitePoolOptions::new().connect_lazy("sqlite::memory:")?;
                for statement in runner(pool).downgrade_sql(&graph, start, destination)? {
                    println!("{statement};\n");
                }
            } else {
                let pool = connect(&cli.database).await?;
                let reverted = runner(pool).downgrade(&graph, &revision).await?;
                if reverted.is_empty() {
                    info!("Already at {revision}");
                }
            }
        }

        Commands::Stamp { revision } => {
            let graph = scripts.graph()?;
            let pool = connect(&cli.database).await?;
            runner(pool).stamp(&graph, &revision).await?;
        }

        Commands::Current => {
            let graph = scripts.graph()?;
            let pool = connect(&cli.database).await?;
            let current = runner(pool).current().await?;
            match applied_revision(&graph, current.as_deref())? {
                Some(revision) => println!("{}", revision.log_entry()),
                None => println!("<base>"),
            }
        }

        Commands::Heads => {
            let graph = scripts.graph()?;
            for head in graph.heads() {
                if let Some(revision) = graph.get(head) {
                    println!("{}", revision.log_entry());
                }
            }
        }

        Commands::Branches => {
            let graph = scripts.graph()?;
            for revision in graph.branch_points() {
                println!("{}", revision.log_entry());
                for child in revision.children() {
                    println!("    -> {child}");
                }
            }
        }

        Commands::History { range } => {
            let graph = scripts.graph()?;
            match range.as_deref().and_then(|r| r.split_once(':')) {
                Some((lower, upper)) => {
                    let lower = if lower.is_empty() { "base" } else { lower };
                    let upper = if upper.is_empty() { "head" } else { upper };
                    for revision in resolve_range(&graph, upper, lower)? {
                        println!("{}", revision.log_entry());
                    }
                }
                None if range.is_some() => bail!("history range must be lower:upper"),
                None => {
                    for revision in graph.walk_revisions() {
                        println!("{}", revision.log_entry());
                    }
                }
            }
        }

        Commands::Check { target } => {
            let target = SchemaSnapshot::load(&target)?;
            let pool = connect(&cli.database).await?;
            let inspector = SqliteInspector::new(pool);
            let options = CompareOptions::new().with_version_table(&cli.version_table);
            let diffs = compare_metadata(&inspector, Arc::clone(&dialect), &target, options).await?;
            if !diffs.is_empty() {
                for diff in &diffs {
                    println!("{diff}");
                }
                bail!("New upgrade operations detected: {} change(s)", diffs.len());
            }
            println!("No new upgrade operations detected.");
        }
    }

    Ok(())
}
