use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlshift_common::Error;
use sqlshift_engine::{Engine, SqliteExecutor};
use sqlshift_store::MigrationStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlshift", version, about = "Schema migrations for SQLite")]
struct Cli {
    /// Directory holding the migration scripts
    #[arg(
        long,
        global = true,
        env = "SQLSHIFT_MIGRATIONS_DIR",
        default_value = "migrations"
    )]
    dir: PathBuf,

    /// Path to the target SQLite database
    #[arg(
        long,
        global = true,
        env = "SQLSHIFT_DATABASE",
        default_value = "sqlshift.db"
    )]
    database: PathBuf,

    /// Validate scripts without executing them or touching the ledger
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Author a new migration with forward and backward scripts
    Create {
        /// Human-readable migration name, sanitized into the directory slug
        name: String,
        /// Forward (apply) SQL
        #[arg(long, default_value = "")]
        up: String,
        /// Backward (revert) SQL
        #[arg(long, default_value = "")]
        down: String,
    },
    /// Apply pending migrations, oldest first, optionally only up to TARGET
    Up {
        /// Migration id, or a prefix of a migration directory name
        target: Option<String>,
    },
    /// Revert the most recently applied migrations, newest first
    Rollback {
        #[arg(default_value_t = 1)]
        steps: i64,
    },
    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map the error taxonomy to distinct process exit statuses.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::InvalidInput(_)) => 2,
        Some(Error::NotFound(_)) => 3,
        Some(Error::ScriptPreparation { .. }) => 4,
        Some(Error::Execution { .. }) => 5,
        Some(Error::Consistency(_)) => 6,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    tracing::debug!(
        "migrations dir {}, database {}",
        cli.dir.display(),
        cli.database.display()
    );
    let store = MigrationStore::new(&cli.dir);
    let executor = SqliteExecutor::open(&cli.database)?;
    let engine = Engine::new(store, executor)?.dry_run(cli.dry_run);

    match cli.command {
        Command::Create { name, up, down } => {
            let created = engine.create(&name, &up, &down)?;
            if cli.dry_run {
                println!("dry run: would create {}", created.name);
            } else {
                println!("created {}", created.name);
            }
            println!("  {}", created.up);
            println!("  {}", created.down);
        }
        Command::Up { target } => {
            let applied = engine.up(target.as_deref())?;
            if applied.is_empty() {
                println!("nothing to apply");
            }
            for script in &applied {
                if cli.dry_run {
                    println!("would apply {script}");
                } else {
                    println!("applied {script}");
                }
            }
        }
        Command::Rollback { steps } => {
            let reverted = engine.rollback(steps)?;
            if reverted.is_empty() {
                println!("nothing to roll back");
            }
            for script in &reverted {
                if cli.dry_run {
                    println!("would revert {script}");
                } else {
                    println!("reverted {script}");
                }
            }
        }
        Command::Status { json } => {
            let applied = engine.applied_migrations()?;
            let pending = engine.pending_migrations()?;
            if json {
                let status = serde_json::json!({
                    "applied": applied,
                    "pending": pending,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("applied ({}):", applied.len());
                for record in &applied {
                    println!(
                        "  {}-{}  at {}",
                        record.id,
                        record.name,
                        record.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                println!("pending ({}):", pending.len());
                for entry in &pending {
                    println!("  {}", entry.dir_name);
                }
            }
        }
    }
    Ok(())
}
