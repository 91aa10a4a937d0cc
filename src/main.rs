use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use barangay_desk_lib::db::open_sqlite_pool;
use barangay_desk_lib::migrate::{self, MIGRATIONS};
use barangay_desk_lib::store::{StoreStatus, Table};
use barangay_desk_lib::sync::{outbox, JobStatus, OutboxJob};
use barangay_desk_lib::{AppError, EngineConfig, Store};

/// Exit code for a store this build cannot open.
const SCHEMA_EXIT_CODE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "barangay-desk", about = "Barangay desk storage maintenance", version)]
struct Cli {
    /// Database file. Defaults to BARANGAY_DESK_DB or the platform data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance and inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Inspect and manage the sync outbox.
    #[command(subcommand)]
    Outbox(OutboxCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Show schema version, row counts, outbox counts and sync metadata.
    Status {
        /// Emit the raw JSON status instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Apply pending migrations.
    Migrate,
    /// Delete the database and its WAL files and create an empty store.
    Reset {
        /// Required; the local data is lost.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum OutboxCommand {
    /// List outbox jobs in queue order.
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Move dead jobs back to pending with a fresh attempt budget.
    RequeueDead,
}

fn main() {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    barangay_desk_lib::init_logging(config.log_dir.as_deref());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {err}");
            process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Db(db) => handle_db_command(db, &config).await,
            Commands::Outbox(cmd) => handle_outbox_command(cmd, &config).await,
        }
    });
    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

/// Open the store, turning schema errors into an exit code with a hint.
async fn open_store(config: &EngineConfig) -> Result<Result<Store, i32>> {
    match Store::open(config).await {
        Ok(store) => Ok(Ok(store)),
        Err(err) if err.is_schema() => {
            eprintln!("Error: {err}");
            eprintln!("The local database cannot be used by this version. Run `barangay-desk db reset --yes` to start over.");
            Ok(Err(SCHEMA_EXIT_CODE))
        }
        Err(err) => Err(err).context("open local store"),
    }
}

async fn handle_db_command(command: DbCommand, config: &EngineConfig) -> Result<i32> {
    match command {
        DbCommand::Status { json } => {
            let store = match open_store(config).await? {
                Ok(store) => store,
                Err(code) => return Ok(code),
            };
            let status = store.status().await.context("collect store status")?;
            store.close().await;
            if json {
                let json = serde_json::to_string_pretty(&status).context("serialize status")?;
                println!("{json}");
            } else {
                print_status_table(&status);
            }
            Ok(0)
        }
        DbCommand::Migrate => {
            let pool = open_sqlite_pool(&config.db_path)
                .await
                .context("open database")?;
            let result = migrate::apply_migrations(&pool).await;
            pool.close().await;
            match result {
                Ok(applied) if applied.is_empty() => {
                    println!("Schema is up to date ({} migrations).", MIGRATIONS.len());
                    Ok(0)
                }
                Ok(applied) => {
                    for version in applied {
                        println!("applied {version}");
                    }
                    Ok(0)
                }
                Err(err) => {
                    let err = AppError::from(err);
                    eprintln!("Error: {err}");
                    Ok(if err.is_schema() { SCHEMA_EXIT_CODE } else { 1 })
                }
            }
        }
        DbCommand::Reset { yes } => {
            if !yes {
                eprintln!("Refusing to delete {} without --yes.", config.db_path.display());
                return Ok(2);
            }
            let store = Store::recreate(config).await.context("recreate store")?;
            store.close().await;
            println!("Database reset at {}", config.db_path.display());
            Ok(0)
        }
    }
}

async fn handle_outbox_command(command: OutboxCommand, config: &EngineConfig) -> Result<i32> {
    let store = match open_store(config).await? {
        Ok(store) => store,
        Err(code) => return Ok(code),
    };
    let code = match command {
        OutboxCommand::List {
            status,
            limit,
            json,
        } => {
            let jobs = store
                .outbox_jobs(status, limit)
                .await
                .context("list outbox jobs")?;
            if json {
                let json = serde_json::to_string_pretty(&jobs).context("serialize jobs")?;
                println!("{json}");
            } else {
                print_jobs_table(&jobs);
            }
            0
        }
        OutboxCommand::RequeueDead => {
            let mut tx = store.begin(&[Table::SyncOutbox]).await?;
            let requeued = outbox::requeue_dead(tx.conn()).await?;
            tx.commit().await?;
            println!("Requeued {requeued} dead job(s).");
            0
        }
    };
    store.close().await;
    Ok(code)
}

fn print_status_table(status: &StoreStatus) {
    println!("Local store status");
    println!("Path           : {}", status.db_path);
    println!(
        "Schema version : {}",
        status.schema_version.as_deref().unwrap_or("none")
    );
    println!("User version   : {}", status.user_version);
    if status.pending_migrations.is_empty() {
        println!("Pending        : none");
    } else {
        println!("Pending        : {}", status.pending_migrations.join(", "));
    }
    println!(
        "Last sync      : {}",
        status.sync.last_sync_at.as_deref().unwrap_or("never")
    );
    if let Some(error) = &status.sync.last_sync_error {
        println!("Last error     : {error}");
    }

    println!("\nOutbox:");
    let outbox = &status.outbox;
    for (label, count) in [
        ("pending", outbox.pending),
        ("syncing", outbox.syncing),
        ("failed", outbox.failed),
        ("synced", outbox.synced),
        ("dead", outbox.dead),
    ] {
        println!("{label:<10} {count:>8}");
    }
    println!("Queued audit entries: {}", status.queued_audit_entries);

    println!("\nRows:");
    for (table, count) in &status.row_counts {
        println!("{table:<24} {count:>8}");
    }
}

fn print_jobs_table(jobs: &[OutboxJob]) {
    if jobs.is_empty() {
        println!("No outbox jobs.");
        return;
    }
    println!(
        "{:<36} {:<24} {:<8} {:>5}  {:<24}  Last error",
        "Id", "Type", "Status", "Tries", "Created"
    );
    for job in jobs {
        println!(
            "{:<36} {:<24} {:<8} {:>5}  {:<24}  {}",
            job.id,
            job.job_type.as_str(),
            job.status.as_str(),
            job.try_count,
            job.created_at,
            job.last_error.as_deref().unwrap_or("-").replace('\n', " ")
        );
    }
}
