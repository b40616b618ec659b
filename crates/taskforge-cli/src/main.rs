mod api;
mod config;
mod retention;
mod run;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use taskforge_db::models::{DuplicatePolicy, Priority, TaskType};
use taskforge_db::pool;
use taskforge_db::queries::{execution_logs as log_db, tasks as task_db};

use config::{CliOverrides, ResolvedConfig};

#[derive(Parser)]
#[command(name = "taskforge", about = "Durable distributed task scheduler")]
struct Cli {
    /// Database URL (overrides TASKFORGE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a taskforge config file (no database required)
    Init {
        #[arg(long, default_value = taskforge_db::config::DbConfig::DEFAULT_URL)]
        db_url: String,
        #[arg(long)]
        force: bool,
    },
    /// Create the database (if absent) and run migrations
    DbInit,
    /// Run the scheduling engine (Poller + Stale-Lock Reaper) for this replica
    Run,
    /// Serve the operator HTTP API
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Task CRUD and lifecycle commands
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Delete terminal tasks (and their logs) older than the retention horizon
    RetentionSweep {
        #[arg(long)]
        retention_days: Option<i32>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Create a new task
    Create {
        /// Task type, e.g. ORDER_CANCEL, PAYMENT_REFUND, PAYMENT_PARTIAL_REFUND, PAYMENT_VOID, WEBHOOK_NOTIFICATION, CUSTOM
        task_type: String,
        /// Business reference id (e.g. order id, payment id)
        reference_id: String,
        /// Priority: LOW, NORMAL, HIGH, CRITICAL (default NORMAL)
        #[arg(long)]
        priority: Option<String>,
        /// JSON payload handed to the handler
        #[arg(long)]
        payload: Option<String>,
        /// Reject creation if a non-terminal duplicate already exists
        #[arg(long)]
        reject_duplicate: bool,
    },
    /// Show a single task
    Get { task_id: Uuid },
    /// List tasks, optionally filtered
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        task_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a task's execution log history
    Logs { task_id: Uuid },
    /// Aggregate task counts by type and status
    Stats,
    /// Cancel a non-terminal, non-locked task
    Cancel {
        task_id: Uuid,
        #[arg(long, default_value = "cancelled via CLI")]
        reason: String,
    },
    /// Pause a non-terminal, non-locked task
    Pause { task_id: Uuid },
    /// Resume a paused task back to PENDING
    Resume { task_id: Uuid },
    /// Retry a failed/paused/exhausted task at the next poll tick
    Retry { task_id: Uuid },
    /// Retry a failed/paused/exhausted task immediately
    RetryNow { task_id: Uuid },
}

/// `taskforge init`: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: Some(db_url.to_string()),
        },
        ..Default::default()
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `taskforge db-init` to create and migrate the database.");
    Ok(())
}

/// `taskforge db-init`: create database and run migrations.
async fn cmd_db_init(resolved: &ResolvedConfig) -> anyhow::Result<()> {
    println!("Initializing taskforge database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("taskforge db-init complete.");
    Ok(())
}

async fn cmd_task(command: TaskCommands, resolved: &ResolvedConfig) -> anyhow::Result<()> {
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let result = run_task_command(command, &db_pool, &resolved.engine).await;
    db_pool.close().await;
    result
}

async fn run_task_command(
    command: TaskCommands,
    pool: &sqlx::PgPool,
    engine_config: &taskforge_core::config::EngineConfig,
) -> anyhow::Result<()> {
    match command {
        TaskCommands::Create {
            task_type,
            reference_id,
            priority,
            payload,
            reject_duplicate,
        } => {
            let task_type: TaskType = task_type
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid task type {task_type:?}: {e}"))?;
            let priority = match priority {
                Some(p) => p
                    .parse::<Priority>()
                    .map_err(|e| anyhow::anyhow!("invalid priority: {e}"))?,
                None => Priority::Normal,
            };
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload is not valid JSON")?,
                None => serde_json::json!({}),
            };

            let task = task_db::insert_task(
                pool,
                task_db::NewTask {
                    task_type,
                    priority,
                    reference_id,
                    secondary_reference_id: None,
                    description: None,
                    payload,
                    metadata: serde_json::json!({}),
                    scheduled_time: None,
                    expires_at: None,
                    cron_expression: None,
                    max_retries: None,
                    retry_delay_hours: None,
                    duplicate_policy: if reject_duplicate {
                        Some(DuplicatePolicy::Reject)
                    } else {
                        None
                    },
                },
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskCommands::Get { task_id } => {
            let task = task_db::get_task(pool, task_id)
                .await?
                .with_context(|| format!("task {task_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskCommands::List {
            status,
            task_type,
            limit,
        } => {
            let mut filter = task_db::TaskFilter::new();
            filter.limit = limit;
            if let Some(s) = status {
                filter.status = Some(s.parse().map_err(|e| anyhow::anyhow!("invalid status: {e}"))?);
            }
            if let Some(t) = task_type {
                filter.task_type = Some(t.parse().map_err(|e| anyhow::anyhow!("invalid task type: {e}"))?);
            }
            let tasks = task_db::search_tasks(pool, &filter).await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        TaskCommands::Logs { task_id } => {
            let logs = log_db::list_logs_for_task(pool, task_id).await?;
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
        TaskCommands::Stats => {
            let stats = task_db::task_stats(pool).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        TaskCommands::Cancel { task_id, reason } => {
            let rows = task_db::cancel_task(pool, task_id, &reason).await?;
            require_affected(rows, task_id, "cancel")?;
            println!("Task {task_id} cancelled.");
        }
        TaskCommands::Pause { task_id } => {
            let rows = task_db::pause_task(pool, task_id).await?;
            require_affected(rows, task_id, "pause")?;
            println!("Task {task_id} paused.");
        }
        TaskCommands::Resume { task_id } => {
            let rows = task_db::resume_task(pool, task_id).await?;
            require_affected(rows, task_id, "resume")?;
            println!("Task {task_id} resumed.");
        }
        TaskCommands::Retry { task_id } => {
            let rows = task_db::retry_task(pool, task_id, None).await?;
            require_affected(rows, task_id, "retry")?;
            println!("Task {task_id} scheduled for retry.");
        }
        TaskCommands::RetryNow { task_id } => {
            let rows = task_db::retry_task_now(pool, task_id).await?;
            require_affected(rows, task_id, "retry-now")?;

            let task = task_db::get_task(pool, task_id)
                .await?
                .with_context(|| format!("task {task_id} vanished after retry-now reset"))?;
            let http = taskforge_core::handler::HttpHandlerConfig::new(
                engine_config.handler_urls.orders_service_url.clone(),
                engine_config.handler_urls.payments_service_url.clone(),
            );
            let registry = std::sync::Arc::new(taskforge_core::handler::default_registry(http));
            let alert_sink = taskforge_core::alert::AlertSink::new(engine_config.alert.clone());
            let executor = taskforge_core::executor::Executor::new(pool.clone(), registry, alert_sink);
            let outcome = executor.execute_task(task, engine_config).await?;

            println!("Task {task_id} dispatched immediately: {outcome:?}");
        }
    }
    Ok(())
}

fn require_affected(rows: u64, task_id: Uuid, command: &str) -> anyhow::Result<()> {
    if rows == 0 {
        anyhow::bail!(
            "task {task_id} could not be {command}'d: not found, locked, or in a non-eligible status"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            let resolved = ResolvedConfig::resolve(&CliOverrides {
                database_url: cli.database_url.clone(),
                ..Default::default()
            })?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Run => {
            let resolved = ResolvedConfig::resolve(&CliOverrides {
                database_url: cli.database_url.clone(),
                ..Default::default()
            })?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run::run_replica(db_pool.clone(), resolved.engine).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = ResolvedConfig::resolve(&CliOverrides {
                database_url: cli.database_url.clone(),
                bind,
                port,
            })?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let http = taskforge_core::handler::HttpHandlerConfig::new(
                resolved.engine.handler_urls.orders_service_url.clone(),
                resolved.engine.handler_urls.payments_service_url.clone(),
            );
            let registry = std::sync::Arc::new(taskforge_core::handler::default_registry(http));
            let alert_sink = taskforge_core::alert::AlertSink::new(resolved.engine.alert.clone());
            let executor =
                taskforge_core::executor::Executor::new(db_pool.clone(), registry, alert_sink);
            let state = api::AppState {
                pool: db_pool.clone(),
                executor,
                engine_config: resolved.engine.clone(),
            };
            let shutdown = tokio_util::sync::CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                signal_token.cancel();
            });
            let result = api::run_serve(state, &resolved.bind, resolved.port, shutdown).await;
            db_pool.close().await;
            result?;
        }
        Commands::Task { command } => {
            let resolved = ResolvedConfig::resolve(&CliOverrides {
                database_url: cli.database_url.clone(),
                ..Default::default()
            })?;
            cmd_task(command, &resolved).await?;
        }
        Commands::RetentionSweep { retention_days } => {
            let resolved = ResolvedConfig::resolve(&CliOverrides {
                database_url: cli.database_url.clone(),
                ..Default::default()
            })?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let days = retention_days.unwrap_or(resolved.engine.retention_days);
            let result = retention::run_retention_sweep(&db_pool, days).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
