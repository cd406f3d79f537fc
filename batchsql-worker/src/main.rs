//! # BatchSQL Worker
//!
//! One worker process of the batch SQL scheduler. Several workers share the
//! same Redis store and catalog database:
//!
//! - `run`: dispatch loop, capacity refresher and (optionally) periodic legacy
//!   queue migration, until Ctrl-C
//! - `migrate`: drain the legacy host-keyed queues once, or every `--every`
//! - `enqueue <user>`: append a user to the User-Database Queue

mod runner;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use batchsql_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use batchsql_core::dequeue::{DatabaseDequeuer, JobDequeuer};
use batchsql_core::jobs::PostgresJobStorage;
use batchsql_core::store::RedisStore;
use batchsql_core::{
    CapacityRefresher, Dispatcher, HostAdmission, HttpCapacityProbe, JobOwnerLookup, Launcher,
    QueueMigrator, SharedStore, StoreMetadataBackend, UserDatabaseQueue, UserJobQueue,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::runner::PgQueryRunner;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "batchsql-worker")]
#[command(about = "Batch SQL job scheduler worker")]
struct Cli {
    /// Configuration file (defaults to batchsql.toml or config/batchsql.toml)
    #[arg(long, global = true, env = "BATCHSQL_CONFIG")]
    config: Option<PathBuf>,

    /// Environment file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the dispatch loop until interrupted (default)
    Run,
    /// Move jobs from legacy host-keyed queues into per-user queues
    Migrate(MigrateArgs),
    /// Append a user to the User-Database Queue
    Enqueue {
        /// User whose database has pending jobs
        user: String,
    },
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct MigrateArgs {
    /// Repeat the migration on this cadence (e.g. `30s`, `5m`) until interrupted
    #[arg(long, value_parser = humantime::parse_duration)]
    every: Option<Duration>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,batchsql_core=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "loaded configuration file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let redis = RedisStore::connect(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    let store: Arc<dyn SharedStore> = Arc::new(redis);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Migrate(args) => migrate(config, store, args.every).await,
        Command::Enqueue { user } => enqueue(config, store, &user).await,
    }
}

async fn connect_catalog(config: &Config) -> anyhow::Result<Arc<PostgresJobStorage>> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is required for this command")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .context("failed to connect to catalog database")?;

    let storage = PostgresJobStorage::new(pool)
        .with_connect_timeout(Duration::from_millis(config.database.connect_timeout_ms));
    storage
        .initialize_schema()
        .await
        .context("failed to prepare batch_jobs schema")?;
    Ok(Arc::new(storage))
}

async fn run(config: Config, store: Arc<dyn SharedStore>) -> anyhow::Result<()> {
    let scheduler = &config.scheduler;
    let keys = scheduler.keys.clone();
    let storage = connect_catalog(&config).await?;

    let admission = HostAdmission::new(scheduler.batch.max_jobs_per_instance);
    let queue = UserDatabaseQueue::new(Arc::clone(&store), &keys);
    let metadata = Arc::new(StoreMetadataBackend::new(Arc::clone(&store), keys.clone()));
    let runner = Arc::new(PgQueryRunner::new(
        Arc::clone(&storage),
        admission.clone(),
        queue.clone(),
    ));

    let user_jobs = UserJobQueue::new(Arc::clone(&store), keys.clone());
    let databases = DatabaseDequeuer::new(queue, metadata, admission.clone());
    let dispatcher = Dispatcher::new(
        JobDequeuer::new(databases, user_jobs, Arc::clone(&storage)),
        Arc::clone(&runner),
    );
    let launcher = Launcher::new(Arc::new(dispatcher));

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    if scheduler.capacity.enabled {
        let probe = HttpCapacityProbe::new(scheduler.capacity.clone())
            .context("failed to build capacity probe")?;
        let refresher =
            CapacityRefresher::new(Arc::new(probe), admission.clone(), scheduler.batch.clone());
        background.push(refresher.spawn(scheduler.capacity.refresh_interval(), shutdown.clone()));
    } else {
        info!(
            max_jobs_per_instance = scheduler.batch.max_jobs_per_instance,
            "capacity probing disabled; using static per-host limit"
        );
    }

    if let Some(interval) = scheduler.migration.interval() {
        let owners: Arc<dyn JobOwnerLookup> = storage.clone();
        let migrator = QueueMigrator::new(
            Arc::clone(&store),
            keys.clone(),
            owners,
            &scheduler.migration,
        );
        background.push(migrator.spawn(interval, shutdown.clone()));
    }

    launcher.start(scheduler.batch.batch_interval()).await;
    info!(
        interval_ms = scheduler.batch.batch_interval().as_millis() as u64,
        worker_processes = scheduler.batch.worker_processes,
        "worker running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    shutdown.cancel();
    launcher.stop().await;
    for handle in background {
        if let Err(err) = handle.await {
            warn!(error = %err, "background task ended abnormally");
        }
    }
    runner.drain().await;

    for (host, utilization) in admission.snapshot().await {
        info!(
            host = %host,
            inflight = utilization.inflight,
            limit = utilization.limit,
            "final admission state"
        );
    }
    Ok(())
}

async fn migrate(
    config: Config,
    store: Arc<dyn SharedStore>,
    every: Option<Duration>,
) -> anyhow::Result<()> {
    let storage = connect_catalog(&config).await?;
    let owners: Arc<dyn JobOwnerLookup> = storage;
    let migrator = QueueMigrator::new(
        store,
        config.scheduler.keys.clone(),
        owners,
        &config.scheduler.migration,
    );

    let Some(every) = every else {
        let report = migrator.run().await.context("legacy queue migration failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    };

    let shutdown = CancellationToken::new();
    let handle = migrator.spawn(every, shutdown.clone());
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();
    if let Err(err) = handle.await {
        error!(error = %err, "migration task ended abnormally");
    }
    Ok(())
}

async fn enqueue(config: Config, store: Arc<dyn SharedStore>, user: &str) -> anyhow::Result<()> {
    let queue = UserDatabaseQueue::new(store, &config.scheduler.keys);
    let len = queue
        .enqueue(user)
        .await
        .with_context(|| format!("failed to enqueue {user}"))?;
    println!("{user} enqueued on {} (length {len})", queue.key());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["batchsql-worker"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_migrate_cadence() {
        let cli = Cli::try_parse_from(["batchsql-worker", "migrate", "--every", "90s"]).unwrap();
        match cli.command {
            Some(Command::Migrate(args)) => assert_eq!(args.every, Some(Duration::from_secs(90))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_enqueue_with_global_config() {
        let cli = Cli::try_parse_from([
            "batchsql-worker",
            "enqueue",
            "alice",
            "--config",
            "/etc/batchsql.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/batchsql.toml")));
        assert!(matches!(cli.command, Some(Command::Enqueue { user }) if user == "alice"));
    }

    #[test]
    fn rejects_bad_duration() {
        assert!(Cli::try_parse_from(["batchsql-worker", "migrate", "--every", "soon"]).is_err());
    }
}
