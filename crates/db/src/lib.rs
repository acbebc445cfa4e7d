//! Database initialization for the kitchen service.
//!
//! Provides `init_db_pool` for creating a connection pool (pinged with
//! bounded exponential backoff before use) and auto-applying SQL migrations
//! from the configured migrations directory.

use std::time::Duration;

use anyhow::{Context, Result};
use app_config::DatabaseConfig;
use backon::{ExponentialBuilder, Retryable};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// The event path and the HTTP surface share one small pool; transactions
/// are the unit of isolation.
const POOL_MAX_SIZE: usize = 3;

/// Initializes the database connection pool and runs migrations.
///
/// # Arguments
/// * `cfg` - The database section of the loaded application configuration.
///
/// # Errors
/// Returns an error if the pool cannot be created, the database stays
/// unreachable after all retries, or migrations fail.
pub async fn init_db_pool(cfg: &DatabaseConfig) -> Result<Pool> {
    let pg_config: PgConfig = cfg
        .connection_string()
        .parse()
        .context("failed to parse Postgres connection string")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(POOL_MAX_SIZE)
        .runtime(Runtime::Tokio1)
        .build()
        .context("failed to create database pool")?;

    ping_with_backoff(&pool).await?;
    info!("connected to database");

    match &cfg.migration_dir {
        Some(dir) => {
            let client = pool
                .get()
                .await
                .context("failed to get connection for migrations")?;
            run_migrations(&client, dir).await?;
        }
        None => info!("no migrations directory configured, skipping migrations"),
    }

    Ok(pool)
}

/// Pings the database, retrying with exponential backoff until it responds
/// or the retries are exhausted.
///
/// Also used by the health endpoint, so the delay bounds stay small.
pub async fn ping_with_backoff(pool: &Pool) -> Result<()> {
    let ping = || async {
        let client = pool
            .get()
            .await
            .context("failed to get connection from pool")?;
        client
            .execute("SELECT 1", &[])
            .await
            .context("ping query failed")?;
        Ok::<(), anyhow::Error>(())
    };

    ping.retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_factor(1.5)
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(4)
            .with_jitter(),
    )
    .notify(|err: &anyhow::Error, delay: Duration| {
        info!(delay_ms = delay.as_millis() as u64, "database is not ready, backing off: {err:#}");
    })
    .await
    .context("failed to connect to database after multiple retries")
}

/// Applies all SQL migrations from the given directory, in file-name order.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .with_context(|| format!("failed to read migrations directory '{migrations_dir}'"))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        info!("applying migration: {file_name}");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("failed to execute migration {file_name}"))?;
    }
    Ok(())
}
