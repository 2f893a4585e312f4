//! Database initialization and migration logic for the order pipeline.
//!
//! Provides `init_db_pool` for creating a connection pool against the
//! primary document store and auto-applying SQL migrations from the
//! migrations directory. The first `pool.get()` doubles as the connect
//! probe the repository resolver relies on: an unreachable store surfaces
//! here instead of at the first order write.

use anyhow::{Context, Result};
use app_config::AppConfig;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Initializes the database connection pool and runs migrations.
///
/// # Arguments
/// * `cfg` - The loaded application configuration; `database_url` and
///   `database_name` are the two required values.
///
/// # Errors
/// Returns an error if the connection string is invalid, the store is
/// unreachable, or migrations fail.
pub async fn init_db_pool(cfg: &AppConfig) -> Result<Pool> {
    let mut pg_config: PgConfig = cfg
        .database_url
        .parse()
        .context("Failed to parse primary store connection string")?;
    pg_config.dbname(&cfg.database_name);

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(16)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")?;

    // Apply migrations; this is also the one-shot connectivity probe.
    let client = pool
        .get()
        .await
        .context("Failed to connect to the primary store")?;
    run_migrations(&client, "migrations").await?;

    Ok(pool)
}

/// Applies all SQL migrations from the given directory to the provided
/// database client.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .context("Failed to read migrations directory")?;

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
        info!("Applying migration: {}", file_name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read migration file {}", file_name))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {}", file_name))?;
    }
    Ok(())
}
