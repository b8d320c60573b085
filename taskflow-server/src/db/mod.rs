//! Database layer.
//!
//! [`TaskStore`] defines the persistence interface; [`SqliteStore`] is the
//! sqlx/SQLite implementation. Trait methods use `impl Future` signatures
//! (stable since Rust 1.75) so no extra async-trait crate is needed.
//!
//! # Migrations
//!
//! `sqlx::migrate!("./migrations")` resolves at compile time relative to
//! `CARGO_MANIFEST_DIR` and embeds the migration files into the binary; the
//! database file location is purely a runtime concern.

pub mod tasks;

pub use tasks::{TaskFilter, TaskStore};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use taskflow_core::{ErrorCode, TaskError};

/// Pool and file options for [`SqliteStore::connect`].
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub path: PathBuf,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskflow.db"),
            max_open_conns: 25,
            max_idle_conns: 5,
            conn_max_lifetime: Duration::from_secs(300),
        }
    }
}

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The compare-and-set update matched no row: the task does not exist or
    /// its status is no longer the expected source status.
    #[error("task not found or status mismatch")]
    StatusConflict,

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StatusConflict => {
                TaskError::with_message(ErrorCode::InvalidState, "task not found or status mismatch")
            }
            StoreError::Db(db) => {
                if db
                    .as_database_error()
                    .is_some_and(|d| d.is_unique_violation())
                {
                    TaskError::with_detail(ErrorCode::AlreadyExists, db.to_string())
                } else {
                    TaskError::db(db.to_string())
                }
            }
        }
    }
}

/// SQLite-backed task store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file, apply pool limits and run pending
    /// migrations. The parent directory is created with mode 0755 if absent.
    pub async fn connect(opts: &DbOptions) -> Result<Self, sqlx::Error> {
        if let Some(dir) = opts.path.parent() {
            ensure_dir(dir).map_err(sqlx::Error::Io)?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(&opts.path)
            .create_if_missing(true)
            // SQLite enforces ON DELETE CASCADE only when the pragma is set,
            // and the pragma is per-connection.
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_open_conns)
            .min_connections(opts.max_idle_conns.min(opts.max_open_conns))
            .max_lifetime(opts.conn_max_lifetime)
            .connect_with(connect)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %opts.path.display(), "database ready");
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single pooled connection keeps the
    /// whole test on one SQLite memory instance.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
