//! Schema bootstrap for the PostgreSQL store.
//!
//! `db.bootstrap_path` holds one folder per [`Stage`]. Each folder contains
//! idempotent scripts named `NNN_description.sql`; they run ordered by stage,
//! then by number, inside a single transaction so a failed start never leaves
//! half a schema behind.

use std::fs;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use shared::config::server::DatabaseConfig;

/// Tables the chat stores read and write. Readiness requires all of them.
pub const CHAT_TABLES: [&str; 4] = ["users", "chats", "chat_participants", "messages"];

/// Bootstrap phases, applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Tables and constraints.
    Schema,
    /// Lookup indexes for chat listing, history and user search.
    Indexes,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Schema, Stage::Indexes];

    #[must_use]
    pub fn folder(self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Indexes => "indexes",
        }
    }
}

/// One script queued for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub stage: Stage,
    pub sequence: u32,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database bootstrap directory does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("bootstrap stage '{}' missing at {}", .stage.folder(), .path.display())]
    MissingStage { stage: Stage, path: PathBuf },
    #[error("bootstrap script {} must be named NNN_description.sql", .0.display())]
    Unnumbered(PathBuf),
    #[error("bootstrap scripts {} and {} share a sequence number", .first.display(), .second.display())]
    DuplicateSequence { first: PathBuf, second: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error in {}: {source}", .path.display())]
    Sql {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema incomplete, missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),
}

/// Apply every bootstrap script, all or nothing.
pub async fn run(pool: &PgPool, config: &DatabaseConfig) -> Result<(), BootstrapError> {
    let scripts = plan(&config.bootstrap_path)?;
    info!(
        path = %config.bootstrap_path.display(),
        scripts = scripts.len(),
        "running database bootstrap"
    );

    let mut transaction = pool.begin().await?;
    for script in &scripts {
        let sql = fs::read_to_string(&script.path).map_err(|source| BootstrapError::Io {
            path: script.path.clone(),
            source,
        })?;
        if sql.trim().is_empty() {
            warn!(script = %script.path.display(), "skipping empty bootstrap script");
            continue;
        }

        debug!(stage = script.stage.folder(), script = %script.path.display(), "applying");
        sqlx::raw_sql(&sql)
            .execute(&mut *transaction)
            .await
            .map_err(|source| BootstrapError::Sql {
                path: script.path.clone(),
                source,
            })?;
    }
    transaction.commit().await?;
    Ok(())
}

/// Scripts under `root` in execution order.
pub fn plan(root: &Path) -> Result<Vec<Script>, BootstrapError> {
    if !root.is_dir() {
        return Err(BootstrapError::MissingRoot(root.to_path_buf()));
    }

    let mut scripts = Vec::new();
    for stage in Stage::ALL {
        let folder = root.join(stage.folder());
        if !folder.is_dir() {
            return Err(BootstrapError::MissingStage {
                stage,
                path: folder,
            });
        }
        let mut staged = stage_scripts(stage, &folder)?;
        if staged.is_empty() {
            debug!(stage = stage.folder(), "no scripts for stage");
        }
        scripts.append(&mut staged);
    }
    Ok(scripts)
}

fn stage_scripts(stage: Stage, folder: &Path) -> Result<Vec<Script>, BootstrapError> {
    let io_error = |source| BootstrapError::Io {
        path: folder.to_path_buf(),
        source,
    };

    let mut scripts = Vec::new();
    for entry in fs::read_dir(folder).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_sql = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"));
        if !is_sql {
            continue;
        }
        let sequence = sequence_of(&path).ok_or_else(|| BootstrapError::Unnumbered(path.clone()))?;
        scripts.push(Script {
            stage,
            sequence,
            path,
        });
    }

    scripts.sort_by_key(|script| script.sequence);
    if let Some(pair) = scripts
        .windows(2)
        .find(|pair| pair[0].sequence == pair[1].sequence)
    {
        return Err(BootstrapError::DuplicateSequence {
            first: pair[0].path.clone(),
            second: pair[1].path.clone(),
        });
    }
    Ok(scripts)
}

fn sequence_of(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (number, description) = stem.split_once('_')?;
    if description.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}

/// Startup check that the server can talk to PostgreSQL at all.
pub async fn ensure_liveness(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Ready once every table in [`CHAT_TABLES`] exists.
pub async fn ensure_readiness(pool: &PgPool) -> Result<(), BootstrapError> {
    let missing: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM unnest($1::text[]) AS name WHERE to_regclass(name) IS NULL",
    )
    .bind(&CHAT_TABLES[..])
    .fetch_all(pool)
    .await?;

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BootstrapError::MissingTables(missing))
    }
}
