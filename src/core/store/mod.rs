mod events;
mod jobs;
mod plans;
mod tokens;
pub mod types;

pub use plans::NewPlan;

use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::EngineConfig;

/// SQLite-backed persistence for plans, jobs, device results, approval
/// tokens, and the audit event stream. All mutations that gate execution
/// (the per-plan job lease, the token used flag) are single conditional
/// UPDATEs so concurrent engine instances cannot both win.
pub struct EngineStore {
    db: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl EngineStore {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir).await?;
        }

        let db_path = data_dir.join("convoy.db");
        let db = Connection::open(&db_path)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS plans (
                plan_id TEXT PRIMARY KEY,
                operation TEXT NOT NULL,
                status TEXT NOT NULL,
                created_by TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                device_ids TEXT NOT NULL,
                change_spec TEXT NOT NULL,
                preview TEXT NOT NULL,
                continue_on_failure INTEGER NOT NULL DEFAULT 0,
                approved_by TEXT,
                approved_at TEXT,
                running_job_id TEXT,
                last_job_id TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                summary TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS device_results (
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                before_json TEXT,
                after_json TEXT,
                error TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                retries INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (job_id, position)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS approval_tokens (
                token_id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                plan_id TEXT NOT NULL,
                issued_by TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                correlation_id TEXT NOT NULL,
                plan_id TEXT,
                job_id TEXT,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS engine_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                config_json TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        info!(path = %db_path.display(), "engine store ready");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn set_engine_config(&self, config: &EngineConfig) -> Result<()> {
        let db = self.db.lock().await;
        let json = serde_json::to_string(config)?;
        db.execute(
            "INSERT OR REPLACE INTO engine_config (id, config_json, updated_at) VALUES (1, ?1, CURRENT_TIMESTAMP)",
            rusqlite::params![json],
        )?;
        Ok(())
    }

    pub async fn get_engine_config(&self) -> Result<Option<EngineConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT config_json FROM engine_config WHERE id = 1 LIMIT 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&json)?))
        } else {
            Ok(None)
        }
    }
}
