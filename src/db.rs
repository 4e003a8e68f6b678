use crate::models::{ExtractionResult, JobRecord};
use crate::snapshot::SnapshotCache;
use crate::store::{StateStore, StoreError};
use chrono::Utc;
use log::error;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed job state, episode results and snapshots.
///
/// One connection behind a mutex; every write is a single upsert statement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    log::info!("Creating tables if not exists...");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS job_state (
            key TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS episode_results (
            url TEXT PRIMARY KEY,
            result TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS snapshots (
            episode_url TEXT PRIMARY KEY,
            embed_url TEXT NOT NULL,
            observed_at TEXT NOT NULL
        );
        "#,
    )?;
    log::info!("Tables ensured.");
    Ok(())
}

impl StateStore for SqliteStore {
    fn get_job_state(&self, key: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT record FROM job_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put_job_state(&self, key: &str, record: &JobRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO job_state (key, record, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_episode_result(&self, url: &str) -> Result<Option<ExtractionResult>, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT result FROM episode_results WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put_episode_result(&self, url: &str, result: &ExtractionResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO episode_results (url, result, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(url) DO UPDATE SET
                result = excluded.result,
                updated_at = excluded.updated_at
            "#,
            params![url, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl SnapshotCache for SqliteStore {
    fn get(&self, episode_url: &str) -> Option<String> {
        let lookup = self.conn().and_then(|conn| {
            conn.query_row(
                "SELECT embed_url FROM snapshots WHERE episode_url = ?1",
                params![episode_url],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        });
        match lookup {
            Ok(found) => found,
            Err(e) => {
                error!("Snapshot lookup failed for {}: {}", episode_url, e);
                None
            }
        }
    }

    fn put(&self, episode_url: &str, embed_url: &str) {
        let write = self.conn().and_then(|conn| {
            conn.execute(
                r#"
                INSERT INTO snapshots (episode_url, embed_url, observed_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(episode_url) DO UPDATE SET
                    embed_url = excluded.embed_url,
                    observed_at = excluded.observed_at
                "#,
                params![episode_url, embed_url, Utc::now().to_rfc3339()],
            )
            .map_err(StoreError::from)
        });
        if let Err(e) = write {
            error!("Snapshot write failed for {}: {}", episode_url, e);
        }
    }
}
