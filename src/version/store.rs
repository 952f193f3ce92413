//! SQLite snapshot of the update cache
//!
//! Lets short-lived CLI invocations share check results. The in-memory
//! [`UpdateCache`](crate::version::cache::UpdateCache) stays authoritative; this is
//! only written through and read once at startup.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use rusqlite::{Connection, Row};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::version::error::StoreError;
use crate::version::resolver::VersionInfo;

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: source_url column
    &["ALTER TABLE version_info ADD COLUMN source_url TEXT"],
];

/// Persistence behind the update cache
#[cfg_attr(test, automock)]
pub trait VersionStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<VersionInfo>, StoreError>;

    /// Insert or replace the entry for `info.image`
    fn save(&self, info: &VersionInfo) -> Result<(), StoreError>;

    fn delete(&self, images: &[String]) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        info!("Initializing version store at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        Ok(store)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        // Base table; later columns come from MIGRATIONS
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS version_info (
                image TEXT PRIMARY KEY,
                current_version TEXT,
                latest_version TEXT,
                current_digest TEXT,
                latest_digest TEXT,
                update_available INTEGER NOT NULL DEFAULT 0,
                checked_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        Self::apply_migrations(&conn)?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    match conn.execute(sql, []) {
                        Ok(_) => {}
                        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                            if msg.contains("duplicate column name") =>
                        {
                            debug!("Column already exists, skipping: {}", sql);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<VersionInfo> {
        let checked_at: i64 = row.get("checked_at")?;
        Ok(VersionInfo {
            image: row.get("image")?,
            current_version: row.get("current_version")?,
            latest_version: row.get("latest_version")?,
            current_digest: row.get("current_digest")?,
            latest_digest: row.get("latest_digest")?,
            update_available: row.get("update_available")?,
            source_url: row.get("source_url")?,
            checked_at: DateTime::from_timestamp_millis(checked_at).unwrap_or_default(),
        })
    }
}

impl VersionStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<VersionInfo>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT image, current_version, latest_version, current_digest, latest_digest,
                   update_available, source_url, checked_at
            FROM version_info
            ORDER BY image
            "#,
        )?;

        let entries = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn save(&self, info: &VersionInfo) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO version_info (
                image, current_version, latest_version, current_digest, latest_digest,
                update_available, source_url, checked_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(image) DO UPDATE SET
                current_version = excluded.current_version,
                latest_version = excluded.latest_version,
                current_digest = excluded.current_digest,
                latest_digest = excluded.latest_digest,
                update_available = excluded.update_available,
                source_url = excluded.source_url,
                checked_at = excluded.checked_at
            "#,
            (
                &info.image,
                &info.current_version,
                &info.latest_version,
                &info.current_digest,
                &info.latest_digest,
                info.update_available,
                &info.source_url,
                info.checked_at.timestamp_millis(),
            ),
        )?;
        Ok(())
    }

    fn delete(&self, images: &[String]) -> Result<(), StoreError> {
        if images.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM version_info WHERE image = ?1")?;
            for image in images {
                stmt.execute([image])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM version_info", [])?;
        debug!("Cleared {} stored entries", removed);
        Ok(())
    }
}
