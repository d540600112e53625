use chrono::Utc;
use rusqlite::Error::InvalidParameterName;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation, the caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check app data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check app data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// SQLite-backed key-value store holding the persisted token and offline queue.
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Lock the connection, turning a poisoned mutex into an error instead of a panic.
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock. \
                 Please restart the application to recover.",
                e
            ))
        })
    }

    pub fn new(db_path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: detect corruption before touching the schema
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_path_buf(),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open `file_name` inside `data_dir`. A corrupted file is renamed to
    /// `<file_name>.corrupted.<ts>` and a fresh database is created once.
    pub fn open_or_recover(data_dir: &Path, file_name: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(file_name);

        match Self::new(&db_path) {
            Ok(db) => Ok(db),
            Err(e) => {
                let err_str = e.to_string().to_lowercase();
                let is_corruption = err_str.contains("corruption")
                    || err_str.contains("integrity")
                    || err_str.contains("not a database");
                if !is_corruption || !db_path.exists() {
                    log_io_error_if_any("open", &e);
                    return Err(e.into());
                }
                let backup_path = data_dir.join(format!(
                    "{}.corrupted.{}",
                    file_name,
                    Utc::now().timestamp()
                ));
                std::fs::rename(&db_path, &backup_path).map_err(|rename_e| {
                    warn!(
                        "[DB] Failed to rename corrupted DB to {:?}: {}",
                        backup_path, rename_e
                    );
                    rename_e
                })?;
                info!(
                    "[DB] Corrupted DB backed up to {:?}, starting fresh",
                    backup_path
                );
                Ok(Self::new(&db_path)?)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(row.get(0)?));
        }
        Ok(None)
    }

    /// Single statement upsert; a failed write leaves the previous value in place.
    pub fn set_value(&self, key: &str, value: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, now],
        )
        .map_err(|e| {
            log_io_error_if_any("set_value", &e);
            e
        })?;
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| {
                log_io_error_if_any("remove_value", &e);
                e
            })?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_value(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Ok(self.set_value(key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        Ok(self.remove_value(key)?)
    }
}
