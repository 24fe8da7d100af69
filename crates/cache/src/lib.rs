use derive_more::{Display, Error, From};
use miette::Diagnostic;
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

/// Error of cache operations.
///
/// Write failures are logged and swallowed by callers; a miss is always
/// recoverable by recomputation.
#[derive(Debug, Display, Error, Diagnostic, From)]
#[non_exhaustive]
pub enum CacheError {
    #[diagnostic(code(modcdn_cache::sqlite_error))]
    Sqlite(#[error(source)] rusqlite::Error),
}

/// Durable key/value store of transformed artifacts.
///
/// Keys are canonical URL paths, `!!cdnv:` suffix included, so a build bump
/// orphans every stale entry without an explicit sweep. Values are the raw
/// transformed source bytes. No TTL.
#[derive(Debug, Clone)]
pub struct Cache {
    conn: Arc<Mutex<Connection>>,
}

impl Cache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS artifact (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Cache { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Point lookup by canonical URL path.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("cache mutex shouldn't be poisoned");
            conn.query_row("SELECT value FROM artifact WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(CacheError::from)
        })
        .await
        .expect("cache lookup task shouldn't panic")
    }

    /// Upsert, last writer wins.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("cache mutex shouldn't be poisoned");
            conn.execute(
                "INSERT INTO artifact (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(drop)
            .map_err(CacheError::from)
        })
        .await
        .expect("cache store task shouldn't panic")
    }
}
