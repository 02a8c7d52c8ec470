//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Encryption at rest is delegated to SQLCipher (`sqlcipher` feature). Plain
//! SQLite builds ignore the key.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default node database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/concord/concord.db`
    /// - macOS:   `~/Library/Application Support/org.concord.concord/concord.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\concord\concord\data\concord.db`
    pub fn new(db_key: &[u8; 32]) -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "concord", "concord").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Self::open_at(&data_dir.join("concord.db"), db_key)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path, db_key: &[u8; 32]) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;

        #[cfg(feature = "sqlcipher")]
        conn.pragma_update(None, "key", format!("x'{}'", hex::encode(db_key)))?;
        #[cfg(not(feature = "sqlcipher"))]
        let _ = db_key;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn)
    }

    /// Open a throwaway in-memory database (tests, ephemeral nodes).
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Wrap a decoding failure for column `idx` as a rusqlite conversion error.
pub(crate) fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Map "no rows" onto [`StoreError::NotFound`].
pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let key = [0xABu8; 32];

        let db = Database::open_at(&path, &key).expect("should open");
        assert!(db.path().is_some());

        // Reopening runs migrations again without error.
        drop(db);
        Database::open_at(&path, &key).expect("should reopen");
    }

    #[test]
    fn in_memory_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }
}
