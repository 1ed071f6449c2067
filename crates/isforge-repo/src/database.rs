//! SQLite metadata store of a repository
//!
//! A store is a plain SQLite file living next to the pool. It is only ever
//! opened from the local filesystem; remote stores are cached locally first.

use isforge_core::transport::local_path;
use rusqlite::{Connection, OpenFlags, Params, Row, Transaction};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};
use crate::schema::Generation;

/// An open metadata store
pub struct Database {
    path: PathBuf,
    conn: Connection,
    version: String,
    generation: Generation,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn local(location: &str) -> Result<PathBuf> {
    local_path(location).map_err(|_| RepoError::NotLocal {
        path: location.to_string(),
    })
}

impl Database {
    /// Create an empty store of the latest generation
    pub fn create(location: &str) -> Result<Self> {
        Self::create_generation(location, Generation::LATEST)
    }

    /// Create an empty store of a given generation
    pub fn create_generation(location: &str, generation: Generation) -> Result<Self> {
        let path = local(location)?;
        if path.exists() {
            return Err(RepoError::DatabaseExists {
                path: path.display().to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!("Creating database {} (version {})", path.display(), generation.version());
        let mut conn = Connection::open(&path)?;
        let tx = conn.transaction()?;
        generation.initialize(&tx)?;
        tx.commit()?;

        Ok(Self {
            path,
            conn,
            version: generation.version().to_string(),
            generation,
        })
    }

    /// Open an existing store
    ///
    /// Fails with [`RepoError::DatabaseTooNew`] when the store was written by
    /// a newer schema generation.
    pub fn open(location: &str) -> Result<Self> {
        let path = local(location)?;
        if !path.is_file() {
            return Err(RepoError::DatabaseNotFound {
                path: path.display().to_string(),
            });
        }

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        conn.query_row("SELECT count(*) FROM image", [], |row| row.get::<_, i64>(0))
            .map_err(|e| RepoError::Database {
                message: format!("{} is not a valid database: {}", path.display(), e),
            })?;

        let version = read_version(&conn)?;
        let generation = Generation::from_version(&version)?;
        tracing::debug!("Opened database {} (version {})", path.display(), version);

        Ok(Self {
            path,
            conn,
            version,
            generation,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded schema version
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a write; nothing is stored unless the transaction is committed
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Run a read query, shaping each row with `f`
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Schema version, `1` when the store predates the `repository` table
fn read_version(conn: &Connection) -> Result<String> {
    let has_table: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'repository'",
        [],
        |row| row.get(0),
    )?;
    if has_table == 0 {
        return Ok(Generation::V1.version().to_string());
    }

    let mut stmt = conn.prepare("SELECT version FROM repository LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(Generation::V1.version().to_string()),
    }
}
