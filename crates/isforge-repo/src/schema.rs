//! Metadata schema generations
//!
//! Generation 1 stores images and payloads only. Generation 2 adds the
//! engine/format columns on images and a single `repository` row holding the
//! repository UUID, the schema version and the message of the day. The
//! generation is read once when the database is opened and every
//! generation-specific query goes through [`Generation`].

use rusqlite::{Connection, Row, params};

use crate::error::{RepoError, Result};

/// Metadata row of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub hash: String,
    pub name: String,
    pub version: String,
    pub date: i64,
    pub author: String,
    pub description: String,
    pub size: u64,
    /// Generation 2 only
    pub is_min_version: Option<String>,
    /// Generation 2 only
    pub format: Option<String>,
}

/// Metadata row of one payload of one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRecord {
    pub hash: String,
    pub image_hash: String,
    pub name: String,
    pub isdir: bool,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub mtime: i64,
}

const V1_SCHEMA: &str = r#"
CREATE TABLE image (
    hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    date INTEGER NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL,
    UNIQUE(name, version)
);

CREATE TABLE payload (
    hash TEXT NOT NULL,
    image_hash TEXT NOT NULL REFERENCES image(hash),
    name TEXT NOT NULL,
    isdir INTEGER NOT NULL,
    size INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    PRIMARY KEY(hash, image_hash)
);

CREATE INDEX idx_payload_image ON payload(image_hash);
"#;

const V2_SCHEMA: &str = r#"
CREATE TABLE image (
    hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    date INTEGER NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL,
    is_min_version TEXT NOT NULL,
    format TEXT NOT NULL,
    UNIQUE(name, version)
);

CREATE TABLE payload (
    hash TEXT NOT NULL,
    image_hash TEXT NOT NULL REFERENCES image(hash),
    name TEXT NOT NULL,
    isdir INTEGER NOT NULL,
    size INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    PRIMARY KEY(hash, image_hash)
);

CREATE INDEX idx_payload_image ON payload(image_hash);

CREATE TABLE repository (
    uuid TEXT NOT NULL,
    version TEXT NOT NULL,
    motd TEXT NOT NULL DEFAULT ''
);
"#;

const PAYLOAD_COLUMNS: &str = "hash, image_hash, name, isdir, size, uid, gid, mode, mtime";

/// Schema generation of a metadata database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Generation {
    V1,
    V2,
}

impl Generation {
    pub const LATEST: Generation = Generation::V2;

    /// Pick the generation of a recorded schema version such as `2.0`
    pub fn from_version(version: &str) -> Result<Self> {
        let major = version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u64>().ok())
            .ok_or_else(|| RepoError::Database {
                message: format!("invalid database version '{}'", version),
            })?;
        match major {
            1 => Ok(Generation::V1),
            2 => Ok(Generation::V2),
            m if m > Self::LATEST.major() => Err(RepoError::DatabaseTooNew {
                version: version.to_string(),
                supported: Self::LATEST.version().to_string(),
            }),
            _ => Err(RepoError::Database {
                message: format!("unknown database version '{}'", version),
            }),
        }
    }

    pub fn major(&self) -> u64 {
        match self {
            Generation::V1 => 1,
            Generation::V2 => 2,
        }
    }

    /// Version string recorded by this generation
    pub fn version(&self) -> &'static str {
        match self {
            Generation::V1 => "1.0",
            Generation::V2 => "2.0",
        }
    }

    pub fn schema(&self) -> &'static str {
        match self {
            Generation::V1 => V1_SCHEMA,
            Generation::V2 => V2_SCHEMA,
        }
    }

    /// Whether the `repository` row (UUID, motd) exists
    pub fn has_repository_row(&self) -> bool {
        *self >= Generation::V2
    }

    fn image_columns(&self) -> &'static str {
        match self {
            Generation::V1 => "hash, name, version, date, author, description, size",
            Generation::V2 => {
                "hash, name, version, date, author, description, size, is_min_version, format"
            }
        }
    }

    fn image_from_row(&self, row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
        let (is_min_version, format) = match self {
            Generation::V1 => (None, None),
            Generation::V2 => (Some(row.get(7)?), Some(row.get(8)?)),
        };
        Ok(ImageRecord {
            hash: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            date: row.get(3)?,
            author: row.get(4)?,
            description: row.get(5)?,
            size: row.get::<_, i64>(6)? as u64,
            is_min_version,
            format,
        })
    }

    /// Images matching an optional `WHERE` clause
    pub fn select_images(
        &self,
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ImageRecord>> {
        let sql = format!("SELECT {} FROM image {} ORDER BY name, date", self.image_columns(), filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| self.image_from_row(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_image(&self, conn: &Connection, image: &ImageRecord) -> Result<()> {
        match self {
            Generation::V1 => {
                conn.execute(
                    "INSERT INTO image (hash, name, version, date, author, description, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        image.hash,
                        image.name,
                        image.version,
                        image.date,
                        image.author,
                        image.description,
                        image.size as i64,
                    ],
                )?;
            }
            Generation::V2 => {
                conn.execute(
                    "INSERT INTO image (hash, name, version, date, author, description, size,
                                        is_min_version, format)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        image.hash,
                        image.name,
                        image.version,
                        image.date,
                        image.author,
                        image.description,
                        image.size as i64,
                        image.is_min_version.as_deref().unwrap_or_default(),
                        image.format.as_deref().unwrap_or_default(),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Payload rows matching an optional `WHERE` clause
    pub fn select_payloads(
        &self,
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PayloadRecord>> {
        let sql = format!("SELECT {} FROM payload {} ORDER BY hash, name", PAYLOAD_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(PayloadRecord {
                hash: row.get(0)?,
                image_hash: row.get(1)?,
                name: row.get(2)?,
                isdir: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                uid: row.get(5)?,
                gid: row.get(6)?,
                mode: row.get(7)?,
                mtime: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_payload(&self, conn: &Connection, payload: &PayloadRecord) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO payload ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                PAYLOAD_COLUMNS
            ),
            params![
                payload.hash,
                payload.image_hash,
                payload.name,
                payload.isdir,
                payload.size as i64,
                payload.uid,
                payload.gid,
                payload.mode,
                payload.mtime,
            ],
        )?;
        Ok(())
    }

    /// Repository UUID; generation 1 has none
    pub fn uuid(&self, conn: &Connection) -> Result<Option<String>> {
        if !self.has_repository_row() {
            return Ok(None);
        }
        let uuid = conn.query_row("SELECT uuid FROM repository LIMIT 1", [], |row| row.get(0))?;
        Ok(Some(uuid))
    }

    /// Message of the day; generation 1 has none
    pub fn motd(&self, conn: &Connection) -> Result<Option<String>> {
        if !self.has_repository_row() {
            return Ok(None);
        }
        let motd = conn.query_row("SELECT motd FROM repository LIMIT 1", [], |row| row.get(0))?;
        Ok(Some(motd))
    }

    pub fn set_motd(&self, conn: &Connection, motd: &str) -> Result<()> {
        if !self.has_repository_row() {
            return Err(RepoError::Unsupported {
                feature: "message of the day".to_string(),
                version: self.version().to_string(),
            });
        }
        conn.execute("UPDATE repository SET motd = ?1", params![motd])?;
        Ok(())
    }

    /// Create the schema on an empty database, with a fresh UUID when supported
    pub fn initialize(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(self.schema())?;
        if self.has_repository_row() {
            let uuid = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO repository (uuid, version, motd) VALUES (?1, ?2, '')",
                params![uuid, self.version()],
            )?;
        }
        Ok(())
    }
}
