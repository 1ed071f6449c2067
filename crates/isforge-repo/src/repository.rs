//! A repository: metadata store plus content-addressed pool
//!
//! Pool files are named by the SHA-256 of their content. Metadata rows are
//! written in one transaction after every copied file has been verified, and
//! pool files are only removed once no committed row references them.

use chrono::Utc;
use glob::Pattern;
use isforge_core::CoreError;
use isforge_core::hash::{ContentHash, hash_file, is_hash_name};
use isforge_core::image::{PackageImage, PayloadLocation};
use isforge_core::payload::{Payload, build_record_file_name};
use isforge_core::transport::{Transport, is_local, join_location, local_path};
use isforge_core::version::compare_versions;
use rusqlite::params;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{LAST_FILE, RepositoryConfig};
use crate::database::Database;
use crate::error::{RepoError, Result};
use crate::schema::{Generation, ImageRecord, PayloadRecord};

/// Problems found by [`Repository::check`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Hashes referenced by metadata without a pool file
    pub missing: Vec<String>,
    /// Pool files no metadata row references
    pub unreferenced: Vec<String>,
    /// Pool files whose content no longer matches their name
    pub corrupted: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unreferenced.is_empty() && self.corrupted.is_empty()
    }
}

/// A payload hash with every image referencing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadUsage {
    pub hash: String,
    pub size: u64,
    pub isdir: bool,
    /// `name:version` of each referencing image
    pub images: BTreeSet<String>,
}

/// Pool files created by an unfinished add, removed unless the add succeeds
#[derive(Default)]
struct CreatedFiles(Vec<PathBuf>);

impl CreatedFiles {
    fn commit(mut self) {
        self.0.clear();
    }
}

impl Drop for CreatedFiles {
    fn drop(&mut self) {
        for path in self.0.drain(..) {
            if std::fs::remove_file(&path).is_ok() {
                tracing::debug!("Removed {}", path.display());
            }
        }
    }
}

/// A registered repository, online when its metadata store is open
pub struct Repository {
    config: RepositoryConfig,
    db: Option<Database>,
    generation: Generation,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.config.name)
            .field("path", &self.config.path)
            .field("online", &self.is_online())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Repository {
    pub fn online(config: RepositoryConfig, db: Database, transport: Arc<dyn Transport>) -> Self {
        Self {
            generation: db.generation(),
            config,
            db: Some(db),
            transport,
        }
    }

    pub fn offline(mut config: RepositoryConfig, transport: Arc<dyn Transport>) -> Self {
        config.offline = true;
        Self {
            config,
            db: None,
            generation: Generation::LATEST,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.db.is_some()
    }

    pub fn is_local(&self) -> bool {
        is_local(&self.config.path)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Recorded schema version, when online
    pub fn version(&self) -> Option<&str> {
        self.db.as_ref().map(Database::version)
    }

    /// Close the store; every online-only operation fails afterwards
    pub fn set_offline(&mut self) {
        self.db = None;
        self.config.offline = true;
        self.generation = Generation::LATEST;
    }

    fn db(&self) -> Result<&Database> {
        self.db.as_ref().ok_or_else(|| self.offline_error())
    }

    fn db_mut(&mut self) -> Result<&mut Database> {
        let name = self.config.name.clone();
        self.db.as_mut().ok_or(RepoError::Offline { name })
    }

    fn offline_error(&self) -> RepoError {
        RepoError::Offline {
            name: self.config.name.clone(),
        }
    }

    fn pool_dir(&self) -> Result<PathBuf> {
        self.config.pool_dir()
    }

    fn pool_location(&self, hash: &str) -> String {
        join_location(&self.config.path, hash)
    }

    // ============ Lifecycle ============

    /// Create the pool directory, an empty store and the marker file
    pub fn init(&mut self) -> Result<()> {
        let pool = self.pool_dir()?;
        if !pool.is_dir() {
            std::fs::create_dir_all(&pool)?;
            self.apply_attributes(&pool, true)?;
        }

        let db = Database::create(&self.config.db_location())?;
        self.apply_attributes(db.path(), false)?;
        tracing::info!("Initialized repository {} at {}", self.name(), pool.display());

        self.generation = db.generation();
        self.db = Some(db);
        self.config.offline = false;
        self.update_last()
    }

    /// Rewrite the staleness marker with the current time
    pub fn update_last(&self) -> Result<()> {
        let path = local_path(&self.config.last_location()).map_err(|_| RepoError::NotLocal {
            path: self.config.last_location(),
        })?;
        std::fs::write(&path, format!("{}\n", Utc::now().timestamp()))?;
        self.apply_attributes(&path, false)
    }

    /// Read the staleness marker, local or remote
    pub fn last(&self) -> Result<i64> {
        read_marker(self.transport.as_ref(), &self.config.last_location())
    }

    /// Apply the configured owner and mode to something this repository created
    fn apply_attributes(&self, path: &Path, is_dir: bool) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = if is_dir { self.config.dmod } else { self.config.fmod };
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
            if (self.config.uid.is_some() || self.config.gid.is_some())
                && let Err(e) = std::os::unix::fs::chown(path, self.config.uid, self.config.gid)
            {
                tracing::warn!("Unable to change owner of {}: {}", path.display(), e);
            }
        }
        #[cfg(not(unix))]
        let _ = (path, is_dir);
        Ok(())
    }

    // ============ Repository row ============

    /// Repository UUID; `None` for generation 1 stores
    pub fn uuid(&self) -> Result<Option<String>> {
        let db = self.db()?;
        self.generation.uuid(db.connection())
    }

    pub fn motd(&self) -> Result<Option<String>> {
        let db = self.db()?;
        self.generation.motd(db.connection())
    }

    pub fn set_motd(&mut self, motd: &str) -> Result<()> {
        let generation = self.generation;
        let db = self.db_mut()?;
        generation.set_motd(db.connection(), motd)?;
        self.update_last()
    }

    // ============ Queries ============

    pub fn images(&self) -> Result<Vec<ImageRecord>> {
        let db = self.db()?;
        self.generation.select_images(db.connection(), "", &[])
    }

    /// Payloads grouped by hash with the images referencing each
    pub fn payloads(&self) -> Result<Vec<PayloadUsage>> {
        let db = self.db()?;
        let rows = db.query(
            "SELECT p.hash, p.size, p.isdir, i.name, i.version
             FROM payload p JOIN image i ON i.hash = p.image_hash
             ORDER BY p.hash",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, bool>(2)?,
                    format!("{}:{}", row.get::<_, String>(3)?, row.get::<_, String>(4)?),
                ))
            },
        )?;

        let mut grouped: BTreeMap<String, PayloadUsage> = BTreeMap::new();
        for (hash, size, isdir, image) in rows {
            grouped
                .entry(hash.clone())
                .or_insert_with(|| PayloadUsage {
                    hash,
                    size,
                    isdir,
                    images: BTreeSet::new(),
                })
                .images
                .insert(image);
        }
        Ok(grouped.into_values().collect())
    }

    /// Payload rows of one image
    pub fn image_payloads(&self, image_hash: &str) -> Result<Vec<PayloadRecord>> {
        let db = self.db()?;
        self.generation
            .select_payloads(db.connection(), "WHERE image_hash = ?1", &[&image_hash])
    }

    pub fn has(&self, name: &str, version: &str) -> Result<bool> {
        let db = self.db()?;
        let images = self.generation.select_images(
            db.connection(),
            "WHERE name = ?1 AND version = ?2",
            &[&name, &version],
        )?;
        Ok(!images.is_empty())
    }

    /// Metadata of `name` at `version`, or at its latest version
    pub fn image(&self, name: &str, version: Option<&str>) -> Result<ImageRecord> {
        let db = self.db()?;
        let candidates =
            self.generation
                .select_images(db.connection(), "WHERE name = ?1", &[&name])?;

        let found = match version {
            Some(version) => candidates.into_iter().find(|i| i.version == version),
            None => candidates
                .into_iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version)),
        };
        found.ok_or_else(|| RepoError::ImageNotFound {
            name: match version {
                Some(v) => format!("{}:{}", name, v),
                None => name.to_string(),
            },
            repo: self.name().to_string(),
        })
    }

    /// Open a stored image, verifying it against its recorded hash
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<PackageImage> {
        let record = self.image(name, version)?;
        let expected = ContentHash {
            size: record.size,
            hash: record.hash.clone(),
        };
        PackageImage::open(
            Arc::clone(&self.transport),
            &self.pool_location(&record.hash),
            Some(&expected),
            PayloadLocation::Pool(self.config.path.clone()),
        )
        .map_err(|e| match e {
            CoreError::ChecksumMismatch { .. } | CoreError::SizeMismatch { .. } => {
                tracing::error!("{}", e);
                RepoError::ImageCorrupted {
                    hash: record.hash.clone(),
                    repo: self.name().to_string(),
                }
            }
            e => e.into(),
        })
    }

    /// Images whose name matches a glob, or contains the text when it has no wildcard
    pub fn search(&self, pattern: &str) -> Result<Vec<ImageRecord>> {
        let glob = if pattern.contains(['*', '?', '[']) {
            Pattern::new(pattern)?
        } else {
            Pattern::new(&format!("*{}*", Pattern::escape(pattern)))?
        };
        Ok(self
            .images()?
            .into_iter()
            .filter(|i| glob.matches(&i.name) || glob.matches(&i.description))
            .collect())
    }

    // ============ Mutations ============

    /// Store an image and its payloads
    ///
    /// Files are copied by content hash, reusing what the pool already has,
    /// verified, and only then recorded. `delete_source` removes the local
    /// source files once everything is committed.
    pub fn add(&mut self, image: &PackageImage, delete_source: bool) -> Result<()> {
        self.db()?;
        let pool = self.pool_dir()?;
        if self.has(image.name(), image.version())? {
            return Err(RepoError::ImageExists {
                name: image.name().to_string(),
                version: image.version().to_string(),
                repo: self.name().to_string(),
            });
        }

        for payload in image.payloads() {
            payload.check()?;
        }

        let mut created = CreatedFiles::default();
        self.store(image.location(), image.content(), &pool, &mut created)?;
        for payload in image.payloads() {
            let content = ContentHash {
                size: payload.size()?,
                hash: payload.hash()?.to_string(),
            };
            self.store(payload.location(), &content, &pool, &mut created)?;
        }

        // Re-read what landed in the pool before it becomes metadata
        let stored = PackageImage::open(
            Arc::clone(&self.transport),
            &pool.join(image.hash()).display().to_string(),
            Some(image.content()),
            PayloadLocation::Pool(pool.display().to_string()),
        )?;
        for payload in stored.payloads() {
            payload.check()?;
        }

        self.record(&stored)?;
        created.commit();
        self.update_last()?;
        tracing::info!("Added {}:{} to {}", image.name(), image.version(), self.name());

        if delete_source {
            remove_source(image.location());
            for payload in image.payloads() {
                remove_payload_source(image.name(), payload);
            }
        }
        Ok(())
    }

    /// Copy `location` into the pool under its hash unless already present
    fn store(
        &self,
        location: &str,
        expected: &ContentHash,
        pool: &Path,
        created: &mut CreatedFiles,
    ) -> Result<()> {
        let target = pool.join(&expected.hash);
        if target.exists() {
            tracing::debug!("{} already in pool", expected.hash);
            return Ok(());
        }

        let part = pool.join(format!("{}.part", expected.hash));
        created.0.push(part.clone());
        let mut stream = self.transport.open(location)?;
        let mut file = std::fs::File::create(&part)?;
        let actual = stream.consume(&mut file)?;
        file.flush()?;
        drop(file);
        isforge_core::payload::verify(location, expected, &actual)?;

        std::fs::rename(&part, &target)?;
        created.0.push(target.clone());
        self.apply_attributes(&target, false)
    }

    /// Insert image and payload rows in one transaction
    fn record(&mut self, image: &PackageImage) -> Result<()> {
        let generation = self.generation;
        let description = image.description();
        let record = ImageRecord {
            hash: image.hash().to_string(),
            name: description.name.clone(),
            version: description.version.clone(),
            date: description.date,
            author: description.author.clone(),
            description: description.description.clone(),
            size: image.size(),
            is_min_version: Some(description.is_min_version.clone()),
            format: Some(image.format().to_string()),
        };

        let db = self.db_mut()?;
        let tx = db.transaction()?;
        generation.insert_image(&tx, &record)?;
        for (name, payload) in &description.payload {
            generation.insert_payload(
                &tx,
                &PayloadRecord {
                    hash: payload.hash.clone(),
                    image_hash: record.hash.clone(),
                    name: name.clone(),
                    isdir: payload.isdir,
                    size: payload.size,
                    uid: payload.uid,
                    gid: payload.gid,
                    mode: payload.mode,
                    mtime: payload.mtime,
                },
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove an image and the pool files nothing references anymore
    pub fn delete(&mut self, name: &str, version: &str, keep_payloads: bool) -> Result<()> {
        let pool = self.pool_dir()?;
        let record = self.image(name, Some(version))?;
        let payloads = self.image_payloads(&record.hash)?;

        {
            let db = self.db_mut()?;
            let tx = db.transaction()?;
            tx.execute("DELETE FROM payload WHERE image_hash = ?1", params![record.hash])?;
            tx.execute("DELETE FROM image WHERE hash = ?1", params![record.hash])?;
            tx.commit()?;
        }
        tracing::info!("Deleted {}:{} from {}", name, version, self.name());

        let mut candidates = vec![record.hash];
        if !keep_payloads {
            candidates.extend(payloads.into_iter().map(|p| p.hash));
        }
        for hash in candidates {
            if self.is_referenced(&hash)? {
                tracing::debug!("Keeping {}, still referenced", hash);
                continue;
            }
            match std::fs::remove_file(pool.join(&hash)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.update_last()
    }

    fn is_referenced(&self, hash: &str) -> Result<bool> {
        let db = self.db()?;
        let count = db.query(
            "SELECT (SELECT count(*) FROM image WHERE hash = ?1)
                  + (SELECT count(*) FROM payload WHERE hash = ?1)",
            params![hash],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count.first().copied().unwrap_or(0) > 0)
    }

    fn referenced_hashes(&self) -> Result<BTreeSet<String>> {
        let db = self.db()?;
        let hashes = db.query(
            "SELECT hash FROM image UNION SELECT hash FROM payload",
            [],
            |row| row.get::<_, String>(0),
        )?;
        Ok(hashes.into_iter().collect())
    }

    /// Files of the pool directory that are not bookkeeping files
    fn pool_files(&self, pool: &Path) -> Result<Vec<String>> {
        let db_name = Path::new(&self.config.db_location())
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let last_name = Path::new(&self.config.last_location())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| LAST_FILE.to_string());

        let mut files = Vec::new();
        for entry in std::fs::read_dir(pool)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let is_db_file = db_name
                .as_deref()
                .is_some_and(|db| name == db || name.starts_with(&format!("{}-", db)));
            if is_db_file || name == last_name || name.ends_with(".part") {
                continue;
            }
            files.push(name);
        }
        files.sort();
        Ok(files)
    }

    /// Report missing, unreferenced and corrupted pool files
    pub fn check(&self) -> Result<CheckReport> {
        let pool = self.pool_dir()?;
        let referenced = self.referenced_hashes()?;
        let files = self.pool_files(&pool)?;
        let on_disk: BTreeSet<&str> = files.iter().map(String::as_str).collect();

        let mut report = CheckReport {
            missing: referenced
                .iter()
                .filter(|h| !on_disk.contains(h.as_str()))
                .cloned()
                .collect(),
            ..Default::default()
        };

        for name in &files {
            if !referenced.contains(name) {
                report.unreferenced.push(name.clone());
            }
            if is_hash_name(name) {
                let actual = hash_file(&pool.join(name))?;
                if &actual.hash != name {
                    tracing::warn!("Pool file {} is corrupted", name);
                    report.corrupted.push(name.clone());
                }
            }
        }
        Ok(report)
    }

    /// Delete unreferenced pool files
    ///
    /// Without `force`, `confirm` sees the list first and may refuse.
    /// Returns the removed file names.
    pub fn clean<F>(&self, force: bool, confirm: F) -> Result<Vec<String>>
    where
        F: FnOnce(&[String]) -> bool,
    {
        let pool = self.pool_dir()?;
        let report = self.check()?;
        if report.unreferenced.is_empty() || (!force && !confirm(&report.unreferenced)) {
            return Ok(Vec::new());
        }
        for name in &report.unreferenced {
            tracing::info!("Removing unreferenced {}", name);
            std::fs::remove_file(pool.join(name))?;
        }
        Ok(report.unreferenced)
    }
}

/// Read an integer marker file through a transport
pub fn read_marker(transport: &dyn Transport, location: &str) -> Result<i64> {
    let mut stream = transport.open(location)?;
    let mut content = String::new();
    stream.read_to_string(&mut content)?;
    content.trim().parse().map_err(|_| RepoError::InvalidMarker {
        location: location.to_string(),
        content: content.trim().to_string(),
    })
}

fn remove_source(location: &str) {
    if !is_local(location) {
        return;
    }
    if let Ok(path) = local_path(location)
        && let Err(e) = std::fs::remove_file(&path)
    {
        tracing::warn!("Unable to remove {}: {}", path.display(), e);
    }
}

/// Remove a payload source, and the content file behind it once no other link uses it
///
/// Build trees keep payloads as `{hash}.isdata` files reached through links.
/// The link recording the last build of the payload goes with the content file.
fn remove_payload_source(image: &str, payload: &Payload) {
    let Ok(link) = local_path(payload.location()) else {
        return;
    };
    let dir = link.parent().map(Path::to_path_buf).unwrap_or_default();
    let target = std::fs::symlink_metadata(&link)
        .ok()
        .filter(|meta| meta.file_type().is_symlink())
        .and_then(|_| std::fs::read_link(&link).ok())
        .map(|target| dir.join(target));

    remove_source(payload.location());
    let Some(target) = target else {
        return;
    };

    let record = dir.join(build_record_file_name(image, &payload.name, payload.compressor));
    let users = match links_to(&dir, &target) {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!("Unable to scan {}: {}", dir.display(), e);
            return;
        }
    };
    if users.iter().any(|user| user != &record) {
        tracing::debug!("Keeping {}, still linked", target.display());
        return;
    }
    for path in users.iter().chain(std::iter::once(&target)) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Unable to remove {}: {}", path.display(), e);
        }
    }
}

/// Links of `dir` resolving to `target`
fn links_to(dir: &Path, target: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut links = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_symlink() && dir.join(std::fs::read_link(entry.path())?) == target {
            links.push(entry.path());
        }
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isforge_core::transport::DefaultTransport;
    use tempfile::TempDir;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(DefaultTransport::default())
    }

    fn new_repo(temp: &TempDir) -> Repository {
        let config = RepositoryConfig::new("main", temp.path().join("main").display().to_string());
        let mut repo = Repository::offline(config, transport());
        repo.init().unwrap();
        repo
    }

    #[test]
    fn test_init() {
        let temp = TempDir::new().unwrap();
        let repo = new_repo(&temp);

        assert!(repo.is_online());
        assert_eq!(repo.version(), Some("2.0"));
        assert!(temp.path().join("main/db").is_file());
        assert!(repo.last().unwrap() > 0);
        assert_eq!(repo.uuid().unwrap().unwrap().len(), 36);
        assert!(repo.images().unwrap().is_empty());
        assert!(repo.check().unwrap().is_clean());
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        let mut repo = new_repo(&temp);
        assert!(matches!(repo.init(), Err(RepoError::DatabaseExists { .. })));
    }

    #[test]
    fn test_offline_operations_fail() {
        let repo = Repository::offline(RepositoryConfig::new("gone", "/nonexistent"), transport());
        assert!(!repo.is_online());
        assert!(matches!(repo.images(), Err(RepoError::Offline { .. })));
        assert!(matches!(repo.payloads(), Err(RepoError::Offline { .. })));
        assert!(matches!(repo.get("demo", None), Err(RepoError::Offline { .. })));
        assert!(matches!(repo.uuid(), Err(RepoError::Offline { .. })));
    }

    #[test]
    fn test_motd() {
        let temp = TempDir::new().unwrap();
        let mut repo = new_repo(&temp);
        assert_eq!(repo.motd().unwrap().as_deref(), Some(""));
        repo.set_motd("Mirror moves on Monday").unwrap();
        assert_eq!(repo.motd().unwrap().as_deref(), Some("Mirror moves on Monday"));
    }

    #[test]
    fn test_check_and_clean() {
        let temp = TempDir::new().unwrap();
        let repo = new_repo(&temp);
        let pool = temp.path().join("main");

        let stray = isforge_core::hash_bytes(b"stray");
        std::fs::write(pool.join(&stray.hash), b"stray").unwrap();
        let rotten = isforge_core::hash_bytes(b"original");
        std::fs::write(pool.join(&rotten.hash), b"bit rot").unwrap();

        let report = repo.check().unwrap();
        assert!(report.missing.is_empty());
        let mut expected = vec![stray.hash.clone(), rotten.hash.clone()];
        expected.sort();
        assert_eq!(report.unreferenced, expected);
        assert_eq!(report.corrupted, vec![rotten.hash.clone()]);

        assert!(repo.clean(false, |_| false).unwrap().is_empty());
        assert!(pool.join(&stray.hash).exists());

        let removed = repo.clean(false, |files| files.len() == 2).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!pool.join(&stray.hash).exists());
        assert!(repo.check().unwrap().is_clean());
    }

    #[test]
    fn test_missing_image() {
        let temp = TempDir::new().unwrap();
        let repo = new_repo(&temp);
        assert!(!repo.has("demo", "1").unwrap());
        assert!(matches!(
            repo.get("demo", None),
            Err(RepoError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_read_marker() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("last");
        std::fs::write(&path, "1700000000\n").unwrap();
        let location = path.display().to_string();
        assert_eq!(read_marker(&DefaultTransport::default(), &location).unwrap(), 1_700_000_000);

        std::fs::write(&path, "yesterday\n").unwrap();
        assert!(matches!(
            read_marker(&DefaultTransport::default(), &location),
            Err(RepoError::InvalidMarker { .. })
        ));
    }
}
