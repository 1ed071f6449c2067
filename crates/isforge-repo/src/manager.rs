//! Registry of repositories with remote metadata caching
//!
//! Remote metadata stores are copied into a local cache before being opened.
//! A cached copy carries the remote staleness marker as its modification
//! time, so a refresh only happens when the remote marker moved.

use glob::{MatchOptions, Pattern};
use isforge_core::transport::Transport;
use isforge_core::version::compare_versions;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempPath;

use crate::config::{ManagerConfig, RepositoryConfig, is_allowed};
use crate::error::{RepoError, Result};
use crate::factory::RepositoryFactory;
use crate::repository::{PayloadUsage, Repository, read_marker};
use crate::schema::ImageRecord;

/// A `repo/name:version` selector; every segment is an optional glob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePattern {
    pub repo: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

impl ImagePattern {
    pub fn parse(pattern: &str) -> Self {
        let (repo, rest) = match pattern.split_once('/') {
            Some((repo, rest)) => (Some(repo), rest),
            None => (None, pattern),
        };
        let (name, version) = match rest.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (rest, None),
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            repo: repo.and_then(non_empty),
            name: non_empty(name).unwrap_or_else(|| "*".to_string()),
            version: version.and_then(non_empty),
        }
    }
}

/// An image row together with the repository holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    pub repo: String,
    pub uuid: Option<String>,
    pub image: ImageRecord,
}

/// Rows present on one side only, compared by content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    pub only_in_first: Vec<T>,
    pub only_in_second: Vec<T>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty()
    }
}

/// Registered repositories, in registration order
pub struct RepositoryManager {
    repositories: Vec<Repository>,
    cache_dir: Option<PathBuf>,
    allowed: Option<Vec<String>>,
    factory: RepositoryFactory,
    cache_files: Vec<PathBuf>,
    temp_files: Vec<TempPath>,
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("repositories", &self.repositories)
            .field("cache_dir", &self.cache_dir)
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl RepositoryManager {
    /// An empty manager; `cache_dir` of `None` caches remote stores in temporary files
    pub fn new(cache_dir: Option<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            repositories: Vec::new(),
            cache_dir,
            allowed: None,
            factory: RepositoryFactory::new(transport),
            cache_files: Vec::new(),
            temp_files: Vec::new(),
        }
    }

    /// Register every configured repository
    pub fn from_config(
        config: &ManagerConfig,
        transport: Arc<dyn Transport>,
        nosync: bool,
    ) -> Result<Self> {
        let mut manager = Self::new(config.cache_dir.clone(), transport);
        manager.allowed = config.allowed.clone();
        for repo in &config.repositories {
            manager.register(repo.clone(), false, nosync, false)?;
        }
        Ok(manager)
    }

    /// Only register repositories named in `allowed`
    pub fn set_allowed(&mut self, allowed: Option<Vec<String>>) {
        self.allowed = allowed;
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Register a repository
    ///
    /// Returns `None` when the allow-list filters it out. A remote store that
    /// cannot be fetched leaves the repository registered offline.
    pub fn register(
        &mut self,
        mut config: RepositoryConfig,
        temp: bool,
        nosync: bool,
        offline: bool,
    ) -> Result<Option<&Repository>> {
        if !is_allowed(self.allowed.as_deref(), &config.name) {
            tracing::debug!("Skipping repository {} (not allowed)", config.name);
            return Ok(None);
        }
        if self.repositories.iter().any(|r| r.name() == config.name) {
            return Err(RepoError::RepositoryAlreadyExists { name: config.name });
        }

        if offline {
            config.offline = true;
        } else if !config.offline
            && !config.is_local()
            && let Err(e) = self.cachify(&mut config, temp, nosync)
        {
            tracing::warn!("Repository {} is offline: {}", config.name, e);
            config.offline = true;
        }

        let repo = self.factory.create(config);
        tracing::debug!(
            "Registered repository {} ({})",
            repo.name(),
            if repo.is_online() { "online" } else { "offline" }
        );
        self.repositories.push(repo);
        Ok(self.repositories.last())
    }

    /// Bring a local copy of a remote metadata store up to date
    fn cachify(&mut self, config: &mut RepositoryConfig, temp: bool, nosync: bool) -> Result<()> {
        let cache_path = match (&self.cache_dir, temp) {
            (Some(dir), false) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(&config.name);
                self.cache_files.push(path.clone());
                path
            }
            _ => {
                let temp_path = tempfile::Builder::new()
                    .prefix("isforge-")
                    .suffix(".db")
                    .tempfile()?
                    .into_temp_path();
                let path = temp_path.to_path_buf();
                self.temp_files.push(temp_path);
                path
            }
        };

        if !nosync {
            let location = config.db_location();
            let mut stream = self.factory.transport().open(&location)?;
            let marker = match stream.mtime() {
                Some(mtime) => mtime,
                None => read_marker(self.factory.transport().as_ref(), &config.last_location())?,
            };

            if cache_marker(&cache_path) == Some(marker) {
                tracing::debug!("Cache of {} is up to date", config.name);
            } else {
                tracing::info!("Updating cache of {} from {}", config.name, location);
                let stamp = u64::try_from(marker)
                    .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
                    .map_err(|_| RepoError::InvalidMarker {
                        location: config.last_location(),
                        content: marker.to_string(),
                    })?;
                write_cache(
                    &cache_path,
                    |file| {
                        stream.consume(file)?;
                        Ok(())
                    },
                    stamp,
                )?;
            }
        }

        config.dbpath = Some(cache_path.display().to_string());
        Ok(())
    }

    /// Remove the cache files of registered remote repositories
    ///
    /// Repositories backed by a removed file are switched offline.
    pub fn purge_cache(&mut self) -> Result<()> {
        let mut purged: Vec<String> = Vec::new();
        for path in self.cache_files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!("Removed cache {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            purged.push(path.display().to_string());
        }
        for temp in self.temp_files.drain(..) {
            purged.push(temp.display().to_string());
            temp.close()?;
        }

        for repo in &mut self.repositories {
            if repo
                .config()
                .dbpath
                .as_ref()
                .is_some_and(|dbpath| purged.contains(dbpath))
            {
                repo.set_offline();
            }
        }
        Ok(())
    }

    // ============ Lookup ============

    /// Repository by name, or by a UUID prefix matching exactly one repository
    pub fn get(&self, key: &str) -> Result<&Repository> {
        let index = self.position(key)?;
        Ok(&self.repositories[index])
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Repository> {
        let index = self.position(key)?;
        Ok(&mut self.repositories[index])
    }

    fn position(&self, key: &str) -> Result<usize> {
        if let Some(index) = self.repositories.iter().position(|r| r.name() == key) {
            return Ok(index);
        }
        let by_uuid: Vec<usize> = self
            .repositories
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.uuid()
                    .ok()
                    .flatten()
                    .is_some_and(|uuid| !key.is_empty() && uuid.starts_with(key))
            })
            .map(|(i, _)| i)
            .collect();
        match by_uuid.as_slice() {
            [index] => Ok(*index),
            _ => Err(RepoError::RepositoryNotFound {
                name: key.to_string(),
            }),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.repositories.iter().map(Repository::name).collect()
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn onlines(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter().filter(|r| r.is_online())
    }

    pub fn offlines(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter().filter(|r| !r.is_online())
    }

    // ============ Selection ============

    /// Images matching any of `patterns`
    ///
    /// A pattern without a version keeps only the latest version of each
    /// image per repository. Results are unique per repository and hash.
    pub fn select_images(&self, patterns: &[&str]) -> Result<Vec<SelectedImage>> {
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };
        let mut selected = Vec::new();
        let mut seen = BTreeSet::new();

        for raw in patterns {
            let pattern = ImagePattern::parse(raw);
            let version = pattern.version.as_deref().unwrap_or("*");
            let by_name = Pattern::new(&format!(
                "{}/{}:{}",
                pattern.repo.as_deref().unwrap_or("*"),
                pattern.name,
                version
            ))?;
            // a repository segment naming no repository is read as a UUID prefix
            let by_uuid = match pattern.repo.as_deref() {
                Some(repo) => {
                    let names = Pattern::new(repo)?;
                    if self.onlines().any(|r| names.matches_with(r.name(), options)) {
                        None
                    } else {
                        Some(Pattern::new(&format!(
                            "{}*/{}:{}",
                            repo, pattern.name, version
                        ))?)
                    }
                }
                None => None,
            };

            let mut matches = Vec::new();
            for repo in self.onlines() {
                if pattern.repo.is_none() && !repo.config().searchable {
                    continue;
                }
                let uuid = repo.uuid()?;
                for image in repo.images()? {
                    let tail = format!("{}:{}", image.name, image.version);
                    let hit = by_name.matches_with(&format!("{}/{}", repo.name(), tail), options)
                        || by_uuid.as_ref().zip(uuid.as_ref()).is_some_and(|(p, u)| {
                            p.matches_with(&format!("{}/{}", u, tail), options)
                        });
                    if hit {
                        matches.push(SelectedImage {
                            repo: repo.name().to_string(),
                            uuid: uuid.clone(),
                            image,
                        });
                    }
                }
            }

            if pattern.version.is_none() {
                matches = latest_per_name(matches);
            }
            for m in matches {
                if seen.insert((m.repo.clone(), m.image.hash.clone())) {
                    selected.push(m);
                }
            }
        }
        Ok(selected)
    }

    /// Payloads whose hash starts with one of `prefixes`, merged across repositories
    ///
    /// Referencing images are reported as `repo/name:version`. No prefix selects everything.
    pub fn select_payloads(&self, prefixes: &[&str]) -> Result<Vec<PayloadUsage>> {
        let mut merged: BTreeMap<String, PayloadUsage> = BTreeMap::new();
        for repo in self.onlines() {
            for payload in repo.payloads()? {
                if !prefixes.is_empty() && !prefixes.iter().any(|p| payload.hash.starts_with(p)) {
                    continue;
                }
                let images = payload
                    .images
                    .iter()
                    .map(|image| format!("{}/{}", repo.name(), image));
                match merged.get_mut(&payload.hash) {
                    Some(existing) => existing.images.extend(images),
                    None => {
                        let images = images.collect();
                        merged.insert(
                            payload.hash.clone(),
                            PayloadUsage { images, ..payload },
                        );
                    }
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Search every searchable online repository
    pub fn search(&self, pattern: &str) -> Result<Vec<SelectedImage>> {
        let mut found = Vec::new();
        for repo in self.onlines().filter(|r| r.config().searchable) {
            let uuid = repo.uuid()?;
            for image in repo.search(pattern)? {
                found.push(SelectedImage {
                    repo: repo.name().to_string(),
                    uuid: uuid.clone(),
                    image,
                });
            }
        }
        Ok(found)
    }

    /// Images of `first` and `second` that the other does not hold
    pub fn diff_images(&self, first: &str, second: &str) -> Result<Diff<ImageRecord>> {
        let first = self.get(first)?.images()?;
        let second = self.get(second)?.images()?;
        Ok(diff_by(first, second, |i| i.hash.clone()))
    }

    /// Payloads of `first` and `second` that the other does not hold
    pub fn diff_payloads(&self, first: &str, second: &str) -> Result<Diff<PayloadUsage>> {
        let first = self.get(first)?.payloads()?;
        let second = self.get(second)?.payloads()?;
        Ok(diff_by(first, second, |p| p.hash.clone()))
    }
}

fn latest_per_name(images: Vec<SelectedImage>) -> Vec<SelectedImage> {
    let mut latest: Vec<SelectedImage> = Vec::new();
    for candidate in images {
        match latest
            .iter_mut()
            .find(|s| s.repo == candidate.repo && s.image.name == candidate.image.name)
        {
            Some(current) => {
                if compare_versions(&candidate.image.version, &current.image.version)
                    == Ordering::Greater
                {
                    *current = candidate;
                }
            }
            None => latest.push(candidate),
        }
    }
    latest
}

fn diff_by<T, F>(first: Vec<T>, second: Vec<T>, key: F) -> Diff<T>
where
    F: Fn(&T) -> String,
{
    let first_keys: BTreeSet<String> = first.iter().map(&key).collect();
    let second_keys: BTreeSet<String> = second.iter().map(&key).collect();
    Diff {
        only_in_first: first
            .into_iter()
            .filter(|item| !second_keys.contains(&key(item)))
            .collect(),
        only_in_second: second
            .into_iter()
            .filter(|item| !first_keys.contains(&key(item)))
            .collect(),
    }
}

/// Marker recorded on a cache file, `None` when missing or empty
fn cache_marker(path: &Path) -> Option<i64> {
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.len() == 0 {
        return None;
    }
    let modified = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(modified.as_secs()).ok()
}

/// Replace `path` through a `.part` sibling and stamp it with `modified`
fn write_cache<F>(path: &Path, fill: F, modified: SystemTime) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let result = (|| -> Result<()> {
        let mut file = File::create(&part)?;
        fill(&mut file)?;
        file.flush()?;
        file.set_modified(modified)?;
        drop(file);
        std::fs::rename(&part, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&part);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::schema::Generation;
    use isforge_core::transport::DefaultTransport;
    use tempfile::TempDir;

    fn manager() -> RepositoryManager {
        RepositoryManager::new(None, Arc::new(DefaultTransport::default()))
    }

    fn local_store(temp: &TempDir, name: &str) -> RepositoryConfig {
        let config = RepositoryConfig::new(name, temp.path().join(name).display().to_string());
        Database::create(&config.db_location()).unwrap();
        config
    }

    fn insert(manager: &RepositoryManager, repo: &str, name: &str, version: &str) {
        let repo = manager.get(repo).unwrap();
        let record = ImageRecord {
            hash: format!("{}-{}-{}", repo.name(), name, version),
            name: name.to_string(),
            version: version.to_string(),
            date: 0,
            author: String::new(),
            description: format!("{} image", name),
            size: 1,
            is_min_version: Some("0.1".to_string()),
            format: Some("2".to_string()),
        };
        let db = Database::open(&repo.config().db_location()).unwrap();
        Generation::V2.insert_image(db.connection(), &record).unwrap();
    }

    #[test]
    fn test_pattern_parse() {
        assert_eq!(
            ImagePattern::parse("main/demo:1.0"),
            ImagePattern {
                repo: Some("main".to_string()),
                name: "demo".to_string(),
                version: Some("1.0".to_string()),
            }
        );
        assert_eq!(
            ImagePattern::parse("demo"),
            ImagePattern {
                repo: None,
                name: "demo".to_string(),
                version: None,
            }
        );
        assert_eq!(
            ImagePattern::parse("main/"),
            ImagePattern {
                repo: Some("main".to_string()),
                name: "*".to_string(),
                version: None,
            }
        );
        assert_eq!(ImagePattern::parse(":2").version.as_deref(), Some("2"));
    }

    #[test]
    fn test_register_local_and_duplicates() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        let repo = manager
            .register(local_store(&temp, "main"), false, false, false)
            .unwrap()
            .unwrap();
        assert!(repo.is_online());

        assert!(matches!(
            manager.register(RepositoryConfig::new("main", "/elsewhere"), false, false, false),
            Err(RepoError::RepositoryAlreadyExists { .. })
        ));

        manager
            .register(RepositoryConfig::new("gone", "/nonexistent/gone"), false, false, false)
            .unwrap();
        assert_eq!(manager.names(), vec!["main", "gone"]);
        assert_eq!(manager.onlines().count(), 1);
        assert_eq!(manager.offlines().next().unwrap().name(), "gone");
    }

    #[test]
    fn test_allow_list_and_forced_offline() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        manager.set_allowed(Some(vec!["main".to_string()]));

        assert!(manager
            .register(local_store(&temp, "other"), false, false, false)
            .unwrap()
            .is_none());
        let repo = manager
            .register(local_store(&temp, "main"), false, false, true)
            .unwrap()
            .unwrap();
        assert!(!repo.is_online());
        assert_eq!(manager.names(), vec!["main"]);
    }

    #[test]
    fn test_get_by_uuid_prefix() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        manager.register(local_store(&temp, "main"), false, false, false).unwrap();

        let uuid = manager.get("main").unwrap().uuid().unwrap().unwrap();
        assert_eq!(manager.get(&uuid[..8]).unwrap().name(), "main");
        assert!(matches!(
            manager.get("nothing"),
            Err(RepoError::RepositoryNotFound { .. })
        ));
    }

    #[test]
    fn test_select_latest_per_repository() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        for name in ["a", "b"] {
            manager.register(local_store(&temp, name), false, false, false).unwrap();
            for version in ["1", "2", "10"] {
                insert(&manager, name, "pkg", version);
            }
            insert(&manager, name, "tool", "1");
        }

        let selected = manager.select_images(&["*/pkg"]).unwrap();
        let found: Vec<(&str, &str)> = selected
            .iter()
            .map(|s| (s.repo.as_str(), s.image.version.as_str()))
            .collect();
        assert_eq!(found, vec![("a", "10"), ("b", "10")]);

        let pinned = manager.select_images(&["a/pkg:2", "a/pkg:2"]).unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].image.version, "2");

        let everything = manager.select_images(&["b/"]).unwrap();
        assert_eq!(everything.len(), 2);

        let versions = manager.select_images(&["a/pkg:1*"]).unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn test_select_repository_name_over_uuid_prefix() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        for name in ["a", "b"] {
            manager.register(local_store(&temp, name), false, false, false).unwrap();
            insert(&manager, name, "pkg", "2");
        }
        let db = Database::open(&manager.get("b").unwrap().config().db_location()).unwrap();
        db.connection()
            .execute(
                "UPDATE repository SET uuid = 'a1b2c3d4-0000-4000-8000-000000000000'",
                [],
            )
            .unwrap();

        let selected = manager.select_images(&["a/pkg:2"]).unwrap();
        let repos: Vec<&str> = selected.iter().map(|s| s.repo.as_str()).collect();
        assert_eq!(repos, vec!["a"]);

        let by_uuid = manager.select_images(&["a1b2/pkg:2"]).unwrap();
        assert_eq!(by_uuid.len(), 1);
        assert_eq!(by_uuid[0].repo, "b");
    }

    #[test]
    fn test_select_by_uuid_and_searchable() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        let mut hidden = local_store(&temp, "hidden");
        hidden.searchable = false;
        manager.register(hidden, false, false, false).unwrap();
        insert(&manager, "hidden", "pkg", "1");

        assert!(manager.select_images(&["pkg"]).unwrap().is_empty());
        assert_eq!(manager.select_images(&["hidden/pkg"]).unwrap().len(), 1);

        let uuid = manager.get("hidden").unwrap().uuid().unwrap().unwrap();
        let pattern = format!("{}/pkg", &uuid[..6]);
        let by_uuid = manager.select_images(&[pattern.as_str()]).unwrap();
        assert_eq!(by_uuid.len(), 1);
        assert_eq!(by_uuid[0].uuid.as_deref(), Some(uuid.as_str()));
    }

    #[test]
    fn test_diff_images() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        manager.register(local_store(&temp, "a"), false, false, false).unwrap();
        manager.register(local_store(&temp, "b"), false, false, false).unwrap();
        insert(&manager, "a", "pkg", "1");

        let diff = manager.diff_images("a", "b").unwrap();
        assert_eq!(diff.only_in_first.len(), 1);
        assert!(diff.only_in_second.is_empty());
        assert!(manager.diff_images("b", "b").unwrap().is_empty());
    }

    #[test]
    fn test_search_across_repositories() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager();
        manager.register(local_store(&temp, "a"), false, false, false).unwrap();
        insert(&manager, "a", "webserver", "1");
        insert(&manager, "a", "database", "1");

        let found = manager.search("web").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].image.name, "webserver");
        assert_eq!(manager.search("*").unwrap().len(), 2);
    }

    #[test]
    fn test_write_cache_stamps_marker() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("main");
        let stamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        write_cache(
            &path,
            |file| {
                file.write_all(b"bytes")?;
                Ok(())
            },
            stamp,
        )
        .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        assert_eq!(cache_marker(&path), Some(1_700_000_000));
        assert!(!temp.path().join("main.part").exists());
    }
}
