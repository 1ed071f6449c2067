//! Repository configuration management
//!
//! Stores repository configuration in `~/.config/isforge/repositories.yaml`

use isforge_core::transport::{DefaultTransport, Transport, is_local, join_location, local_path};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Metadata store file name inside a repository
pub const DB_FILE: &str = "db";

/// Staleness marker file name inside a repository
pub const LAST_FILE: &str = "last";

/// Manager configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Where remote databases are cached; `null` disables the cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,

    /// Connect timeout for remote repositories, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// When set, only repositories named here are registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,

    /// Configured repositories, in search order
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("isforge"))
}

fn default_timeout() -> u64 {
    isforge_core::transport::DEFAULT_TIMEOUT.as_secs()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            timeout: default_timeout(),
            allowed: None,
            repositories: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("isforge").join("repositories.yaml"))
    }

    /// Reject duplicate and malformed repository names
    pub fn validate(&self) -> Result<()> {
        for (i, repo) in self.repositories.iter().enumerate() {
            isforge_core::description::validate_name(&repo.name).map_err(|_| {
                RepoError::InvalidConfig {
                    message: format!("invalid repository name '{}'", repo.name),
                }
            })?;
            if self.repositories[..i].iter().any(|r| r.name == repo.name) {
                return Err(RepoError::RepositoryAlreadyExists {
                    name: repo.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Transport honouring the configured timeout
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(DefaultTransport::new(self.timeout()))
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Add a repository
    pub fn add(&mut self, repo: RepositoryConfig) -> Result<()> {
        if self.get(&repo.name).is_some() {
            return Err(RepoError::RepositoryAlreadyExists {
                name: repo.name.clone(),
            });
        }
        self.repositories.push(repo);
        Ok(())
    }

    /// Remove a repository by name
    pub fn remove(&mut self, name: &str) -> Result<RepositoryConfig> {
        let idx = self
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })?;
        Ok(self.repositories.remove(idx))
    }

    /// List all repository names
    pub fn names(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Whether `name` passes an optional allow-list
pub fn is_allowed(allowed: Option<&[String]>, name: &str) -> bool {
    allowed.is_none_or(|allowed| allowed.iter().any(|n| n == name))
}

fn default_fmod() -> u32 {
    0o644
}

fn default_dmod() -> u32 {
    0o755
}

fn default_true() -> bool {
    true
}

/// Repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    /// Local name, used in image patterns
    pub name: String,

    /// Pool directory or URL
    pub path: String,

    /// Metadata store location (default `{path}/db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbpath: Option<String>,

    /// Staleness marker location (default `{path}/last`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastpath: Option<String>,

    /// Owner given to created files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    /// Mode of created files
    #[serde(default = "default_fmod")]
    pub fmod: u32,

    /// Mode of created directories
    #[serde(default = "default_dmod")]
    pub dmod: u32,

    #[serde(default)]
    pub offline: bool,

    /// Searched when a pattern names no repository
    #[serde(default = "default_true")]
    pub searchable: bool,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dbpath: None,
            lastpath: None,
            uid: None,
            gid: None,
            fmod: default_fmod(),
            dmod: default_dmod(),
            offline: false,
            searchable: true,
        }
    }

    /// Location of the metadata store
    pub fn db_location(&self) -> String {
        self.dbpath
            .clone()
            .unwrap_or_else(|| join_location(&self.path, DB_FILE))
    }

    /// Location of the staleness marker
    pub fn last_location(&self) -> String {
        self.lastpath
            .clone()
            .unwrap_or_else(|| join_location(&self.path, LAST_FILE))
    }

    /// Whether the metadata store can be opened in place
    pub fn is_local(&self) -> bool {
        is_local(&self.db_location())
    }

    /// Local pool directory, for operations that write to the repository
    pub fn pool_dir(&self) -> Result<PathBuf> {
        local_path(&self.path).map_err(|_| RepoError::NotLocal {
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_defaults() {
        let repo = RepositoryConfig::new("main", "/srv/isforge/main");
        assert_eq!(repo.db_location(), "/srv/isforge/main/db");
        assert_eq!(repo.last_location(), "/srv/isforge/main/last");
        assert!(repo.is_local());
        assert_eq!(repo.pool_dir().unwrap(), PathBuf::from("/srv/isforge/main"));

        let remote = RepositoryConfig::new("mirror", "https://example.com/isforge/");
        assert_eq!(remote.db_location(), "https://example.com/isforge/db");
        assert!(!remote.is_local());
        assert!(matches!(remote.pool_dir(), Err(RepoError::NotLocal { .. })));
    }

    #[test]
    fn test_config_add_remove() {
        let mut config = ManagerConfig::default();
        config.add(RepositoryConfig::new("main", "/srv/main")).unwrap();

        assert!(config.get("main").is_some());
        assert!(config.add(RepositoryConfig::new("main", "/srv/other")).is_err());

        let removed = config.remove("main").unwrap();
        assert_eq!(removed.path, "/srv/main");
        assert!(config.get("main").is_none());
        assert!(config.remove("main").is_err());
    }

    #[test]
    fn test_allow_list() {
        assert!(is_allowed(None, "anything"));
        let allowed = vec!["main".to_string()];
        assert!(is_allowed(Some(allowed.as_slice()), "main"));
        assert!(!is_allowed(Some(allowed.as_slice()), "other"));
    }

    #[test]
    fn test_config_from_yaml() {
        let config: ManagerConfig = serde_yaml::from_str(
            r#"
cacheDir: null
timeout: 3
repositories:
  - name: main
    path: /srv/main
    fmod: 0o600
    uid: 1000
  - name: mirror
    path: https://example.com/repo
    searchable: false
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.cache_dir, None);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.names(), vec!["main", "mirror"]);

        let main = config.get("main").unwrap();
        assert_eq!(main.fmod, 0o600);
        assert_eq!(main.dmod, 0o755);
        assert_eq!(main.uid, Some(1000));
        assert!(main.searchable);
        assert!(!config.get("mirror").unwrap().searchable);
    }

    #[test]
    fn test_config_save_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("conf/repositories.yaml");

        let mut config = ManagerConfig::default();
        config.add(RepositoryConfig::new("main", "/srv/main")).unwrap();
        config.save_to(&path).unwrap();

        let loaded = ManagerConfig::load_from(&path).unwrap();
        assert_eq!(loaded.repositories, config.repositories);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = ManagerConfig {
            cache_dir: None,
            ..Default::default()
        };
        config.add(RepositoryConfig::new("main", "/srv/main")).unwrap();

        insta::assert_snapshot!(serde_yaml::to_string(&config).unwrap(), @r"
        cacheDir: null
        timeout: 10
        repositories:
        - name: main
          path: /srv/main
          fmod: 420
          dmod: 493
          offline: false
          searchable: true
        ");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = ManagerConfig::default();
        config.repositories.push(RepositoryConfig::new("main", "/a"));
        config.repositories.push(RepositoryConfig::new("main", "/b"));
        assert!(matches!(
            config.validate(),
            Err(RepoError::RepositoryAlreadyExists { .. })
        ));
    }
}
