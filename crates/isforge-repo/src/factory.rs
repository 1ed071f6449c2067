//! Turns a repository definition into a [`Repository`]
//!
//! A store that cannot be opened never fails registration: the repository is
//! handed back offline instead.

use isforge_core::transport::Transport;
use std::sync::Arc;

use crate::config::RepositoryConfig;
use crate::database::Database;
use crate::error::RepoError;
use crate::repository::Repository;

pub struct RepositoryFactory {
    transport: Arc<dyn Transport>,
}

impl RepositoryFactory {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Open the store named by `config`, falling back to offline
    pub fn create(&self, config: RepositoryConfig) -> Repository {
        if config.offline {
            tracing::debug!("Repository {} is configured offline", config.name);
            return Repository::offline(config, Arc::clone(&self.transport));
        }

        match Database::open(&config.db_location()) {
            Ok(db) => Repository::online(config, db, Arc::clone(&self.transport)),
            Err(e @ RepoError::DatabaseTooNew { .. }) => {
                tracing::warn!("Repository {} is offline: {}", config.name, e);
                Repository::offline(config, Arc::clone(&self.transport))
            }
            Err(e) => {
                tracing::debug!("Repository {} is offline: {}", config.name, e);
                Repository::offline(config, Arc::clone(&self.transport))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isforge_core::transport::DefaultTransport;
    use rusqlite::params;
    use tempfile::TempDir;

    fn factory() -> RepositoryFactory {
        RepositoryFactory::new(Arc::new(DefaultTransport::default()))
    }

    #[test]
    fn test_missing_store_is_offline() {
        let temp = TempDir::new().unwrap();
        let config = RepositoryConfig::new("main", temp.path().display().to_string());
        let repo = factory().create(config);
        assert!(!repo.is_online());
        assert!(repo.config().offline);
    }

    #[test]
    fn test_existing_store_is_online() {
        let temp = TempDir::new().unwrap();
        let config = RepositoryConfig::new("main", temp.path().display().to_string());
        Database::create(&config.db_location()).unwrap();

        let repo = factory().create(config.clone());
        assert!(repo.is_online());
        assert_eq!(repo.version(), Some("2.0"));

        let mut forced = config;
        forced.offline = true;
        assert!(!factory().create(forced).is_online());
    }

    #[test]
    fn test_newer_store_is_offline() {
        let temp = TempDir::new().unwrap();
        let config = RepositoryConfig::new("main", temp.path().display().to_string());
        let db = Database::create(&config.db_location()).unwrap();
        db.connection()
            .execute("UPDATE repository SET version = ?1", params!["9.0"])
            .unwrap();
        drop(db);

        assert!(!factory().create(config).is_online());
    }
}
