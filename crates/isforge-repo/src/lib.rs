//! isforge Repository Management
//!
//! This crate stores isforge images and keeps remote repositories in sync:
//!
//! - **Metadata store**: one SQLite file per repository, two schema generations
//! - **Content pool**: archives and payloads named by their SHA-256
//! - **Remote caching**: remote stores are copied locally and refreshed from a staleness marker
//! - **Selection**: `repo/name:version` globs across every registered repository
//!
//! ## Example
//!
//! ```rust,no_run
//! use isforge_repo::{ManagerConfig, RepositoryManager};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::load()?;
//! let manager = RepositoryManager::from_config(&config, config.transport(), false)?;
//!
//! for selected in manager.select_images(&["*/webserver"])? {
//!     let image = manager.get(&selected.repo)?.get(&selected.image.name, Some(&selected.image.version))?;
//!     println!("{} {} ({} bytes)", image.name(), image.version(), image.total_size());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Integrity Notes
//!
//! - Every pool write is verified against the expected hash before metadata is committed
//! - Pool files are removed only once no metadata row references them
//! - An unreadable or too new remote store leaves its repository offline, never the manager broken

pub mod config;
pub mod database;
pub mod error;
pub mod factory;
pub mod manager;
pub mod repository;
pub mod schema;

// Re-exports for convenience
pub use config::{ManagerConfig, RepositoryConfig};
pub use database::Database;
pub use error::{RepoError, Result};
pub use factory::RepositoryFactory;
pub use manager::{Diff, ImagePattern, RepositoryManager, SelectedImage};
pub use repository::{CheckReport, PayloadUsage, Repository};
pub use schema::{Generation, ImageRecord, PayloadRecord};
