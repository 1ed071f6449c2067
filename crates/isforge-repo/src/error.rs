//! Error types for repository operations

use isforge_core::CoreError;
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Repository already exists: {name}")]
    RepositoryAlreadyExists { name: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    // ============ State Errors ============
    #[error("Repository {name} is offline")]
    Offline { name: String },

    #[error("{path} is not a local path")]
    NotLocal { path: String },

    #[error("Invalid last-modified marker at {location}: {content}")]
    InvalidMarker { location: String, content: String },

    // ============ Database Errors ============
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Database {path} already exists")]
    DatabaseExists { path: String },

    #[error("Database {path} not found")]
    DatabaseNotFound { path: String },

    #[error("Database version {version} is too new (supported up to {supported}), upgrade required")]
    DatabaseTooNew { version: String, supported: String },

    #[error("{feature} is not supported by database version {version}")]
    Unsupported { feature: String, version: String },

    // ============ Image Errors ============
    #[error("Image not found: {name} in repository {repo}")]
    ImageNotFound { name: String, repo: String },

    #[error("Image {name} version {version} already exists in repository {repo}")]
    ImageExists {
        name: String,
        version: String,
        repo: String,
    },

    #[error("Image {hash} is corrupted in repository {repo}")]
    ImageCorrupted { hash: String, repo: String },

    #[error("Invalid image pattern: {pattern}")]
    InvalidPattern { pattern: String },

    // ============ Wrapped Errors ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        RepoError::Database {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<glob::PatternError> for RepoError {
    fn from(e: glob::PatternError) -> Self {
        RepoError::InvalidPattern {
            pattern: e.msg.to_string(),
        }
    }
}

impl RepoError {
    /// Whether this error reports corrupted or incompatible content
    pub fn is_integrity(&self) -> bool {
        match self {
            RepoError::Core(e) => e.is_integrity(),
            RepoError::DatabaseTooNew { .. } | RepoError::ImageCorrupted { .. } => true,
            _ => false,
        }
    }
}
