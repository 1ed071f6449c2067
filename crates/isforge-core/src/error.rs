//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    // ============ Build Tree / Image Errors ============
    #[error("Invalid build tree {path}: {message}")]
    InvalidBuildTree { path: String, message: String },

    #[error("Invalid image: {message}")]
    InvalidImage { message: String },

    #[error("Invalid description: {message}")]
    InvalidDescription { message: String },

    #[error("Invalid image name: {name}")]
    InvalidName { name: String },

    #[error("Invalid version: {version}")]
    InvalidVersion { version: String },

    #[error("Invalid changelog: {message}")]
    InvalidChangelog { message: String },

    #[error("Image requires engine version {required} or newer (running {current})")]
    EngineTooOld { required: String, current: String },

    #[error("Unsupported image format {format} (supported up to {supported})")]
    UnsupportedFormat { format: String, supported: String },

    #[error("Unknown compressor: {name}")]
    UnknownCompressor { name: String },

    #[error("Script failed in {path}: {message}")]
    ScriptFailed { path: String, message: String },

    // ============ Integrity Errors ============
    #[error("Checksum mismatch for {location}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {location}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        location: String,
        expected: u64,
        actual: u64,
    },

    #[error("Payloads {first} and {second} have the same content hash {hash}")]
    DuplicatePayloadHash {
        hash: String,
        first: String,
        second: String,
    },

    #[error("Payload {name} has no {field} recorded")]
    MissingField { name: String, field: String },

    // ============ Transport Errors ============
    #[error("Unable to open {location}: {message}")]
    Transport { location: String, message: String },

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout while opening {location}")]
    Timeout { location: String },

    #[error("{path} is not a local path")]
    NotLocal { path: String },

    #[error("Destination already exists: {path}")]
    AlreadyExists { path: String },

    // ============ Generic ============
    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        let location = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            CoreError::Timeout { location }
        } else if e.is_connect() {
            CoreError::Network {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            CoreError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            CoreError::Network {
                message: e.to_string(),
            }
        }
    }
}

impl CoreError {
    /// Whether this error reports corrupted or unexpected content
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            CoreError::ChecksumMismatch { .. }
                | CoreError::SizeMismatch { .. }
                | CoreError::DuplicatePayloadHash { .. }
        )
    }
}
