//! Byte-stream transports for local paths and remote URLs
//!
//! Anything that can open a location for reading and report its size and
//! modification time is enough for isforge. [`DefaultTransport`] covers
//! local paths, `file://` and `http(s)://` URLs.

use chrono::DateTime;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, UNIX_EPOCH};
use url::Url;

use crate::error::{CoreError, Result};
use crate::hash::{ContentHash, HashingReader};

/// An open byte stream on a local or remote location
pub trait StreamReader: Read + Send {
    /// Location this stream was opened from
    fn location(&self) -> &str;

    /// Total size when the transport announces it
    fn size(&self) -> Option<u64>;

    /// Last modification time (unix seconds) when known
    fn mtime(&self) -> Option<i64>;

    /// Copy the remaining stream into `sink`, hashing it on the way
    fn consume(&mut self, sink: &mut dyn Write) -> Result<ContentHash> {
        let mut reader = HashingReader::new(&mut *self);
        io::copy(&mut reader, sink)?;
        Ok(reader.finish())
    }
}

/// Opens locations as byte streams
pub trait Transport: Send + Sync {
    fn open(&self, location: &str) -> Result<Box<dyn StreamReader>>;
}

/// Whether a location designates the local filesystem
pub fn is_local(location: &str) -> bool {
    location.starts_with("file://") || !location.contains("://")
}

/// Convert a local location (plain path or `file://` URL) to a path
pub fn local_path(location: &str) -> Result<PathBuf> {
    if location.starts_with("file://") {
        let url = Url::parse(location).map_err(|e| CoreError::Transport {
            location: location.to_string(),
            message: e.to_string(),
        })?;
        return url.to_file_path().map_err(|_| CoreError::NotLocal {
            path: location.to_string(),
        });
    }
    if !is_local(location) {
        return Err(CoreError::NotLocal {
            path: location.to_string(),
        });
    }
    Ok(PathBuf::from(location))
}

/// Append a file name to a directory location (path or URL)
pub fn join_location(base: &str, name: &str) -> String {
    if is_local(base) && !base.starts_with("file://") {
        Path::new(base).join(name).display().to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// Stream over a local file
pub struct LocalStream {
    file: File,
    location: String,
    size: u64,
    mtime: Option<i64>,
}

impl LocalStream {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CoreError::Transport {
            location: path.display().to_string(),
            message: e.to_string(),
        })?;
        let meta = file.metadata()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        Ok(Self {
            file,
            location: path.display().to_string(),
            size: meta.len(),
            mtime,
        })
    }
}

impl Read for LocalStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl StreamReader for LocalStream {
    fn location(&self) -> &str {
        &self.location
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn mtime(&self) -> Option<i64> {
        self.mtime
    }
}

/// Stream over an HTTP response body
pub struct HttpStream {
    response: reqwest::blocking::Response,
    location: String,
    size: Option<u64>,
    mtime: Option<i64>,
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.response.read(buf)
    }
}

impl StreamReader for HttpStream {
    fn location(&self) -> &str {
        &self.location
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn mtime(&self) -> Option<i64> {
        self.mtime
    }
}

/// Default connect timeout for remote locations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport for local paths, `file://` and `http(s)://` URLs
pub struct DefaultTransport {
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl Default for DefaultTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl DefaultTransport {
    /// `timeout` bounds connection setup only; transfers have no deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceLock::new(),
        }
    }

    fn http_client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(None)
            .build()
            .map_err(|e| CoreError::Network {
                message: e.to_string(),
            })?;
        Ok(self.client.get_or_init(|| client))
    }

    fn open_http(&self, location: &str) -> Result<HttpStream> {
        let response = self.http_client()?.get(location).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Http {
                status: status.as_u16(),
                message: format!("Request to {} failed", location),
            });
        }

        let mtime = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.timestamp());

        Ok(HttpStream {
            size: response.content_length(),
            response,
            location: location.to_string(),
            mtime,
        })
    }
}

impl Transport for DefaultTransport {
    fn open(&self, location: &str) -> Result<Box<dyn StreamReader>> {
        tracing::debug!("Opening {}", location);
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Box::new(self.open_http(location)?));
        }
        if is_local(location) {
            let path = local_path(location)?;
            return Ok(Box::new(LocalStream::open(&path)?));
        }
        Err(CoreError::Transport {
            location: location.to_string(),
            message: "unsupported URL scheme".to_string(),
        })
    }
}
