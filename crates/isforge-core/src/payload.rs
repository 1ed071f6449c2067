//! Payloads: named data blobs attached to an image
//!
//! A payload lives in a pool file, either a compressed tar of a directory or a
//! compressed single file. Its size and hash describe the pool file itself,
//! not the decompressed content.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use crate::archive::{OwnershipApplier, PAYLOAD_EXTENSION, unpack_directory, unpack_file};
use crate::compressor::Compressor;
use crate::description::PayloadDescription;
use crate::error::{CoreError, Result};
use crate::hash::{ContentHash, HashingReader};
use crate::transport::Transport;

/// File name of a payload exported next to its image
pub fn standalone_file_name(image: &str, version: &str, payload: &str) -> String {
    format!("{}-{}-{}.{}", image, version, payload, PAYLOAD_EXTENSION)
}

/// File name of the link a build tree keeps to the last pool file built for a payload
pub fn build_record_file_name(image: &str, payload: &str, compressor: Compressor) -> String {
    format!("{}-{}.{}.{}", image, payload, compressor, PAYLOAD_EXTENSION)
}

/// A payload and where its pool file can be read from
#[derive(Clone)]
pub struct Payload {
    pub name: String,
    location: String,
    hash: Option<String>,
    size: Option<u64>,
    pub isdir: bool,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub mtime: i64,
    pub compressor: Compressor,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("hash", &self.hash)
            .field("size", &self.size)
            .field("isdir", &self.isdir)
            .field("compressor", &self.compressor)
            .finish_non_exhaustive()
    }
}

impl Payload {
    /// Payload described in an archive, read from `location`
    pub fn from_description(
        name: &str,
        description: &PayloadDescription,
        location: String,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.to_string(),
            location,
            hash: Some(description.hash.clone()),
            size: Some(description.size),
            isdir: description.isdir,
            uid: description.uid,
            gid: description.gid,
            mode: description.mode,
            mtime: description.mtime,
            compressor: description.compressor,
            transport,
        }
    }

    /// Payload whose pool file has not been checksummed yet
    pub fn unchecked(name: &str, location: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            location,
            hash: None,
            size: None,
            isdir: false,
            uid: 0,
            gid: 0,
            mode: 0o644,
            mtime: 0,
            compressor: Compressor::default(),
            transport,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Recorded content hash
    pub fn hash(&self) -> Result<&str> {
        self.hash.as_deref().ok_or_else(|| self.missing("hash"))
    }

    /// Recorded pool file size
    pub fn size(&self) -> Result<u64> {
        self.size.ok_or_else(|| self.missing("size"))
    }

    fn missing(&self, field: &str) -> CoreError {
        CoreError::MissingField {
            name: self.name.clone(),
            field: field.to_string(),
        }
    }

    /// Fill in size and hash from the pool file, scanning it only if one is unknown
    pub fn checksum(&mut self) -> Result<ContentHash> {
        if let (Some(hash), Some(size)) = (&self.hash, self.size) {
            return Ok(ContentHash {
                size,
                hash: hash.clone(),
            });
        }

        let mut stream = self.transport.open(&self.location)?;
        let content = stream.consume(&mut std::io::sink())?;
        let hash = self.hash.get_or_insert_with(|| content.hash.clone()).clone();
        let size = *self.size.get_or_insert(content.size);
        Ok(ContentHash { size, hash })
    }

    /// Re-read the pool file and compare it with the recorded size and hash
    pub fn check(&self) -> Result<()> {
        let expected = ContentHash {
            size: self.size()?,
            hash: self.hash()?.to_string(),
        };
        let mut stream = self.transport.open(&self.location)?;
        let actual = stream.consume(&mut std::io::sink())?;
        verify(&self.location, &expected, &actual)
    }

    /// Copy the pool file to `dest`, verifying size and hash
    ///
    /// `dest` is removed when anything goes wrong after it was created.
    pub fn download(&self, dest: &Path, force: bool) -> Result<ContentHash> {
        let expected = ContentHash {
            size: self.size()?,
            hash: self.hash()?.to_string(),
        };
        if dest.exists() && !force {
            return Err(CoreError::AlreadyExists {
                path: dest.display().to_string(),
            });
        }

        let mut stream = self.transport.open(&self.location)?;
        if let Some(announced) = stream.size()
            && announced != expected.size
        {
            return Err(CoreError::SizeMismatch {
                location: self.location.clone(),
                expected: expected.size,
                actual: announced,
            });
        }

        tracing::debug!("Downloading payload {} to {}", self.name, dest.display());
        let result = (|| -> Result<ContentHash> {
            let mut file = File::create(dest)?;
            let actual = stream.consume(&mut file)?;
            file.flush()?;
            verify(&self.location, &expected, &actual)?;
            Ok(actual)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(dest);
        }
        result
    }

    /// Unpack the payload content to `dest`
    ///
    /// Directory payloads are untarred below `dest`; file payloads are
    /// decompressed into `dest` which then gets the recorded owner, mode and
    /// modification time. The pool file hash is verified on the way.
    pub fn extract(&self, dest: &Path, force: bool) -> Result<()> {
        let expected = ContentHash {
            size: self.size()?,
            hash: self.hash()?.to_string(),
        };
        if dest.exists() && !force && !(self.isdir && dest.is_dir()) {
            return Err(CoreError::AlreadyExists {
                path: dest.display().to_string(),
            });
        }

        tracing::debug!("Extracting payload {} to {}", self.name, dest.display());
        let mut stream = self.transport.open(&self.location)?;
        let mut reader = HashingReader::new(&mut stream);

        if self.isdir {
            unpack_directory(&mut reader, self.compressor, dest, force)?;
        } else {
            unpack_file(&mut reader, self.compressor, dest)?;
            self.apply_attributes(dest)?;
        }

        reader.drain()?;
        verify(&self.location, &expected, &reader.finish())
    }

    fn apply_attributes(&self, dest: &Path) -> Result<()> {
        // mtime first: the recorded mode may drop write access
        if self.mtime >= 0 {
            let file = File::options().write(true).open(dest)?;
            file.set_modified(UNIX_EPOCH + Duration::from_secs(self.mtime as u64))?;
        }

        OwnershipApplier::default().apply(dest, self.uid, self.gid)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dest, std::fs::Permissions::from_mode(self.mode))?;
        }
        Ok(())
    }

    /// Metadata as stored in `description.json`
    pub fn to_description(&self) -> Result<PayloadDescription> {
        Ok(PayloadDescription {
            hash: self.hash()?.to_string(),
            size: self.size()?,
            isdir: self.isdir,
            uid: self.uid,
            gid: self.gid,
            mode: self.mode,
            mtime: self.mtime,
            compressor: self.compressor,
        })
    }
}

/// Fail unless `actual` matches `expected`, size first
pub fn verify(location: &str, expected: &ContentHash, actual: &ContentHash) -> Result<()> {
    if expected.size != actual.size {
        return Err(CoreError::SizeMismatch {
            location: location.to_string(),
            expected: expected.size,
            actual: actual.size,
        });
    }
    if expected.hash != actual.hash {
        return Err(CoreError::ChecksumMismatch {
            location: location.to_string(),
            expected: expected.hash.clone(),
            actual: actual.hash.clone(),
        });
    }
    Ok(())
}
