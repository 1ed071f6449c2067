//! Image archives and payload containers
//!
//! An image archive is a gzip-compressed tar holding `description.json`,
//! `changelog`, `format` and one directory per script category. A payload
//! container is either a compressed tar of a directory or a single
//! compressed file stream.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Archive, Builder, EntryType, Header, HeaderMode};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::compressor::Compressor;
use crate::error::{CoreError, Result};

/// File extension of image archives
pub const IMAGE_EXTENSION: &str = "isimage";

/// File extension of standalone payload files
pub const PAYLOAD_EXTENSION: &str = "isdata";

/// Mode of every script stored in an archive
pub const SCRIPT_MODE: u32 = 0o755;

/// Writes an image archive entry by entry
pub struct ArchiveWriter<W: Write> {
    builder: Builder<GzEncoder<W>>,
    mtime: u64,
}

impl<W: Write> ArchiveWriter<W> {
    /// Every entry gets `mtime` so that equal content gives equal archives
    pub fn new(writer: W, mtime: u64) -> Self {
        let encoder = GzEncoder::new(writer, Compression::default());
        Self {
            builder: Builder::new(encoder),
            mtime,
        }
    }

    /// Add a regular file owned by root
    pub fn add_bytes(&mut self, archive_path: &str, content: &[u8], mode: u32) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.mtime);
        header.set_cksum();

        self.builder.append_data(&mut header, archive_path, content)?;
        Ok(())
    }

    /// Add a directory entry owned by root
    pub fn add_directory(&mut self, archive_path: &str, mode: u32) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.mtime);
        header.set_cksum();

        let path = format!("{}/", archive_path.trim_end_matches('/'));
        self.builder.append_data(&mut header, path, io::empty())?;
        Ok(())
    }

    /// Finish the tar and gzip streams, returning the inner writer
    pub fn finish(self) -> Result<W> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// One entry of an image archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Relative path without leading `./` or trailing `/`
    pub path: String,
    pub is_dir: bool,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub data: Vec<u8>,
}

/// Fully buffered image archive
#[derive(Debug, Clone, Default)]
pub struct ArchiveReader {
    entries: Vec<ArchiveEntry>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_end_matches('/').to_string()
}

impl ArchiveReader {
    /// Parse an in-memory gzip tar
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut archive = Archive::new(GzDecoder::new(data));
        let mut entries = Vec::new();

        for entry in archive.entries().map_err(archive_error)? {
            let mut entry = entry.map_err(archive_error)?;
            let header = entry.header();
            let is_dir = header.entry_type().is_dir();
            let mode = header.mode().map_err(archive_error)?;
            let uid = header.uid().map_err(archive_error)?;
            let gid = header.gid().map_err(archive_error)?;
            let path = normalize(&entry.path().map_err(archive_error)?.to_string_lossy());
            if path.is_empty() {
                continue;
            }

            let mut data = Vec::new();
            if !is_dir {
                entry.read_to_end(&mut data).map_err(archive_error)?;
            }
            entries.push(ArchiveEntry {
                path,
                is_dir,
                mode,
                uid,
                gid,
                data,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        let path = normalize(path);
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Content of a regular file entry
    pub fn read_file(&self, path: &str) -> Result<&[u8]> {
        match self.get(path) {
            Some(entry) if !entry.is_dir => Ok(&entry.data),
            _ => Err(CoreError::Archive {
                message: format!("File not found in archive: {}", path),
            }),
        }
    }

    /// Regular files directly under `dir`, sorted by name
    pub fn files_in(&self, dir: &str) -> Vec<&ArchiveEntry> {
        let prefix = format!("{}/", normalize(dir));
        let mut files: Vec<_> = self
            .entries
            .iter()
            .filter(|e| !e.is_dir)
            .filter(|e| {
                e.path
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

fn archive_error(e: io::Error) -> CoreError {
    CoreError::Archive {
        message: e.to_string(),
    }
}

// ============ Payload containers ============

/// Tar a directory (numeric owners, permissions kept) into a compressed stream
pub fn pack_directory<W: Write>(
    src: &Path,
    compressor: Compressor,
    writer: W,
    cancel: &CancelToken,
) -> Result<W> {
    let mut builder = Builder::new(compressor.encoder(writer)?);
    builder.mode(HeaderMode::Complete);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        cancel.check()?;
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| CoreError::Archive {
                message: e.to_string(),
            })?;
        builder.append_path_with_name(entry.path(), rel)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Compress a single file into a stream
pub fn pack_file<W: Write>(
    src: &Path,
    compressor: Compressor,
    writer: W,
    cancel: &CancelToken,
) -> Result<W> {
    let mut encoder = compressor.encoder(writer)?;
    let mut file = File::open(src)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        cancel.check()?;
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
    }
    Ok(encoder.finish()?)
}

/// Decompress and untar a directory payload into `dest`
///
/// Owners are restored by number. Leading and trailing zero blocks are
/// skipped so that concatenated or padded streams still extract.
pub fn unpack_directory<R: Read>(
    reader: R,
    compressor: Compressor,
    dest: &Path,
    overwrite: bool,
) -> Result<()> {
    let mut archive = Archive::new(compressor.decoder(reader)?);
    archive.set_ignore_zeros(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(overwrite);

    std::fs::create_dir_all(dest)?;
    let mut owners = OwnershipApplier::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let uid = entry.header().uid()?;
        let gid = entry.header().gid()?;
        let path = entry.path()?.into_owned();

        if !entry.unpack_in(dest)? {
            tracing::warn!("Skipping unsafe payload entry {}", path.display());
            continue;
        }
        owners.apply(&dest.join(&path), uid as u32, gid as u32)?;
    }

    Ok(())
}

/// Decompress a file payload into `dest`
pub fn unpack_file<R: Read>(reader: R, compressor: Compressor, dest: &Path) -> Result<u64> {
    let mut decoder = compressor.decoder(reader)?;
    let mut file = File::create(dest)?;
    let written = io::copy(&mut decoder, &mut file)?;
    file.flush()?;
    Ok(written)
}

/// Changes owners by number, warning once when the OS refuses
#[derive(Debug, Default)]
pub struct OwnershipApplier {
    warned: bool,
}

impl OwnershipApplier {
    pub fn apply(&mut self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            let meta = std::fs::symlink_metadata(path)?;
            if meta.uid() == uid && meta.gid() == gid {
                return Ok(());
            }
            match std::os::unix::fs::lchown(path, Some(uid), Some(gid)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    if !self.warned {
                        tracing::warn!(
                            "Unable to set owner {}:{} on {}: {}",
                            uid,
                            gid,
                            path.display(),
                            e
                        );
                        self.warned = true;
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (path, uid, gid, &mut self.warned);
            Ok(())
        }
    }
}
