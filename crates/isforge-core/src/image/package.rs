//! Packaged images: a verified, fully buffered image archive

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{ArchiveReader, SCRIPT_MODE};
use crate::changelog::{CHANGELOG_FILE, Changelog};
use crate::description::{ARCHIVE_DESCRIPTION, ImageDescription, SOURCE_DESCRIPTION, SourceDescription};
use crate::error::{CoreError, Result};
use crate::hash::{ContentHash, HashingReader, hash_bytes};
use crate::image::source::PAYLOAD_DIR;
use crate::image::{archive_file_name, parent_location};
use crate::payload::{Payload, standalone_file_name, verify};
use crate::script::{ImageRef, Script, ScriptCategory, ScriptRunner, collect_archive};
use crate::transport::{Transport, join_location};
use crate::version::{FORMAT_VERSION, ImageVersion};

/// Where the pool files of an image's payloads are found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLocation {
    /// `{name}-{version}-{payload}.isdata` files in this directory
    Standalone(String),
    /// Files named by content hash in this repository pool
    Pool(String),
}

impl PayloadLocation {
    /// Standalone payloads next to the archive at `location`
    pub fn beside(location: &str) -> Self {
        PayloadLocation::Standalone(parent_location(location))
    }

    fn resolve(&self, image: &ImageDescription, payload: &str, hash: &str) -> String {
        match self {
            PayloadLocation::Standalone(base) => join_location(
                base,
                &standalone_file_name(&image.name, &image.version, payload),
            ),
            PayloadLocation::Pool(base) => join_location(base, hash),
        }
    }
}

/// An opened image archive
pub struct PackageImage {
    location: String,
    content: ContentHash,
    data: Vec<u8>,
    archive: ArchiveReader,
    format: String,
    description: ImageDescription,
    changelog: Option<Changelog>,
    payloads: Vec<Payload>,
}

impl fmt::Debug for PackageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageImage")
            .field("location", &self.location)
            .field("content", &self.content)
            .field("format", &self.format)
            .field("description", &self.description)
            .field("payloads", &self.payloads)
            .finish_non_exhaustive()
    }
}

impl PackageImage {
    /// Open the archive at `location`
    ///
    /// When `expected` is given the archive must match it exactly.
    pub fn open(
        transport: Arc<dyn Transport>,
        location: &str,
        expected: Option<&ContentHash>,
        payloads: PayloadLocation,
    ) -> Result<Self> {
        tracing::debug!("Opening image {}", location);
        let mut stream = transport.open(location)?;
        if let (Some(expected), Some(announced)) = (expected, stream.size())
            && expected.size != announced
        {
            return Err(CoreError::SizeMismatch {
                location: location.to_string(),
                expected: expected.size,
                actual: announced,
            });
        }

        let mut data = Vec::new();
        let content = stream.consume(&mut data)?;
        if let Some(expected) = expected {
            verify(location, expected, &content)?;
        }
        Self::from_buffer(data, content, location, transport, payloads)
    }

    /// Open an archive from any reader, buffering it entirely
    pub fn from_reader<R: Read>(
        reader: R,
        location: &str,
        transport: Arc<dyn Transport>,
        payloads: PayloadLocation,
    ) -> Result<Self> {
        let mut reader = HashingReader::new(reader);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let content = reader.finish();
        Self::from_buffer(data, content, location, transport, payloads)
    }

    fn from_buffer(
        data: Vec<u8>,
        content: ContentHash,
        location: &str,
        transport: Arc<dyn Transport>,
        payloads: PayloadLocation,
    ) -> Result<Self> {
        let archive = ArchiveReader::from_bytes(&data)?;

        let format = std::str::from_utf8(archive.read_file("format")?)
            .map_err(|_| CoreError::InvalidImage {
                message: format!("{}: format marker is not text", location),
            })?
            .trim()
            .to_string();
        check_format(&format)?;

        let description = ImageDescription::from_json(archive.read_file(ARCHIVE_DESCRIPTION)?)?;

        let changelog = match archive.read_file(CHANGELOG_FILE) {
            Ok(raw) => match std::str::from_utf8(raw).map_err(|e| e.to_string()).and_then(|text| {
                Changelog::parse(text).map_err(|e| e.to_string())
            }) {
                Ok(changelog) => Some(changelog),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable changelog of {}: {}", location, e);
                    None
                }
            },
            Err(_) => None,
        };

        let payloads = description
            .payload
            .iter()
            .map(|(name, entry)| {
                let payload_location = payloads.resolve(&description, name, &entry.hash);
                Payload::from_description(name, entry, payload_location, Arc::clone(&transport))
            })
            .collect();

        Ok(Self {
            location: location.to_string(),
            content,
            data,
            archive,
            format,
            description,
            changelog,
            payloads,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Size and hash of the archive itself
    pub fn content(&self) -> &ContentHash {
        &self.content
    }

    pub fn hash(&self) -> &str {
        &self.content.hash
    }

    pub fn size(&self) -> u64 {
        self.content.size
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn version(&self) -> &str {
        &self.description.version
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn description(&self) -> &ImageDescription {
        &self.description
    }

    pub fn changelog(&self) -> Option<&Changelog> {
        self.changelog.as_ref()
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn payload(&self, name: &str) -> Option<&Payload> {
        self.payloads.iter().find(|p| p.name == name)
    }

    /// Total size of the archive and its payloads
    pub fn total_size(&self) -> u64 {
        self.content.size
            + self
                .description
                .payload
                .values()
                .map(|p| p.size)
                .sum::<u64>()
    }

    /// Scripts of one category, in execution order
    pub fn scripts(&self, category: ScriptCategory) -> Vec<Script> {
        collect_archive(category, &self.archive)
    }

    /// Hand the scripts of one category to `runner`
    pub fn run_scripts(
        &self,
        category: ScriptCategory,
        runner: &dyn ScriptRunner,
        workdir: &Path,
    ) -> Result<()> {
        let scripts = self.scripts(category);
        if scripts.is_empty() {
            if category.is_mandatory() {
                return Err(CoreError::InvalidImage {
                    message: format!("{} has no {} scripts", self.name(), category),
                });
            }
            return Ok(());
        }
        tracing::info!("Running {} {} script(s) of {}", scripts.len(), category, self.name());
        runner
            .run(ImageRef::Package(self), &scripts, workdir)
            .map_err(|e| match e {
                CoreError::Cancelled | CoreError::ScriptFailed { .. } => e,
                other => CoreError::ScriptFailed {
                    path: format!("{}:{}/{}", self.name(), self.version(), category),
                    message: other.to_string(),
                },
            })
    }

    /// Export the archive, and optionally its payloads, to `dest_dir`
    ///
    /// Returns the path of the written archive.
    pub fn download(&self, dest_dir: &Path, force: bool, with_payloads: bool) -> Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let archive_path = dest_dir.join(archive_file_name(self.name(), self.version()));
        if archive_path.exists() && !force {
            return Err(CoreError::AlreadyExists {
                path: archive_path.display().to_string(),
            });
        }

        tracing::info!("Downloading {} to {}", self.location, archive_path.display());
        let mut file = File::create(&archive_path)?;
        file.write_all(&self.data)?;
        file.flush()?;

        if with_payloads {
            for payload in &self.payloads {
                let dest = dest_dir.join(standalone_file_name(self.name(), self.version(), &payload.name));
                payload.download(&dest, force)?;
            }
        }
        Ok(archive_path)
    }

    /// Unpack the image into a build tree at `dest`
    pub fn extract(&self, dest: &Path, force: bool, with_payloads: bool) -> Result<()> {
        if dest.exists() && !force && std::fs::read_dir(dest)?.next().is_some() {
            return Err(CoreError::AlreadyExists {
                path: dest.display().to_string(),
            });
        }
        std::fs::create_dir_all(dest)?;
        tracing::info!("Extracting {} to {}", self.name(), dest.display());

        let source = SourceDescription {
            name: self.description.name.clone(),
            version: self.description.version.clone(),
            description: self.description.description.clone(),
            author: self.description.author.clone(),
            min_version: self.description.is_min_version.clone(),
            compressor: self.description.compressor.clone(),
        };
        std::fs::write(dest.join(SOURCE_DESCRIPTION), serde_yaml::to_string(&source)?)?;

        if let Some(changelog) = &self.changelog {
            std::fs::write(dest.join(CHANGELOG_FILE), changelog.raw())?;
        }

        for category in ScriptCategory::ALL {
            if !self.archive.has(category.dir()) {
                continue;
            }
            let dir = dest.join(category.dir());
            std::fs::create_dir_all(&dir)?;
            for script in self.scripts(category) {
                let path = dir.join(&script.name);
                std::fs::write(&path, &script.content)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SCRIPT_MODE))?;
                }
            }
        }

        if with_payloads && !self.payloads.is_empty() {
            let payload_dir = dest.join(PAYLOAD_DIR);
            std::fs::create_dir_all(&payload_dir)?;
            for payload in &self.payloads {
                payload.extract(&payload_dir.join(&payload.name), force)?;
            }
        }
        Ok(())
    }

    /// Recompute the archive hash from the buffered bytes
    pub fn rehash(&self) -> ContentHash {
        hash_bytes(&self.data)
    }
}

/// Reject archives whose format major is newer than ours
fn check_format(format: &str) -> Result<()> {
    let unsupported = || CoreError::UnsupportedFormat {
        format: format.to_string(),
        supported: FORMAT_VERSION.to_string(),
    };
    let version = ImageVersion::parse(format).map_err(|_| unsupported())?;
    let supported = ImageVersion::parse(FORMAT_VERSION)?;
    if version.major() > supported.major() {
        return Err(unsupported());
    }
    Ok(())
}
