//! Build trees and the build step that turns them into image archives

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::archive::{ArchiveWriter, PAYLOAD_EXTENSION, SCRIPT_MODE, pack_directory, pack_file};
use crate::cancel::CancelToken;
use crate::changelog::{CHANGELOG_FILE, Changelog};
use crate::description::{ARCHIVE_DESCRIPTION, ImageDescription, SOURCE_DESCRIPTION, SourceDescription, validate_name};
use crate::error::{CoreError, Result};
use crate::hash::{ContentHash, HashingWriter};
use crate::image::archive_file_name;
use crate::payload::{Payload, build_record_file_name, standalone_file_name};
use crate::script::{ImageRef, ScriptCategory, ScriptRunner, collect_dir};
use crate::transport::{DefaultTransport, Transport};
use crate::version::{ENGINE_VERSION, FORMAT_VERSION};

/// Payload sources live below this directory, one entry per payload
pub const PAYLOAD_DIR: &str = "payload";

const SCAFFOLD_DESCRIPTION: &str = r#"name: example
version: "1"
description: Example image
author: ""
# Compressor per payload name, first match wins (default gzip)
compressor:
  gzip: ["*"]
"#;

const SCAFFOLD_CHANGELOG: &str = "[1]\n- Initial release\n";

const SCAFFOLD_SETUP: &str = r#"#!/bin/sh
# Setup scripts run in order on the target during installation
echo "Installing $IMAGE_NAME $IMAGE_VERSION"
"#;

const SCAFFOLD_PARSER: &str = r#"#!/bin/sh
# Parser scripts validate installation parameters
exit 0
"#;

const SCAFFOLD_BUILD: &str = r#"#!/bin/sh
# Build scripts prepare payload/ before payloads are packed
exit 0
"#;

/// Options of [`SourceImage::build`]
#[derive(Default)]
pub struct BuildOptions<'a> {
    /// Overwrite an existing archive and rebuild every payload
    pub force: bool,
    /// Ask the runner to syntax-check every script first
    pub check_scripts: bool,
    /// Runs `build/` scripts and script checks; without one both are skipped
    pub runner: Option<&'a dyn ScriptRunner>,
    pub cancel: CancelToken,
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuiltImage {
    /// The new `{name}-{version}.isimage`
    pub path: PathBuf,
    /// Size and hash of the archive
    pub content: ContentHash,
    pub payloads: Vec<Payload>,
}

/// Files created by a build that must go away if the build fails
#[derive(Default)]
struct PartialFiles(Vec<PathBuf>);

impl PartialFiles {
    fn track(&mut self, path: PathBuf) {
        self.0.push(path);
    }

    fn keep(mut self) {
        self.0.clear();
    }
}

impl Drop for PartialFiles {
    fn drop(&mut self) {
        for path in self.0.drain(..) {
            if std::fs::remove_file(&path).is_ok() {
                tracing::debug!("Removed partial file {}", path.display());
            }
        }
    }
}

/// A build tree on disk
#[derive(Debug, Clone)]
pub struct SourceImage {
    root: PathBuf,
    description: SourceDescription,
    changelog: Changelog,
}

impl SourceImage {
    /// Scaffold a build tree at `path`
    ///
    /// Existing files are left alone unless `force` is set.
    pub fn create(path: &Path, force: bool) -> Result<()> {
        std::fs::create_dir_all(path.join(PAYLOAD_DIR))?;

        let files = [
            (SOURCE_DESCRIPTION, SCAFFOLD_DESCRIPTION, false),
            (CHANGELOG_FILE, SCAFFOLD_CHANGELOG, false),
            ("setup/01-setup.sh", SCAFFOLD_SETUP, true),
            ("parser/01-parser.sh", SCAFFOLD_PARSER, true),
            ("build/01-build.sh", SCAFFOLD_BUILD, true),
        ];

        for (rel, content, executable) in files {
            let target = path.join(rel);
            if target.exists() && !force {
                tracing::debug!("Keeping existing {}", target.display());
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
            if executable {
                set_mode(&target, SCRIPT_MODE)?;
            }
        }

        Ok(())
    }

    /// Open and validate a build tree
    pub fn open(path: &Path) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidBuildTree {
            path: path.display().to_string(),
            message: message.to_string(),
        };

        if !path.is_dir() {
            return Err(invalid("not a directory"));
        }
        let description_path = path.join(SOURCE_DESCRIPTION);
        if !description_path.is_file() {
            return Err(invalid("missing description.yaml"));
        }
        if !path.join(ScriptCategory::Setup.dir()).is_dir() {
            return Err(invalid("missing setup directory"));
        }
        if path.join(ScriptCategory::Build.dir()).is_dir() && !path.join(PAYLOAD_DIR).is_dir() {
            return Err(invalid("build directory present without payload directory"));
        }

        let description = SourceDescription::load(&description_path)?;

        let changelog_path = path.join(CHANGELOG_FILE);
        let changelog = if changelog_path.is_file() {
            Changelog::load(&changelog_path)?
        } else {
            Changelog::default()
        };

        Ok(Self {
            root: path.to_path_buf(),
            description,
            changelog,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn description(&self) -> &SourceDescription {
        &self.description
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    /// Path of the archive a build produces
    pub fn archive_path(&self) -> PathBuf {
        self.root
            .join(archive_file_name(&self.description.name, &self.description.version))
    }

    /// Payload names with their source paths, sorted by name
    pub fn payload_sources(&self) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.root.join(PAYLOAD_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut sources = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            validate_name(&name)?;
            sources.push((name, entry.path()));
        }
        sources.sort();
        Ok(sources)
    }

    /// Build the image archive and its payload files
    pub fn build(&self, options: &BuildOptions<'_>) -> Result<BuiltImage> {
        let archive_path = self.archive_path();
        if archive_path.exists() && !options.force {
            return Err(CoreError::AlreadyExists {
                path: archive_path.display().to_string(),
            });
        }

        let mut partial = PartialFiles::default();

        if options.check_scripts {
            self.check_scripts(options)?;
        }
        options.cancel.check()?;
        self.run_build_scripts(options)?;

        let mut payloads = Vec::new();
        for (name, source) in self.payload_sources()? {
            options.cancel.check()?;
            payloads.push(self.build_payload(&name, &source, options, &mut partial)?);
        }

        let description = self.image_description(&payloads)?;
        options.cancel.check()?;

        tracing::info!("Writing {}", archive_path.display());
        partial.track(archive_path.clone());
        let content = self.write_archive(&archive_path, &description)?;

        partial.keep();
        Ok(BuiltImage {
            path: archive_path,
            content,
            payloads,
        })
    }

    fn check_scripts(&self, options: &BuildOptions<'_>) -> Result<()> {
        let Some(runner) = options.runner else {
            tracing::warn!("No script runner available, skipping script checks");
            return Ok(());
        };
        for category in ScriptCategory::ALL {
            for script in collect_dir(category, &self.root.join(category.dir()))? {
                tracing::debug!("Checking {}", script.path.display());
                runner.check(&script)?;
            }
        }
        Ok(())
    }

    fn run_build_scripts(&self, options: &BuildOptions<'_>) -> Result<()> {
        let category = ScriptCategory::Build;
        let scripts = collect_dir(category, &self.root.join(category.dir()))?;
        if scripts.is_empty() {
            return Ok(());
        }
        match options.runner {
            Some(runner) => runner.run(ImageRef::Source(self), &scripts, &self.root),
            None => {
                tracing::warn!(
                    "No script runner available, {} build script(s) not run",
                    scripts.len()
                );
                Ok(())
            }
        }
    }

    fn build_payload(
        &self,
        name: &str,
        source: &Path,
        options: &BuildOptions<'_>,
        partial: &mut PartialFiles,
    ) -> Result<Payload> {
        let meta = std::fs::metadata(source)?;
        let image = &self.description.name;
        let compressor = self.description.compressor.resolve(name)?;
        // the compressor is part of the name so that changing it forces a rebuild
        let last_link = self.root.join(build_record_file_name(image, name, compressor));
        let versioned_link = self
            .root
            .join(standalone_file_name(image, &self.description.version, name));
        let transport: Arc<dyn Transport> = Arc::new(DefaultTransport::default());

        let reusable = !options.force && is_up_to_date(&last_link, source)?;
        let content_name = if reusable {
            tracing::debug!("Reusing payload {} from {}", name, last_link.display());
            let target = std::fs::read_link(&last_link)?;
            target.to_string_lossy().to_string()
        } else {
            tracing::info!("Building payload {} ({})", name, compressor);
            let part = self.root.join(format!(".{}-{}.{}.part", image, name, PAYLOAD_EXTENSION));
            partial.track(part.clone());

            let writer = HashingWriter::new(File::create(&part)?);
            let writer = if meta.is_dir() {
                pack_directory(source, compressor, writer, &options.cancel)?
            } else {
                pack_file(source, compressor, writer, &options.cancel)?
            };
            let (mut file, content) = writer.finish()?;
            file.flush()?;

            let content_name = format!("{}.{}", content.hash, PAYLOAD_EXTENSION);
            let content_path = self.root.join(&content_name);
            if !content_path.exists() {
                partial.track(content_path.clone());
            }
            std::fs::rename(&part, &content_path)?;
            replace_link(&content_name, &last_link)?;
            content_name
        };
        replace_link(&content_name, &versioned_link)?;

        let mut payload = Payload::unchecked(name, versioned_link.display().to_string(), transport);
        payload.isdir = meta.is_dir();
        payload.compressor = compressor;
        payload.mtime = mtime_secs(&meta);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            payload.uid = meta.uid();
            payload.gid = meta.gid();
            payload.mode = meta.mode() & 0o7777;
        }
        payload.checksum()?;
        Ok(payload)
    }

    fn image_description(&self, payloads: &[Payload]) -> Result<ImageDescription> {
        let mut described = BTreeMap::new();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for payload in payloads {
            let entry = payload.to_description()?;
            if let Some(first) = seen.insert(entry.hash.clone(), payload.name.clone()) {
                return Err(CoreError::DuplicatePayloadHash {
                    hash: entry.hash,
                    first,
                    second: payload.name.clone(),
                });
            }
            described.insert(payload.name.clone(), entry);
        }

        Ok(ImageDescription {
            name: self.description.name.clone(),
            version: self.description.version.clone(),
            description: self.description.description.clone(),
            author: self.description.author.clone(),
            date: Utc::now().timestamp(),
            is_build_version: ENGINE_VERSION.to_string(),
            is_min_version: self.description.min_version.clone(),
            compressor: self.description.compressor.clone(),
            payload: described,
        })
    }

    fn write_archive(&self, path: &Path, description: &ImageDescription) -> Result<ContentHash> {
        let writer = HashingWriter::new(File::create(path)?);
        let mut archive = ArchiveWriter::new(writer, description.date.max(0) as u64);

        archive.add_bytes(ARCHIVE_DESCRIPTION, description.to_json()?.as_bytes(), 0o644)?;
        archive.add_bytes("format", FORMAT_VERSION.as_bytes(), 0o644)?;
        archive.add_bytes(CHANGELOG_FILE, self.changelog.raw().as_bytes(), 0o644)?;

        for category in ScriptCategory::ALL {
            let dir = self.root.join(category.dir());
            if !dir.is_dir() {
                continue;
            }
            archive.add_directory(category.dir(), SCRIPT_MODE)?;
            for script in collect_dir(category, &dir)? {
                let entry = format!("{}/{}", category.dir(), script.name);
                archive.add_bytes(&entry, &script.content, SCRIPT_MODE)?;
            }
        }

        let (mut file, content) = archive.finish()?.finish()?;
        file.flush()?;
        Ok(content)
    }
}

/// Whether `link` points at a pool file not older than any file of the payload source
fn is_up_to_date(link: &Path, source: &Path) -> Result<bool> {
    if std::fs::symlink_metadata(link).is_err() {
        return Ok(false);
    }
    let built = match std::fs::metadata(link).and_then(|m| m.modified()) {
        Ok(time) => time,
        Err(_) => return Ok(false),
    };

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let modified = entry.metadata().map_err(std::io::Error::from)?.modified()?;
        if modified > built {
            return Ok(false);
        }
    }
    Ok(true)
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Point `link` at `target` (a sibling file name), replacing any previous link
fn replace_link(target: &str, link: &Path) -> Result<()> {
    if std::fs::symlink_metadata(link).is_ok() {
        std::fs::remove_file(link)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)?;
    #[cfg(not(unix))]
    {
        let source = link.parent().map(|p| p.join(target)).unwrap_or_else(|| PathBuf::from(target));
        std::fs::copy(source, link)?;
    }
    Ok(())
}
