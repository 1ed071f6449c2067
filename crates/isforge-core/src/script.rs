//! Embedded scripts and the interface of whatever runs them
//!
//! isforge never executes scripts itself. It finds them, filters them by name
//! and mode, orders them and hands them to a [`ScriptRunner`].

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::archive::ArchiveReader;
use crate::error::Result;
use crate::hash::{ContentHash, hash_bytes};
use crate::image::{PackageImage, SourceImage};

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+-.*\.sh$").expect("valid regex"))
}

/// Whether a file name follows the `NN-description.sh` convention
pub fn is_script_name(name: &str) -> bool {
    script_regex().is_match(name)
}

/// Leading number of a script name, which orders scripts before the name does
fn script_number(name: &str) -> u64 {
    let digits = name.split('-').next().unwrap_or_default();
    digits.parse().unwrap_or(u64::MAX)
}

/// Order scripts by their leading number, then by name
pub fn sort_scripts(scripts: &mut [Script]) {
    scripts.sort_by(|a, b| {
        script_number(&a.name)
            .cmp(&script_number(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Script directories of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptCategory {
    Build,
    Parser,
    Setup,
    Lib,
}

impl ScriptCategory {
    /// Archive order after the fixed entries
    pub const ALL: [ScriptCategory; 4] = [
        ScriptCategory::Setup,
        ScriptCategory::Build,
        ScriptCategory::Parser,
        ScriptCategory::Lib,
    ];

    /// Directory name in build trees and archives
    pub fn dir(&self) -> &'static str {
        match self {
            ScriptCategory::Build => "build",
            ScriptCategory::Parser => "parser",
            ScriptCategory::Setup => "setup",
            ScriptCategory::Lib => "lib",
        }
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self, ScriptCategory::Setup)
    }
}

impl fmt::Display for ScriptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// One script as handed to a runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub category: ScriptCategory,
    /// Path on disk or inside the archive
    pub path: PathBuf,
    pub name: String,
    pub content: Vec<u8>,
}

impl Script {
    pub fn checksum(&self) -> ContentHash {
        hash_bytes(&self.content)
    }
}

/// Image whose scripts are being run
#[derive(Clone, Copy)]
pub enum ImageRef<'a> {
    Source(&'a SourceImage),
    Package(&'a PackageImage),
}

impl ImageRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            ImageRef::Source(image) => &image.description().name,
            ImageRef::Package(image) => image.name(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            ImageRef::Source(image) => &image.description().version,
            ImageRef::Package(image) => image.version(),
        }
    }
}

/// Checks and runs scripts on behalf of the core
pub trait ScriptRunner {
    /// Syntax-check a script without running it
    fn check(&self, script: &Script) -> Result<()>;

    /// Run `scripts` in order inside `workdir`, stopping at the first failure
    fn run(&self, image: ImageRef<'_>, scripts: &[Script], workdir: &Path) -> Result<()>;
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

/// Scripts of one category in a build tree; a missing directory yields none
pub fn collect_dir(category: ScriptCategory, dir: &Path) -> Result<Vec<Script>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = entry.metadata()?;
        if !meta.is_file() || !is_script_name(&name) || !is_executable(&meta) {
            tracing::debug!("Ignoring {}", entry.path().display());
            continue;
        }
        scripts.push(Script {
            category,
            path: entry.path(),
            content: std::fs::read(entry.path())?,
            name,
        });
    }
    sort_scripts(&mut scripts);
    Ok(scripts)
}

/// Scripts of one category stored in an image archive
pub fn collect_archive(category: ScriptCategory, archive: &ArchiveReader) -> Vec<Script> {
    let mut scripts: Vec<Script> = archive
        .files_in(category.dir())
        .into_iter()
        .filter_map(|entry| {
            let name = entry.path.rsplit('/').next()?.to_string();
            (is_script_name(&name) && entry.mode & 0o111 != 0).then(|| Script {
                category,
                path: PathBuf::from(&entry.path),
                name,
                content: entry.data.clone(),
            })
        })
        .collect();
    sort_scripts(&mut scripts);
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_script_names() {
        assert!(is_script_name("01-install.sh"));
        assert!(is_script_name("100-a-b.sh"));
        assert!(!is_script_name("install.sh"));
        assert!(!is_script_name("01-install.py"));
        assert!(!is_script_name("01install.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_dir_filters_and_sorts() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("setup");
        std::fs::create_dir_all(&dir).unwrap();
        for (name, mode) in [
            ("20-second.sh", 0o755),
            ("10-first.sh", 0o755),
            ("2-early.sh", 0o755),
            ("30-not-exec.sh", 0o644),
            ("README", 0o755),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, format!("# {}\n", name)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        }

        let scripts = collect_dir(ScriptCategory::Setup, &dir).unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["2-early.sh", "10-first.sh", "20-second.sh"]);
        assert_eq!(scripts[1].content, b"# 10-first.sh\n");
        assert_eq!(scripts[1].checksum(), hash_bytes(b"# 10-first.sh\n"));
    }

    #[test]
    fn test_scripts_sorted_numerically() {
        let mut scripts: Vec<Script> = ["10-x.sh", "2-x.sh", "2-a.sh", "01-z.sh"]
            .into_iter()
            .map(|name| Script {
                category: ScriptCategory::Setup,
                path: PathBuf::from(name),
                name: name.to_string(),
                content: Vec::new(),
            })
            .collect();
        sort_scripts(&mut scripts);

        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["01-z.sh", "2-a.sh", "2-x.sh", "10-x.sh"]);
    }

    #[test]
    fn test_collect_missing_dir() {
        let temp = TempDir::new().unwrap();
        let scripts = collect_dir(ScriptCategory::Lib, &temp.path().join("lib")).unwrap();
        assert!(scripts.is_empty());
    }

    #[test]
    fn test_collect_archive() {
        use crate::archive::{ArchiveWriter, SCRIPT_MODE};

        let mut writer = ArchiveWriter::new(Vec::new(), 0);
        writer.add_directory("parser", SCRIPT_MODE).unwrap();
        writer.add_bytes("parser/02-b.sh", b"b", SCRIPT_MODE).unwrap();
        writer.add_bytes("parser/01-a.sh", b"a", SCRIPT_MODE).unwrap();
        writer.add_bytes("parser/notes.txt", b"x", 0o644).unwrap();
        let archive = ArchiveReader::from_bytes(&writer.finish().unwrap()).unwrap();

        let scripts = collect_archive(ScriptCategory::Parser, &archive);
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["01-a.sh", "02-b.sh"]);
        assert_eq!(scripts[1].path, PathBuf::from("parser/02-b.sh"));
        assert!(collect_archive(ScriptCategory::Lib, &archive).is_empty());
    }
}
