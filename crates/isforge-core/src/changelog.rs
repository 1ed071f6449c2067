//! Image changelog
//!
//! ```text
//! [2]
//! - switch to zstd payloads
//!
//! [1]
//! - first release
//! ```
//!
//! Each `[version]` line opens a section; everything up to the next section
//! is that version's release notes.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::version::ImageVersion;

/// Changelog entry name in build trees and archives
pub const CHANGELOG_FILE: &str = "changelog";

/// Parsed changelog, keeping the original text for re-archiving
#[derive(Debug, Clone, Default)]
pub struct Changelog {
    raw: String,
    entries: BTreeMap<ImageVersion, String>,
}

fn section_header(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

impl Changelog {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut current: Option<(ImageVersion, Vec<&str>)> = None;

        for (index, line) in text.lines().enumerate() {
            if let Some(version) = section_header(line) {
                let version = ImageVersion::parse(version).map_err(|_| CoreError::InvalidChangelog {
                    message: format!("line {}: invalid version '{}'", index + 1, version),
                })?;
                if let Some((previous, lines)) = current.take() {
                    insert_entry(&mut entries, previous, &lines)?;
                }
                current = Some((version, Vec::new()));
                continue;
            }

            match current.as_mut() {
                Some((_, lines)) => lines.push(line),
                None if line.trim().is_empty() => {}
                None => {
                    return Err(CoreError::InvalidChangelog {
                        message: format!("line {}: text before the first [version] section", index + 1),
                    });
                }
            }
        }

        if let Some((version, lines)) = current {
            insert_entry(&mut entries, version, &lines)?;
        }

        Ok(Self {
            raw: text.to_string(),
            entries,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Text as it was parsed
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, version: &str) -> Option<&str> {
        let version = ImageVersion::parse(version).ok()?;
        self.entries.get(&version).map(String::as_str)
    }

    /// Versions, newest first
    pub fn versions(&self) -> impl Iterator<Item = &ImageVersion> {
        self.entries.keys().rev()
    }

    /// Render one entry, or all entries newest first
    pub fn render(&self, version: Option<&str>) -> String {
        let sections: Vec<String> = self
            .entries
            .iter()
            .rev()
            .filter(|(v, _)| version.is_none_or(|wanted| v.as_str() == wanted))
            .map(|(v, text)| {
                if text.is_empty() {
                    format!("[{}]\n", v)
                } else {
                    format!("[{}]\n{}\n", v, text)
                }
            })
            .collect();
        sections.join("\n")
    }
}

fn insert_entry(
    entries: &mut BTreeMap<ImageVersion, String>,
    version: ImageVersion,
    lines: &[&str],
) -> Result<()> {
    if entries.contains_key(&version) {
        return Err(CoreError::InvalidChangelog {
            message: format!("duplicate section [{}]", version),
        });
    }
    let text = lines.join("\n").trim().to_string();
    entries.insert(version, text);
    Ok(())
}
