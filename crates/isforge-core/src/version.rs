//! Image version strings and their total order
//!
//! A version is a dot-separated list of numbers with an optional qualifier:
//! `1.2.3`, `2.0~rc1` (pre-release, sorts before `2.0`) or `2.0+fix1`
//! (post-release, sorts after `2.0`).

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{CoreError, Result};

/// Version of this engine, compared against `is_min_version` of images
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Archive format written by this engine
pub const FORMAT_VERSION: &str = "2";

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)*)([~+].*)?$").expect("valid regex"))
}

/// Qualifier trailing the numeric part of a version
#[derive(Debug, Clone, PartialEq, Eq)]
enum Qualifier {
    Pre(String),
    Release,
    Post(String),
}

impl Qualifier {
    fn rank(&self) -> u8 {
        match self {
            Qualifier::Pre(_) => 0,
            Qualifier::Release => 1,
            Qualifier::Post(_) => 2,
        }
    }

    fn text(&self) -> &str {
        match self {
            Qualifier::Pre(s) | Qualifier::Post(s) => s,
            Qualifier::Release => "",
        }
    }
}

/// A parsed, totally ordered image version
#[derive(Debug, Clone)]
pub struct ImageVersion {
    raw: String,
    /// Numeric components with leading zeros stripped
    numbers: Vec<String>,
    qualifier: Qualifier,
}

impl ImageVersion {
    /// Parse and validate a version string
    pub fn parse(version: &str) -> Result<Self> {
        let caps = version_regex()
            .captures(version)
            .ok_or_else(|| CoreError::InvalidVersion {
                version: version.to_string(),
            })?;

        let numbers = caps[1]
            .split('.')
            .map(|n| {
                let trimmed = n.trim_start_matches('0');
                if trimmed.is_empty() { "0" } else { trimmed }.to_string()
            })
            .collect();

        let qualifier = match caps.get(2).map(|m| m.as_str()) {
            Some(q) if q.starts_with('~') => Qualifier::Pre(q[1..].to_string()),
            Some(q) => Qualifier::Post(q[1..].to_string()),
            None => Qualifier::Release,
        };

        Ok(Self {
            raw: version.to_string(),
            numbers,
            qualifier,
        })
    }

    /// Check a string without keeping the parsed value
    pub fn is_valid(version: &str) -> bool {
        version_regex().is_match(version)
    }

    /// Original string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First numeric component, saturating on absurdly long values
    pub fn major(&self) -> u64 {
        self.numbers
            .first()
            .and_then(|n| n.parse().ok())
            .unwrap_or(u64::MAX)
    }
}

/// Compare two digit strings without leading zeros
fn cmp_digits(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl ImageVersion {
    /// Order ignoring spelling differences such as `1` vs `1.0`
    fn cmp_value(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        for i in 0..len {
            let a = self.numbers.get(i).map(String::as_str).unwrap_or("0");
            let b = other.numbers.get(i).map(String::as_str).unwrap_or("0");
            match cmp_digits(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        self.qualifier
            .rank()
            .cmp(&other.qualifier.rank())
            .then_with(|| self.qualifier.text().cmp(other.qualifier.text()))
    }
}

impl Ord for ImageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // "1" and "1.0" sort equal numerically; keep the order total
        self.cmp_value(other).then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ImageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ImageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ImageVersion {}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ImageVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compare raw version strings; unparsable strings sort before valid ones
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (ImageVersion::parse(a), ImageVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Fail when `required` is newer than the running engine
pub fn check_min_version(required: &str) -> Result<()> {
    let required_version = ImageVersion::parse(required)?;
    let engine = ImageVersion::parse(ENGINE_VERSION)?;
    if required_version.cmp_value(&engine) == Ordering::Greater {
        return Err(CoreError::EngineTooOld {
            required: required.to_string(),
            current: ENGINE_VERSION.to_string(),
        });
    }
    Ok(())
}
