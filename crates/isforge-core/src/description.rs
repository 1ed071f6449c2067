//! Image descriptions
//!
//! `description.yaml` is what authors write in a build tree;
//! `description.json` is what the build step stores in the archive, with
//! payload checksums and build metadata filled in.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::compressor::{Compressor, CompressorRules};
use crate::error::{CoreError, Result};
use crate::version::{ENGINE_VERSION, ImageVersion, check_min_version};

/// Description file of a build tree
pub const SOURCE_DESCRIPTION: &str = "description.yaml";

/// Description entry of an image archive
pub const ARCHIVE_DESCRIPTION: &str = "description.json";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-_.\w]+$").expect("valid regex"))
}

/// Check an image or payload name
pub fn validate_name(name: &str) -> Result<()> {
    if name_regex().is_match(name) {
        Ok(())
    } else {
        Err(CoreError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn default_min_version() -> String {
    ENGINE_VERSION.to_string()
}

/// Accept `version: 3` as well as `version: "3.1"`
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        serde_yaml::Value::Number(n) => Err(D::Error::custom(format!(
            "version {} must be quoted to keep its digits",
            n
        ))),
        other => Err(D::Error::custom(format!("invalid version: {:?}", other))),
    }
}

/// Author-provided description of a build tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescription {
    pub name: String,

    #[serde(deserialize_with = "version_string")]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Oldest engine able to use this image
    #[serde(default = "default_min_version", deserialize_with = "version_string")]
    pub min_version: String,

    /// Compressor → payload name globs
    #[serde(default)]
    pub compressor: CompressorRules,
}

impl SourceDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let description: Self = serde_yaml::from_str(content)?;
        description.validate()?;
        Ok(description)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        ImageVersion::parse(&self.version)?;
        check_min_version(&self.min_version)?;
        self.compressor.validate()
    }
}

/// Metadata of one payload as stored in `description.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescription {
    pub hash: String,
    pub size: u64,
    pub isdir: bool,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub mtime: i64,
    #[serde(default)]
    pub compressor: Compressor,
}

/// Description stored inside an image archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Build time, unix seconds
    pub date: i64,
    /// Engine version that built the image
    #[serde(default = "default_min_version")]
    pub is_build_version: String,
    #[serde(default = "default_min_version")]
    pub is_min_version: String,
    #[serde(default)]
    pub compressor: CompressorRules,
    #[serde(default)]
    pub payload: BTreeMap<String, PayloadDescription>,
}

impl ImageDescription {
    /// Parse and validate `description.json`
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let description: Self = serde_json::from_slice(data)?;
        description.validate()?;
        Ok(description)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Same rules as at build time, including the engine version check
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        ImageVersion::parse(&self.version)?;
        check_min_version(&self.is_min_version)?;
        for name in self.payload.keys() {
            validate_name(name)?;
        }
        Ok(())
    }
}
