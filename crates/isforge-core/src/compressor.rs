//! Payload compressors and the rules that pick them

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use glob::Pattern;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Zstd level used for payloads
const ZSTD_LEVEL: i32 = 3;

/// Stream compressor applied to a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    /// Stored as-is
    None,

    /// Gzip (default)
    #[default]
    Gzip,

    /// Zstandard
    Zstd,
}

impl Compressor {
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::None => "none",
            Compressor::Gzip => "gzip",
            Compressor::Zstd => "zstd",
        }
    }

    /// Wrap a writer so that everything written to it is compressed
    pub fn encoder<W: Write>(&self, writer: W) -> io::Result<Encoder<W>> {
        Ok(match self {
            Compressor::None => Encoder::Plain(writer),
            Compressor::Gzip => Encoder::Gzip(GzEncoder::new(writer, Compression::default())),
            Compressor::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)?),
        })
    }

    /// Wrap a reader so that reads yield decompressed bytes
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compressor::None => Box::new(reader),
            Compressor::Gzip => Box::new(GzDecoder::new(reader)),
            Compressor::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compressor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compressor::None),
            "gzip" | "gz" => Ok(Compressor::Gzip),
            "zstd" | "zst" => Ok(Compressor::Zstd),
            _ => Err(CoreError::UnknownCompressor {
                name: s.to_string(),
            }),
        }
    }
}

/// Compressing writer returned by [`Compressor::encoder`]
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Write the compressed trailer and hand back the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(w) => Ok(w),
            Encoder::Gzip(e) => e.finish(),
            Encoder::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }
}

/// Compressor name → payload name globs, evaluated in declared order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompressorRules(IndexMap<String, Vec<String>>);

impl CompressorRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compressor: Compressor, pattern: impl Into<String>) {
        self.0
            .entry(compressor.name().to_string())
            .or_default()
            .push(pattern.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject unknown compressors and malformed globs
    pub fn validate(&self) -> Result<()> {
        for (name, patterns) in &self.0 {
            Compressor::from_str(name)?;
            for pattern in patterns {
                Pattern::new(pattern).map_err(|e| CoreError::InvalidDescription {
                    message: format!("Invalid compressor pattern '{}': {}", pattern, e),
                })?;
            }
        }
        Ok(())
    }

    /// Compressor for a payload name; the first matching rule wins
    pub fn resolve(&self, payload: &str) -> Result<Compressor> {
        for (name, patterns) in &self.0 {
            for pattern in patterns {
                let glob = Pattern::new(pattern).map_err(|e| CoreError::InvalidDescription {
                    message: format!("Invalid compressor pattern '{}': {}", pattern, e),
                })?;
                if glob.matches(payload) {
                    return Compressor::from_str(name);
                }
            }
        }
        Ok(Compressor::default())
    }
}
