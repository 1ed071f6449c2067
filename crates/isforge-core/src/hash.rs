//! Content hashing while data streams through
//!
//! Every write and every verification read in isforge goes through one of
//! these wrappers so that the byte count and the SHA-256 digest come out of
//! the same single pass.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Size and lowercase hex SHA-256 of a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    pub size: u64,
    pub hash: String,
}

/// Reader that hashes and counts everything read through it
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Bytes read so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the remaining input without keeping it
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    pub fn finish(self) -> ContentHash {
        ContentHash {
            size: self.size,
            hash: hex::encode(self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }
}

/// Writer that hashes and counts everything written through it
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Flush and return the wrapped writer with the digest
    pub fn finish(mut self) -> io::Result<(W, ContentHash)> {
        self.inner.flush()?;
        let content = ContentHash {
            size: self.size,
            hash: hex::encode(self.hasher.finalize()),
        };
        Ok((self.inner, content))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash {
        size: data.len() as u64,
        hash: hex::encode(Sha256::digest(data)),
    }
}

/// Hash a local file in one streaming pass
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut reader = HashingReader::new(File::open(path)?);
    reader.drain()?;
    Ok(reader.finish())
}

/// Whether a file name looks like a content hash produced here
pub fn is_hash_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
