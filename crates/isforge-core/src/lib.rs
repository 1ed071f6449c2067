//! isforge Core - images, payloads and the archive format
//!
//! This crate provides the artifact model shared by every isforge component:
//! - `SourceImage`: a build tree and the build step producing an archive
//! - `PackageImage`: an opened, verified image archive
//! - `Payload`: a content-addressed data blob attached to an image
//! - `Transport`: byte streams over local paths and URLs
//! - `ImageVersion`: the total order used to pick the latest version

pub mod archive;
pub mod cancel;
pub mod changelog;
pub mod compressor;
pub mod description;
pub mod error;
pub mod hash;
pub mod image;
pub mod payload;
pub mod script;
pub mod transport;
pub mod version;

pub use cancel::CancelToken;
pub use changelog::Changelog;
pub use compressor::{Compressor, CompressorRules};
pub use description::{ImageDescription, PayloadDescription, SourceDescription};
pub use error::{CoreError, Result};
pub use hash::{ContentHash, hash_bytes, hash_file};
pub use image::{BuildOptions, BuiltImage, PackageImage, PayloadLocation, SourceImage};
pub use payload::Payload;
pub use script::{ImageRef, Script, ScriptCategory, ScriptRunner};
pub use transport::{DefaultTransport, StreamReader, Transport};
pub use version::{ENGINE_VERSION, FORMAT_VERSION, ImageVersion, compare_versions};
