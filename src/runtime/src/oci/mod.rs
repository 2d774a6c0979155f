//! OCI image handling.
//!
//! Reference parsing, local OCI image layouts, layer extraction with
//! whiteout semantics, the content-addressed blob cache, and the
//! registry client boundary.

pub mod cache;
pub mod image;
pub mod layers;
pub mod reference;
pub mod registry;

pub use cache::{BlobCache, CacheEntry};
pub use image::{ImageConfig, ImageLayout, LayerBlob};
pub use layers::{extract_layer, verify_blob_digest, Compression};
pub use reference::ImageReference;
pub use registry::{AnonymousRegistry, RegistryClient};

use xenomorph_core::error::{Result, XenoError};

/// Split a digest of the form `algorithm:hash` into its parts.
pub(crate) fn split_digest(digest: &str) -> Result<(&str, &str)> {
    match digest.split_once(':') {
        Some((algorithm, hash))
            if !algorithm.is_empty()
                && !hash.is_empty()
                && hash.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            Ok((algorithm, hash))
        }
        _ => Err(XenoError::InvalidDigest(digest.to_string())),
    }
}
