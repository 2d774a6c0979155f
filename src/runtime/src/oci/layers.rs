//! OCI layer extraction.
//!
//! Streams a layer tar (optionally gzip- or zstd-compressed) into a
//! target directory, applying OCI whiteout semantics entry by entry:
//! `.wh.<name>` deletes the sibling `<name>`, `.wh..wh..opq` clears a
//! directory's lower-layer contents. Whiteout markers never land in
//! the extracted tree.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::{debug, warn};
use xenomorph_core::error::{Result, XenoError};

use super::split_digest;

/// Whiteout filename prefix.
const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque-directory marker filename.
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Layer compression, derived from the media type suffix or the file
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Derive the compression from a layer media type string.
    pub fn from_media_type(media_type: &str) -> Self {
        if media_type.contains("+gzip") {
            Compression::Gzip
        } else if media_type.contains("+zstd") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Derive the compression from a tarball file name.
    pub fn from_path(path: &Path) -> Self {
        let name = path.to_string_lossy();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Compression::Gzip
        } else if name.ends_with(".tar.zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Extract a single layer into `target_dir`.
///
/// Entries are unpacked with their recorded permissions. When
/// `apply_whiteouts` is set, whiteout markers are consumed and applied
/// against the already-extracted state instead of being written out.
///
/// # Errors
///
/// Returns an error if the layer file is missing, decompression
/// fails, or an entry cannot be unpacked.
pub fn extract_layer(
    layer_path: &Path,
    target_dir: &Path,
    compression: Compression,
    apply_whiteouts: bool,
) -> Result<()> {
    if !layer_path.exists() {
        return Err(XenoError::LayerExtraction(format!(
            "layer file not found: {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| {
        XenoError::LayerExtraction(format!(
            "failed to create target directory {}: {e}",
            target_dir.display()
        ))
    })?;

    let file = File::open(layer_path).map_err(|e| {
        XenoError::LayerExtraction(format!("failed to open {}: {e}", layer_path.display()))
    })?;

    let reader = decoder(file, compression, layer_path)?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false);

    for entry in archive.entries().map_err(|e| {
        XenoError::LayerExtraction(format!("failed to read {}: {e}", layer_path.display()))
    })? {
        let mut entry = entry.map_err(|e| {
            XenoError::LayerExtraction(format!("corrupt entry in {}: {e}", layer_path.display()))
        })?;

        let entry_path = entry
            .path()
            .map_err(|e| {
                XenoError::LayerExtraction(format!(
                    "invalid entry path in {}: {e}",
                    layer_path.display()
                ))
            })?
            .to_path_buf();

        if apply_whiteouts {
            if let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) {
                if name == OPAQUE_MARKER {
                    let parent = entry_path.parent().unwrap_or(Path::new(""));
                    clear_directory(&target_dir.join(parent))?;
                    continue;
                }
                if let Some(victim) = name.strip_prefix(WHITEOUT_PREFIX) {
                    let parent = entry_path.parent().unwrap_or(Path::new(""));
                    remove_entry(&target_dir.join(parent).join(victim))?;
                    continue;
                }
            }
        }

        let unpacked = entry.unpack_in(target_dir).map_err(|e| {
            XenoError::LayerExtraction(format!(
                "failed to unpack {} into {}: {e}",
                entry_path.display(),
                target_dir.display()
            ))
        })?;
        if !unpacked {
            warn!(entry = %entry_path.display(), "skipped entry escaping the target directory");
        }
    }

    debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        %compression,
        "extracted layer"
    );

    Ok(())
}

/// Wrap a layer file in the matching decompressor.
fn decoder(file: File, compression: Compression, layer_path: &Path) -> Result<Box<dyn Read>> {
    match compression {
        Compression::None => Ok(Box::new(file)),
        Compression::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(file))),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(BufReader::new(file)).map_err(|e| {
                XenoError::UnsupportedCompression(format!(
                    "{}: zstd init failed: {e}",
                    layer_path.display()
                ))
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Remove a whited-out file or directory. A missing victim is fine:
/// the whiteout may target an entry from a layer that was never
/// materialized.
fn remove_entry(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(path).map_err(|e| {
                XenoError::LayerExtraction(format!("whiteout of {}: {e}", path.display()))
            })?;
        }
        Ok(_) => {
            std::fs::remove_file(path).map_err(|e| {
                XenoError::LayerExtraction(format!("whiteout of {}: {e}", path.display()))
            })?;
        }
        Err(_) => {}
    }
    debug!(path = %path.display(), "applied whiteout");
    Ok(())
}

/// Remove the contents of an opaque directory, keeping the directory
/// itself. Entries written by the current layer before the marker are
/// also cleared; the layer re-creates everything it wants to keep.
fn clear_directory(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };

    for entry in entries {
        let entry = entry.map_err(|e| {
            XenoError::LayerExtraction(format!("opaque whiteout of {}: {e}", dir.display()))
        })?;
        remove_entry(&entry.path())?;
    }

    debug!(dir = %dir.display(), "applied opaque whiteout");
    Ok(())
}

/// Verify a blob against its declared digest.
///
/// Only `sha256` digests are computed; other algorithms are skipped.
/// The comparison is case-insensitive.
pub fn verify_blob_digest(path: &Path, digest: &str) -> Result<()> {
    let (algorithm, expected) = split_digest(digest)?;
    if algorithm != "sha256" {
        debug!(%digest, "skipping verification for unsupported digest algorithm");
        return Ok(());
    }

    let file = File::open(path)
        .map_err(|e| XenoError::VerificationFailed(format!("{}: {e}", path.display())))?;
    let computed = sha256_hex(file)?;

    if computed.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(XenoError::VerificationFailed(format!(
            "{}: expected {digest}, computed sha256:{computed}",
            path.display()
        )))
    }
}

/// Stream a reader through SHA-256 and return the lowercase hex hash.
fn sha256_hex(mut reader: impl Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| XenoError::VerificationFailed(format!("read error: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // `sha256:<hex>` digest of a byte slice.
    fn digest_of(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hex: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("sha256:{hex}")
    }

    #[test]
    fn test_compression_from_media_type() {
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar+gzip"),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar+zstd"),
            Compression::Zstd
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar"),
            Compression::None
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.docker.image.rootfs.diff.tar.gzip"),
            Compression::None
        );
    }

    #[test]
    fn test_compression_from_path() {
        assert_eq!(
            Compression::from_path(Path::new("/tmp/rootfs.tar.gz")),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_path(Path::new("/tmp/rootfs.tgz")),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_path(Path::new("/tmp/rootfs.tar.zst")),
            Compression::Zstd
        );
        assert_eq!(
            Compression::from_path(Path::new("/tmp/rootfs.tar")),
            Compression::None
        );
    }

    #[test]
    fn test_extract_plain_layer() {
        let dir = TempDir::new().unwrap();
        let layer = dir.path().join("layer.tar");
        let target = dir.path().join("rootfs");

        write_tar(&layer, &[("etc/hostname", b"pivot-test\n")]);

        extract_layer(&layer, &target, Compression::None, true).unwrap();

        let content = fs::read_to_string(target.join("etc/hostname")).unwrap();
        assert_eq!(content, "pivot-test\n");
    }

    #[test]
    fn test_extract_gzip_layer() {
        let dir = TempDir::new().unwrap();
        let layer = dir.path().join("layer.tar.gz");
        let target = dir.path().join("rootfs");

        write_tar_gz(&layer, &[("bin/sh", b"#!/bin/true\n")]);

        extract_layer(&layer, &target, Compression::Gzip, true).unwrap();

        assert!(target.join("bin/sh").is_file());
    }

    #[test]
    fn test_extract_missing_layer() {
        let dir = TempDir::new().unwrap();
        let err = extract_layer(
            &dir.path().join("missing.tar"),
            &dir.path().join("rootfs"),
            Compression::None,
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_whiteout_removes_file_from_lower_layer() {
        let dir = TempDir::new().unwrap();
        let layer1 = dir.path().join("layer1.tar");
        let layer2 = dir.path().join("layer2.tar");
        let target = dir.path().join("rootfs");

        write_tar(&layer1, &[("etc/a", b"a"), ("etc/b", b"b")]);
        write_tar(&layer2, &[("etc/.wh.a", b"")]);

        extract_layer(&layer1, &target, Compression::None, true).unwrap();
        extract_layer(&layer2, &target, Compression::None, true).unwrap();

        assert!(!target.join("etc/a").exists());
        assert!(target.join("etc/b").is_file());
        assert!(!target.join("etc/.wh.a").exists());
    }

    #[test]
    fn test_whiteout_removes_directory() {
        let dir = TempDir::new().unwrap();
        let layer1 = dir.path().join("layer1.tar");
        let layer2 = dir.path().join("layer2.tar");
        let target = dir.path().join("rootfs");

        write_tar(&layer1, &[("opt/tool/bin", b"x"), ("opt/tool/cfg", b"y")]);
        write_tar(&layer2, &[("opt/.wh.tool", b"")]);

        extract_layer(&layer1, &target, Compression::None, true).unwrap();
        extract_layer(&layer2, &target, Compression::None, true).unwrap();

        assert!(!target.join("opt/tool").exists());
        assert!(target.join("opt").is_dir());
    }

    #[test]
    fn test_opaque_whiteout_clears_lower_contents() {
        let dir = TempDir::new().unwrap();
        let layer1 = dir.path().join("layer1.tar");
        let layer2 = dir.path().join("layer2.tar");
        let target = dir.path().join("rootfs");

        write_tar(&layer1, &[("data/keep.txt", b"old")]);
        write_tar(&layer2, &[("data/.wh..wh..opq", b""), ("data/new.txt", b"new")]);

        extract_layer(&layer1, &target, Compression::None, true).unwrap();
        extract_layer(&layer2, &target, Compression::None, true).unwrap();

        assert!(!target.join("data/keep.txt").exists());
        assert_eq!(
            fs::read_to_string(target.join("data/new.txt")).unwrap(),
            "new"
        );
        assert!(!target.join("data/.wh..wh..opq").exists());
    }

    #[test]
    fn test_whiteouts_preserved_when_not_applied() {
        let dir = TempDir::new().unwrap();
        let layer = dir.path().join("layer.tar");
        let target = dir.path().join("rootfs");

        write_tar(&layer, &[("etc/.wh.gone", b"")]);

        extract_layer(&layer, &target, Compression::None, false).unwrap();

        assert!(target.join("etc/.wh.gone").is_file());
    }

    #[test]
    fn test_verify_blob_digest_match() {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("blob");
        fs::write(&blob, b"layer data").unwrap();

        let digest = digest_of(b"layer data");
        verify_blob_digest(&blob, &digest).unwrap();
    }

    #[test]
    fn test_verify_blob_digest_mismatch() {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("blob");
        fs::write(&blob, b"tampered").unwrap();

        let digest = digest_of(b"layer data");
        let err = verify_blob_digest(&blob, &digest).unwrap_err();
        assert!(matches!(err, XenoError::VerificationFailed(_)));
    }

    #[test]
    fn test_verify_blob_digest_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("blob");
        fs::write(&blob, b"layer data").unwrap();

        let digest = digest_of(b"layer data").to_uppercase();
        let digest = digest.replace("SHA256", "sha256");
        verify_blob_digest(&blob, &digest).unwrap();
    }

    #[test]
    fn test_verify_blob_digest_unknown_algorithm_skipped() {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("blob");
        fs::write(&blob, b"anything").unwrap();

        verify_blob_digest(&blob, "sha512:0000").unwrap();
    }

    // Build a plain tar with the given (path, content) entries.
    fn write_tar(path: &Path, files: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);

        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }

        builder.finish().unwrap();
    }

    // Build a gzip-compressed tar with the given entries.
    fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        use flate2::write::GzEncoder;
        use flate2::Compression as GzLevel;

        let file = fs::File::create(path).unwrap();
        let encoder = GzEncoder::new(file, GzLevel::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }

        builder.finish().unwrap();
    }
}
