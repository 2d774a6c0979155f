//! Root filesystem builder.
//!
//! Materializes a populated directory from an image source: a local
//! tarball, a local OCI layout, or a registry reference (delegated to
//! the registry client). Also provides the sizing helpers the caller
//! uses to dimension a tmpfs for the target directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use xenomorph_core::error::{Result, XenoError};

use crate::oci::{
    extract_layer, verify_blob_digest, AnonymousRegistry, Compression, ImageConfig, ImageLayout,
    ImageReference, RegistryClient,
};

/// 32 MiB floor for directory-based size estimates.
const MIN_DIR_ESTIMATE: u64 = 32 * 1024 * 1024;

/// Default estimate for registry images whose size is unknown.
const REGISTRY_ESTIMATE: u64 = 1024 * 1024 * 1024;

/// Minimum memory headroom reserved from the new root's budget.
const MIN_HEADROOM: u64 = 256 * 1024 * 1024;

/// Options for a rootfs build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Verify layer blobs against their manifest digests
    pub verify_digests: bool,

    /// Apply OCI whiteout markers during extraction
    pub apply_whiteouts: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            verify_digests: true,
            apply_whiteouts: true,
        }
    }
}

/// Outcome of a rootfs build.
#[derive(Debug)]
pub struct BuildResult {
    /// Directory the rootfs was materialized into
    pub rootfs_path: PathBuf,

    /// Number of layers applied
    pub layer_count: usize,

    /// Total extracted size in bytes
    pub total_size: u64,

    /// Image configuration, when the source carries one
    pub image_config: Option<ImageConfig>,
}

/// Classified image source.
#[derive(Debug)]
enum ImageSource {
    Tarball(PathBuf),
    Layout(PathBuf),
    Registry(ImageReference),
}

fn classify_source(image: &str) -> Result<ImageSource> {
    if image.ends_with(".tar") || image.ends_with(".tar.gz") || image.ends_with(".tgz") {
        return Ok(ImageSource::Tarball(PathBuf::from(image)));
    }

    let path = Path::new(image);
    if path.is_dir() && ImageLayout::is_layout(path) {
        return Ok(ImageSource::Layout(path.to_path_buf()));
    }

    Ok(ImageSource::Registry(ImageReference::parse(image)?))
}

/// Build a root filesystem from `image` into `target_dir`.
///
/// # Errors
///
/// Returns an error if the source is invalid, a layer fails digest
/// verification or extraction, or (for registry references) the
/// download fails.
pub fn build(image: &str, target_dir: &Path, options: &BuildOptions) -> Result<BuildResult> {
    fs::create_dir_all(target_dir)?;

    let result = match classify_source(image)? {
        ImageSource::Tarball(path) => build_from_tarball(&path, target_dir, options),
        ImageSource::Layout(path) => build_from_layout(&path, target_dir, options),
        ImageSource::Registry(reference) => build_from_registry(&reference, target_dir, options),
    }?;

    info!(
        rootfs = %result.rootfs_path.display(),
        layers = result.layer_count,
        total_size = result.total_size,
        "rootfs build complete"
    );

    Ok(result)
}

/// Single-layer build from a local tarball.
fn build_from_tarball(
    tarball: &Path,
    target_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildResult> {
    if !tarball.is_file() {
        return Err(XenoError::InvalidImage(format!(
            "tarball not found: {}",
            tarball.display()
        )));
    }

    let compression = Compression::from_path(tarball);
    debug!(tarball = %tarball.display(), %compression, "extracting rootfs tarball");

    extract_layer(tarball, target_dir, compression, options.apply_whiteouts)?;

    Ok(BuildResult {
        rootfs_path: target_dir.to_path_buf(),
        layer_count: 1,
        total_size: dir_size(target_dir),
        image_config: None,
    })
}

/// Multi-layer build from a local OCI layout.
fn build_from_layout(
    layout_dir: &Path,
    target_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildResult> {
    let layout = ImageLayout::open(layout_dir)?;

    info!(
        layout = %layout_dir.display(),
        layers = layout.layers().len(),
        "building rootfs from OCI layout"
    );

    for layer in layout.layers() {
        if options.verify_digests {
            verify_blob_digest(&layer.path, &layer.digest)?;
        }
        let compression = Compression::from_media_type(&layer.media_type);
        debug!(digest = %layer.digest, %compression, "applying layer");
        extract_layer(&layer.path, target_dir, compression, options.apply_whiteouts)?;
    }

    Ok(BuildResult {
        rootfs_path: target_dir.to_path_buf(),
        layer_count: layout.layers().len(),
        total_size: dir_size(target_dir),
        image_config: Some(layout.config().clone()),
    })
}

/// Registry build, delegated to the registry client.
fn build_from_registry(
    reference: &ImageReference,
    _target_dir: &Path,
    _options: &BuildOptions,
) -> Result<BuildResult> {
    let client = AnonymousRegistry::new(reference.registry.clone());

    match client.get_manifest(&reference.repository, &reference.tag) {
        Ok(_) => Err(XenoError::NotImplemented(
            "registry image assembly".to_string(),
        )),
        Err(XenoError::NotImplemented(detail)) => Err(XenoError::DownloadFailed(format!(
            "{}: {detail}",
            reference.full_reference()
        ))),
        Err(other) => Err(other),
    }
}

/// Estimate how much space materializing `image` will take.
///
/// Tarballs: file size ×3 when gzip-compressed, ×1 otherwise.
/// Layout directories: recursive content size +50%, floored at
/// 32 MiB. Registry references: a flat 1 GiB default.
pub fn estimate_image_size(image: &str) -> Result<u64> {
    match classify_source(image)? {
        ImageSource::Tarball(path) => {
            let len = fs::metadata(&path)
                .map_err(|e| XenoError::InvalidImage(format!("{}: {e}", path.display())))?
                .len();
            let factor = match Compression::from_path(&path) {
                Compression::None => 1,
                _ => 3,
            };
            Ok(len * factor)
        }
        ImageSource::Layout(path) => {
            let content = dir_size(&path);
            Ok((content + content / 2).max(MIN_DIR_ESTIMATE))
        }
        ImageSource::Registry(_) => Ok(REGISTRY_ESTIMATE),
    }
}

/// Check that the system can spare `required` bytes of memory while
/// keeping headroom of `max(10% of total, 256 MiB)`.
pub fn check_available_memory(required: u64) -> Result<()> {
    let content = fs::read_to_string("/proc/meminfo")
        .map_err(|e| XenoError::ProcNotAvailable(format!("/proc/meminfo: {e}")))?;
    let (total, available) = parse_meminfo(&content)?;

    let headroom = (total / 10).max(MIN_HEADROOM);
    if available.saturating_sub(headroom) < required {
        return Err(XenoError::InsufficientMemory {
            required,
            available,
        });
    }

    debug!(required, available, headroom, "memory check passed");
    Ok(())
}

/// Parse `/proc/meminfo`, returning (total, available) in bytes.
///
/// `MemAvailable` is used when the kernel reports it; otherwise
/// available memory is estimated as MemFree + Buffers + Cached.
pub(crate) fn parse_meminfo(content: &str) -> Result<(u64, u64)> {
    let mut total = None;
    let mut mem_available = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kb) = rest
            .split_ascii_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = kb * 1024;
        match key {
            "MemTotal" => total = Some(bytes),
            "MemAvailable" => mem_available = Some(bytes),
            "MemFree" => free = bytes,
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            _ => {}
        }
    }

    let total =
        total.ok_or_else(|| XenoError::ProcNotAvailable("MemTotal missing".to_string()))?;
    let available = mem_available.unwrap_or(free + buffers + cached);
    Ok((total, available))
}

/// Recursive on-disk size of a directory, not following symlinks.
pub(crate) fn dir_size(path: &Path) -> u64 {
    let mut size = 0;
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.path().symlink_metadata() else {
            continue;
        };
        if meta.is_dir() {
            size += dir_size(&entry.path());
        } else {
            size += meta.len();
        }
    }
    size
}
