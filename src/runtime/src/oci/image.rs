//! Local OCI image layouts.
//!
//! Loads an image from an on-disk OCI layout directory: `oci-layout`
//! marker, `index.json`, and content-addressed blobs under
//! `blobs/<algorithm>/<hash>`.

use std::path::{Path, PathBuf};

use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use xenomorph_core::error::{Result, XenoError};

use super::split_digest;

/// An OCI image loaded from a layout directory.
#[derive(Debug)]
pub struct ImageLayout {
    /// Root directory of the layout
    root: PathBuf,

    /// Layer blobs in application order (bottom to top)
    layers: Vec<LayerBlob>,

    /// Parsed image configuration
    config: ImageConfig,
}

/// One layer blob referenced by the manifest.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    /// Path of the blob on disk
    pub path: PathBuf,
    /// Content digest (`algorithm:hash`)
    pub digest: String,
    /// Full media type string
    pub media_type: String,
    /// Declared blob size in bytes
    pub size: u64,
}

/// Runtime-relevant subset of the OCI image configuration.
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    /// Entrypoint command
    pub entrypoint: Option<Vec<String>>,

    /// Default command arguments
    pub cmd: Option<Vec<String>>,

    /// Environment variables as key-value pairs
    pub env: Vec<(String, String)>,

    /// Working directory
    pub working_dir: Option<String>,

    /// Uncompressed layer digests, in application order
    pub diff_ids: Vec<String>,
}

impl ImageLayout {
    /// Whether `path` is an OCI layout directory.
    pub fn is_layout(path: &Path) -> bool {
        path.join("oci-layout").is_file()
    }

    /// Load an OCI image from a layout directory.
    ///
    /// The first manifest descriptor in `index.json` is selected; no
    /// platform matching is performed.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout markers are missing, or the
    /// index, manifest, or configuration cannot be parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        validate_layout(&root)?;

        let index = load_index(&root)?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| {
                XenoError::InvalidImage(format!(
                    "no manifests in {}/index.json",
                    root.display()
                ))
            })?
            .digest()
            .to_string();

        let manifest = load_manifest(&root, &manifest_digest)?;

        let config_digest = manifest.config().digest().to_string();
        let config = load_config(&root, &config_digest)?;

        let mut layers = Vec::with_capacity(manifest.layers().len());
        for descriptor in manifest.layers() {
            let digest = descriptor.digest().to_string();
            layers.push(LayerBlob {
                path: blob_path(&root, &digest)?,
                digest,
                media_type: descriptor.media_type().to_string(),
                size: descriptor.size() as u64,
            });
        }

        Ok(Self {
            root,
            layers,
            config,
        })
    }

    /// Layer blobs in application order.
    pub fn layers(&self) -> &[LayerBlob] {
        &self.layers
    }

    /// The parsed image configuration.
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// The layout root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Compute the on-disk path of a blob inside a layout.
pub fn blob_path(root: &Path, digest: &str) -> Result<PathBuf> {
    let (algorithm, hash) = split_digest(digest)?;
    Ok(root.join("blobs").join(algorithm).join(hash))
}

fn validate_layout(root: &Path) -> Result<()> {
    if !root.join("oci-layout").is_file() {
        return Err(XenoError::InvalidImage(format!(
            "not an OCI layout: missing oci-layout file in {}",
            root.display()
        )));
    }
    if !root.join("index.json").is_file() {
        return Err(XenoError::InvalidImage(format!(
            "not an OCI layout: missing index.json in {}",
            root.display()
        )));
    }
    if !root.join("blobs").is_dir() {
        return Err(XenoError::InvalidImage(format!(
            "not an OCI layout: missing blobs directory in {}",
            root.display()
        )));
    }
    Ok(())
}

fn load_index(root: &Path) -> Result<ImageIndex> {
    let index_path = root.join("index.json");
    let content = std::fs::read_to_string(&index_path).map_err(|e| {
        XenoError::InvalidImage(format!("failed to read {}: {e}", index_path.display()))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| XenoError::ManifestParse(format!("{}: {e}", index_path.display())))
}

fn load_manifest(root: &Path, digest: &str) -> Result<ImageManifest> {
    let path = blob_path(root, digest)?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| XenoError::ManifestParse(format!("failed to read {}: {e}", path.display())))?;

    serde_json::from_str(&content)
        .map_err(|e| XenoError::ManifestParse(format!("{digest}: {e}")))
}

fn load_config(root: &Path, digest: &str) -> Result<ImageConfig> {
    let path = blob_path(root, digest)?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| XenoError::ConfigParse(format!("failed to read {}: {e}", path.display())))?;

    let configuration: ImageConfiguration = serde_json::from_str(&content)
        .map_err(|e| XenoError::ConfigParse(format!("{digest}: {e}")))?;

    Ok(ImageConfig::from_configuration(&configuration))
}

impl ImageConfig {
    /// Extract the runtime-relevant fields from a full OCI
    /// configuration document.
    fn from_configuration(configuration: &ImageConfiguration) -> Self {
        let config = configuration.config();

        let entrypoint = config.as_ref().and_then(|c| c.entrypoint().clone());
        let cmd = config.as_ref().and_then(|c| c.cmd().clone());
        let working_dir = config.as_ref().and_then(|c| c.working_dir().clone());

        let env = config
            .as_ref()
            .and_then(|c| c.env().as_ref())
            .map(|env_list| {
                env_list
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let diff_ids = configuration.rootfs().diff_ids().clone();

        Self {
            entrypoint,
            cmd,
            env,
            working_dir,
            diff_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_layout() {
        let dir = TempDir::new().unwrap();
        assert!(!ImageLayout::is_layout(dir.path()));

        fs::write(
            dir.path().join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .unwrap();
        assert!(ImageLayout::is_layout(dir.path()));
    }

    #[test]
    fn test_open_missing_index() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .unwrap();

        let err = ImageLayout::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("index.json"));
    }

    #[test]
    fn test_open_missing_blobs() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("index.json"), "{}").unwrap();

        let err = ImageLayout::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("blobs"));
    }

    #[test]
    fn test_blob_path() {
        let root = PathBuf::from("/images/base");
        let path = blob_path(&root, "sha256:abc123").unwrap();
        assert_eq!(path, PathBuf::from("/images/base/blobs/sha256/abc123"));
    }

    #[test]
    fn test_blob_path_rejects_bare_hash() {
        let root = PathBuf::from("/images/base");
        assert!(blob_path(&root, "abc123").is_err());
    }
}
