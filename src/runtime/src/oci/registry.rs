//! Registry client boundary.
//!
//! The builder talks to a registry through this trait. The in-tree
//! implementation is the anonymous stub: local tarballs and OCI
//! layouts are the supported image sources, and a registry pull
//! surfaces as a download failure upstream.

use xenomorph_core::error::{Result, XenoError};

/// Operations a registry client must provide.
pub trait RegistryClient {
    /// Fetch a manifest by tag or digest.
    fn get_manifest(&self, repository: &str, reference: &str) -> Result<Vec<u8>>;

    /// Fetch a blob by digest.
    fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;

    /// Whether a blob exists without fetching it.
    fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool>;
}

/// Anonymous registry stub.
#[derive(Debug, Clone)]
pub struct AnonymousRegistry {
    registry: String,
}

impl AnonymousRegistry {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
        }
    }

    fn unimplemented(&self, what: &str) -> XenoError {
        XenoError::NotImplemented(format!("registry {what} from {}", self.registry))
    }
}

impl RegistryClient for AnonymousRegistry {
    fn get_manifest(&self, repository: &str, reference: &str) -> Result<Vec<u8>> {
        Err(self.unimplemented(&format!("manifest pull of {repository}:{reference}")))
    }

    fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        Err(self.unimplemented(&format!("blob pull of {repository}@{digest}")))
    }

    fn blob_exists(&self, _repository: &str, _digest: &str) -> Result<bool> {
        Err(self.unimplemented("blob probe"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_registry_is_not_implemented() {
        let client = AnonymousRegistry::new("registry-1.docker.io");
        let err = client.get_manifest("library/alpine", "latest").unwrap_err();
        assert!(matches!(err, XenoError::NotImplemented(_)));
        assert!(err.to_string().contains("library/alpine"));
    }
}
