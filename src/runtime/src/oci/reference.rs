//! OCI image reference parsing.
//!
//! Parses image references like `quay.io/prometheus/prometheus:v2.45.0`
//! into structured components, canonicalizing Docker Hub shorthand.

use xenomorph_core::error::{Result, XenoError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g. "quay.io", "registry-1.docker.io")
    pub registry: String,
    /// Repository path (e.g. "library/alpine", "prometheus/prometheus")
    pub repository: String,
    /// Tag (e.g. "latest", "v2.45.0")
    pub tag: String,
    /// Digest (e.g. "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supported forms:
    /// - `alpine` → registry-1.docker.io/library/alpine:latest
    /// - `nginx:1.25` → registry-1.docker.io/library/nginx:1.25
    /// - `quay.io/prometheus/prometheus:v2.45.0`
    /// - `ghcr.io/org/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(XenoError::InvalidImage("empty image reference".to_string()));
        }

        // Split off the digest first (@ separator).
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(XenoError::InvalidImage(format!(
                        "invalid digest in reference '{reference}': expected algorithm:hash"
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // Split the tag: the last ':' after the last '/'. A ':' before
        // the last '/' belongs to a registry port, not a tag.
        let (name, tag) = match name_tag.rfind(':') {
            Some(colon) if colon > name_tag.rfind('/').map_or(0, |s| s) => (
                &name_tag[..colon],
                name_tag[colon + 1..].to_string(),
            ),
            _ => (name_tag, DEFAULT_TAG.to_string()),
        };

        if name.is_empty() {
            return Err(XenoError::InvalidImage(format!(
                "missing repository in reference '{reference}'"
            )));
        }

        let (registry, repository) = split_registry_repository(name)?;

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Format the canonical reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}:{}", self.registry, self.repository, self.tag);
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository components.
///
/// The first path segment is a registry if it contains a dot or a
/// colon, or is "localhost"; otherwise the whole name is a repository
/// on the default registry, with `library/` synthesized for
/// single-segment Docker Hub names.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(XenoError::InvalidImage(format!(
                    "empty repository in reference '{name}'"
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{name}")
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_name() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "1.25");
    }

    #[test]
    fn test_parse_full_reference() {
        let r = ImageReference::parse("quay.io/prometheus/prometheus:v2.45.0").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "prometheus/prometheus");
        assert_eq!(r.tag, "v2.45.0");
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageReference::parse("someuser/someimage").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "someuser/someimage");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("registry.local:5000/tools/base:v1").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "tools/base");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn test_parse_registry_with_port_no_tag() {
        let r = ImageReference::parse("registry.local:5000/tools/base").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "tools/base");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_localhost() {
        let r = ImageReference::parse("localhost/myimage:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, "test");
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse(
            "ghcr.io/org/image@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/image");
        assert_eq!(
            r.digest.as_deref(),
            Some("sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
        );
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/org/image:v1@sha256:abc123").unwrap();
        assert_eq!(r.tag, "v1");
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(ImageReference::parse("nginx@notadigest").is_err());
    }

    #[test]
    fn test_parse_empty() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
    }

    #[test]
    fn test_round_trip_explicit_reference() {
        let input = "quay.io/prometheus/prometheus:v2.45.0";
        let r = ImageReference::parse(input).unwrap();
        assert_eq!(r.full_reference(), input);
    }

    #[test]
    fn test_canonicalization() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(
            r.full_reference(),
            "registry-1.docker.io/library/alpine:latest"
        );
    }

    #[test]
    fn test_display_matches_full_reference() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(format!("{r}"), "registry-1.docker.io/library/nginx:1.25");
    }
}
