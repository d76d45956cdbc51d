//! Image reference parsing.
//!
//! An image reference decomposes into an optional registry host, a
//! repository path and a tag. The registry component is only recognized when
//! the first path segment looks like a host (contains a dot or a port
//! separator), which matches how the Docker CLI disambiguates
//! `myorg/image` from `registry.example.com/image`.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default tag applied when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host (e.g. `registry.example.com:5000`), if any.
    pub registry: Option<String>,

    /// Repository path, without the registry prefix.
    pub repository: String,

    /// Image tag; defaults to `latest`.
    pub tag: String,
}

impl ImageRef {
    /// Parses a reference of the form `[registry/]repository[:tag]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use armada_core::image::ImageRef;
    ///
    /// let image = ImageRef::parse("registry.example.com:5000/acme/api:1.2").unwrap();
    /// assert_eq!(image.registry.as_deref(), Some("registry.example.com:5000"));
    /// assert_eq!(image.repository, "acme/api");
    /// assert_eq!(image.tag, "1.2");
    /// ```
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(ConfigError::InvalidImage(reference.to_string()));
        }

        // The tag separator is the last colon that appears after the last
        // slash; a colon before a slash belongs to a registry port.
        let (name, tag) = match reference.rfind(':') {
            Some(idx) if idx > reference.rfind('/').map_or(0, |s| s) => {
                (&reference[..idx], &reference[idx + 1..])
            }
            _ => (reference, DEFAULT_TAG),
        };

        if name.is_empty() || tag.is_empty() {
            return Err(ConfigError::InvalidImage(reference.to_string()));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((head, rest)) if head.contains('.') || head.contains(':') => {
                (Some(head.to_string()), rest.to_string())
            }
            _ => (None, name.to_string()),
        };

        if repository.is_empty() {
            return Err(ConfigError::InvalidImage(reference.to_string()));
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Returns the repository including the registry prefix, without a tag.
    ///
    /// This is the value the daemon expects as the image name for pulls.
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Returns the full reference, including the tag.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name(), self.tag)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let image = ImageRef::parse("redis").unwrap();
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "redis");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.reference(), "redis:latest");
    }

    #[test]
    fn test_parse_with_tag() {
        let image = ImageRef::parse("acme/zookeeper:3.9").unwrap();
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "acme/zookeeper");
        assert_eq!(image.tag, "3.9");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageRef::parse("registry.example.com:5000/acme/api").unwrap();
        assert_eq!(image.registry.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(image.repository, "acme/api");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.name(), "registry.example.com:5000/acme/api");
    }

    #[test]
    fn test_org_prefix_is_not_a_registry() {
        let image = ImageRef::parse("acme/api:2").unwrap();
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "acme/api");
    }

    #[test]
    fn test_invalid_references() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("redis:").is_err());
    }
}
