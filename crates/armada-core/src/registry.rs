//! Registry credentials and pull retry policies.
//!
//! Registries bind authentication data to a registry host. Before an image
//! is pulled, the image's registry prefix is matched against the declared
//! registries: first by registry name, then by the host of each registry's
//! URL. Credentials are taken as given by the loader; credential-file
//! handling is a collaborator concern.

use serde::{Deserialize, Serialize};

use crate::image::ImageRef;

/// Retry policy applied to image pulls (and the login preceding them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// HTTP status codes that trigger a retry; any other failure is final.
    pub retry_statuses: Vec<u16>,
}

impl Default for PullRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_statuses: Vec::new(),
        }
    }
}

impl PullRetryPolicy {
    /// Returns true if a failure with the given HTTP status should be
    /// retried.
    pub fn should_retry(&self, status: Option<u16>) -> bool {
        match status {
            Some(code) => self.retry_statuses.contains(&code),
            None => false,
        }
    }
}

/// Credentials for a Docker registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Logical name; matched against image registry prefixes.
    pub name: String,

    /// Registry URL or bare host.
    pub registry: String,

    /// Account user name.
    pub username: String,

    /// Account password.
    pub password: String,

    /// Account email, required by some older registries.
    pub email: Option<String>,

    /// Retry policy for pulls against this registry.
    pub retry: Option<PullRetryPolicy>,
}

impl RegistryAuth {
    /// Returns the host component of the registry URL.
    ///
    /// `https://registry.example.com:5000/v2/` yields
    /// `registry.example.com:5000`; a bare host is returned unchanged.
    pub fn host(&self) -> &str {
        let stripped = match self.registry.split_once("://") {
            Some((_, rest)) => rest,
            None => &self.registry,
        };
        stripped.split('/').next().unwrap_or(stripped)
    }

    /// Returns the retry policy, defaulting to a single attempt.
    pub fn retry_policy(&self) -> PullRetryPolicy {
        self.retry.clone().unwrap_or_default()
    }
}

/// Finds the credentials to use for an image, if any.
///
/// The image's registry FQDN is matched against registry names first, then
/// against the host of each registry URL.
pub fn auth_for_image<'a>(registries: &'a [RegistryAuth], image: &ImageRef) -> Option<&'a RegistryAuth> {
    let fqdn = image.registry.as_deref()?;
    registries
        .iter()
        .find(|r| r.name == fqdn)
        .or_else(|| registries.iter().find(|r| r.host() == fqdn))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(name: &str, url: &str) -> RegistryAuth {
        RegistryAuth {
            name: name.to_string(),
            registry: url.to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            email: None,
            retry: None,
        }
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(
            registry("hub", "https://registry.example.com:5000/v2/").host(),
            "registry.example.com:5000"
        );
        assert_eq!(registry("hub", "registry.example.com").host(), "registry.example.com");
    }

    #[test]
    fn test_match_by_name_then_host() {
        let registries = vec![
            registry("registry.example.com", "https://hub.internal/v2/"),
            registry("backup", "https://registry.backup.net/"),
        ];

        let image = ImageRef::parse("registry.example.com/acme/api").unwrap();
        assert_eq!(
            auth_for_image(&registries, &image).map(|r| r.name.as_str()),
            Some("registry.example.com")
        );

        let image = ImageRef::parse("registry.backup.net/acme/api").unwrap();
        assert_eq!(
            auth_for_image(&registries, &image).map(|r| r.name.as_str()),
            Some("backup")
        );
    }

    #[test]
    fn test_no_registry_no_auth() {
        let registries = vec![registry("hub", "https://hub.internal/")];
        let image = ImageRef::parse("redis:7").unwrap();
        assert!(auth_for_image(&registries, &image).is_none());
    }

    #[test]
    fn test_retry_policy() {
        let policy = PullRetryPolicy {
            max_attempts: 3,
            retry_statuses: vec![500, 503],
        };
        assert!(policy.should_retry(Some(503)));
        assert!(!policy.should_retry(Some(404)));
        assert!(!policy.should_retry(None));
    }
}
