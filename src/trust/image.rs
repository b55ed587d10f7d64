//! Image reference parsing and repository normalisation

use std::fmt;

use crate::trust::error::{TrustError, TrustResult};

/// Registry host assumed for repositories without an explicit host
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// API endpoint of the default registry
const DEFAULT_REGISTRY_API_HOST: &str = "registry-1.docker.io";

/// A `repository:tag` image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse a `repository:tag` string.
    ///
    /// Exactly one `:` separator is accepted and neither side may be empty.
    pub fn parse(image: &str) -> TrustResult<Self> {
        let mut parts = image.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(repository), Some(tag), None) if !repository.is_empty() && !tag.is_empty() => {
                Ok(Self {
                    repository: repository.to_string(),
                    tag: tag.to_string(),
                })
            }
            _ => Err(TrustError::Configuration(format!(
                "invalid image reference '{}': expected exactly one ':' between repository and tag",
                image
            ))),
        }
    }

    /// Resolve where this repository lives
    pub fn location(&self) -> RepositoryLocation {
        RepositoryLocation::from_repository(&self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Repository name for an image string, used for allow-list matching before parsing
pub fn repository_of(image: &str) -> &str {
    image.split(':').next().unwrap_or(image)
}

/// Registry host and path of a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLocation {
    /// Canonical registry host (`docker.io` for Docker Hub)
    pub registry: String,
    /// Repository path within the registry
    pub path: String,
}

impl RepositoryLocation {
    pub fn from_repository(repository: &str) -> Self {
        match repository.split_once('/') {
            Some((first, rest)) if first.contains('.') || first == "localhost" => Self {
                registry: canonical_registry(first),
                path: rest.to_string(),
            },
            Some(_) => Self {
                registry: DEFAULT_REGISTRY.to_string(),
                path: repository.to_string(),
            },
            None => Self {
                registry: DEFAULT_REGISTRY.to_string(),
                path: format!("library/{}", repository),
            },
        }
    }

    /// Globally unique name of the trust collection
    pub fn gun(&self) -> String {
        format!("{}/{}", self.registry, self.path)
    }

    /// Host serving the registry API
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DEFAULT_REGISTRY_API_HOST
        } else {
            &self.registry
        }
    }
}

/// Normalise the aliases Docker Hub is known by
pub fn canonical_registry(host: &str) -> String {
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DEFAULT_REGISTRY.to_string()
        }
        other => other.to_string(),
    }
}
