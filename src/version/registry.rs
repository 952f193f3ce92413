//! Registry trait for querying tags and manifests of container images

use serde::{Deserialize, Serialize};

use crate::config::PlatformConfig;
use crate::reference::ImageReference;
use crate::version::credentials::RegistryCredentials;
use crate::version::error::RegistryError;

/// Family of registry protocol implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryFamily {
    /// Docker Hub (registry-1.docker.io with the Hub API for tags)
    DockerHub,
    /// Any registry speaking the OCI distribution protocol
    Distribution,
}

impl RegistryFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryFamily::DockerHub => "docker_hub",
            RegistryFamily::Distribution => "distribution",
        }
    }
}

/// OS/architecture pair of an image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: None,
        }
    }

    /// Platform of the running host, using OCI architecture names
    pub fn current() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64le",
            other => other,
        };
        Self::new(std::env::consts::OS, architecture)
    }

    /// Configured platform, or the host platform when none is configured
    pub fn from_config(config: Option<&PlatformConfig>) -> Self {
        match config {
            Some(p) => Self {
                os: p.os.clone(),
                architecture: p.architecture.clone(),
                variant: p.variant.clone(),
            },
            None => Self::current(),
        }
    }
}

/// Result of resolving a tag or digest against a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    /// Digest of the manifest returned for the reference (a manifest list for multi-arch images)
    pub digest: String,
    pub media_type: String,
    pub size: u64,
    /// Platforms listed by a manifest list; empty for single-platform manifests
    pub platforms: Vec<Platform>,
    /// Digest of the manifest-list entry selected for the local platform
    pub platform_digest: Option<String>,
}

impl ManifestDescriptor {
    /// Whether `digest` identifies this manifest or its selected platform entry
    pub fn matches(&self, digest: &str) -> bool {
        self.digest == digest || self.platform_digest.as_deref() == Some(digest)
    }
}

/// Capability set of one registry family
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Returns the family this implementation handles
    fn family(&self) -> RegistryFamily;

    /// Lists the tags of the referenced repository.
    ///
    /// A missing repository yields an empty list rather than an error.
    async fn list_tags(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Vec<String>, RegistryError>;

    /// Resolves the reference's tag (or digest) to a manifest descriptor.
    ///
    /// # Returns
    /// * `Ok(Some(descriptor))` - The manifest exists
    /// * `Ok(None)` - Repository or tag not found
    /// * `Err(RegistryError)` - Network, auth or protocol failure
    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Option<ManifestDescriptor>, RegistryError>;

    /// Human-facing page for the repository, if the family has one
    fn source_url(&self, _reference: &ImageReference) -> Option<String> {
        None
    }
}
