//! Version check pipeline for a single image

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use crate::engine::EngineGateway;
use crate::reference::ImageReference;
use crate::version::credentials::CredentialResolver;
use crate::version::error::RegistryError;
use crate::version::registries::RegistryClient;
use crate::version::resolver::{VersionInfo, resolve};

/// Checks one image against its registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ImageChecker: Send + Sync {
    async fn check(&self, image: &str) -> Result<VersionInfo, RegistryError>;
}

/// [`ImageChecker`] backed by the registry families and the local engine
pub struct RegistryChecker {
    registries: RegistryClient,
    credentials: CredentialResolver,
    engine: Arc<dyn EngineGateway>,
}

impl RegistryChecker {
    pub fn new(
        registries: RegistryClient,
        credentials: CredentialResolver,
        engine: Arc<dyn EngineGateway>,
    ) -> Self {
        Self {
            registries,
            credentials,
            engine,
        }
    }

    /// Digest of the image the workload runs, from the engine's repo digests.
    ///
    /// Engine failures degrade to an unknown digest.
    async fn current_digest(&self, image: &str, reference: &ImageReference) -> Option<String> {
        if let Some(digest) = &reference.digest {
            return Some(digest.clone());
        }

        let repo_digests = match self.engine.image_digests(image).await {
            Ok(digests) => digests,
            Err(e) => {
                warn!("Failed to read local digests of {}: {}", image, e);
                return None;
            }
        };

        repo_digests
            .iter()
            .map(|raw| ImageReference::parse(raw))
            .find(|local| local.same_repository(reference))
            .and_then(|local| local.digest)
    }
}

#[async_trait::async_trait]
impl ImageChecker for RegistryChecker {
    async fn check(&self, image: &str) -> Result<VersionInfo, RegistryError> {
        let reference = ImageReference::parse(image);
        let registry = self.registries.registry_for(&reference);
        let credentials = self.credentials.resolve(&reference);
        debug!(
            "Checking {} via {} registry",
            reference,
            registry.family().as_str()
        );

        let latest = async {
            match reference.tag {
                Some(_) => {
                    registry
                        .resolve_digest(&reference, credentials.as_ref())
                        .await
                }
                None => Ok(None),
            }
        };
        let tags = registry.list_tags(&reference, credentials.as_ref());
        let (latest, tags) = futures::try_join!(latest, tags)?;

        let current_digest = self.current_digest(image, &reference).await;
        let mut info = resolve(
            image,
            &reference,
            &tags,
            current_digest.as_deref(),
            latest.as_ref(),
        );
        info.source_url = registry.source_url(&reference);

        debug!(
            "Checked {}: update_available={} latest={:?}",
            image, info.update_available, info.latest_version
        );
        Ok(info)
    }
}
