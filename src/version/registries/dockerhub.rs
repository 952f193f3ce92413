//! Docker Hub registry implementation
//!
//! Manifests come from the distribution endpoint (`registry-1.docker.io`) with a token from
//! `auth.docker.io`. Tags come from the Hub API, which lists them newest first and does not
//! need a token for public repositories. Private repositories are invisible to the anonymous
//! Hub API, so a missing repository falls back to the distribution tag list when credentials
//! are configured.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MAX_TAG_PAGES;
use crate::reference::ImageReference;
use crate::version::credentials::RegistryCredentials;
use crate::version::error::RegistryError;
use crate::version::registries::http::{RegistryHttp, check_status};
use crate::version::registry::{ManifestDescriptor, Registry, RegistryFamily};

const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";
const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";
const DEFAULT_HUB_URL: &str = "https://hub.docker.com";

const TOKEN_SERVICE: &str = "registry.docker.io";
const HUB_PAGE_SIZE: usize = 100;

/// One page of the Hub API tag listing
#[derive(Debug, Deserialize)]
struct HubTagPage {
    next: Option<String>,
    #[serde(default)]
    results: Vec<HubTag>,
}

#[derive(Debug, Deserialize)]
struct HubTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DistributionTagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry implementation for Docker Hub
pub struct DockerHubRegistry {
    http: RegistryHttp,
    registry_url: String,
    auth_url: String,
    hub_url: String,
}

impl DockerHubRegistry {
    /// Creates a Docker Hub client against custom endpoints
    pub fn new(registry_url: &str, auth_url: &str, hub_url: &str, http: RegistryHttp) -> Self {
        Self {
            http,
            registry_url: registry_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
            hub_url: hub_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates a Docker Hub client against the public endpoints
    pub fn with_http(http: RegistryHttp) -> Self {
        Self::new(DEFAULT_REGISTRY_URL, DEFAULT_AUTH_URL, DEFAULT_HUB_URL, http)
    }

    async fn token(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String, RegistryError> {
        let realm = format!("{}/token", self.auth_url);
        let scope = format!("repository:{}:pull", reference.repository);
        self.http
            .fetch_token(
                &reference.registry,
                &realm,
                Some(TOKEN_SERVICE),
                &scope,
                credentials,
            )
            .await
    }

    /// Walk the Hub API tag pages. `None` when the repository is unknown to the Hub API.
    async fn hub_tags(
        &self,
        reference: &ImageReference,
    ) -> Result<Option<Vec<String>>, RegistryError> {
        let mut url = format!(
            "{}/v2/repositories/{}/tags?page_size={}",
            self.hub_url, reference.repository, HUB_PAGE_SIZE
        );
        let mut tags = Vec::new();

        for _ in 0..MAX_TAG_PAGES {
            let response = self.http.send(|client| client.get(&url)).await?;
            let Some(response) = check_status(response, &reference.registry, &url)? else {
                return Ok(None);
            };

            let page: HubTagPage = response.json().await.map_err(|e| {
                warn!("Failed to parse Docker Hub tag page: {}", e);
                RegistryError::InvalidResponse(e.to_string())
            })?;
            tags.extend(page.results.into_iter().map(|t| t.name));

            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(Some(tags))
    }

    async fn registry_tags(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Vec<String>, RegistryError> {
        let token = self.token(reference, credentials).await?;
        let url = format!(
            "{}/v2/{}/tags/list",
            self.registry_url, reference.repository
        );

        let response = self
            .http
            .send(|client| client.get(&url).bearer_auth(&token))
            .await?;
        let Some(response) = check_status(response, &reference.registry, &url)? else {
            return Ok(Vec::new());
        };

        let list: DistributionTagList = response.json().await.map_err(|e| {
            warn!("Failed to parse Docker Hub tag list: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;
        Ok(list.tags.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Registry for DockerHubRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::DockerHub
    }

    async fn list_tags(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Vec<String>, RegistryError> {
        match self.hub_tags(reference).await? {
            Some(tags) => Ok(tags),
            None if credentials.is_some() => {
                debug!(
                    "{} unknown to the Hub API, listing tags from the registry",
                    reference.name()
                );
                self.registry_tags(reference, credentials).await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Option<ManifestDescriptor>, RegistryError> {
        let token = self.token(reference, credentials).await?;
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url,
            reference.repository,
            reference.manifest_reference()
        );

        self.http
            .fetch_manifest(&reference.registry, &url, Some(&format!("Bearer {token}")))
            .await
    }

    fn source_url(&self, reference: &ImageReference) -> Option<String> {
        Some(match reference.repository.strip_prefix("library/") {
            Some(name) => format!("https://hub.docker.com/_/{name}"),
            None => format!("https://hub.docker.com/r/{}", reference.repository),
        })
    }
}
