//! OCI distribution protocol registry (ghcr.io, quay.io, self-hosted registries)

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MAX_TAG_PAGES;
use crate::reference::ImageReference;
use crate::version::credentials::{AuthScheme, RegistryCredentials};
use crate::version::error::RegistryError;
use crate::version::registries::http::{
    Challenge, ChallengeScheme, RegistryHttp, check_status, direct_authorization, next_link,
    parse_challenge,
};
use crate::version::registry::{ManifestDescriptor, Registry, RegistryFamily};

/// Response from the tag listing endpoint
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry implementation for the OCI distribution protocol
pub struct DistributionRegistry {
    http: RegistryHttp,
    host: String,
    base_url: String,
    /// Auth challenge learned from `/v2/`; `Some(None)` means no auth required
    challenge: Mutex<Option<Option<Challenge>>>,
}

impl DistributionRegistry {
    /// Creates a registry client for `host` reachable at `base_url`
    pub fn new(host: &str, base_url: &str, http: RegistryHttp) -> Self {
        Self {
            http,
            host: host.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            challenge: Mutex::new(None),
        }
    }

    /// Ping `/v2/` once to learn how this registry wants to be authenticated
    async fn challenge(&self) -> Result<Option<Challenge>, RegistryError> {
        if let Some(known) = self.challenge.lock().clone() {
            return Ok(known);
        }

        let url = format!("{}/v2/", self.base_url);
        let response = self.http.send(|client| client.get(&url)).await?;

        let challenge = if response.status() == StatusCode::UNAUTHORIZED {
            response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_challenge)
        } else {
            None
        };
        debug!("Auth challenge for {}: {:?}", self.host, challenge);

        *self.challenge.lock() = Some(challenge.clone());
        Ok(challenge)
    }

    /// Build the `Authorization` header for one request against `reference`.
    ///
    /// Bearer challenges get a fresh token scoped to the repository.
    async fn authorization(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Option<String>, RegistryError> {
        if let Some(creds) = credentials
            && creds.scheme == AuthScheme::Bearer
        {
            return Ok(Some(direct_authorization(creds)));
        }

        match self.challenge().await? {
            Some(Challenge {
                scheme: ChallengeScheme::Bearer,
                realm: Some(realm),
                service,
                ..
            }) => {
                let scope = format!("repository:{}:pull", reference.repository);
                let token = self
                    .http
                    .fetch_token(&self.host, &realm, service.as_deref(), &scope, credentials)
                    .await?;
                Ok(Some(format!("Bearer {token}")))
            }
            Some(Challenge {
                scheme: ChallengeScheme::Basic,
                ..
            }) => Ok(credentials.map(direct_authorization)),
            Some(_) => {
                warn!("Bearer challenge without realm from {}", self.host);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Registry for DistributionRegistry {
    fn family(&self) -> RegistryFamily {
        RegistryFamily::Distribution
    }

    async fn list_tags(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Vec<String>, RegistryError> {
        let authorization = self.authorization(reference, credentials).await?;
        let mut url = format!(
            "{}/v2/{}/tags/list?n=1000",
            self.base_url, reference.repository
        );
        let mut tags = Vec::new();

        for _ in 0..MAX_TAG_PAGES {
            let response = self
                .http
                .send(|client| {
                    let request = client.get(&url);
                    match &authorization {
                        Some(value) => request.header(AUTHORIZATION, value),
                        None => request,
                    }
                })
                .await?;

            let Some(response) = check_status(response, &self.host, &url)? else {
                debug!("Repository not found: {}", reference.name());
                return Ok(tags);
            };

            let next = next_link(response.headers(), &self.base_url);
            let page: TagList = response.json().await.map_err(|e| {
                warn!("Failed to parse tag list from {}: {}", self.host, e);
                RegistryError::InvalidResponse(e.to_string())
            })?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(tags)
    }

    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Option<ManifestDescriptor>, RegistryError> {
        let authorization = self.authorization(reference, credentials).await?;
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url,
            reference.repository,
            reference.manifest_reference()
        );

        self.http
            .fetch_manifest(&self.host, &url, authorization.as_deref())
            .await
    }

    fn source_url(&self, reference: &ImageReference) -> Option<String> {
        match self.host.as_str() {
            "ghcr.io" => Some(format!("https://github.com/{}", reference.repository)),
            "quay.io" => Some(format!("https://quay.io/repository/{}", reference.repository)),
            _ => None,
        }
    }
}
