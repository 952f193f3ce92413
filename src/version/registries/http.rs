//! HTTP plumbing shared by the registry families: retries, auth challenges,
//! token exchange and manifest content negotiation.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{RegistryConfig, USER_AGENT};
use crate::version::credentials::{AuthScheme, RegistryCredentials};
use crate::version::error::RegistryError;
use crate::version::registry::{ManifestDescriptor, Platform};

pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Accept header offering both single-platform manifests and manifest lists
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Bounded retry with exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// No retries; used where a single attempt is wanted
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: ChallengeScheme,
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeScheme {
    Bearer,
    Basic,
}

/// Parse a challenge such as
/// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io"`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
    let scheme = if scheme.eq_ignore_ascii_case("bearer") {
        ChallengeScheme::Bearer
    } else if scheme.eq_ignore_ascii_case("basic") {
        ChallengeScheme::Basic
    } else {
        return None;
    };

    let mut challenge = Challenge {
        scheme,
        realm: None,
        service: None,
        scope: None,
    };

    for (key, value) in split_params(params) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = Some(value),
            "service" => challenge.service = Some(value),
            "scope" => challenge.scope = Some(value),
            _ => {}
        }
    }

    Some(challenge)
}

/// Split `k="v",k2="v2"` respecting commas inside quoted values (scopes contain them)
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut rest = params.trim();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        let after = &rest[eq + 1..];
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };
        result.push((key, value.to_string()));
        rest = remaining.trim_start_matches([',', ' ']);
    }

    result
}

/// `Authorization` value for credentials sent as-is (no token exchange)
pub fn direct_authorization(credentials: &RegistryCredentials) -> String {
    match credentials.scheme {
        AuthScheme::Bearer => format!("Bearer {}", STANDARD.encode(&credentials.secret)),
        AuthScheme::Basic => format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", credentials.username, credentials.secret))
        ),
    }
}

/// Token endpoint response; registries use either field name
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Manifest body fields needed for digest resolution
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestBody {
    media_type: Option<String>,
    manifests: Option<Vec<ManifestEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Pick the manifest-list entry for `platform`: exact match including variant,
/// then os/architecture, then the first entry.
pub fn select_platform<'a>(
    entries: &'a [ManifestEntry],
    platform: &Platform,
) -> Option<&'a ManifestEntry> {
    let same_arch = |entry: &&ManifestEntry| {
        entry
            .platform
            .as_ref()
            .is_some_and(|p| p.os == platform.os && p.architecture == platform.architecture)
    };

    entries
        .iter()
        .filter(same_arch)
        .find(|entry| {
            platform.variant.is_none()
                || entry.platform.as_ref().and_then(|p| p.variant.as_ref())
                    == platform.variant.as_ref()
        })
        .or_else(|| entries.iter().find(same_arch))
        .or_else(|| entries.first())
}

/// Resolve the next page from a `Link: <url>; rel="next"` header
pub fn next_link(headers: &HeaderMap, base_url: &str) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        if target.starts_with("http://") || target.starts_with("https://") {
            Some(target.to_string())
        } else {
            Some(format!("{}{}", base_url.trim_end_matches('/'), target))
        }
    })
}

/// Map a response status to the registry error taxonomy.
///
/// Returns `Ok(None)` for 404 so callers can treat a missing repository or tag
/// as a normal negative.
pub fn check_status(
    response: Response,
    registry: &str,
    url: &str,
) -> Result<Option<Response>, RegistryError> {
    let status = response.status();

    if status.is_success() {
        return Ok(Some(response));
    }

    match status {
        StatusCode::NOT_FOUND => Ok(None),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized {
            registry: registry.to_string(),
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            })
        }
        _ => {
            warn!("Registry {} returned status {}: {}", registry, status, url);
            Err(RegistryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

/// HTTP client with the retry policy and target platform of one registry family
pub struct RegistryHttp {
    client: reqwest::Client,
    retry: RetryPolicy,
    platform: Platform,
}

impl RegistryHttp {
    pub fn new(retry: RetryPolicy, platform: Platform) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to create HTTP client"),
            retry,
            platform,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request built by `build`, retrying network failures and 5xx responses.
    ///
    /// Any other response, including 4xx, is returned to the caller untouched.
    pub async fn send(
        &self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<Response, RegistryError> {
        let mut attempt = 0;
        loop {
            let error = match build(&self.client).send().await {
                Ok(response) if response.status().is_server_error() => RegistryError::Status {
                    status: response.status().as_u16(),
                    url: response.url().to_string(),
                },
                Ok(response) => return Ok(response),
                Err(e) => RegistryError::Network(e),
            };

            if attempt >= self.retry.max_retries || !error.is_retryable() {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                "Retrying registry request after {:?} (attempt {}): {}",
                delay,
                attempt + 1,
                error
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Exchange optional credentials for a bearer token scoped to `scope`
    pub async fn fetch_token(
        &self,
        registry: &str,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String, RegistryError> {
        let mut params = vec![("scope", scope)];
        if let Some(service) = service {
            params.push(("service", service));
        }
        let url = Url::parse_with_params(realm, &params)
            .map_err(|e| RegistryError::InvalidResponse(format!("Invalid token realm {realm}: {e}")))?;

        debug!("Requesting registry token for {} ({})", scope, registry);
        let response = self
            .send(|client| {
                let request = client.get(url.clone());
                match credentials {
                    Some(c) if c.scheme == AuthScheme::Basic => {
                        request.basic_auth(&c.username, Some(&c.secret))
                    }
                    _ => request,
                }
            })
            .await?;

        let Some(response) = check_status(response, registry, url.as_str())? else {
            return Err(RegistryError::InvalidResponse(format!(
                "Token endpoint {realm} not found"
            )));
        };

        let body: TokenResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse token response from {}: {}", registry, e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::InvalidResponse("Token response without token".into()))
    }

    /// Fetch the manifest at `url` and describe it.
    ///
    /// When the registry answers with a manifest list, the entry for the configured
    /// platform is selected (first entry if none matches).
    pub async fn fetch_manifest(
        &self,
        registry: &str,
        url: &str,
        authorization: Option<&str>,
    ) -> Result<Option<ManifestDescriptor>, RegistryError> {
        let response = self
            .send(|client| {
                let request = client.get(url).header(ACCEPT, MANIFEST_ACCEPT);
                match authorization {
                    Some(value) => request.header(AUTHORIZATION, value),
                    None => request,
                }
            })
            .await?;

        let Some(response) = check_status(response, registry, url)? else {
            debug!("Manifest not found: {}", url);
            return Ok(None);
        };

        let header_digest = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string());

        let body = response.bytes().await?;
        let manifest: ManifestBody = serde_json::from_slice(&body).map_err(|e| {
            warn!("Failed to parse manifest from {}: {}", url, e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let digest = header_digest
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(&body))));
        let media_type = content_type
            .filter(|t| t.starts_with("application/vnd."))
            .or(manifest.media_type)
            .unwrap_or_else(|| MEDIA_TYPE_DOCKER_MANIFEST.to_string());

        let entries = manifest.manifests.unwrap_or_default();
        let platforms = entries.iter().filter_map(|e| e.platform.clone()).collect();
        let platform_digest =
            select_platform(&entries, &self.platform).map(|entry| entry.digest.clone());

        Ok(Some(ManifestDescriptor {
            digest,
            media_type,
            size: body.len() as u64,
            platforms,
            platform_digest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use rstest::rstest;

    fn http() -> RegistryHttp {
        RegistryHttp::new(
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::ZERO,
            },
            Platform::new("linux", "arm64"),
        )
    }

    fn entry(digest: &str, arch: &str, variant: Option<&str>) -> ManifestEntry {
        ManifestEntry {
            digest: digest.to_string(),
            platform: Some(Platform {
                os: "linux".to_string(),
                architecture: arch.to_string(),
                variant: variant.map(str::to_string),
            }),
        }
    }

    #[test]
    fn parse_challenge_extracts_bearer_parameters() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:org/app:pull,push""#,
        )
        .unwrap();

        assert_eq!(
            challenge,
            Challenge {
                scheme: ChallengeScheme::Bearer,
                realm: Some("https://ghcr.io/token".to_string()),
                service: Some("ghcr.io".to_string()),
                scope: Some("repository:org/app:pull,push".to_string()),
            }
        );
    }

    #[rstest]
    #[case(r#"Basic realm="Registry Realm""#, Some(ChallengeScheme::Basic))]
    #[case("bearer realm=https://auth.example.com/token", Some(ChallengeScheme::Bearer))]
    #[case("Negotiate", None)]
    fn parse_challenge_recognizes_schemes(
        #[case] header: &str,
        #[case] expected: Option<ChallengeScheme>,
    ) {
        assert_eq!(parse_challenge(header).map(|c| c.scheme), expected);
    }

    #[test]
    fn direct_authorization_encodes_secret() {
        let bearer = RegistryCredentials::bearer("token", "ghp_abc");
        let basic = RegistryCredentials::basic("user", "pass");

        assert_eq!(direct_authorization(&bearer), "Bearer Z2hwX2FiYw==");
        assert_eq!(direct_authorization(&basic), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn select_platform_prefers_exact_variant_match() {
        let entries = vec![
            entry("sha256:amd64", "amd64", None),
            entry("sha256:armv6", "arm", Some("v6")),
            entry("sha256:armv7", "arm", Some("v7")),
        ];
        let platform = Platform {
            os: "linux".to_string(),
            architecture: "arm".to_string(),
            variant: Some("v7".to_string()),
        };

        assert_eq!(
            select_platform(&entries, &platform).map(|e| e.digest.as_str()),
            Some("sha256:armv7")
        );
    }

    #[test]
    fn select_platform_falls_back_to_first_entry() {
        let entries = vec![
            entry("sha256:amd64", "amd64", None),
            entry("sha256:s390x", "s390x", None),
        ];

        assert_eq!(
            select_platform(&entries, &Platform::new("linux", "riscv64")).map(|e| e.digest.as_str()),
            Some("sha256:amd64")
        );
        assert!(select_platform(&[], &Platform::new("linux", "amd64")).is_none());
    }

    #[test]
    fn next_link_resolves_relative_targets() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            r#"</v2/org/app/tags/list?n=100&last=1.9>; rel="next""#.parse().unwrap(),
        );

        assert_eq!(
            next_link(&headers, "https://registry.example.com/"),
            Some("https://registry.example.com/v2/org/app/tags/list?n=100&last=1.9".to_string())
        );
        assert_eq!(next_link(&HeaderMap::new(), "https://registry.example.com"), None);
    }

    #[tokio::test]
    async fn send_retries_server_errors_up_to_the_limit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let url = format!("{}/v2/", server.url());
        let result = http().send(|client| client.get(&url)).await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(RegistryError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn send_does_not_retry_client_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/missing/manifests/1.0")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/v2/missing/manifests/1.0", server.url());
        let response = http().send(|client| client.get(&url)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetch_manifest_selects_platform_from_manifest_list() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/library/redis/manifests/7")
            .match_header("accept", mockito::Matcher::Regex("manifest.list.v2".into()))
            .with_status(200)
            .with_header("content-type", MEDIA_TYPE_DOCKER_MANIFEST_LIST)
            .with_header("docker-content-digest", "sha256:list")
            .with_body(
                r#"{
                    "schemaVersion": 2,
                    "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
                    "manifests": [
                        {"digest": "sha256:amd64", "size": 1, "platform": {"os": "linux", "architecture": "amd64"}},
                        {"digest": "sha256:arm64", "size": 1, "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}}
                    ]
                }"#,
            )
            .create_async()
            .await;

        let url = format!("{}/v2/library/redis/manifests/7", server.url());
        let descriptor = http()
            .fetch_manifest("docker.io", &url, None)
            .await
            .unwrap()
            .unwrap();

        mock.assert_async().await;
        assert_eq!(descriptor.digest, "sha256:list");
        assert_eq!(descriptor.media_type, MEDIA_TYPE_DOCKER_MANIFEST_LIST);
        assert_eq!(descriptor.platforms.len(), 2);
        assert_eq!(descriptor.platform_digest.as_deref(), Some("sha256:arm64"));
    }

    #[tokio::test]
    async fn fetch_manifest_hashes_body_when_digest_header_missing() {
        let mut server = Server::new_async().await;
        let body = r#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","layers":[]}"#;
        let _mock = server
            .mock("GET", "/v2/org/app/manifests/1.0.0")
            .with_status(200)
            .with_header("content-type", MEDIA_TYPE_OCI_MANIFEST)
            .with_body(body)
            .create_async()
            .await;

        let url = format!("{}/v2/org/app/manifests/1.0.0", server.url());
        let descriptor = http()
            .fetch_manifest("registry.example.com", &url, Some("Bearer t"))
            .await
            .unwrap()
            .unwrap();

        let expected = format!("sha256:{}", hex::encode(Sha256::digest(body.as_bytes())));
        assert_eq!(descriptor.digest, expected);
        assert_eq!(descriptor.media_type, MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(descriptor.size, body.len() as u64);
        assert!(descriptor.platforms.is_empty());
        assert_eq!(descriptor.platform_digest, None);
    }

    #[tokio::test]
    async fn fetch_manifest_returns_none_for_missing_tag() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2/org/app/manifests/9.9.9")
            .with_status(404)
            .with_body(r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#)
            .create_async()
            .await;

        let url = format!("{}/v2/org/app/manifests/9.9.9", server.url());
        let result = http().fetch_manifest("registry.example.com", &url, None).await;

        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn fetch_manifest_maps_forbidden_to_unauthorized() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v2/private/app/manifests/1")
            .with_status(403)
            .create_async()
            .await;

        let url = format!("{}/v2/private/app/manifests/1", server.url());
        let result = http().fetch_manifest("registry.example.com", &url, None).await;

        assert!(matches!(
            result,
            Err(RegistryError::Unauthorized { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn fetch_token_reads_either_token_field() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/token")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("scope".into(), "repository:org/app:pull".into()),
                mockito::Matcher::UrlEncoded("service".into(), "registry.example.com".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "abc123"}"#)
            .create_async()
            .await;

        let realm = format!("{}/token", server.url());
        let token = http()
            .fetch_token(
                "registry.example.com",
                &realm,
                Some("registry.example.com"),
                "repository:org/app:pull",
                None,
            )
            .await
            .unwrap();

        assert_eq!(token, "abc123");
    }
}
