//! Registry credential resolution
//!
//! Maps an image reference to optional credentials from static configuration.
//! Unknown registries resolve to `None`, in which case registry calls go out
//! anonymously and any auth failure is reported by the registry client.

use std::fmt;

use crate::config::CredentialsConfig;
use crate::reference::{DEFAULT_REGISTRY, ImageReference};

const GHCR_HOST: &str = "ghcr.io";

/// How a secret is presented to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Username and secret are exchanged for a scoped bearer token
    Basic,
    /// The secret itself is sent as the bearer token; no token exchange
    Bearer,
}

/// Credentials for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub secret: String,
    pub scheme: AuthScheme,
}

impl RegistryCredentials {
    pub fn basic(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            scheme: AuthScheme::Basic,
        }
    }

    pub fn bearer(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            scheme: AuthScheme::Bearer,
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Resolves credentials per registry host
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    config: CredentialsConfig,
}

impl CredentialResolver {
    pub fn new(config: CredentialsConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, reference: &ImageReference) -> Option<RegistryCredentials> {
        let host = reference.registry.as_str();

        if host == DEFAULT_REGISTRY {
            return self
                .config
                .docker_hub
                .as_ref()
                .map(|hub| RegistryCredentials::basic(&hub.username, &hub.token));
        }

        if let Some(mirror) = &self.config.mirror
            && mirror.host.eq_ignore_ascii_case(host)
        {
            return Some(RegistryCredentials::basic(
                &mirror.username,
                &mirror.password,
            ));
        }

        if host == GHCR_HOST
            && let Some(ghcr) = &self.config.ghcr
        {
            let username = ghcr.username.as_deref().unwrap_or("token");
            return Some(RegistryCredentials::bearer(username, &ghcr.token));
        }

        self.config
            .registries
            .iter()
            .find(|(configured, _)| configured.eq_ignore_ascii_case(host))
            .map(|(_, creds)| RegistryCredentials::basic(&creds.username, &creds.password))
    }
}
