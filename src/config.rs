use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default age after which a scan re-checks an image, in milliseconds (6 hours)
pub const DEFAULT_REFRESH_INTERVAL_MS: i64 = 6 * 60 * 60 * 1000;

/// Delay between starting each check in a bulk refresh to avoid rate limiting (10ms)
pub const FETCH_STAGGER_DELAY_MS: u64 = 10;

/// Default interval between full scans in watch mode, in seconds (1 hour)
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60 * 60;

// =============================================================================
// Registry protocol constants
// =============================================================================

/// Retries after the first attempt for transient registry failures
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base backoff before the first retry, doubled for each further attempt
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

/// Upper bound on followed tag-list pages per repository
pub const MAX_TAG_PAGES: usize = 10;

/// User agent sent to every registry
pub const USER_AGENT: &str = concat!("dockup/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdaterConfig {
    pub cache: CacheConfig,
    pub registry: RegistryConfig,
    pub credentials: CredentialsConfig,
    pub compose: ComposeConfig,
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Age in milliseconds after which a scan re-checks an image
    pub refresh_interval: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

/// Registry protocol configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Hosts contacted over plain http
    pub insecure: Vec<String>,
    /// Platform used to pick an entry from a manifest list; defaults to the host
    pub platform: Option<PlatformConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            insecure: Vec::new(),
            platform: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    pub os: String,
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Registry credentials, resolved per host by [`crate::version::credentials::CredentialResolver`]
#[derive(Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CredentialsConfig {
    pub docker_hub: Option<DockerHubCredentials>,
    pub mirror: Option<MirrorCredentials>,
    pub ghcr: Option<GhcrCredentials>,
    /// Basic credentials keyed by registry host
    pub registries: HashMap<String, BasicCredentials>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hosts: Vec<&String> = self.registries.keys().collect();
        hosts.sort();
        f.debug_struct("CredentialsConfig")
            .field("docker_hub", &self.docker_hub.is_some())
            .field("mirror", &self.mirror.as_ref().map(|m| &m.host))
            .field("ghcr", &self.ghcr.is_some())
            .field("registries", &hosts)
            .finish()
    }
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct DockerHubCredentials {
    pub username: String,
    pub token: String,
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct MirrorCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct GhcrCredentials {
    #[serde(default)]
    pub username: Option<String>,
    pub token: String,
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl CredentialsConfig {
    /// Apply `DOCKERHUB_USERNAME`/`DOCKERHUB_TOKEN` and `GHCR_TOKEN` on top of the file values
    pub fn with_env_overrides(mut self, env: impl Fn(&str) -> Option<String>) -> Self {
        if let (Some(username), Some(token)) = (env("DOCKERHUB_USERNAME"), env("DOCKERHUB_TOKEN"))
        {
            self.docker_hub = Some(DockerHubCredentials { username, token });
        }

        if let Some(token) = env("GHCR_TOKEN") {
            let username = self.ghcr.take().and_then(|g| g.username);
            self.ghcr = Some(GhcrCredentials { username, token });
        }

        self
    }
}

/// Compose driver configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ComposeConfig {
    /// Container CLI providing the `compose` plugin
    pub binary: String,
    /// Directory holding one sub-directory per compose project
    pub projects_dir: Option<PathBuf>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            projects_dir: None,
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<UpdaterConfig>(&content).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => UpdaterConfig::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    fn with_env_overrides(mut self, env: impl Fn(&str) -> Option<String>) -> Self {
        self.credentials = self.credentials.with_env_overrides(env);
        self
    }
}

/// Returns the path to the data directory for dockup.
/// Uses $XDG_DATA_HOME/dockup if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/dockup,
/// or ./dockup if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the version database file.
pub fn db_path() -> PathBuf {
    data_dir().join("versions.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("dockup.log")
}

/// Returns the default configuration file path.
pub fn config_path() -> PathBuf {
    config_path_with_env(std::env::var("XDG_CONFIG_HOME").ok(), dirs::home_dir())
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("dockup")
}

fn config_path_with_env(xdg_config_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    xdg_config_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dockup")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn updater_config_from_partial_object_uses_defaults_for_missing_fields() {
        let result = serde_json::from_value::<UpdaterConfig>(json!({
            "cache": {
                "refreshInterval": 1000
            }
        }))
        .unwrap();

        assert_eq!(result.cache.refresh_interval, 1000);
        assert_eq!(result.registry, RegistryConfig::default());
        assert_eq!(result.compose, ComposeConfig::default());
    }

    #[test]
    fn updater_config_from_full_object_parses_all_fields() {
        let result = serde_json::from_value::<UpdaterConfig>(json!({
            "cache": { "refreshInterval": 5000 },
            "registry": {
                "maxRetries": 4,
                "retryBaseDelayMs": 10,
                "insecure": ["localhost:5000"],
                "platform": { "os": "linux", "architecture": "arm64", "variant": "v8" }
            },
            "credentials": {
                "dockerHub": { "username": "hubuser", "token": "hubtoken" },
                "mirror": { "host": "mirror.internal", "username": "m", "password": "p" },
                "ghcr": { "token": "ghp_x" },
                "registries": { "registry.example.com": { "username": "u", "password": "pw" } }
            },
            "compose": { "binary": "podman", "projectsDir": "/opt/stacks" }
        }))
        .unwrap();

        assert_eq!(result.cache.refresh_interval, 5000);
        assert_eq!(
            result.registry,
            RegistryConfig {
                max_retries: 4,
                retry_base_delay_ms: 10,
                insecure: vec!["localhost:5000".to_string()],
                platform: Some(PlatformConfig {
                    os: "linux".to_string(),
                    architecture: "arm64".to_string(),
                    variant: Some("v8".to_string()),
                }),
            }
        );
        assert_eq!(
            result.credentials.docker_hub.as_ref().map(|c| c.username.as_str()),
            Some("hubuser")
        );
        assert_eq!(
            result.credentials.mirror.as_ref().map(|m| m.host.as_str()),
            Some("mirror.internal")
        );
        assert!(result.credentials.registries.contains_key("registry.example.com"));
        assert_eq!(
            result.compose,
            ComposeConfig {
                binary: "podman".to_string(),
                projects_dir: Some(PathBuf::from("/opt/stacks")),
            }
        );
    }

    #[test]
    fn credentials_debug_does_not_leak_secrets() {
        let credentials = CredentialsConfig {
            docker_hub: Some(DockerHubCredentials {
                username: "hubuser".to_string(),
                token: "super-secret".to_string(),
            }),
            ..Default::default()
        };

        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("hubuser"));
    }

    #[test]
    fn env_overrides_replace_file_credentials() {
        let env = HashMap::from([
            ("DOCKERHUB_USERNAME", "env-user"),
            ("DOCKERHUB_TOKEN", "env-token"),
            ("GHCR_TOKEN", "ghp_env"),
        ]);
        let credentials = CredentialsConfig {
            ghcr: Some(GhcrCredentials {
                username: Some("octocat".to_string()),
                token: "ghp_file".to_string(),
            }),
            ..Default::default()
        }
        .with_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        let hub = credentials.docker_hub.unwrap();
        assert_eq!(hub.username, "env-user");
        assert_eq!(hub.token, "env-token");
        let ghcr = credentials.ghcr.unwrap();
        assert_eq!(ghcr.username.as_deref(), Some("octocat"));
        assert_eq!(ghcr.token, "ghp_env");
    }

    #[test]
    fn env_overrides_require_both_docker_hub_variables() {
        let credentials = CredentialsConfig::default()
            .with_env_overrides(|key| (key == "DOCKERHUB_USERNAME").then(|| "u".to_string()));

        assert!(credentials.docker_hub.is_none());
    }

    #[test]
    fn load_returns_defaults_for_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = UpdaterConfig::load(&dir.path().join("absent.json")).unwrap();

        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.registry, RegistryConfig::default());
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let result = UpdaterConfig::load(file.path());

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/dockup"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/dockup"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./dockup"));
    }

    #[test]
    fn config_path_with_env_prefers_xdg_config_home() {
        assert_eq!(
            config_path_with_env(Some("/etc/xdg".to_string()), Some(PathBuf::from("/home/u"))),
            PathBuf::from("/etc/xdg/dockup/config.json")
        );
        assert_eq!(
            config_path_with_env(None, Some(PathBuf::from("/home/u"))),
            PathBuf::from("/home/u/.config/dockup/config.json")
        );
    }
}
