//! Registry family implementations and the per-host router

pub mod distribution;
pub mod dockerhub;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

pub use distribution::DistributionRegistry;
pub use dockerhub::DockerHubRegistry;

use crate::config::RegistryConfig;
use crate::reference::ImageReference;
use crate::version::registries::http::{RegistryHttp, RetryPolicy};
use crate::version::registry::{Platform, Registry};

/// Routes an image reference to the registry family serving its host.
///
/// Docker Hub references share one [`DockerHubRegistry`]; every other host gets its own
/// [`DistributionRegistry`], created on first use and reused afterwards so its auth
/// challenge is only probed once.
pub struct RegistryClient {
    retry: RetryPolicy,
    platform: Platform,
    insecure: Vec<String>,
    docker_hub: Arc<dyn Registry>,
    hosts: Mutex<HashMap<String, Arc<dyn Registry>>>,
}

impl RegistryClient {
    pub fn from_config(config: &RegistryConfig) -> Self {
        let retry = RetryPolicy::from_config(config);
        let platform = Platform::from_config(config.platform.as_ref());
        let docker_hub = Arc::new(DockerHubRegistry::with_http(RegistryHttp::new(
            retry,
            platform.clone(),
        )));

        Self {
            retry,
            platform,
            insecure: config
                .insecure
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            docker_hub,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `host` with `registry` instead of the default family
    pub fn with_registry(self, host: &str, registry: Arc<dyn Registry>) -> Self {
        self.hosts
            .lock()
            .insert(host.to_ascii_lowercase(), registry);
        self
    }

    /// Registry serving the reference's host
    pub fn registry_for(&self, reference: &ImageReference) -> Arc<dyn Registry> {
        let host = reference.registry.as_str();
        let mut hosts = self.hosts.lock();

        if let Some(registry) = hosts.get(host) {
            return Arc::clone(registry);
        }
        if reference.is_docker_hub() {
            return Arc::clone(&self.docker_hub);
        }

        let base_url = format!("{}://{}", self.scheme_for(host), host);
        debug!("Creating distribution registry for {} at {}", host, base_url);
        let registry: Arc<dyn Registry> = Arc::new(DistributionRegistry::new(
            host,
            &base_url,
            RegistryHttp::new(self.retry, self.platform.clone()),
        ));
        hosts.insert(host.to_string(), Arc::clone(&registry));
        registry
    }

    fn scheme_for(&self, host: &str) -> &'static str {
        let name = host.split(':').next().unwrap_or(host);
        if self.insecure.iter().any(|h| h == host) || name == "localhost" || name == "127.0.0.1"
        {
            "http"
        } else {
            "https"
        }
    }
}
