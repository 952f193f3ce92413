//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use dockup::config::{CredentialsConfig, RegistryConfig};
use dockup::engine::{DemoBackend, EngineGateway};
use dockup::update::event::ProgressEvent;
use dockup::version::cache::UpdateCache;
use dockup::version::checker::{ImageChecker, RegistryChecker};
use dockup::version::credentials::CredentialResolver;
use dockup::version::error::RegistryError;
use dockup::version::registries::http::{RegistryHttp, RetryPolicy};
use dockup::version::registries::{DistributionRegistry, RegistryClient};
use dockup::version::registry::Platform;
use dockup::version::resolver::VersionInfo;

/// Checker answering from a fixed table; unknown images fail
pub struct TableChecker {
    updates: HashMap<String, bool>,
    calls: Mutex<Vec<String>>,
}

impl TableChecker {
    pub fn new(updates: &[(&str, bool)]) -> Self {
        Self {
            updates: updates
                .iter()
                .map(|(image, update)| (image.to_string(), *update))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageChecker for TableChecker {
    async fn check(&self, image: &str) -> Result<VersionInfo, RegistryError> {
        self.calls.lock().push(image.to_string());
        match self.updates.get(image) {
            Some(update_available) => Ok(version_info(image, *update_available)),
            None => Err(RegistryError::InvalidResponse(format!("unknown image {image}"))),
        }
    }
}

pub fn version_info(image: &str, update_available: bool) -> VersionInfo {
    VersionInfo {
        image: image.to_string(),
        current_version: None,
        latest_version: None,
        current_digest: None,
        latest_digest: None,
        update_available,
        source_url: None,
        checked_at: Utc::now(),
    }
}

/// Cache filled from `updates`, returned with the checker behind it
pub async fn cache_with(updates: &[(&str, bool)]) -> (Arc<UpdateCache>, Arc<TableChecker>) {
    let checker = Arc::new(TableChecker::new(updates));
    let cache = Arc::new(UpdateCache::new(checker.clone()));
    let images: Vec<String> = updates.iter().map(|(image, _)| image.to_string()).collect();
    for result in cache.refresh_many(&images).await {
        result.expect("table checker knows every image");
    }
    (cache, checker)
}

/// Three compose projects plus one standalone container
pub fn homelab() -> Arc<DemoBackend> {
    let backend = Arc::new(DemoBackend::new());
    backend.add_container("media-jellyfin-1", "jellyfin/jellyfin:10.9.0", Some(("media", "jellyfin")), true);
    backend.add_container("media-sonarr-1", "linuxserver/sonarr:4.0.0", Some(("media", "sonarr")), true);
    backend.add_container("monitoring-grafana-1", "grafana/grafana:11.0.0", Some(("monitoring", "grafana")), false);
    backend.add_container("proxy-caddy-1", "caddy:2.7", Some(("proxy", "caddy")), true);
    backend.add_container("scratchpad", "alpine:3.19", None, true);
    backend
}

/// Drain `rx` until every sender is gone
pub async fn collect_events(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn registry_http() -> RegistryHttp {
    RegistryHttp::new(
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
        },
        Platform::new("linux", "amd64"),
    )
}

/// Checker whose `host` registry is served by the mock server at `base_url`
pub fn checker_for(host: &str, base_url: &str, engine: Arc<dyn EngineGateway>) -> RegistryChecker {
    let registries = RegistryClient::from_config(&RegistryConfig::default()).with_registry(
        host,
        Arc::new(DistributionRegistry::new(host, base_url, registry_http())),
    );
    RegistryChecker::new(
        registries,
        CredentialResolver::new(CredentialsConfig::default()),
        engine,
    )
}
