//! In-memory engine, compose backend and registry for offline demos and tests

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::info;

use crate::compose::{ComposeDriver, ComposeOutcome, DownOptions, OutputCallback, UpOptions};
use crate::engine::{ContainerSummary, EngineError, EngineGateway};
use crate::reference::ImageReference;
use crate::version::checker::ImageChecker;
use crate::version::error::RegistryError;
use crate::version::resolver::{VersionInfo, resolve};

#[derive(Debug, Default)]
struct DemoState {
    containers: Vec<ContainerSummary>,
    /// Local digest per image string
    digests: HashMap<String, String>,
    failing_pulls: HashSet<String>,
    failing_ups: HashSet<String>,
    listing_error: Option<String>,
    /// Registry tags per repository name
    published: HashMap<String, Vec<String>>,
    pulls: Vec<String>,
    ups: Vec<String>,
    pull_count: u64,
}

/// Simulated container engine, compose driver and registry sharing one topology
#[derive(Debug, Default)]
pub struct DemoBackend {
    state: Mutex<DemoState>,
}

fn scope(project: &str, service: Option<&str>) -> String {
    match service {
        Some(service) => format!("{project}/{service}"),
        None => project.to_string(),
    }
}

impl DemoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small homelab-style topology used by `--demo`
    pub fn sample() -> Self {
        let backend = Self::new();
        backend.add_container("media-jellyfin-1", "jellyfin/jellyfin:10.9.0", Some(("media", "jellyfin")), true);
        backend.add_container("media-sonarr-1", "lscr.io/linuxserver/sonarr:4.0.0", Some(("media", "sonarr")), true);
        backend.add_container("monitoring-grafana-1", "grafana/grafana:11.0.0", Some(("monitoring", "grafana")), false);
        backend.add_container("monitoring-prometheus-1", "quay.io/prometheus/prometheus:v2.50.0", Some(("monitoring", "prometheus")), true);
        backend.add_container("scratchpad", "alpine:3.19", None, false);
        backend.publish_tags("jellyfin/jellyfin", &["10.8.13", "10.9.0", "10.9.11", "latest"]);
        backend.publish_tags("lscr.io/linuxserver/sonarr", &["4.0.0", "latest", "develop"]);
        backend.publish_tags("grafana/grafana", &["10.4.0", "11.0.0", "11.3.0"]);
        backend.publish_tags("quay.io/prometheus/prometheus", &["v2.50.0", "v2.54.1", "main"]);
        backend.publish_tags("alpine", &["3.19", "3.20", "edge"]);
        backend
    }

    /// Make `tags` the registry's tag list for the repository of `image`
    pub fn publish_tags(&self, image: &str, tags: &[&str]) {
        let name = ImageReference::parse(image).name();
        self.state
            .lock()
            .published
            .insert(name, tags.iter().map(|tag| tag.to_string()).collect());
    }

    /// Add a container; `compose` is its `(project, service)` pair
    pub fn add_container(
        &self,
        name: &str,
        image: &str,
        compose: Option<(&str, &str)>,
        running: bool,
    ) {
        let mut state = self.state.lock();
        let id = format!("{:012x}", state.containers.len() + 1);
        state.containers.push(ContainerSummary {
            id,
            name: name.to_string(),
            image: image.to_string(),
            state: if running { "running" } else { "exited" }.to_string(),
            project: compose.map(|(project, _)| project.to_string()),
            service: compose.map(|(_, service)| service.to_string()),
        });
    }

    pub fn set_image_digest(&self, image: &str, digest: &str) {
        self.state
            .lock()
            .digests
            .insert(image.to_string(), digest.to_string());
    }

    /// Make every pull of `project` fail
    pub fn fail_pull(&self, project: &str) {
        self.state.lock().failing_pulls.insert(project.to_string());
    }

    /// Make every `up` of `project` fail
    pub fn fail_up(&self, project: &str) {
        self.state.lock().failing_ups.insert(project.to_string());
    }

    /// Make container listing fail with `message`
    pub fn fail_listing(&self, message: &str) {
        self.state.lock().listing_error = Some(message.to_string());
    }

    /// Pulled scopes (`project` or `project/service`) in call order
    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().pulls.clone()
    }

    /// Started scopes in call order
    pub fn ups(&self) -> Vec<String> {
        self.state.lock().ups.clone()
    }

    fn in_scope(container: &ContainerSummary, project: &str, service: Option<&str>) -> bool {
        container.project.as_deref() == Some(project)
            && service.is_none_or(|s| container.service.as_deref() == Some(s))
    }
}

#[async_trait::async_trait]
impl EngineGateway for DemoBackend {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let state = self.state.lock();
        match &state.listing_error {
            Some(message) => Err(EngineError::CommandFailed {
                command: "demo ps".to_string(),
                stderr: message.clone(),
            }),
            None => Ok(state.containers.clone()),
        }
    }

    async fn image_digests(&self, image: &str) -> Result<Vec<String>, EngineError> {
        let reference = ImageReference::parse(image);
        Ok(self
            .state
            .lock()
            .digests
            .get(image)
            .map(|digest| vec![format!("{}@{}", reference.name(), digest)])
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ComposeDriver for DemoBackend {
    async fn pull(
        &self,
        project: &str,
        service: Option<&str>,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome {
        let target = scope(project, service);
        let lines: Vec<String> = {
            let mut state = self.state.lock();
            if state.failing_pulls.contains(project) {
                return ComposeOutcome::failed("", format!("pull access denied for {target}"));
            }

            state.pulls.push(target.clone());
            let images: Vec<String> = state
                .containers
                .iter()
                .filter(|c| Self::in_scope(c, project, service))
                .map(|c| c.image.clone())
                .collect();
            for image in &images {
                state.pull_count += 1;
                let digest = format!("sha256:{:064x}", state.pull_count);
                state.digests.insert(image.clone(), digest);
            }
            images.iter().map(|image| format!("Pulled {image}")).collect()
        };

        info!("Demo pull of {}", target);
        if let Some(callback) = &on_output {
            lines.iter().for_each(|line| callback(line));
        }
        ComposeOutcome::succeeded(lines.join("\n"))
    }

    async fn up(
        &self,
        project: &str,
        service: Option<&str>,
        _options: UpOptions,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome {
        let target = scope(project, service);
        let mut state = self.state.lock();
        if state.failing_ups.contains(project) {
            return ComposeOutcome::failed("", format!("failed to recreate {target}"));
        }

        state.ups.push(target.clone());
        for container in state
            .containers
            .iter_mut()
            .filter(|c| Self::in_scope(c, project, service))
        {
            container.state = "running".to_string();
        }
        drop(state);

        let line = format!("Started {target}");
        if let Some(callback) = &on_output {
            callback(&line);
        }
        ComposeOutcome::succeeded(line)
    }

    async fn down(&self, project: &str, _options: DownOptions) -> ComposeOutcome {
        let mut state = self.state.lock();
        for container in state
            .containers
            .iter_mut()
            .filter(|c| Self::in_scope(c, project, None))
        {
            container.state = "exited".to_string();
        }
        ComposeOutcome::succeeded(format!("Stopped {project}"))
    }
}

#[async_trait::async_trait]
impl ImageChecker for DemoBackend {
    async fn check(&self, image: &str) -> Result<VersionInfo, RegistryError> {
        let reference = ImageReference::parse(image);
        let state = self.state.lock();
        let Some(tags) = state.published.get(&reference.name()) else {
            return Err(RegistryError::Status {
                status: 404,
                url: format!("demo://{}", reference.name()),
            });
        };
        let current_digest = state.digests.get(image).map(String::as_str);
        Ok(resolve(image, &reference, tags, current_digest, None))
    }
}
