//! Update targets derived from the container topology

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::engine::ContainerSummary;
use crate::version::cache::UpdateCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// A whole compose project
    Project,
    /// A single container, addressed by name
    Container,
}

/// One unit of an update run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTarget {
    pub kind: TargetKind,
    pub name: String,
    /// Compose project driving this target; `None` for standalone containers
    pub project: Option<String>,
    /// Compose service, for container targets that belong to a project
    pub service: Option<String>,
    pub was_running: bool,
    pub images: Vec<String>,
}

impl UpdateTarget {
    pub fn project(name: &str) -> Self {
        Self {
            kind: TargetKind::Project,
            name: name.to_string(),
            project: Some(name.to_string()),
            service: None,
            was_running: false,
            images: Vec::new(),
        }
    }

    pub fn container(container: &ContainerSummary) -> Self {
        Self {
            kind: TargetKind::Container,
            name: container.name.clone(),
            project: container.project.clone(),
            service: container.service.clone(),
            was_running: container.is_running(),
            images: vec![container.image.clone()],
        }
    }

    fn covers(&self, container: &ContainerSummary) -> bool {
        match self.kind {
            TargetKind::Project => container.project.as_deref() == Some(self.name.as_str()),
            TargetKind::Container => container.name == self.name,
        }
    }

    /// Refresh `was_running` and `images` from a container snapshot.
    ///
    /// Images seen earlier are kept so a target whose containers are gone still
    /// invalidates what it used.
    pub fn observe(&mut self, containers: &[ContainerSummary]) {
        let covered: Vec<&ContainerSummary> =
            containers.iter().filter(|c| self.covers(c)).collect();

        self.was_running = covered.iter().any(|c| c.is_running());
        for container in covered {
            if !self.images.contains(&container.image) {
                self.images.push(container.image.clone());
            }
        }
    }

    /// `(project, service)` the compose driver acts on, if the target is compose-managed
    pub fn compose_scope(&self) -> Option<(&str, Option<&str>)> {
        let project = self.project.as_deref()?;
        match self.kind {
            TargetKind::Project => Some((project, None)),
            TargetKind::Container => Some((project, Some(self.service.as_deref()?))),
        }
    }
}

/// Group containers into targets: one per compose project (by name), then one per
/// standalone container.
pub fn discover_targets(containers: &[ContainerSummary]) -> Vec<UpdateTarget> {
    let mut projects: BTreeMap<&str, UpdateTarget> = BTreeMap::new();
    let mut standalone = Vec::new();

    for container in containers {
        match container.project.as_deref() {
            Some(project) => {
                projects
                    .entry(project)
                    .or_insert_with(|| UpdateTarget::project(project))
                    .observe(std::slice::from_ref(container));
            }
            None => standalone.push(UpdateTarget::container(container)),
        }
    }

    standalone.sort_by(|a, b| a.name.cmp(&b.name));
    projects.into_values().chain(standalone).collect()
}

/// Targets using at least one image the cache knows to have an update.
///
/// Standalone containers are skipped because there is no compose project to pull
/// and recreate them with.
pub fn select_updatable(targets: Vec<UpdateTarget>, cache: &UpdateCache) -> Vec<UpdateTarget> {
    targets
        .into_iter()
        .filter(|target| {
            cache
                .get_many(&target.images)
                .iter()
                .any(|info| info.update_available)
        })
        .filter(|target| {
            if target.project.is_none() {
                warn!(
                    "Skipping standalone container {}: not managed by compose",
                    target.name
                );
                return false;
            }
            true
        })
        .collect()
}

/// Resolve explicitly named targets: project names first, then container names.
///
/// A name matching nothing becomes a project target without images, so a stopped
/// project that only exists on disk can still be pulled.
pub fn resolve_named(names: &[String], containers: &[ContainerSummary]) -> Vec<UpdateTarget> {
    names
        .iter()
        .map(|name| {
            if containers
                .iter()
                .any(|c| c.project.as_deref() == Some(name.as_str()))
            {
                let mut target = UpdateTarget::project(name);
                target.observe(containers);
                return target;
            }

            match containers.iter().find(|c| &c.name == name) {
                Some(container) => UpdateTarget::container(container),
                None => UpdateTarget::project(name),
            }
        })
        .collect()
}
