//! Wiring of the engine, compose driver and update cache behind the CLI commands

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::compose::{ComposeCli, ComposeDriver};
use crate::config::UpdaterConfig;
use crate::engine::{DemoBackend, DockerCli, EngineGateway};
use crate::update::event::{ProgressEvent, UpdateSummary};
use crate::update::orchestrator::UpdateOrchestrator;
use crate::update::scan::{self, container_images};
use crate::version::cache::UpdateCache;
use crate::version::checker::{ImageChecker, RegistryChecker};
use crate::version::credentials::CredentialResolver;
use crate::version::registries::RegistryClient;
use crate::version::store::{SqliteStore, VersionStore};

/// Capacity of the progress channel between the orchestrator and the printer
const EVENT_BUFFER: usize = 64;

pub struct App {
    engine: Arc<dyn EngineGateway>,
    compose: Arc<dyn ComposeDriver>,
    cache: Arc<UpdateCache>,
    refresh_interval: Duration,
    /// Check stale in-use images before selecting targets for "update all"
    scan_before_update: bool,
}

/// Which targets an update run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSelection {
    /// Every target with a cached update
    All,
    Named(Vec<String>),
}

/// Line printed by `check` for an image that could not be checked
#[derive(Debug, Serialize)]
struct CheckFailure<'a> {
    image: &'a str,
    error: String,
}

impl App {
    /// Build the application from configuration.
    ///
    /// `demo` swaps the docker CLI and the registries for the in-memory backend, and makes
    /// "update all" scan first since the demo cache starts empty. A store that cannot be
    /// opened leaves the cache in-memory only.
    pub fn new(config: &UpdaterConfig, demo: bool, db_path: Option<&Path>) -> Self {
        let (engine, compose, checker) = if demo {
            info!("Running against the demo backend");
            let backend = Arc::new(DemoBackend::sample());
            (
                backend.clone() as Arc<dyn EngineGateway>,
                backend.clone() as Arc<dyn ComposeDriver>,
                backend as Arc<dyn ImageChecker>,
            )
        } else {
            let engine = Arc::new(DockerCli::new(&config.compose.binary)) as Arc<dyn EngineGateway>;
            let checker = Arc::new(RegistryChecker::new(
                RegistryClient::from_config(&config.registry),
                CredentialResolver::new(config.credentials.clone()),
                Arc::clone(&engine),
            )) as Arc<dyn ImageChecker>;
            (
                engine,
                Arc::new(ComposeCli::from_config(&config.compose)) as Arc<dyn ComposeDriver>,
                checker,
            )
        };

        let cache = match db_path.map(open_store) {
            Some(Ok(store)) => UpdateCache::with_store(checker, store),
            Some(Err(e)) => {
                warn!("Running without a persistent cache: {:#}", e);
                UpdateCache::new(checker)
            }
            None => UpdateCache::new(checker),
        };

        let mut app = Self::from_parts(engine, compose, Arc::new(cache), config);
        app.scan_before_update = demo;
        app
    }

    pub fn from_parts(
        engine: Arc<dyn EngineGateway>,
        compose: Arc<dyn ComposeDriver>,
        cache: Arc<UpdateCache>,
        config: &UpdaterConfig,
    ) -> Self {
        Self {
            engine,
            compose,
            cache,
            refresh_interval: Duration::from_millis(config.cache.refresh_interval.max(0) as u64),
            scan_before_update: false,
        }
    }

    /// Images named on the command line, or every image used by a container
    async fn images_or_all(&self, images: &[String]) -> anyhow::Result<Vec<String>> {
        if !images.is_empty() {
            return Ok(images.to_vec());
        }
        let containers = self
            .engine
            .list_containers()
            .await
            .context("Failed to list containers")?;
        Ok(container_images(&containers))
    }

    /// Refresh `images` (all in-use images when empty) and print one JSON line each.
    ///
    /// Returns the number of images that could not be checked.
    pub async fn check(&self, images: &[String], out: &mut impl Write) -> anyhow::Result<usize> {
        let images = self.images_or_all(images).await?;
        let results = self.cache.refresh_many(&images).await;

        let mut failed = 0;
        for (image, result) in images.iter().zip(results) {
            match result {
                Ok(info) => write_json_line(out, &info)?,
                Err(e) => {
                    failed += 1;
                    write_json_line(
                        out,
                        &CheckFailure {
                            image,
                            error: e.to_string(),
                        },
                    )?;
                }
            }
        }

        Ok(failed)
    }

    /// Print cached entries for `images`, or every cached entry when empty
    pub fn status(&self, images: &[String], out: &mut impl Write) -> anyhow::Result<()> {
        let entries = if images.is_empty() {
            self.cache.get_all()
        } else {
            self.cache.get_many(images)
        };

        for info in &entries {
            write_json_line(out, info)?;
        }
        Ok(())
    }

    /// Run an update and print its progress events as JSON lines
    pub async fn update(
        &self,
        selection: UpdateSelection,
        cancel: CancellationToken,
        out: &mut impl Write,
    ) -> anyhow::Result<UpdateSummary> {
        if self.scan_before_update && selection == UpdateSelection::All {
            match scan::scan_images(self.engine.as_ref(), &self.cache, self.refresh_interval).await {
                Ok(summary) => info!("Scan found {} updates", summary.updates),
                Err(e) => warn!("Scan before update failed: {}", e),
            }
        }

        let orchestrator = UpdateOrchestrator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.compose),
            Arc::clone(&self.cache),
        );
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(EVENT_BUFFER);

        let run = async {
            match &selection {
                UpdateSelection::All => orchestrator.update_all(tx, cancel).await,
                UpdateSelection::Named(names) => orchestrator.update_targets(names, tx, cancel).await,
            }
        };
        let print = async {
            while let Some(event) = rx.recv().await {
                write_json_line(out, &event)?;
            }
            anyhow::Ok(())
        };

        let (summary, printed) = tokio::join!(run, print);
        printed?;
        Ok(summary)
    }

    /// Drop cached entries for `images`, or everything when empty
    pub fn clear(&self, images: &[String]) {
        if images.is_empty() {
            self.cache.invalidate(None);
        } else {
            self.cache.invalidate(Some(images));
        }
    }

    /// Rescan in-use images every `interval` until cancelled
    pub async fn watch(&self, interval: Duration, cancel: CancellationToken) {
        scan::watch(
            self.engine.as_ref(),
            &self.cache,
            interval,
            self.refresh_interval,
            cancel,
        )
        .await
    }
}

fn open_store(db_path: &Path) -> anyhow::Result<Arc<dyn VersionStore>> {
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let store = SqliteStore::new(db_path)?;
    Ok(Arc::new(store))
}

fn write_json_line(out: &mut impl Write, value: &impl Serialize) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
