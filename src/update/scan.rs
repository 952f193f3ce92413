//! Periodic full-scan refresh of every image used by a container

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{ContainerSummary, EngineError, EngineGateway};
use crate::version::cache::UpdateCache;

/// Counts of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Distinct images in use
    pub images: usize,
    /// Images that were missing or stale and got checked
    pub checked: usize,
    pub failed: usize,
    /// Checked images with an update available
    pub updates: usize,
}

/// Distinct images used by `containers`, in first-seen order
pub fn container_images(containers: &[ContainerSummary]) -> Vec<String> {
    let mut seen = HashSet::new();
    containers
        .iter()
        .filter(|c| seen.insert(c.image.as_str()))
        .map(|c| c.image.clone())
        .collect()
}

/// Refresh every in-use image whose cache entry is missing or older than `max_age`
pub async fn scan_images(
    engine: &dyn EngineGateway,
    cache: &UpdateCache,
    max_age: Duration,
) -> Result<ScanSummary, EngineError> {
    let images = container_images(&engine.list_containers().await?);
    let stale = cache.stale_images(&images, max_age);
    info!(
        "Scanning {} of {} images in use",
        stale.len(),
        images.len()
    );

    let mut summary = ScanSummary {
        images: images.len(),
        ..Default::default()
    };
    for result in cache.refresh_many(&stale).await {
        match result {
            Ok(info) => {
                summary.checked += 1;
                if info.update_available {
                    summary.updates += 1;
                }
            }
            Err(e) => {
                warn!("{}", e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Scan immediately, then every `interval`, until `cancel` fires
pub async fn watch(
    engine: &dyn EngineGateway,
    cache: &UpdateCache,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) {
    loop {
        match scan_images(engine, cache, max_age).await {
            Ok(summary) => info!(
                "Scan finished: {} checked, {} failed, {} updates available",
                summary.checked, summary.failed, summary.updates
            ),
            Err(e) => error!("Scan failed: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Watch stopped");
                return;
            }
            _ = sleep(interval) => {}
        }
    }
}
