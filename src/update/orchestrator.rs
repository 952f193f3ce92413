//! Sequential pull-and-restart across update targets

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compose::{ComposeDriver, OutputCallback, UpOptions};
use crate::engine::EngineGateway;
use crate::update::event::{ProgressEvent, UpdateStep, UpdateSummary};
use crate::update::target::{UpdateTarget, discover_targets, resolve_named, select_updatable};
use crate::version::cache::UpdateCache;

/// Drives update runs.
///
/// Targets are processed one at a time. A failing target is reported and the run
/// moves on; cancellation is honoured between targets only, so a pull or restart
/// that has started always finishes.
pub struct UpdateOrchestrator {
    engine: Arc<dyn EngineGateway>,
    compose: Arc<dyn ComposeDriver>,
    cache: Arc<UpdateCache>,
}

/// Event sink that keeps the run going when the receiver has gone away
struct EventSink {
    events: mpsc::Sender<ProgressEvent>,
    closed: bool,
}

impl EventSink {
    async fn emit(&mut self, event: ProgressEvent) {
        if self.closed {
            return;
        }
        if self.events.send(event).await.is_err() {
            debug!("Progress receiver closed, continuing without events");
            self.closed = true;
        }
    }
}

impl UpdateOrchestrator {
    pub fn new(
        engine: Arc<dyn EngineGateway>,
        compose: Arc<dyn ComposeDriver>,
        cache: Arc<UpdateCache>,
    ) -> Self {
        Self {
            engine,
            compose,
            cache,
        }
    }

    /// Update every target that uses an image with a known update
    pub async fn update_all(
        &self,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> UpdateSummary {
        let mut sink = EventSink {
            events,
            closed: false,
        };

        let containers = match self.engine.list_containers().await {
            Ok(containers) => containers,
            Err(e) => return Self::abort(&mut sink, e.to_string()).await,
        };
        let targets = select_updatable(discover_targets(&containers), &self.cache);
        info!("Updating {} targets with available updates", targets.len());

        self.run(targets, &mut sink, &cancel).await
    }

    /// Update the named projects or containers
    pub async fn update_targets(
        &self,
        names: &[String],
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> UpdateSummary {
        let mut sink = EventSink {
            events,
            closed: false,
        };

        let containers = match self.engine.list_containers().await {
            Ok(containers) => containers,
            Err(e) => return Self::abort(&mut sink, e.to_string()).await,
        };
        let targets = resolve_named(names, &containers);

        self.run(targets, &mut sink, &cancel).await
    }

    async fn abort(sink: &mut EventSink, message: String) -> UpdateSummary {
        error!("Cannot enumerate update targets: {}", message);
        let summary = UpdateSummary::default();
        sink.emit(ProgressEvent::Aborted { message }).await;
        sink.emit(ProgressEvent::Done { summary }).await;
        summary
    }

    async fn run(
        &self,
        targets: Vec<UpdateTarget>,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> UpdateSummary {
        let total = targets.len();
        let mut summary = UpdateSummary::default();

        for (index, mut target) in targets.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Update run cancelled with {} of {} targets left",
                    total - index,
                    total
                );
                break;
            }

            sink.emit(ProgressEvent::Start {
                target: target.name.clone(),
                total,
                current: index + 1,
            })
            .await;

            match self.update_target(&mut target, sink).await {
                Ok(restarted) => {
                    summary.updated += 1;
                    sink.emit(ProgressEvent::Complete {
                        target: target.name.clone(),
                        restarted,
                    })
                    .await;
                }
                Err(message) => {
                    warn!("Update of {} failed: {}", target.name, message);
                    summary.failed += 1;
                    sink.emit(ProgressEvent::Error {
                        target: target.name.clone(),
                        message,
                    })
                    .await;
                }
            }
        }

        info!(
            "Update run finished: {} updated, {} failed",
            summary.updated, summary.failed
        );
        sink.emit(ProgressEvent::Done { summary }).await;
        summary
    }

    /// Check, pull and, if it was running, restart one target. Returns whether it restarted.
    async fn update_target(
        &self,
        target: &mut UpdateTarget,
        sink: &mut EventSink,
    ) -> Result<bool, String> {
        let name = target.name.clone();

        sink.emit(ProgressEvent::Progress {
            target: name.clone(),
            step: UpdateStep::Checking,
        })
        .await;
        let snapshot = self
            .engine
            .list_containers()
            .await
            .map_err(|e| format!("Failed to read container state: {e}"))?;
        target.observe(&snapshot);

        let (project, service) = target
            .compose_scope()
            .ok_or_else(|| format!("{name} is not managed by compose"))?;

        sink.emit(ProgressEvent::Progress {
            target: name.clone(),
            step: UpdateStep::Pulling,
        })
        .await;
        let pulled = self
            .compose
            .pull(project, service, Some(log_output(&name)))
            .await;
        if !pulled.success {
            return Err(pulled.failure_message());
        }
        self.cache.invalidate(Some(&target.images));

        if !target.was_running {
            debug!("{} was not running, skipping restart", name);
            return Ok(false);
        }

        sink.emit(ProgressEvent::Progress {
            target: name.clone(),
            step: UpdateStep::Restarting,
        })
        .await;
        let started = self
            .compose
            .up(project, service, UpOptions::default(), Some(log_output(&name)))
            .await;
        if !started.success {
            return Err(started.failure_message());
        }

        Ok(true)
    }
}

fn log_output(target: &str) -> OutputCallback {
    let target = target.to_string();
    Arc::new(move |line: &str| debug!("[{}] {}", target, line))
}
