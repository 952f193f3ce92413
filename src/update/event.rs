//! Progress events streamed to the caller of an update run

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateStep {
    Checking,
    Pulling,
    Restarting,
}

/// Outcome counts of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpdateSummary {
    pub updated: usize,
    pub failed: usize,
}

/// One event of an update run.
///
/// Per target: `Start`, any number of `Progress`, then exactly one of `Complete` or
/// `Error`. `Done` always ends the run; `Aborted` precedes it when the targets
/// could not be enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Start {
        target: String,
        total: usize,
        /// 1-based position of the target in the run
        current: usize,
    },
    Progress {
        target: String,
        step: UpdateStep,
    },
    Complete {
        target: String,
        restarted: bool,
    },
    Error {
        target: String,
        message: String,
    },
    Aborted {
        message: String,
    },
    Done {
        summary: UpdateSummary,
    },
}

impl ProgressEvent {
    /// Target the event belongs to, `None` for run-level events
    pub fn target(&self) -> Option<&str> {
        match self {
            ProgressEvent::Start { target, .. }
            | ProgressEvent::Progress { target, .. }
            | ProgressEvent::Complete { target, .. }
            | ProgressEvent::Error { target, .. } => Some(target),
            ProgressEvent::Aborted { .. } | ProgressEvent::Done { .. } => None,
        }
    }
}
