//! Rolling updates of compose projects
//!
//! - [`target`]: grouping containers into update targets
//! - [`event`]: progress events streamed during a run
//! - [`orchestrator`]: the sequential pull-and-restart run
//! - [`scan`]: periodic refresh of every image in use

pub mod event;
pub mod orchestrator;
pub mod scan;
pub mod target;

pub use event::{ProgressEvent, UpdateStep, UpdateSummary};
pub use orchestrator::UpdateOrchestrator;
pub use target::{TargetKind, UpdateTarget};
