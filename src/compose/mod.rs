//! Compose process driver
//!
//! The orchestrator drives projects through this contract and never interprets the
//! external tool's output beyond the success flag.

pub mod cli;

use std::sync::Arc;

use serde::Serialize;

pub use cli::ComposeCli;

/// Receives output lines as the external process produces them
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one compose invocation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ComposeOutcome {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComposeOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Error text for reporting: the error if set, else the tail of the output
    pub fn failure_message(&self) -> String {
        match &self.error {
            Some(error) if !error.trim().is_empty() => error.trim().to_string(),
            _ => self
                .output
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("compose command failed")
                .trim()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpOptions {
    /// Build images before starting
    pub build: bool,
    /// Always pull images before starting
    pub pull: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownOptions {
    pub volumes: bool,
    pub remove_orphans: bool,
}

#[async_trait::async_trait]
pub trait ComposeDriver: Send + Sync {
    /// Pull the images of a project, or of one of its services
    async fn pull(
        &self,
        project: &str,
        service: Option<&str>,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome;

    /// Create or recreate and start a project, or one of its services, detached
    async fn up(
        &self,
        project: &str,
        service: Option<&str>,
        options: UpOptions,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome;

    async fn down(&self, project: &str, options: DownOptions) -> ComposeOutcome;
}
