//! Container engine gateway
//!
//! The update core only needs two things from the engine: a snapshot of the
//! containers and the repo digests of a local image. [`DockerCli`] talks to a real
//! engine through its CLI; [`DemoBackend`] is an in-memory stand-in.

pub mod demo;
pub mod docker_cli;

use serde::Serialize;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use demo::DemoBackend;
pub use docker_cli::DockerCli;

/// Label carrying the compose project of a container
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label carrying the compose service of a container
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to parse engine output: {0}")]
    Parse(String),
}

/// Snapshot of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state such as `running`, `exited` or `created`
    pub state: String,
    pub project: Option<String>,
    pub service: Option<String>,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EngineGateway: Send + Sync {
    /// All containers, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Repo digests (`name@sha256:...`) of the local image, empty if the image is unknown
    async fn image_digests(&self, image: &str) -> Result<Vec<String>, EngineError>;
}
