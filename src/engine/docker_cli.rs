//! Engine gateway backed by the `docker` CLI

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::engine::{
    ContainerSummary, EngineError, EngineGateway, PROJECT_LABEL, SERVICE_LABEL,
};

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    image: String,
    state: String,
    #[serde(default)]
    labels: String,
}

pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output, EngineError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running {}", command);

        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| EngineError::Spawn { command, source })
    }
}

/// Look up `key` in a `k=v,k2=v2` label list
fn label<'a>(labels: &'a str, key: &str) -> Option<&'a str> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

fn parse_ps_output(stdout: &str) -> Result<Vec<ContainerSummary>, EngineError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let ps: PsLine =
                serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string()))?;
            Ok(ContainerSummary {
                project: label(&ps.labels, PROJECT_LABEL).map(str::to_string),
                service: label(&ps.labels, SERVICE_LABEL).map(str::to_string),
                id: ps.id,
                name: ps.names.split(',').next().unwrap_or_default().to_string(),
                image: ps.image,
                state: ps.state,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl EngineGateway for DockerCli {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let output = self
            .output(&["ps", "-a", "--no-trunc", "--format", "{{json .}}"])
            .await?;
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: format!("{} ps", self.binary),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn image_digests(&self, image: &str) -> Result<Vec<String>, EngineError> {
        let output = self
            .output(&[
                "image",
                "inspect",
                "--format",
                "{{json .RepoDigests}}",
                image,
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such image") {
                return Ok(Vec::new());
            }
            return Err(EngineError::CommandFailed {
                command: format!("{} image inspect", self.binary),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let digests: Option<Vec<String>> = serde_json::from_str(stdout.trim())
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        Ok(digests.unwrap_or_default())
    }
}
