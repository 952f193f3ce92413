//! Compose driver shelling out to `<binary> compose`

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::compose::{ComposeDriver, ComposeOutcome, DownOptions, OutputCallback, UpOptions};
use crate::config::ComposeConfig;

pub struct ComposeCli {
    binary: String,
    projects_dir: Option<PathBuf>,
}

impl ComposeCli {
    pub fn new(binary: &str, projects_dir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.to_string(),
            projects_dir,
        }
    }

    pub fn from_config(config: &ComposeConfig) -> Self {
        Self::new(&config.binary, config.projects_dir.clone())
    }

    /// Project directory, when one exists on disk
    fn project_dir(&self, project: &str) -> Option<PathBuf> {
        self.projects_dir
            .as_ref()
            .map(|dir| dir.join(project))
            .filter(|dir| dir.is_dir())
    }

    fn args(project: &str, verb: &[&str]) -> Vec<String> {
        ["compose", "-p", project]
            .iter()
            .chain(verb)
            .map(|s| s.to_string())
            .collect()
    }

    fn pull_args(project: &str, service: Option<&str>) -> Vec<String> {
        let mut verb = vec!["pull"];
        verb.extend(service);
        Self::args(project, &verb)
    }

    fn up_args(project: &str, service: Option<&str>, options: UpOptions) -> Vec<String> {
        let mut verb = vec!["up", "-d"];
        if options.build {
            verb.push("--build");
        }
        if options.pull {
            verb.extend(["--pull", "always"]);
        }
        verb.extend(service);
        Self::args(project, &verb)
    }

    fn down_args(project: &str, options: DownOptions) -> Vec<String> {
        let mut verb = vec!["down"];
        if options.volumes {
            verb.push("-v");
        }
        if options.remove_orphans {
            verb.push("--remove-orphans");
        }
        Self::args(project, &verb)
    }

    /// Run the binary, streaming both output streams line by line to `on_output`
    async fn run(
        &self,
        args: &[String],
        cwd: Option<&Path>,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome {
        debug!("Running {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        // Own process group: a terminal Ctrl-C must not interrupt a pull or restart
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", self.binary, e);
                return ComposeOutcome::failed("", format!("Failed to run {}: {}", self.binary, e));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return ComposeOutcome::failed("", "Process output was not captured");
        };
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        let mut output = String::new();
        let mut last_error_line = None;
        let (mut stdout_open, mut stderr_open) = (true, true);
        let emit = |line: String, output: &mut String| {
            if let Some(callback) = &on_output {
                callback(&line);
            }
            output.push_str(&line);
            output.push('\n');
        };

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_reader.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => emit(line, &mut output),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("Error reading stdout: {}", e);
                        stdout_open = false;
                    }
                },
                line = stderr_reader.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            last_error_line = Some(line.clone());
                        }
                        emit(line, &mut output);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!("Error reading stderr: {}", e);
                        stderr_open = false;
                    }
                },
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => ComposeOutcome::succeeded(output),
            Ok(status) => {
                let error = last_error_line
                    .unwrap_or_else(|| format!("{} exited with {}", self.binary, status));
                ComposeOutcome::failed(output, error)
            }
            Err(e) => ComposeOutcome::failed(output, format!("Failed to wait for process: {e}")),
        }
    }
}

#[async_trait::async_trait]
impl ComposeDriver for ComposeCli {
    async fn pull(
        &self,
        project: &str,
        service: Option<&str>,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome {
        let dir = self.project_dir(project);
        self.run(&Self::pull_args(project, service), dir.as_deref(), on_output)
            .await
    }

    async fn up(
        &self,
        project: &str,
        service: Option<&str>,
        options: UpOptions,
        on_output: Option<OutputCallback>,
    ) -> ComposeOutcome {
        let dir = self.project_dir(project);
        self.run(
            &Self::up_args(project, service, options),
            dir.as_deref(),
            on_output,
        )
        .await
    }

    async fn down(&self, project: &str, options: DownOptions) -> ComposeOutcome {
        let dir = self.project_dir(project);
        self.run(&Self::down_args(project, options), dir.as_deref(), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[rstest]
    #[case(None, "compose -p media pull")]
    #[case(Some("plex"), "compose -p media pull plex")]
    fn pull_args_target_project_or_service(#[case] service: Option<&str>, #[case] expected: &str) {
        assert_eq!(ComposeCli::pull_args("media", service).join(" "), expected);
    }

    #[rstest]
    #[case(UpOptions::default(), None, "compose -p media up -d")]
    #[case(UpOptions { build: true, pull: false }, None, "compose -p media up -d --build")]
    #[case(UpOptions { build: true, pull: true }, Some("web"), "compose -p media up -d --build --pull always web")]
    fn up_args_follow_options(
        #[case] options: UpOptions,
        #[case] service: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(ComposeCli::up_args("media", service, options).join(" "), expected);
    }

    #[test]
    fn down_args_follow_options() {
        let options = DownOptions {
            volumes: true,
            remove_orphans: true,
        };

        assert_eq!(
            ComposeCli::down_args("media", options).join(" "),
            "compose -p media down -v --remove-orphans"
        );
    }

    #[test]
    fn project_dir_requires_existing_directory() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("media")).unwrap();
        let cli = ComposeCli::new("docker", Some(root.path().to_path_buf()));

        assert_eq!(cli.project_dir("media"), Some(root.path().join("media")));
        assert_eq!(cli.project_dir("absent"), None);
        assert_eq!(ComposeCli::new("docker", None).project_dir("media"), None);
    }

    #[tokio::test]
    async fn pull_streams_output_to_callback() {
        let cli = ComposeCli::new("echo", None);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: OutputCallback = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        let outcome = cli.pull("media", Some("plex"), Some(callback)).await;

        assert!(outcome.success);
        assert_eq!(outcome.output, "compose -p media pull plex\n");
        assert_eq!(*lines.lock().unwrap(), vec!["compose -p media pull plex"]);
    }

    #[tokio::test]
    async fn failing_process_reports_failure() {
        let outcome = ComposeCli::new("false", None)
            .up("media", None, UpOptions::default(), None)
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compose_runs_in_its_own_process_group() {
        // `sh compose -p media pull` reads the `compose` script from the project directory
        let root = TempDir::new().unwrap();
        let project = root.path().join("media");
        std::fs::create_dir(&project).unwrap();
        std::fs::write(
            project.join("compose"),
            "if [ -r /proc/$$/stat ]; then\n\
             echo \"$$ $(cut -d' ' -f5 /proc/$$/stat)\"\n\
             else\n\
             echo \"$$ $(ps -o pgid= -p $$ | tr -d ' ')\"\n\
             fi\n",
        )
        .unwrap();
        let cli = ComposeCli::new("sh", Some(root.path().to_path_buf()));

        let outcome = cli.pull("media", None, None).await;

        assert!(outcome.success, "{}", outcome.failure_message());
        let ids: Vec<&str> = outcome.output.split_whitespace().collect();
        assert_eq!(ids.len(), 2, "unexpected output {:?}", outcome.output);
        assert_eq!(ids[0], ids[1], "child pid should lead its own process group");
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_failure() {
        let outcome = ComposeCli::new("dockup-no-such-binary", None)
            .down("media", DownOptions::default())
            .await;

        assert!(!outcome.success);
        assert!(outcome.failure_message().contains("dockup-no-such-binary"));
    }
}
