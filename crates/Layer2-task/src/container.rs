//! Container runtime layer
//!
//! Thin typed wrapper over the docker/podman CLI. Every operation is an
//! external process invocation with discrete argv elements; nothing is ever
//! concatenated into a shell string. The free-text task command does not
//! appear here at all: it travels base64-encoded inside an environment
//! variable and never participates in any parsing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

// ============================================================================
// Runtime selection
// ============================================================================

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::Docker
    }
}

impl ContainerRuntime {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Parse a configured runtime name, defaulting to docker
    pub fn from_name(name: &str) -> Self {
        match name {
            "podman" => Self::Podman,
            _ => Self::Docker,
        }
    }
}

// ============================================================================
// Errors / output
// ============================================================================

/// Container runtime error types
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container runtime not found")]
    RuntimeNotFound,

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("{verb} failed: {stderr}")]
    CommandFailed { verb: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of one runtime invocation
#[derive(Debug, Clone)]
pub struct RuntimeOutput {
    /// Exit code (-1 if terminated by signal)
    pub status: i32,

    /// Captured stdout, trimmed
    pub stdout: String,

    /// Captured stderr, trimmed
    pub stderr: String,
}

impl RuntimeOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

// ============================================================================
// Volume mounts
// ============================================================================

/// Volume mount: bind mount or named volume
#[derive(Debug, Clone)]
pub struct VolumeMount {
    /// Host path or named-volume name
    pub source: String,

    /// Container path
    pub container_path: PathBuf,

    /// Read-only mount
    pub read_only: bool,
}

impl VolumeMount {
    /// Bind-mount a host path
    pub fn bind(host: impl AsRef<Path>, container: impl Into<PathBuf>) -> Self {
        Self {
            source: host.as_ref().to_string_lossy().to_string(),
            container_path: container.into(),
            read_only: false,
        }
    }

    /// Mount a named volume
    pub fn volume(name: impl Into<String>, container: impl Into<PathBuf>) -> Self {
        Self {
            source: name.into(),
            container_path: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn to_arg(&self) -> String {
        let ro = if self.read_only { ":ro" } else { "" };
        format!(
            "{}:{}{}",
            self.source,
            self.container_path.to_string_lossy(),
            ro
        )
    }
}

// ============================================================================
// Container spec
// ============================================================================

/// Launch specification for one container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container image
    pub image: String,

    /// Container name
    pub name: String,

    /// Environment variables, order preserved
    pub env: Vec<(String, String)>,

    /// Volume mounts
    pub volumes: Vec<VolumeMount>,

    /// Optional network attachment
    pub network: Option<String>,

    /// Working directory in container
    pub working_dir: Option<PathBuf>,

    /// Detach after start
    pub detach: bool,

    /// Remove the container when it exits
    pub auto_remove: bool,

    /// All exposed ports published on OS-assigned host ports
    pub publish_all: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            env: Vec::new(),
            volumes: Vec::new(),
            network: None,
            working_dir: None,
            detach: true,
            auto_remove: false,
            publish_all: false,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    pub fn with_network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn attached(mut self) -> Self {
        self.detach = false;
        self
    }

    pub fn auto_remove(mut self) -> Self {
        self.auto_remove = true;
        self
    }

    pub fn publish_all(mut self) -> Self {
        self.publish_all = true;
        self
    }

    /// Build the argv for `docker run` (everything after `run`)
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![];

        if self.detach {
            args.push("-d".to_string());
        }
        if self.auto_remove {
            args.push("--rm".to_string());
        }

        args.push("--name".to_string());
        args.push(self.name.clone());

        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.to_string_lossy().to_string());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for vol in &self.volumes {
            args.push("-v".to_string());
            args.push(vol.to_arg());
        }

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        if self.publish_all {
            args.push("-P".to_string());
        }

        args.push(self.image.clone());
        args
    }
}

// ============================================================================
// Runtime CLI
// ============================================================================

/// Docker/Podman CLI wrapper
#[derive(Debug, Clone)]
pub struct RuntimeCli {
    runtime: ContainerRuntime,
}

impl RuntimeCli {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    pub fn docker() -> Self {
        Self::new(ContainerRuntime::Docker)
    }

    /// Run `docker <args...>` and capture the output
    pub async fn exec(&self, args: &[&str]) -> Result<RuntimeOutput, ContainerError> {
        debug!(runtime = self.runtime.command(), ?args, "runtime invocation");
        let output = Command::new(self.runtime.command())
            .args(args)
            .output()
            .await?;

        Ok(RuntimeOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn exec_checked(&self, verb: &str, args: &[&str]) -> Result<String, ContainerError> {
        let output = self.exec(args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(ContainerError::CommandFailed {
                verb: verb.to_string(),
                stderr: output.stderr,
            })
        }
    }

    /// Check if the runtime is usable
    pub async fn is_available(&self) -> bool {
        self.exec(&["--version"])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    /// Run a container detached; returns the container id
    pub async fn run_detached(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let args = spec.build_args();
        let mut argv: Vec<&str> = vec!["run"];
        argv.extend(args.iter().map(|s| s.as_str()));

        info!(name = %spec.name, image = %spec.image, "Starting container");
        let output = self.exec(&argv).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(ContainerError::StartFailed(output.stderr))
        }
    }

    /// Run a container attached to this process's stdout/stderr.
    ///
    /// The child is left running; the caller gets no handle to it beyond
    /// the container name. Debugging aid only.
    pub fn spawn_attached(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let args = spec.build_args();
        let mut cmd = Command::new(self.runtime.command());
        cmd.arg("run")
            .args(&args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        info!(name = %spec.name, image = %spec.image, "Starting container (attached)");
        cmd.spawn().map_err(ContainerError::Io)?;
        Ok(())
    }

    /// Stop a container with a grace timeout in seconds
    pub async fn stop(&self, name: &str, grace_secs: u64) -> Result<(), ContainerError> {
        let grace = grace_secs.to_string();
        self.exec_checked("stop", &["stop", "-t", &grace, name])
            .await?;
        Ok(())
    }

    /// Remove a container
    pub async fn remove(&self, name: &str, force: bool) -> Result<(), ContainerError> {
        if force {
            self.exec_checked("rm", &["rm", "-f", name]).await?;
        } else {
            self.exec_checked("rm", &["rm", name]).await?;
        }
        Ok(())
    }

    /// Container names matching the given `docker ps` filters
    pub async fn ps_names(
        &self,
        filters: &[(&str, &str)],
        all: bool,
    ) -> Result<Vec<String>, ContainerError> {
        let mut owned: Vec<String> = Vec::new();
        for (key, value) in filters {
            owned.push(format!("{}={}", key, value));
        }

        let mut args: Vec<&str> = vec!["ps", "--format", "{{.Names}}"];
        if all {
            args.push("-a");
        }
        for filter in &owned {
            args.push("--filter");
            args.push(filter);
        }

        let stdout = self.exec_checked("ps", &args).await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Whether a container with this exact name exists (running or not)
    pub async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        let pattern = format!("^{}$", name);
        let names = self.ps_names(&[("name", &pattern)], true).await?;
        Ok(names.iter().any(|n| n == name))
    }

    /// Full container id for a name
    pub async fn container_id(&self, name: &str) -> Result<String, ContainerError> {
        self.exec_checked(
            "inspect",
            &["inspect", "--format", "{{.Id}}", name],
        )
        .await
    }

    /// Environment entries (`KEY=value` lines) of a container
    pub async fn inspect_env(&self, name: &str) -> Result<Vec<String>, ContainerError> {
        let stdout = self
            .exec_checked(
                "inspect",
                &[
                    "inspect",
                    "--format",
                    "{{range .Config.Env}}{{println .}}{{end}}",
                    name,
                ],
            )
            .await?;
        Ok(stdout.lines().map(|l| l.to_string()).collect())
    }

    /// First published host port of a container, if any.
    ///
    /// Parses `docker port` lines of the form
    /// `3000/tcp -> 0.0.0.0:49153`.
    pub async fn published_port(&self, name: &str) -> Result<Option<u16>, ContainerError> {
        let stdout = self.exec_checked("port", &["port", name]).await?;
        Ok(parse_published_port(&stdout))
    }

    /// Build an image, buffering the output. Returns the exit success.
    pub async fn build_quiet(
        &self,
        tag: &str,
        dockerfile: Option<&Path>,
        context: &Path,
        no_cache: bool,
    ) -> Result<bool, ContainerError> {
        let dockerfile_str = dockerfile.map(|p| p.to_string_lossy().to_string());
        let context_str = context.to_string_lossy().to_string();

        let mut args: Vec<&str> = vec!["build", "-t", tag];
        if no_cache {
            args.push("--no-cache");
        }
        if let Some(df) = dockerfile_str.as_deref() {
            args.push("-f");
            args.push(df);
        }
        args.push(&context_str);

        let output = self.exec(&args).await?;
        if !output.success() {
            debug!(tag, stderr = %output.stderr, "Image build failed");
        }
        Ok(output.success())
    }

    /// Build an image, streaming each output line through tracing.
    pub async fn build_streaming(
        &self,
        tag: &str,
        dockerfile: Option<&Path>,
        context: &Path,
        no_cache: bool,
    ) -> Result<bool, ContainerError> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let mut cmd = Command::new(self.runtime.command());
        cmd.arg("build").arg("-t").arg(tag);
        if no_cache {
            cmd.arg("--no-cache");
        }
        if let Some(df) = dockerfile {
            cmd.arg("-f").arg(df);
        }
        cmd.arg(context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "berth::build", "{}", line);
                }
            }));
        }
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "berth::build", "{}", line);
                }
            }));
        }

        let status = child.wait().await?;
        for reader in readers {
            let _ = reader.await;
        }
        Ok(status.success())
    }

    /// Spawn `docker logs -f` with piped output for the log monitor
    pub fn spawn_logs_follow(
        &self,
        name: &str,
        tail: u32,
    ) -> Result<tokio::process::Child, ContainerError> {
        let tail = tail.to_string();
        Command::new(self.runtime.command())
            .args(["logs", "-f", "--tail", &tail, name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ContainerError::Io)
    }
}

/// Parse the host port out of a `docker port` output line
fn parse_published_port(output: &str) -> Option<u16> {
    for line in output.lines() {
        if let Some((_, host_part)) = line.split_once("->") {
            if let Some((_, port)) = host_part.trim().rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    return Some(port);
                }
            }
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_compose() {
        let spec = ContainerSpec::new("berth-worker:latest", "berth-worker-AI-1")
            .with_env("PROCESS_ID", "AI-1")
            .with_env("TZ", "UTC")
            .with_volume(VolumeMount::volume("berth-credentials", "/home/worker/.credentials"))
            .with_volume(VolumeMount::bind("/tmp/out/AI-1", "/workspace"))
            .with_network(Some("berth-net".to_string()))
            .with_working_dir("/workspace");

        let args = spec.build_args();

        let has_pair = |flag: &str, value: &str| {
            args.windows(2).any(|w| w[0] == flag && w[1] == value)
        };

        assert_eq!(args[0], "-d");
        assert!(has_pair("--name", "berth-worker-AI-1"));
        assert!(has_pair("-e", "PROCESS_ID=AI-1"));
        assert!(has_pair("-v", "berth-credentials:/home/worker/.credentials"));
        assert!(has_pair("-v", "/tmp/out/AI-1:/workspace"));
        assert!(has_pair("--network", "berth-net"));
        assert!(has_pair("-w", "/workspace"));
        // Image is always the final element; nothing is shell-joined
        assert_eq!(args.last().unwrap(), "berth-worker:latest");
    }

    #[test]
    fn test_build_args_attached_and_publish() {
        let spec = ContainerSpec::new("img", "name")
            .attached()
            .auto_remove()
            .publish_all();
        let args = spec.build_args();

        assert!(!args.contains(&"-d".to_string()));
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"-P".to_string()));
    }

    #[test]
    fn test_env_values_stay_discrete() {
        // A hostile command never reaches a shell: it is one argv element
        let spec = ContainerSpec::new("img", "name")
            .with_env("PROCESS_COMMAND", "echo hi; rm -rf / #");
        let args = spec.build_args();
        assert!(args.contains(&"PROCESS_COMMAND=echo hi; rm -rf / #".to_string()));
    }

    #[test]
    fn test_read_only_mount() {
        let mount = VolumeMount::bind("/etc/localtime", "/etc/localtime").read_only();
        assert_eq!(mount.to_arg(), "/etc/localtime:/etc/localtime:ro");
    }

    #[test]
    fn test_parse_published_port() {
        assert_eq!(
            parse_published_port("3000/tcp -> 0.0.0.0:49153"),
            Some(49153)
        );
        assert_eq!(
            parse_published_port("3000/tcp -> [::]:49154\n3000/tcp -> 0.0.0.0:49153"),
            Some(49154)
        );
        assert_eq!(parse_published_port(""), None);
        assert_eq!(parse_published_port("garbage"), None);
    }

    #[test]
    fn test_runtime_from_name() {
        assert_eq!(ContainerRuntime::from_name("podman"), ContainerRuntime::Podman);
        assert_eq!(ContainerRuntime::from_name("docker"), ContainerRuntime::Docker);
        assert_eq!(ContainerRuntime::from_name("unknown"), ContainerRuntime::Docker);
    }
}
