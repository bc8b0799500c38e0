//! Sandbox dispatch: run one plugin to completion and capture what it printed.
//!
//! Parameters travel as `key=value` argv tokens, one per parameter, in plan
//! order. Values are not escaped or quoted, so a value containing `=` or
//! whitespace reaches the plugin verbatim and the plugin splits on the first
//! `=` only.

use crate::config::{SandboxConfig, SandboxRuntime};
use crate::playbook::Parameters;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

/// Exit status docker-compatible runtimes use for their own failures.
///
/// A plugin may exit 125 itself. The two are told apart by stdout: a runtime
/// that failed to start the container never produced plugin output, while a
/// plugin following the envelope contract always prints one.
const RUNTIME_FAILURE_EXIT: i32 = 125;

/// `image inspect` answers for a missing image (docker, podman)
const MISSING_IMAGE_MARKERS: [&str; 2] = ["no such image", "image not known"];

/// 플러그인 실행 결과 (stdout/stderr 전체 캡처)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxResult {
    /// -1 when the process was terminated by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Plugin image not found: {0}")]
    ImageNotFound(String),

    #[error("Sandbox could not start: {0}")]
    StartFailure(String),

    #[error("Plugin '{plugin}' timed out after {secs}s")]
    TimedOut { plugin: String, secs: u64 },

    #[error("Unexpected dispatch error: {0}")]
    Unexpected(String),
}

/// Isolated execution environment for remediation plugins.
///
/// Implementations never retry. The caller awaits the call until the plugin
/// process has exited.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Runtime name used in logs (e.g. "container", "local")
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        plugin_ref: &str,
        parameters: &Parameters,
    ) -> Result<SandboxResult, SandboxError>;
}

/// Serialize parameters as `key=value` argv tokens.
pub fn serialize_parameters(parameters: &Parameters) -> Vec<String> {
    parameters
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// Invoke a plugin on its own task so that a panicking sandbox
/// implementation surfaces as [`SandboxError::Unexpected`] instead of
/// unwinding through the caller.
pub async fn dispatch(
    sandbox: Arc<dyn Sandbox>,
    plugin_ref: &str,
    parameters: &Parameters,
) -> Result<SandboxResult, SandboxError> {
    let plugin = plugin_ref.to_string();
    let params = parameters.clone();
    let handle = tokio::spawn(async move { sandbox.invoke(&plugin, &params).await });

    match handle.await {
        Ok(result) => result,
        Err(join_err) => Err(SandboxError::Unexpected(format!(
            "dispatch of '{}' aborted: {}",
            plugin_ref, join_err
        ))),
    }
}

/// 설정에 맞는 샌드박스 생성
pub fn build_sandbox(config: &SandboxConfig) -> Arc<dyn Sandbox> {
    let timeout = config.step_timeout_secs.map(Duration::from_secs);
    match config.runtime {
        SandboxRuntime::Container => Arc::new(
            ContainerSandbox::new(config.container_cli.clone(), config.network_mode.clone())
                .with_timeout(timeout),
        ),
        SandboxRuntime::Local => Arc::new(LocalSandbox::new(config.plugin_dir.clone(), timeout)),
    }
}

async fn capture(
    mut command: Command,
    plugin_ref: &str,
    timeout: Option<Duration>,
) -> Result<SandboxResult, SandboxError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| SandboxError::TimedOut {
                plugin: plugin_ref.to_string(),
                secs: limit.as_secs(),
            })?,
        None => command.output().await,
    }
    .map_err(|e| SandboxError::StartFailure(format!("{}: {}", plugin_ref, e)))?;

    Ok(SandboxResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Runs plugins as container images through a docker-compatible CLI.
///
/// Containers share the host network so remediation actions can reach local
/// infrastructure (firewalls, EDR agents).
pub struct ContainerSandbox {
    cli: String,
    network_mode: String,
    timeout: Option<Duration>,
}

impl ContainerSandbox {
    pub fn new(cli: impl Into<String>, network_mode: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            network_mode: network_mode.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `image inspect`로 이미지 존재 확인
    ///
    /// Only the runtime's own "missing image" answer is `ImageNotFound`. Any
    /// other failure (daemon down, socket permissions) is a start failure.
    async fn check_image(&self, image: &str) -> Result<(), SandboxError> {
        let output = Command::new(&self.cli)
            .args(["image", "inspect", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                SandboxError::StartFailure(format!("failed to run '{}': {}", self.cli, e))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lowered = stderr.to_lowercase();
        if MISSING_IMAGE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Err(SandboxError::ImageNotFound(image.to_string()));
        }

        Err(SandboxError::StartFailure(format!(
            "{} image inspect {}: {}",
            self.cli, image, stderr
        )))
    }

    /// Force-remove a container; `rm -f` stops it first if it is still running.
    async fn remove_container(&self, name: &str) {
        let removed = Command::new(&self.cli)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match removed {
            Ok(status) if status.success() => {
                tracing::warn!(container = %name, "Timed-out container removed")
            }
            Ok(status) => tracing::error!(
                container = %name,
                exit_code = status.code().unwrap_or(-1),
                "Failed to remove timed-out container"
            ),
            Err(e) => tracing::error!(
                container = %name,
                error = %e,
                "Failed to remove timed-out container"
            ),
        }
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn name(&self) -> &str {
        "container"
    }

    async fn invoke(
        &self,
        plugin_ref: &str,
        parameters: &Parameters,
    ) -> Result<SandboxResult, SandboxError> {
        self.check_image(plugin_ref).await?;

        // killing the CLI client does not stop the container, so it is named
        // and removed explicitly on timeout
        let container_name = format!("psor-{}", Uuid::new_v4());

        let mut command = Command::new(&self.cli);
        command
            .arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&container_name)
            .arg("--network")
            .arg(&self.network_mode)
            .arg(plugin_ref)
            .args(serialize_parameters(parameters));

        let result = match capture(command, plugin_ref, self.timeout).await {
            Err(err @ SandboxError::TimedOut { .. }) => {
                self.remove_container(&container_name).await;
                return Err(err);
            }
            other => other?,
        };

        if result.exit_code == RUNTIME_FAILURE_EXIT && result.stdout.is_empty() {
            return Err(SandboxError::StartFailure(format!(
                "{} run {}: {}",
                self.cli, plugin_ref, result.stderr
            )));
        }

        Ok(result)
    }
}

/// Runs plugins as executables from a local directory, named by plugin reference.
pub struct LocalSandbox {
    plugin_dir: PathBuf,
    timeout: Option<Duration>,
}

impl LocalSandbox {
    pub fn new(plugin_dir: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            plugin_dir,
            timeout,
        }
    }

    fn resolve(&self, plugin_ref: &str) -> Option<PathBuf> {
        // plugin references are bare names; never let one escape plugin_dir
        if plugin_ref.contains('/') || plugin_ref.contains('\\') || plugin_ref.starts_with('.') {
            return None;
        }
        let path = self.plugin_dir.join(plugin_ref);
        if Path::new(&path).is_file() {
            Some(path)
        } else {
            None
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &str {
        "local"
    }

    async fn invoke(
        &self,
        plugin_ref: &str,
        parameters: &Parameters,
    ) -> Result<SandboxResult, SandboxError> {
        let path = self
            .resolve(plugin_ref)
            .ok_or_else(|| SandboxError::ImageNotFound(plugin_ref.to_string()))?;

        let mut command = Command::new(path);
        command.args(serialize_parameters(parameters));

        capture(command, plugin_ref, self.timeout).await
    }
}
