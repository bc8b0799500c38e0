use crate::executor::runner::{Sandbox, SandboxError, SandboxResult};
use crate::playbook::Parameters;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One recorded call to [`ScriptedSandbox::invoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub plugin_ref: String,
    pub parameters: Parameters,
}

/// In-memory sandbox that replays queued responses per plugin reference.
///
/// Lets the driver run without a container runtime. A plugin with nothing
/// queued behaves like a missing image.
#[derive(Default)]
pub struct ScriptedSandbox {
    responses: Mutex<HashMap<String, VecDeque<Result<SandboxResult, SandboxError>>>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response for `plugin_ref`.
    pub fn respond(self, plugin_ref: &str, response: Result<SandboxResult, SandboxError>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(plugin_ref.to_string())
                .or_default()
                .push_back(response);
        }
        self
    }

    /// Queue a `{"status":"success"}` envelope with exit code 0.
    pub fn succeed(self, plugin_ref: &str, message: &str) -> Self {
        let stdout = serde_json::json!({ "status": "success", "message": message }).to_string();
        self.respond(
            plugin_ref,
            Ok(SandboxResult {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            }),
        )
    }

    /// Queue a `{"status":"error"}` envelope with the given exit code and stderr.
    pub fn fail(self, plugin_ref: &str, exit_code: i32, stderr: &str) -> Self {
        let stdout = serde_json::json!({ "status": "error", "message": stderr }).to_string();
        self.respond(
            plugin_ref,
            Ok(SandboxResult {
                exit_code,
                stdout,
                stderr: stderr.to_string(),
            }),
        )
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn invoked(&self, plugin_ref: &str) -> bool {
        self.invocations().iter().any(|i| i.plugin_ref == plugin_ref)
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        plugin_ref: &str,
        parameters: &Parameters,
    ) -> Result<SandboxResult, SandboxError> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(Invocation {
                plugin_ref: plugin_ref.to_string(),
                parameters: parameters.clone(),
            });
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|e| SandboxError::Unexpected(e.to_string()))?;

        responses
            .get_mut(plugin_ref)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(SandboxError::ImageNotFound(plugin_ref.to_string())))
    }
}
