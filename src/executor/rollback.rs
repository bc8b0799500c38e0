//! Compensating actions for failed remediation steps.
//!
//! When a step fails, the coordinator looks up the failed plugin in the
//! [`RollbackMapping`] and, if a compensating plugin is configured, runs it
//! once with the failed step's parameters.
//!
//! ```text
//! failed step ──► RollbackMapping ──► (none) ──► manual intervention required
//!                        │
//!                        ▼
//!              parameter check ──► (empty value) ──► attempted, not run
//!                        │
//!                        ▼
//!              Sandbox::invoke(compensating plugin)
//! ```
//!
//! Rollback is one level deep: a failing compensating plugin is reported
//! and never rolled back itself. Its outcome never changes the outcome of
//! the step that triggered it.

use crate::executor::interpreter::{ResultInterpreter, StepOutcome};
use crate::executor::runner::{dispatch, Sandbox};
use crate::logging::AUDIT_TARGET;
use crate::playbook::Parameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// pluginRef → compensating pluginRef (None = no automatic rollback)
///
/// In TOML an empty string marks a plugin as explicitly having no rollback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct RollbackMapping {
    entries: BTreeMap<String, Option<String>>,
}

impl RollbackMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rollback(mut self, plugin_ref: &str, compensating: &str) -> Self {
        self.entries
            .insert(plugin_ref.to_string(), Some(compensating.to_string()));
        self
    }

    pub fn without_rollback(mut self, plugin_ref: &str) -> Self {
        self.entries.insert(plugin_ref.to_string(), None);
        self
    }

    /// Compensating plugin for `plugin_ref`, if one is configured.
    pub fn compensating(&self, plugin_ref: &str) -> Option<&str> {
        self.entries
            .get(plugin_ref)
            .and_then(|entry| entry.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, String>> for RollbackMapping {
    fn from(raw: BTreeMap<String, String>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(plugin, compensating)| {
                let compensating = Some(compensating).filter(|c| !c.trim().is_empty());
                (plugin, compensating)
            })
            .collect();
        Self { entries }
    }
}

impl From<RollbackMapping> for BTreeMap<String, String> {
    fn from(mapping: RollbackMapping) -> Self {
        mapping
            .entries
            .into_iter()
            .map(|(plugin, compensating)| (plugin, compensating.unwrap_or_default()))
            .collect()
    }
}

/// 롤백 시도 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    pub compensating_plugin: Option<String>,
    pub detail: String,
}

impl RollbackOutcome {
    pub fn not_attempted(detail: impl Into<String>) -> Self {
        Self {
            attempted: false,
            succeeded: false,
            compensating_plugin: None,
            detail: detail.into(),
        }
    }
}

pub struct RollbackCoordinator {
    mapping: Arc<RollbackMapping>,
    sandbox: Arc<dyn Sandbox>,
}

impl RollbackCoordinator {
    pub fn new(mapping: Arc<RollbackMapping>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { mapping, sandbox }
    }

    /// Best-effort compensation for a failed plugin run. Never returns an error.
    pub async fn rollback(&self, failed_plugin: &str, failed_parameters: &Parameters) -> RollbackOutcome {
        tracing::error!(
            target: AUDIT_TARGET,
            plugin = %failed_plugin,
            "[ROLLBACK_PROCEDURE] Attempting rollback"
        );

        let compensating = match self.mapping.compensating(failed_plugin) {
            Some(plugin) => plugin.to_string(),
            None => {
                tracing::warn!(
                    target: AUDIT_TARGET,
                    plugin = %failed_plugin,
                    attempted = false,
                    "No automatic rollback plugin defined; manual intervention required"
                );
                return RollbackOutcome::not_attempted(format!(
                    "no rollback defined for '{}'; manual intervention required",
                    failed_plugin
                ));
            }
        };

        if let Some((key, _)) = failed_parameters.iter().find(|(_, v)| v.is_empty()) {
            tracing::error!(
                target: AUDIT_TARGET,
                plugin = %failed_plugin,
                rollback_plugin = %compensating,
                parameter = %key,
                attempted = true,
                succeeded = false,
                "Could not determine valid rollback parameters"
            );
            return RollbackOutcome {
                attempted: true,
                succeeded: false,
                compensating_plugin: Some(compensating),
                detail: format!("rollback parameter '{}' is empty", key),
            };
        }

        tracing::info!(
            rollback_plugin = %compensating,
            "Initiating rollback plugin"
        );

        let result = dispatch(self.sandbox.clone(), &compensating, failed_parameters).await;
        let interpretation = ResultInterpreter::interpret(&result);
        let succeeded = interpretation.outcome == StepOutcome::Succeeded;

        let detail = if succeeded {
            interpretation.raw_output
        } else {
            interpretation.error_detail.unwrap_or_default()
        };

        if succeeded {
            tracing::info!(
                target: AUDIT_TARGET,
                plugin = %failed_plugin,
                rollback_plugin = %compensating,
                attempted = true,
                succeeded = true,
                output = %detail,
                "[ROLLBACK_OUTPUT] Rollback completed"
            );
        } else {
            tracing::warn!(
                target: AUDIT_TARGET,
                plugin = %failed_plugin,
                rollback_plugin = %compensating,
                attempted = true,
                succeeded = false,
                error = %detail,
                "Rollback FAILED"
            );
        }

        RollbackOutcome {
            attempted: true,
            succeeded,
            compensating_plugin: Some(compensating),
            detail,
        }
    }
}
