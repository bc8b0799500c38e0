//! Playbook (remediation plan) model.
//!
//! A playbook is a YAML document with three top-level keys:
//!
//! ```yaml
//! name: Remediate Compromised Host
//! safety_policies:
//!   - name: corporate_ip_check
//!     targets: ["8.8.8.8", "203.0.113.10"]
//! steps:
//!   - name: Block C2 address
//!     plugin: psor_platform_plugin-java-block-ip
//!     parameters:
//!       ip_address: 198.51.100.7
//!     on_failure: stop
//! ```
//!
//! Loading is structural only. Whether a referenced plugin actually exists is
//! discovered when the step is dispatched.

use crate::error::{PsorError, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;

/// 플러그인에 전달되는 파라미터 (문서 순서 유지)
pub type Parameters = IndexMap<String, String>;

/// 스텝 실패 시 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Continue,
    Stop,
}

impl OnFailure {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// 안전 정책 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Forbid an action (matched by plugin substring) against a protected target.
    DenyActionOnTarget,
}

impl PolicyKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "deny_action_on_target" => Some(Self::DenyActionOnTarget),
            _ => None,
        }
    }
}

/// A safety rule guarding one parameter of a family of plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub name: String,
    pub kind: PolicyKind,
    /// Case-sensitive substring matched against a step's plugin reference.
    pub plugin_match: String,
    /// Parameter key whose value is checked against `targets`.
    pub parameter: String,
    pub targets: BTreeSet<String>,
    pub message: String,
}

impl Policy {
    pub fn applies_to(&self, plugin_ref: &str) -> bool {
        plugin_ref.contains(&self.plugin_match)
    }

    pub fn protects(&self, value: &str) -> bool {
        self.targets.contains(value)
    }
}

/// 플레이북의 단일 조치 단계
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// 0-based index in the plan, used for audit correlation
    pub position: usize,
    pub name: String,
    pub plugin_ref: String,
    pub parameters: Parameters,
    pub on_failure: OnFailure,
}

/// 로드된 플레이북 (로드 이후 불변)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub name: String,
    pub steps: Vec<Step>,
    /// Policies in declaration order; evaluation order follows it.
    pub safety_policies: Vec<Policy>,
    /// SHA-256 of the playbook source text
    pub digest: String,
}

impl Plan {
    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.safety_policies.iter().find(|p| p.name == name)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Merge alert-derived parameters into the plan.
    ///
    /// Only keys a step already declares are replaced; nothing is added.
    pub fn with_overrides(mut self, overrides: &Parameters) -> Self {
        for step in &mut self.steps {
            for (key, value) in overrides {
                if let Some(slot) = step.parameters.get_mut(key) {
                    *slot = value.clone();
                }
            }
        }
        self
    }
}

struct PolicyTemplate {
    plugin_match: &'static str,
    parameter: &'static str,
    message: &'static str,
}

/// Policies recognised by name alone.
static KNOWN_POLICIES: Lazy<HashMap<&'static str, PolicyTemplate>> = Lazy::new(|| {
    let mut known = HashMap::new();
    known.insert(
        "corporate_ip_check",
        PolicyTemplate {
            plugin_match: "block-ip",
            parameter: "ip_address",
            message: "Attempted to block corporate IP",
        },
    );
    known.insert(
        "critical_asset_check",
        PolicyTemplate {
            plugin_match: "isolate-endpoint",
            parameter: "endpoint_id",
            message: "Attempted to isolate critical asset",
        },
    );
    known
});

#[derive(Debug, Deserialize)]
struct RawPlan {
    name: Option<String>,
    #[serde(default)]
    safety_policies: Vec<RawPolicy>,
    steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    name: Option<String>,
    plugin: Option<String>,
    #[serde(default)]
    parameters: Option<IndexMap<String, Value>>,
    on_failure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    name: Option<String>,
    #[serde(default)]
    targets: Vec<Value>,
    kind: Option<String>,
    plugin_match: Option<String>,
    parameter: Option<String>,
    message: Option<String>,
}

/// Parse and validate a playbook document.
pub fn load_plan(source: &str) -> Result<Plan> {
    let raw: RawPlan = serde_yaml::from_str(source)
        .map_err(|e| PsorError::MalformedPlan(format!("not a valid playbook document: {}", e)))?;

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            tracing::warn!("Playbook has no name; using '<unnamed>'");
            "<unnamed>".to_string()
        });

    let raw_steps = match raw.steps {
        Some(steps) if !steps.is_empty() => steps,
        _ => {
            return Err(PsorError::MalformedPlan(
                "playbook must declare a non-empty 'steps' list".to_string(),
            ))
        }
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut seen_steps = HashSet::new();
    for (position, raw_step) in raw_steps.into_iter().enumerate() {
        let step = build_step(position, raw_step)?;
        if !seen_steps.insert(step.name.clone()) {
            return Err(PsorError::MalformedPlan(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        steps.push(step);
    }

    let mut safety_policies: Vec<Policy> = Vec::new();
    for raw_policy in raw.safety_policies {
        if let Some(policy) = build_policy(raw_policy)? {
            if safety_policies.iter().any(|p| p.name == policy.name) {
                return Err(PsorError::MalformedPlan(format!(
                    "duplicate safety policy '{}'",
                    policy.name
                )));
            }
            safety_policies.push(policy);
        }
    }

    Ok(Plan {
        name,
        steps,
        safety_policies,
        digest: digest(source),
    })
}

/// 파일에서 플레이북 로드
pub fn load_plan_file(path: &Path) -> Result<Plan> {
    let source = fs::read_to_string(path)?;
    load_plan(&source)
}

fn build_step(position: usize, raw: RawStep) -> Result<Step> {
    let name = raw.name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
        PsorError::MalformedPlan(format!("step #{} is missing a name", position + 1))
    })?;

    let plugin_ref = raw.plugin.filter(|p| !p.trim().is_empty()).ok_or_else(|| {
        PsorError::MalformedPlan(format!("step '{}' is missing a plugin reference", name))
    })?;

    let mut parameters = Parameters::new();
    for (key, value) in raw.parameters.unwrap_or_default() {
        let value = scalar_to_string(&value).ok_or_else(|| {
            PsorError::MalformedPlan(format!(
                "step '{}': parameter '{}' must be a scalar value",
                name, key
            ))
        })?;
        parameters.insert(key, value);
    }

    let on_failure = match raw.on_failure.as_deref() {
        None => OnFailure::default(),
        Some(raw_value) => OnFailure::parse(raw_value).ok_or_else(|| {
            PsorError::MalformedPlan(format!(
                "step '{}': on_failure must be 'continue' or 'stop', got '{}'",
                name, raw_value
            ))
        })?,
    };

    Ok(Step {
        position,
        name,
        plugin_ref,
        parameters,
        on_failure,
    })
}

fn build_policy(raw: RawPolicy) -> Result<Option<Policy>> {
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| PsorError::MalformedPlan("safety policy is missing a name".to_string()))?;

    let kind = match raw.kind.as_deref() {
        None => PolicyKind::DenyActionOnTarget,
        Some(k) => PolicyKind::parse(k).ok_or_else(|| {
            PsorError::MalformedPlan(format!("policy '{}': unknown kind '{}'", name, k))
        })?,
    };

    let template = KNOWN_POLICIES.get(name.as_str());
    let plugin_match = raw
        .plugin_match
        .or_else(|| template.map(|t| t.plugin_match.to_string()));
    let parameter = raw
        .parameter
        .or_else(|| template.map(|t| t.parameter.to_string()));

    let (plugin_match, parameter) = match (plugin_match, parameter) {
        (Some(m), Some(p)) => (m, p),
        _ => {
            tracing::warn!(
                policy = %name,
                "Unknown safety policy without plugin_match/parameter; ignoring it"
            );
            return Ok(None);
        }
    };

    let mut targets = BTreeSet::new();
    for target in &raw.targets {
        let target = scalar_to_string(target).ok_or_else(|| {
            PsorError::MalformedPlan(format!("policy '{}': targets must be scalars", name))
        })?;
        targets.insert(target);
    }

    let message = raw
        .message
        .or_else(|| template.map(|t| t.message.to_string()))
        .unwrap_or_else(|| format!("Action blocked by safety policy '{}'", name));

    Ok(Some(Policy {
        name,
        kind,
        plugin_match,
        parameter,
        targets,
        message,
    }))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}
