//! Alert intake: turn a third-party security alert into a playbook choice
//! plus parameter overrides. No network listener lives here; callers hand in
//! the alert body as JSON.

use crate::config::IntakeConfig;
use crate::error::{PsorError, Result};
use crate::playbook::Parameters;
use serde_json::Value;
use std::net::IpAddr;
use std::path::PathBuf;

/// Rule name from `rule_name` or `rule.name`.
pub fn rule_name(alert: &Value) -> Option<&str> {
    alert
        .get("rule_name")
        .and_then(Value::as_str)
        .or_else(|| alert.pointer("/rule/name").and_then(Value::as_str))
}

/// Pull remediation parameters out of an alert.
///
/// - `key_id` from `detail.requestParameters.accessKeyId`
/// - `ip_address` from `destination_ip` when it is a public address,
///   otherwise from `source_ip`
/// - `endpoint_id` from `hostname` or `computerName`
pub fn extract_params(alert: &Value) -> Parameters {
    let mut params = Parameters::new();

    if let Some(key) = alert
        .pointer("/detail/requestParameters/accessKeyId")
        .and_then(Value::as_str)
    {
        params.insert("key_id".to_string(), key.to_string());
    }

    let source_ip = alert.get("source_ip").and_then(Value::as_str);
    let destination_ip = alert.get("destination_ip").and_then(Value::as_str);
    match destination_ip {
        Some(dest) if !is_internal(dest) => {
            params.insert("ip_address".to_string(), dest.to_string());
        }
        _ => {
            if let Some(src) = source_ip {
                params.insert("ip_address".to_string(), src.to_string());
            }
        }
    }

    if let Some(host) = alert
        .get("hostname")
        .and_then(Value::as_str)
        .or_else(|| alert.get("computerName").and_then(Value::as_str))
    {
        params.insert("endpoint_id".to_string(), host.to_string());
    }

    params
}

fn is_internal(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        // unparseable values are never treated as block targets
        Err(_) => true,
    }
}

/// Routes alerts to playbooks by rule name.
pub struct AlertIntake<'a> {
    config: &'a IntakeConfig,
}

/// A routed alert, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedAlert {
    pub rule_name: String,
    pub playbook: PathBuf,
    pub overrides: Parameters,
}

impl<'a> AlertIntake<'a> {
    pub fn new(config: &'a IntakeConfig) -> Self {
        Self { config }
    }

    pub fn route(&self, alert: &Value) -> Result<RoutedAlert> {
        let name = rule_name(alert)
            .ok_or_else(|| PsorError::UnknownAlert("alert has no rule name".to_string()))?;

        let playbook = self
            .config
            .routes
            .get(name)
            .cloned()
            .ok_or_else(|| PsorError::UnknownAlert(name.to_string()))?;

        let overrides = extract_params(alert);
        tracing::info!(
            rule = %name,
            playbook = %playbook.display(),
            params = ?overrides,
            "Alert routed to playbook"
        );

        Ok(RoutedAlert {
            rule_name: name.to_string(),
            playbook,
            overrides,
        })
    }
}
