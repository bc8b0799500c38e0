use crate::playbook::{Policy, Step};
use serde::Serialize;

/// Details of the policy that stopped a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
    pub policy: String,
    pub parameter: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(PolicyViolation),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// 안전 정책 게이트
///
/// Pure function of `(step, policies)`: no I/O, no logging. The driver is
/// responsible for reporting the verdict.
pub struct PolicyGate;

impl PolicyGate {
    /// Evaluate a step against the policies in declaration order.
    ///
    /// A policy applies when the step's plugin reference contains its match
    /// substring; it is violated when the guarded parameter's value is one of
    /// its protected targets. The first violation wins.
    pub fn evaluate(step: &Step, policies: &[Policy]) -> Verdict {
        for policy in policies {
            if !policy.applies_to(&step.plugin_ref) {
                continue;
            }

            if let Some(value) = step.parameters.get(&policy.parameter) {
                if policy.protects(value) {
                    return Verdict::Blocked(PolicyViolation {
                        policy: policy.name.clone(),
                        parameter: policy.parameter.clone(),
                        target: value.clone(),
                        message: policy.message.clone(),
                    });
                }
            }
        }

        Verdict::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{OnFailure, Parameters, PolicyKind};

    fn policy(name: &str, plugin_match: &str, parameter: &str, targets: &[&str]) -> Policy {
        Policy {
            name: name.to_string(),
            kind: PolicyKind::DenyActionOnTarget,
            plugin_match: plugin_match.to_string(),
            parameter: parameter.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            message: format!("{} violated", name),
        }
    }

    fn step(plugin: &str, params: &[(&str, &str)]) -> Step {
        let parameters: Parameters = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Step {
            position: 0,
            name: "step".to_string(),
            plugin_ref: plugin.to_string(),
            parameters,
            on_failure: OnFailure::Continue,
        }
    }

    fn standard_policies() -> Vec<Policy> {
        vec![
            policy("corporate_ip_check", "block-ip", "ip_address", &["8.8.8.8"]),
            policy("critical_asset_check", "isolate-endpoint", "endpoint_id", &["dc-01"]),
        ]
    }

    #[test]
    fn test_blocks_protected_ip() {
        let s = step(
            "psor_platform_plugin-java-block-ip",
            &[("ip_address", "8.8.8.8"), ("reason", "c2")],
        );

        match PolicyGate::evaluate(&s, &standard_policies()) {
            Verdict::Blocked(v) => {
                assert_eq!(v.policy, "corporate_ip_check");
                assert_eq!(v.target, "8.8.8.8");
                assert_eq!(v.parameter, "ip_address");
            }
            Verdict::Allowed => panic!("expected the step to be blocked"),
        }
    }

    #[test]
    fn test_blocks_critical_asset() {
        let s = step("psor_platform_plugin-rust-isolate-endpoint", &[("endpoint_id", "dc-01")]);
        assert!(!PolicyGate::evaluate(&s, &standard_policies()).is_allowed());
    }

    #[test]
    fn test_allows_unprotected_target() {
        let s = step("psor_platform_plugin-java-block-ip", &[("ip_address", "198.51.100.7")]);
        assert_eq!(PolicyGate::evaluate(&s, &standard_policies()), Verdict::Allowed);
    }

    #[test]
    fn test_allows_when_no_policy_applies() {
        // protected value, but the plugin is not a block-type action
        let s = step("psor_platform_plugin-js-log-message", &[("ip_address", "8.8.8.8")]);
        assert_eq!(PolicyGate::evaluate(&s, &standard_policies()), Verdict::Allowed);

        let s = step("psor_platform_plugin-java-block-ip", &[("ip_address", "8.8.8.8")]);
        assert_eq!(PolicyGate::evaluate(&s, &[]), Verdict::Allowed);
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let s = step("PLUGIN-BLOCK-IP", &[("ip_address", "8.8.8.8")]);
        assert!(PolicyGate::evaluate(&s, &standard_policies()).is_allowed());
    }

    #[test]
    fn test_first_violated_policy_wins() {
        let policies = vec![
            policy("first", "block-ip", "ip_address", &["8.8.8.8"]),
            policy("second", "block", "ip_address", &["8.8.8.8"]),
        ];
        let s = step("plugin-block-ip", &[("ip_address", "8.8.8.8")]);

        match PolicyGate::evaluate(&s, &policies) {
            Verdict::Blocked(v) => assert_eq!(v.policy, "first"),
            Verdict::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let s = step("psor_platform_plugin-java-block-ip", &[("ip_address", "8.8.8.8")]);
        let policies = standard_policies();

        assert_eq!(
            PolicyGate::evaluate(&s, &policies),
            PolicyGate::evaluate(&s, &policies)
        );
    }
}
