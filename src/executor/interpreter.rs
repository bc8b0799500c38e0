use crate::executor::runner::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker recorded when a failing plugin wrote nothing to stderr.
pub const NO_STDERR: &str = "No stderr.";

/// Exit code plugins use for "external dependency unreachable".
pub const DEPENDENCY_UNREACHABLE_EXIT: i32 = 127;

/// 스텝 실행 결과 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    SkippedPolicy,
    Succeeded,
    /// The plugin ran and reported failure
    Failed,
    /// The plugin could not be run (missing image, start failure, timeout, panic)
    Errored,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::SkippedPolicy => "SKIPPED_POLICY",
            StepOutcome::Succeeded => "SUCCEEDED",
            StepOutcome::Failed => "FAILED",
            StepOutcome::Errored => "ERRORED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed | StepOutcome::Errored)
    }
}

/// JSON object a plugin prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEnvelope {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PluginEnvelope {
    pub fn parse(stdout: &str) -> Option<Self> {
        serde_json::from_str(stdout.trim()).ok()
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    fn into_structured(self) -> Map<String, Value> {
        let mut structured = Map::new();
        structured.insert("message".to_string(), Value::String(self.message));
        if let Some(details) = self.details {
            structured.insert("details".to_string(), details);
        }
        structured
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub outcome: StepOutcome,
    pub raw_output: String,
    pub structured_output: Option<Map<String, Value>>,
    pub error_detail: Option<String>,
}

/// Sandbox 결과 해석기
pub struct ResultInterpreter;

impl ResultInterpreter {
    pub fn interpret(result: &Result<SandboxResult, SandboxError>) -> Interpretation {
        match result {
            Ok(result) => Self::interpret_result(result),
            Err(err) => Self::interpret_error(err),
        }
    }

    /// Classify a completed plugin run.
    ///
    /// Exit 0 is always a success. Unparseable stdout degrades to an opaque
    /// success message instead of an error.
    pub fn interpret_result(result: &SandboxResult) -> Interpretation {
        let envelope = PluginEnvelope::parse(&result.stdout);

        if result.exit_code == 0 {
            if let Some(envelope) = &envelope {
                if !envelope.is_success() {
                    tracing::warn!(
                        status = %envelope.status,
                        "Plugin exited 0 but reported a non-success status"
                    );
                }
            }

            return Interpretation {
                outcome: StepOutcome::Succeeded,
                raw_output: result.stdout.clone(),
                structured_output: envelope.map(PluginEnvelope::into_structured),
                error_detail: None,
            };
        }

        if result.exit_code == DEPENDENCY_UNREACHABLE_EXIT {
            tracing::warn!("Plugin reported an unreachable external dependency (exit 127)");
        }

        let stderr = result.stderr.trim();
        let error_detail = if stderr.is_empty() {
            NO_STDERR.to_string()
        } else {
            stderr.to_string()
        };

        Interpretation {
            outcome: StepOutcome::Failed,
            raw_output: result.stdout.clone(),
            structured_output: envelope.map(PluginEnvelope::into_structured),
            error_detail: Some(error_detail),
        }
    }

    pub fn interpret_error(err: &SandboxError) -> Interpretation {
        Interpretation {
            outcome: StepOutcome::Errored,
            raw_output: String::new(),
            structured_output: None,
            error_detail: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> SandboxResult {
        SandboxResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_success_envelope() {
        let interpretation = ResultInterpreter::interpret_result(&result(
            0,
            r#"{"status":"success","message":"ok"}"#,
            "",
        ));

        assert_eq!(interpretation.outcome, StepOutcome::Succeeded);
        let structured = interpretation.structured_output.unwrap();
        assert_eq!(Value::Object(structured), json!({ "message": "ok" }));
        assert!(interpretation.error_detail.is_none());
    }

    #[test]
    fn test_success_envelope_with_details() {
        let stdout = r#"{"status":"success","message":"isolated","details":{"endpoint_id":"web-07"}}"#;
        let interpretation = ResultInterpreter::interpret_result(&result(0, stdout, ""));

        let structured = interpretation.structured_output.unwrap();
        assert_eq!(structured["details"], json!({ "endpoint_id": "web-07" }));
    }

    #[test]
    fn test_malformed_json_degrades_to_raw_success() {
        let interpretation =
            ResultInterpreter::interpret_result(&result(0, "done, no json here", ""));

        assert_eq!(interpretation.outcome, StepOutcome::Succeeded);
        assert!(interpretation.structured_output.is_none());
        assert_eq!(interpretation.raw_output, "done, no json here");
    }

    #[test]
    fn test_dependency_unreachable_is_failed() {
        let interpretation = ResultInterpreter::interpret_result(&result(
            127,
            r#"{"status":"error","message":"Simulated failure: Could not connect to AWS API."}"#,
            "Connection to AWS endpoint failed",
        ));

        assert_eq!(interpretation.outcome, StepOutcome::Failed);
        assert_eq!(
            interpretation.error_detail.as_deref(),
            Some("Connection to AWS endpoint failed")
        );
        assert!(interpretation.structured_output.is_some());
    }

    #[test]
    fn test_empty_stderr_marker() {
        let interpretation = ResultInterpreter::interpret_result(&result(1, "", "  "));

        assert_eq!(interpretation.outcome, StepOutcome::Failed);
        assert_eq!(interpretation.error_detail.as_deref(), Some(NO_STDERR));
    }

    #[test]
    fn test_dispatch_error_is_errored() {
        let err = SandboxError::ImageNotFound("plugin-x".to_string());
        let interpretation = ResultInterpreter::interpret(&Err(err));

        assert_eq!(interpretation.outcome, StepOutcome::Errored);
        assert!(interpretation.error_detail.unwrap().contains("plugin-x"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(StepOutcome::SkippedPolicy.as_str(), "SKIPPED_POLICY");
        assert!(StepOutcome::Errored.is_failure());
        assert!(!StepOutcome::Succeeded.is_failure());
        assert_eq!(
            serde_json::to_string(&StepOutcome::SkippedPolicy).unwrap(),
            "\"SKIPPED_POLICY\""
        );
    }
}
