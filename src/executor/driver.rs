use crate::executor::interpreter::{Interpretation, ResultInterpreter, StepOutcome};
use crate::executor::rollback::{RollbackCoordinator, RollbackMapping, RollbackOutcome};
use crate::executor::runner::{dispatch, Sandbox, SandboxError, SandboxResult};
use crate::executor::validator::{PolicyGate, PolicyViolation, Verdict};
use crate::logging::AUDIT_TARGET;
use crate::playbook::{OnFailure, Plan, Policy, Step};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// 스텝 1회 시도의 기록 (추가 후 변경되지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    /// 플랜 내 위치 (0부터)
    pub position: usize,
    pub step_name: String,
    pub plugin_ref: String,
    pub outcome: StepOutcome,
    pub raw_output: String,
    pub structured_output: Option<Map<String, Value>>,
    pub error_detail: Option<String>,
    /// 정책에 의해 스킵된 경우 위반 내용
    pub blocked_by: Option<PolicyViolation>,
    /// 실패 후 롤백 시도 결과
    pub rollback: Option<RollbackOutcome>,
    pub duration_ms: u128,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn skipped(step: &Step, violation: PolicyViolation, duration_ms: u128) -> Self {
        Self {
            position: step.position,
            step_name: step.name.clone(),
            plugin_ref: step.plugin_ref.clone(),
            outcome: StepOutcome::SkippedPolicy,
            raw_output: String::new(),
            structured_output: None,
            error_detail: Some(violation.message.clone()),
            blocked_by: Some(violation),
            rollback: None,
            duration_ms,
            recorded_at: Utc::now(),
        }
    }

    fn attempted(
        step: &Step,
        interpretation: Interpretation,
        rollback: Option<RollbackOutcome>,
        duration_ms: u128,
    ) -> Self {
        Self {
            position: step.position,
            step_name: step.name.clone(),
            plugin_ref: step.plugin_ref.clone(),
            outcome: interpretation.outcome,
            raw_output: interpretation.raw_output,
            structured_output: interpretation.structured_output,
            error_detail: interpretation.error_detail,
            blocked_by: None,
            rollback,
            duration_ms,
            recorded_at: Utc::now(),
        }
    }

    /// One-line detail for logs and summaries.
    pub fn detail(&self) -> &str {
        match self.outcome {
            StepOutcome::Succeeded => self
                .structured_output
                .as_ref()
                .and_then(|s| s.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or(self.raw_output.as_str()),
            _ => self.error_detail.as_deref().unwrap_or_default(),
        }
    }
}

/// 실행 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    /// Every step was processed
    Completed,
    /// A failing `on_failure: stop` step ended the run
    FailedPlan { halted_at: usize, step: String },
}

/// Owned state of one playbook run. Created by [`ExecutionDriver::begin`],
/// consumed by [`RunHandle::close`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    plan_name: String,
    plan_digest: String,
    started_at: DateTime<Utc>,
    history: Vec<ExecutionRecord>,
    status: RunStatus,
}

impl RunHandle {
    fn new(plan: &Plan) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_name: plan.name.clone(),
            plan_digest: plan.digest.clone(),
            started_at: Utc::now(),
            history: Vec::with_capacity(plan.step_count()),
            status: RunStatus::Running,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    fn append(&mut self, record: ExecutionRecord) {
        self.history.push(record);
    }

    fn halt(&mut self, step: &Step) {
        self.status = RunStatus::FailedPlan {
            halted_at: step.position,
            step: step.name.clone(),
        };
    }

    pub fn close(mut self) -> RunReport {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Completed;
        }

        RunReport {
            run_id: self.run_id,
            plan_name: self.plan_name,
            plan_digest: self.plan_digest,
            status: self.status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            records: self.history,
        }
    }
}

/// 실행 결과 보고서
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan_name: String,
    pub plan_digest: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<ExecutionRecord>,
}

impl RunReport {
    pub fn halted(&self) -> bool {
        matches!(self.status, RunStatus::FailedPlan { .. })
    }

    pub fn record(&self, step_name: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.step_name == step_name)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(StepOutcome::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(StepOutcome::Failed) + self.count(StepOutcome::Errored)
    }

    pub fn skipped(&self) -> usize {
        self.count(StepOutcome::SkippedPolicy)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Sequences a plan's steps: policy gate, dispatch, interpretation, rollback.
///
/// Steps run strictly in plan order, one at a time. A failing step is rolled
/// back best-effort; whether the run continues depends only on the step's
/// `on_failure` setting.
pub struct ExecutionDriver {
    sandbox: Arc<dyn Sandbox>,
    rollback: RollbackCoordinator,
}

impl ExecutionDriver {
    pub fn new(sandbox: Arc<dyn Sandbox>, mapping: Arc<RollbackMapping>) -> Self {
        let rollback = RollbackCoordinator::new(mapping, sandbox.clone());
        Self { sandbox, rollback }
    }

    pub fn begin(&self, plan: &Plan) -> RunHandle {
        RunHandle::new(plan)
    }

    /// Run the whole plan and return its report.
    pub async fn run(&self, plan: &Plan) -> RunReport {
        let mut handle = self.begin(plan);
        let span = tracing::info_span!("run", run_id = %handle.run_id(), plan = %plan.name);

        self.drive(plan, &mut handle).instrument(span).await;

        handle.close()
    }

    async fn drive(&self, plan: &Plan, handle: &mut RunHandle) {
        tracing::info!(
            digest = %plan.digest,
            steps = plan.step_count(),
            sandbox = self.sandbox.name(),
            "Starting playbook execution"
        );

        for step in &plan.steps {
            if !handle.is_running() {
                break;
            }

            let span = tracing::info_span!("step", position = step.position + 1, step = %step.name);
            let record = self
                .execute_step(step, &plan.safety_policies)
                .instrument(span)
                .await;

            tracing::info!(
                target: AUDIT_TARGET,
                step = %record.step_name,
                position = record.position + 1,
                plugin = %record.plugin_ref,
                outcome = record.outcome.as_str(),
                detail = %record.detail(),
                "Step recorded"
            );

            let halt = record.outcome.is_failure() && step.on_failure == OnFailure::Stop;
            handle.append(record);

            if halt {
                tracing::error!(
                    step = %step.name,
                    "Playbook execution halted due to 'on_failure: stop' policy"
                );
                handle.halt(step);
            }
        }

        tracing::info!("--- Playbook execution finished ---");
    }

    async fn execute_step(&self, step: &Step, policies: &[Policy]) -> ExecutionRecord {
        let start_time = Instant::now();
        tracing::info!(plugin = %step.plugin_ref, "--- Starting step ---");

        if let Verdict::Blocked(violation) = PolicyGate::evaluate(step, policies) {
            tracing::warn!(
                target: AUDIT_TARGET,
                step = %step.name,
                policy = %violation.policy,
                parameter = %violation.parameter,
                target_value = %violation.target,
                "[SAFETY_CHECK_VIOLATION] Action BLOCKED. {}: {}",
                violation.message,
                violation.target
            );
            return ExecutionRecord::skipped(step, violation, start_time.elapsed().as_millis());
        }

        tracing::info!(
            target: AUDIT_TARGET,
            step = %step.name,
            "[SAFETY_CHECK_PASSED] Action is approved for execution"
        );

        tracing::info!(
            plugin = %step.plugin_ref,
            params = ?step.parameters,
            "Executing plugin"
        );
        let result = dispatch(self.sandbox.clone(), &step.plugin_ref, &step.parameters).await;
        let interpretation = ResultInterpreter::interpret(&result);

        match interpretation.outcome {
            StepOutcome::Succeeded => match &interpretation.structured_output {
                Some(structured) => {
                    tracing::info!(output = ?structured, "[PLUGIN_OUTPUT] Step completed successfully")
                }
                None => tracing::info!(
                    output = %interpretation.raw_output,
                    "[PLUGIN_RAW_OUTPUT] Step completed successfully"
                ),
            },
            StepOutcome::Failed => {
                if let Ok(sandbox_result) = &result {
                    tracing::error!(
                        exit_code = sandbox_result.exit_code,
                        error = %interpretation.error_detail.as_deref().unwrap_or_default(),
                        "Step FAILED"
                    );
                }
            }
            _ => tracing::error!(
                error = %interpretation.error_detail.as_deref().unwrap_or_default(),
                "Step ERRORED: sandbox environment problem"
            ),
        }

        let rollback = if interpretation.outcome.is_failure() {
            Some(self.compensate(step, &result).await)
        } else {
            None
        };

        ExecutionRecord::attempted(step, interpretation, rollback, start_time.elapsed().as_millis())
    }

    async fn compensate(
        &self,
        step: &Step,
        result: &Result<SandboxResult, SandboxError>,
    ) -> RollbackOutcome {
        // a plugin that was never found never acted
        if let Err(SandboxError::ImageNotFound(image)) = result {
            tracing::warn!(
                target: AUDIT_TARGET,
                plugin = %image,
                attempted = false,
                "Skipping rollback: plugin image was not found, no action was taken"
            );
            return RollbackOutcome::not_attempted(format!(
                "plugin '{}' never ran; nothing to compensate",
                image
            ));
        }

        self.rollback.rollback(&step.plugin_ref, &step.parameters).await
    }
}
