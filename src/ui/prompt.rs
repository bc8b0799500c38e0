use crate::error::{PsorError, Result};
use crate::executor::{PolicyGate, Verdict};
use crate::playbook::{OnFailure, Plan};
use colored::*;
use dialoguer::Confirm;

pub struct ConfirmPrompt;

impl ConfirmPrompt {
    pub fn new() -> Self {
        Self
    }

    /// 실행 전 플레이북 내용을 보여주고 사용자 확인
    pub fn confirm_run(&self, plan: &Plan) -> Result<bool> {
        eprintln!("\n{} {}", "[>] Playbook:".cyan().bold(), plan.name.bold());

        for step in &plan.steps {
            let verdict = PolicyGate::evaluate(step, &plan.safety_policies);
            let marker = match verdict {
                Verdict::Allowed => "run".green(),
                Verdict::Blocked(_) => "blocked".red().bold(),
            };
            let stop = if step.on_failure == OnFailure::Stop {
                " (stop on failure)".yellow().to_string()
            } else {
                String::new()
            };

            eprintln!(
                "  {}. {} [{}] {}{}",
                step.position + 1,
                step.name,
                marker,
                step.plugin_ref.dimmed(),
                stop
            );
        }

        let result = Confirm::new()
            .with_prompt("Execute these remediation steps?")
            .default(false)
            .interact()
            .map_err(|_| PsorError::UserCancelled)?;

        Ok(result)
    }
}

impl Default for ConfirmPrompt {
    fn default() -> Self {
        Self::new()
    }
}
