use crate::executor::{RunReport, RunStatus, StepOutcome};
use crate::executor::validator::Verdict;
use crate::playbook::Plan;
use colored::*;

/// 실행 결과 요약 출력 (stdout)
pub fn print_report(report: &RunReport) {
    println!(
        "\n{} {} ({})",
        "[RUN]".cyan().bold(),
        report.plan_name.bold(),
        report.run_id.to_string().dimmed()
    );

    for record in &report.records {
        let outcome = match record.outcome {
            StepOutcome::Succeeded => record.outcome.as_str().green(),
            StepOutcome::SkippedPolicy => record.outcome.as_str().yellow(),
            StepOutcome::Failed | StepOutcome::Errored => record.outcome.as_str().red(),
        };

        println!(
            "  {}. {} [{}] {}",
            record.position + 1,
            record.step_name,
            outcome,
            record.detail().dimmed()
        );

        if let Some(rollback) = &record.rollback {
            let state = match (rollback.attempted, rollback.succeeded) {
                (false, _) => "not attempted".yellow(),
                (true, true) => "succeeded".green(),
                (true, false) => "failed".red(),
            };
            println!("       rollback {}: {}", state, rollback.detail.dimmed());
        }
    }

    println!("  - Succeeded: {}", report.succeeded().to_string().green());
    println!("  - Failed: {}", report.failed().to_string().red());
    println!("  - Skipped by policy: {}", report.skipped().to_string().yellow());
    println!("  - Execution time: {}ms", report.duration_ms());

    match &report.status {
        RunStatus::FailedPlan { step, .. } => println!(
            "{} Playbook halted at '{}' (on_failure: stop)",
            "[X]".red().bold(),
            step
        ),
        _ => println!("{} Playbook execution finished.", "[OK]".green().bold()),
    }
}

/// `check` 명령 출력: 정책 판정만 표시하고 실행하지 않음
pub fn print_check(plan: &Plan, verdicts: &[Verdict]) {
    println!(
        "{} {} ({} steps, {} policies)",
        "[OK]".green().bold(),
        plan.name.bold(),
        plan.step_count(),
        plan.safety_policies.len()
    );

    for (step, verdict) in plan.steps.iter().zip(verdicts) {
        match verdict {
            Verdict::Allowed => println!(
                "  {}. {} {} {}",
                step.position + 1,
                step.name,
                "allowed".green(),
                step.plugin_ref.dimmed()
            ),
            Verdict::Blocked(v) => println!(
                "  {}. {} {} by {} ({}={})",
                step.position + 1,
                step.name,
                "blocked".red().bold(),
                v.policy,
                v.parameter,
                v.target
            ),
        }
    }
}
