use anyhow::Context;
use clap::Parser;
use colored::*;
use indexmap::IndexMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use psor::cli::{Cli, Command};
use psor::config::Config;
use psor::executor::{build_sandbox, ExecutionDriver, PolicyGate, RunReport};
use psor::intake::AlertIntake;
use psor::logging::init_logging;
use psor::playbook::{load_plan_file, Parameters, Plan};
use psor::ui::{print_check, print_report, ConfirmPrompt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Init { force } = cli.command {
        return init_config(cli.config.as_deref(), force);
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load()?,
    };
    if cli.debug {
        config.logging.level = "debug".to_string();
    }
    init_logging(Some(&config.logging))?;

    let halted = match cli.command {
        Command::Run { playbook, params, yes, report } => {
            let overrides: Parameters = params.into_iter().collect();
            let plan = load(&playbook, &overrides)?;
            execute(&config, plan, yes, report.as_deref()).await?
        }
        Command::Check { playbook, params } => {
            let overrides: Parameters = params.into_iter().collect();
            let plan = load(&playbook, &overrides)?;
            let verdicts: Vec<_> = plan
                .steps
                .iter()
                .map(|step| PolicyGate::evaluate(step, &plan.safety_policies))
                .collect();
            print_check(&plan, &verdicts);
            false
        }
        Command::Alert { alert, yes, report } => {
            let body = fs::read_to_string(&alert)
                .with_context(|| format!("failed to read alert {}", alert.display()))?;
            let alert_json: serde_json::Value = serde_json::from_str(&body)
                .with_context(|| format!("alert {} is not valid JSON", alert.display()))?;

            let routed = AlertIntake::new(&config.intake).route(&alert_json)?;
            let plan = load(&routed.playbook, &routed.overrides)?;
            execute(&config, plan, yes, report.as_deref()).await?
        }
        Command::Init { .. } => false,
    };

    if halted {
        std::process::exit(1);
    }

    Ok(())
}

/// 기본 설정 파일 생성
fn init_config(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default()
        .save_to(&path)
        .with_context(|| format!("failed to write config {}", path.display()))?;
    println!("{} Wrote default config to {}", "[OK]".green().bold(), path.display());
    Ok(())
}

fn load(path: &Path, overrides: &IndexMap<String, String>) -> anyhow::Result<Plan> {
    let plan = load_plan_file(path)
        .with_context(|| format!("failed to load playbook {}", path.display()))?;
    tracing::info!(playbook = %plan.name, "Successfully loaded playbook");
    Ok(plan.with_overrides(overrides))
}

/// 플레이북 실행; 중단(halt) 여부 반환
async fn execute(config: &Config, plan: Plan, yes: bool, report_path: Option<&Path>) -> anyhow::Result<bool> {
    if !yes && !ConfirmPrompt::new().confirm_run(&plan)? {
        eprintln!("{}", "[X] User cancelled.".yellow());
        return Ok(false);
    }

    let sandbox = build_sandbox(&config.sandbox);
    let driver = ExecutionDriver::new(sandbox, Arc::new(config.rollback.clone()));
    let report = driver.run(&plan).await;

    print_report(&report);
    let path = report_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.reports_dir.join(format!("run-{}.json", report.run_id)));
    write_report(&report, &path)?;
    tracing::info!(report = %path.display(), "Run report written");

    Ok(report.halted())
}

fn write_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}
