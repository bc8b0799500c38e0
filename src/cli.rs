use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "psor")]
#[command(version)]
#[command(about = "Playbook-driven security incident remediation", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ~/.psor/config.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// 디버그 로그 출력
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a playbook
    Run {
        /// Playbook YAML file
        playbook: PathBuf,

        /// Parameter override (key=value), merged into steps that declare the key
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,

        /// Run report path (default: <reports_dir>/run-<id>.json)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Validate a playbook and show policy verdicts without running anything
    Check {
        playbook: PathBuf,

        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Route an alert (JSON file) to its playbook and run it
    Alert {
        /// Alert body as JSON
        alert: PathBuf,

        #[arg(short = 'y', long)]
        yes: bool,

        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Write a default config file (to --config or ~/.psor/config.toml)
    Init {
        /// Overwrite an existing file
        #[arg(short = 'f', long)]
        force: bool,
    },
}

/// `key=value` 파싱 (첫 번째 '='에서 분리)
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}
