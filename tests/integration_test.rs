use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("psor").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Playbook-driven security incident remediation"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("psor").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn test_missing_subcommand() {
    let mut cmd = Command::cargo_bin("psor").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

/// Temp workspace with a config file that points everything inside it.
struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new(extra_config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("plugins")).unwrap();

        let config = format!(
            "reports_dir = {:?}\n\n[sandbox]\nruntime = \"local\"\nplugin_dir = {:?}\n{}\n",
            dir.path().join("reports"),
            dir.path().join("plugins"),
            extra_config
        );
        fs::write(dir.path().join("config.toml"), config).unwrap();

        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self) -> PathBuf {
        self.path("config.toml")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[cfg(unix)]
    fn plugin(&self, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path("plugins").join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("psor").unwrap();
        cmd.arg("--config")
            .arg(self.config())
            .env("NO_COLOR", "1")
            .env_remove("PSOR_LOG")
            .env_remove("PSOR_LOG_FORMAT");
        cmd
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_check_shows_policy_verdicts() {
    let ws = Workspace::new("");
    let playbook = ws.write(
        "playbook.yml",
        r#"
name: Check me
safety_policies:
  - name: corporate_ip_check
    targets: ["8.8.8.8"]
steps:
  - name: Block DNS
    plugin: plugin-block-ip
    parameters:
      ip_address: 8.8.8.8
  - name: Block attacker
    plugin: plugin-block-ip
    parameters:
      ip_address: 198.51.100.7
"#,
    );

    ws.cmd()
        .arg("check")
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked"))
        .stdout(predicate::str::contains("allowed"))
        .stdout(predicate::str::contains("corporate_ip_check"));
}

#[test]
fn test_check_param_override_unblocks_step() {
    let ws = Workspace::new("");
    let playbook = ws.write(
        "playbook.yml",
        "name: p\nsafety_policies:\n  - name: corporate_ip_check\n    targets: [\"8.8.8.8\"]\nsteps:\n  - name: block\n    plugin: plugin-block-ip\n    parameters:\n      ip_address: 8.8.8.8\n",
    );

    ws.cmd()
        .args(["check", "-p", "ip_address=203.0.113.9"])
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed"))
        .stdout(predicate::str::contains("blocked").not());
}

#[test]
fn test_malformed_playbook_is_rejected() {
    let ws = Workspace::new("");
    let playbook = ws.write("broken.yml", "name: broken\nsteps:\n  - plugin: plugin-a\n");

    ws.cmd()
        .arg("check")
        .arg(&playbook)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load playbook"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let ws = Workspace::new("");
    let config = ws.write("bad.toml", "[sandbox\n");
    let playbook = ws.write("playbook.yml", "name: p\nsteps: []\n");

    Command::cargo_bin("psor")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .arg(&playbook)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[cfg(unix)]
#[test]
fn test_run_halts_on_stop_failure() {
    let ws = Workspace::new(
        "\n[rollback]\n\"plugin-block-ip\" = \"plugin-unblock-ip\"\n",
    );
    ws.plugin(
        "plugin-isolate",
        r#"echo '{"status":"success","message":"isolated"}'"#,
    );
    ws.plugin(
        "plugin-block-ip",
        r#"echo '{"status":"error","message":"rejected"}'
echo "firewall API rejected the rule" >&2
exit 1"#,
    );
    ws.plugin(
        "plugin-unblock-ip",
        r#"echo '{"status":"success","message":"unblocked"}'"#,
    );
    ws.plugin("plugin-revoke-key", r#"echo '{"status":"success"}'"#);

    let playbook = ws.write(
        "playbook.yml",
        r#"
name: Halting run
steps:
  - name: A
    plugin: plugin-isolate
    parameters:
      endpoint_id: web-07
  - name: B
    plugin: plugin-block-ip
    parameters:
      ip_address: 198.51.100.7
    on_failure: stop
  - name: C
    plugin: plugin-revoke-key
    parameters:
      key_id: AKIA123
"#,
    );
    let report_path = ws.path("report.json");

    ws.cmd()
        .args(["run", "-y", "--report"])
        .arg(&report_path)
        .arg(&playbook)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Playbook halted"));

    let report = read_json(&report_path);
    assert_eq!(report["status"]["state"], "FAILED_PLAN");
    assert_eq!(report["status"]["step"], "B");

    let records = report["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["outcome"], "SUCCEEDED");
    assert_eq!(records[1]["outcome"], "FAILED");
    assert_eq!(records[1]["error_detail"], "firewall API rejected the rule");
    assert_eq!(records[1]["rollback"]["attempted"], true);
    assert_eq!(records[1]["rollback"]["succeeded"], true);
}

#[cfg(unix)]
#[test]
fn test_run_writes_report_to_reports_dir() {
    let ws = Workspace::new("");
    ws.plugin(
        "plugin-echo",
        r#"echo "{\"status\":\"success\",\"message\":\"$1\"}""#,
    );
    let playbook = ws.write(
        "playbook.yml",
        "name: echo\nsteps:\n  - name: echo\n    plugin: plugin-echo\n    parameters:\n      endpoint_id: web-07\n",
    );

    ws.cmd()
        .args(["run", "-y"])
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("Playbook execution finished"));

    let reports: Vec<_> = fs::read_dir(ws.path("reports"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(reports.len(), 1);

    let report = read_json(&reports[0]);
    assert_eq!(report["status"]["state"], "COMPLETED");
    assert_eq!(
        report["records"][0]["structured_output"]["message"],
        "endpoint_id=web-07"
    );
}

#[cfg(unix)]
#[test]
fn test_run_step_timeout_is_errored() {
    let ws = Workspace::new("step_timeout_secs = 1");
    ws.plugin("plugin-hang", "exec sleep 10");
    ws.plugin("plugin-after", r#"echo '{"status":"success"}'"#);

    let playbook = ws.write(
        "playbook.yml",
        "name: hang\nsteps:\n  - name: hang\n    plugin: plugin-hang\n  - name: after\n    plugin: plugin-after\n",
    );
    let report_path = ws.path("report.json");

    ws.cmd()
        .args(["run", "-y", "--report"])
        .arg(&report_path)
        .arg(&playbook)
        .assert()
        .success();

    let report = read_json(&report_path);
    let records = report["records"].as_array().unwrap();
    assert_eq!(records[0]["outcome"], "ERRORED");
    assert!(records[0]["error_detail"]
        .as_str()
        .unwrap()
        .contains("timed out"));
    assert_eq!(records[1]["outcome"], "SUCCEEDED");
}

#[cfg(unix)]
#[test]
fn test_alert_routes_to_playbook() {
    let ws = Workspace::new("");
    let playbook = ws.write(
        "c2.yml",
        "name: C2 response\nsteps:\n  - name: isolate\n    plugin: plugin-isolate\n    parameters:\n      endpoint_id: placeholder\n",
    );
    let config = fs::read_to_string(ws.config()).unwrap();
    fs::write(
        ws.config(),
        format!(
            "{}\n[intake.routes]\n\"Malicious C2 Communication Detected\" = {:?}\n",
            config, playbook
        ),
    )
    .unwrap();
    ws.plugin(
        "plugin-isolate",
        r#"echo "{\"status\":\"success\",\"message\":\"$1\"}""#,
    );

    let alert = ws.write(
        "alert.json",
        r#"{"rule": {"name": "Malicious C2 Communication Detected"}, "hostname": "web-07"}"#,
    );
    let report_path = ws.path("report.json");

    ws.cmd()
        .args(["alert", "-y", "--report"])
        .arg(&report_path)
        .arg(&alert)
        .assert()
        .success();

    let report = read_json(&report_path);
    assert_eq!(report["plan_name"], "C2 response");
    assert_eq!(
        report["records"][0]["structured_output"]["message"],
        "endpoint_id=web-07"
    );
}

#[test]
fn test_alert_with_unknown_rule_fails() {
    let ws = Workspace::new("");
    let alert = ws.write("alert.json", r#"{"rule_name": "Something Else"}"#);

    ws.cmd()
        .args(["alert", "-y"])
        .arg(&alert)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Something Else"));
}

#[test]
fn test_init_writes_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("psor.toml");

    Command::cargo_bin("psor")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("psor_platform_plugin-java-unblock-ip"));

    // a second init without --force refuses to overwrite
    Command::cargo_bin("psor")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
