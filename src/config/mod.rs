use crate::error::{PsorError, Result};
use crate::executor::rollback::RollbackMapping;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// psor 설정
///
/// 설정 파일은 ~/.psor/config.toml에 저장됩니다. 파일이 없으면 기본값을 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 실행 보고서 디렉토리
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// 실패한 플러그인 → 보상 플러그인
    #[serde(default = "default_rollback")]
    pub rollback: RollbackMapping,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub intake: IntakeConfig,
}

/// 플러그인 실행 환경
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntime {
    /// docker 호환 CLI로 컨테이너 이미지 실행
    Container,
    /// plugin_dir의 실행 파일을 직접 실행
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_runtime")]
    pub runtime: SandboxRuntime,

    #[serde(default = "default_container_cli")]
    pub container_cli: String,

    #[serde(default = "default_network_mode")]
    pub network_mode: String,

    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,

    /// 스텝 제한 시간 (없으면 무제한)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
}

/// 알림 규칙 이름 → 플레이북 경로
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, PathBuf>,
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_runtime() -> SandboxRuntime {
    SandboxRuntime::Container
}

fn default_container_cli() -> String {
    "docker".to_string()
}

fn default_network_mode() -> String {
    "host".to_string()
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins/bin")
}

fn default_rollback() -> RollbackMapping {
    RollbackMapping::new()
        .without_rollback("psor_platform_plugin-python-revoke-key")
        .with_rollback(
            "psor_platform_plugin-java-block-ip",
            "psor_platform_plugin-java-unblock-ip",
        )
        .with_rollback(
            "psor_platform_plugin-rust-isolate-endpoint",
            "psor_platform_plugin-rust-unisolate-endpoint",
        )
}

fn default_routes() -> BTreeMap<String, PathBuf> {
    let playbook = PathBuf::from("playbooks/remediate_compromised_host.yml");
    let mut routes = BTreeMap::new();
    routes.insert("AWS Credential Leak Detected".to_string(), playbook.clone());
    routes.insert("Malicious C2 Communication Detected".to_string(), playbook);
    routes
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            container_cli: default_container_cli(),
            network_mode: default_network_mode(),
            plugin_dir: default_plugin_dir(),
            step_timeout_secs: None,
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            routes: default_routes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            sandbox: SandboxConfig::default(),
            rollback: default_rollback(),
            logging: LoggingConfig::default(),
            intake: IntakeConfig::default(),
        }
    }
}

impl Config {
    /// 설정 디렉토리 경로
    fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".psor")
    }

    /// 설정 파일 경로 가져오기
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// 기본 경로에서 로드 (없으면 기본값 사용)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// 지정한 파일에서 로드
    ///
    /// # Examples
    /// ```no_run
    /// use psor::config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load_from(Path::new("psor.toml")).unwrap();
    /// println!("{:?}", config.sandbox.runtime);
    /// ```
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| PsorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// 설정을 지정한 경로에 저장
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let toml_string =
            toml::to_string_pretty(self).map_err(|e| PsorError::Config(e.to_string()))?;

        fs::write(path, toml_string)?;

        Ok(())
    }
}
