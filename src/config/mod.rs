//! 데몬 설정: `config/global.toml` 또는 `config/updater.toml`
//!
//! ```toml
//! [app]
//! version = "5.2.0"
//! bundle_version = "1.0.2"
//!
//! [ipc]
//! listen_addr = "127.0.0.1:57480"
//!
//! [updater]
//! api_base_url = "https://api.wallet.example"
//! check_on_start = true
//!
//! [platform]
//! is_desktop = true
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use wallet_updater_lib::{PlatformCapabilities, RunningVersion, UpdateConfig};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:57480";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub app: AppConfig,
    pub ipc: IpcConfig,
    pub updater: UpdateConfig,
    pub platform: PlatformCapabilities,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            ipc: IpcConfig::default(),
            updater: UpdateConfig::default(),
            platform: PlatformCapabilities::desktop(),
        }
    }
}

/// 업데이트 대상 앱(지갑 클라이언트)의 현재 버전
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub version: String,
    pub bundle_version: Option<String>,
    pub build_number: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            bundle_version: None,
            build_number: 1,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IpcConfig {
    pub listen_addr: String,
    /// 토큰 인증 끄기 (개발용)
    pub auth_disabled: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            auth_disabled: false,
        }
    }
}

impl GlobalConfig {
    /// 설정 파일을 찾아 읽고 환경 변수를 덮어씀. 파일이 없으면 기본값
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match find_config_file() {
            Some(path) => {
                tracing::info!("[Config] Loading {}", path.display());
                Self::load_from(&path)?
            }
            None => {
                tracing::info!("[Config] No config file found, using defaults");
                Self::default()
            }
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let is_updater_only = path.file_name().map(|f| f == "updater.toml").unwrap_or(false);
        Self::parse(&content, is_updater_only).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// `updater_only`이면 파일 전체를 `[updater]` 섹션으로 읽는다
    pub fn parse(content: &str, updater_only: bool) -> anyhow::Result<Self> {
        if updater_only {
            let updater: UpdateConfig = toml::from_str(content)?;
            return Ok(Self {
                updater,
                ..Self::default()
            });
        }
        Ok(toml::from_str(content)?)
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("WALLET_UPDATE_STATE_PATH").filter(|p| !p.trim().is_empty()) {
            self.updater.state_path = Some(path);
        }
        if var("WALLET_AUTH_DISABLED").as_deref() == Some("1") {
            self.ipc.auth_disabled = true;
        }
        if let Some(addr) = var("WALLET_IPC_ADDR").filter(|a| !a.trim().is_empty()) {
            self.ipc.listen_addr = addr;
        }
    }

    pub fn running_version(&self) -> RunningVersion {
        RunningVersion {
            app_version: self.app.version.clone(),
            bundle_version: self.app.bundle_version.clone().filter(|v| !v.trim().is_empty()),
            build_number: self.app.build_number,
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("WALLET_CONFIG_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("config")));
    for name in ["global.toml", "updater.toml"] {
        for dir in [exe_dir.clone(), Some(PathBuf::from("config"))].into_iter().flatten() {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_file() {
        let cfg = GlobalConfig::parse("", false).unwrap();
        assert_eq!(cfg.ipc.listen_addr, DEFAULT_LISTEN_ADDR);
        assert!(cfg.platform.is_desktop);
        assert!(cfg.updater.check_on_start);
        assert_eq!(cfg.updater.min_step_duration_ms, 3000);
    }

    #[test]
    fn parses_sections() {
        let cfg = GlobalConfig::parse(
            r#"
[app]
version = "5.2.0"
bundle_version = "1.0.2"
build_number = 520

[ipc]
listen_addr = "127.0.0.1:6000"

[updater]
api_base_url = "http://127.0.0.1:9000"
check_on_start = false
min_step_duration_ms = 0

[platform]
is_native = true
"#,
            false,
        )
        .unwrap();

        let running = cfg.running_version();
        assert_eq!(running.app_version, "5.2.0");
        assert_eq!(running.bundle_version.as_deref(), Some("1.0.2"));
        assert_eq!(running.build_number, 520);
        assert_eq!(cfg.ipc.listen_addr, "127.0.0.1:6000");
        assert_eq!(cfg.updater.api_base_url, "http://127.0.0.1:9000");
        assert!(!cfg.updater.check_on_start);
        assert!(cfg.platform.is_native);
        assert!(!cfg.platform.is_desktop);
    }

    #[test]
    fn updater_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updater.toml");
        std::fs::write(&path, "api_base_url = \"http://localhost:1\"\nfull_modal = true\n").unwrap();

        let cfg = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(cfg.updater.api_base_url, "http://localhost:1");
        assert!(cfg.updater.full_modal);
        assert_eq!(cfg.ipc.listen_addr, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.toml");
        std::fs::write(&path, "[ipc\nlisten_addr = 1").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WALLET_UPDATE_STATE_PATH", "/tmp/wallet/state.json"),
            ("WALLET_AUTH_DISABLED", "1"),
        ]
        .into_iter()
        .collect();

        let mut cfg = GlobalConfig::default();
        cfg.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.updater.state_path.as_deref(), Some("/tmp/wallet/state.json"));
        assert!(cfg.ipc.auth_disabled);
        assert_eq!(cfg.ipc.listen_addr, DEFAULT_LISTEN_ADDR);
    }
}
