//! # 지갑 앱 업데이트 라이브러리
//!
//! 지갑 클라이언트(네이티브/데스크톱/확장/웹)의 앱 업데이트 라이프사이클을 관리합니다.
//!
//! ## 동작 원리
//! - **레코드(info.rs / store.rs)**: 마지막 확인 결과와 진행 상태를 상태 파일 하나에 저장
//! - **분류기(strategy.rs)**: 전략/상태 조합 → UI 노출 여부
//! - **서비스(service.rs)**: 릴리스 정보 조회/병합, 단계별 상태 기록, 재확인 타이머
//! - **패키지(package.rs)**: 다운로드, 서명 확인, 무결성 검증, 설치
//! - **컨트롤러(controller.rs)**: 영속 상태에서 파이프라인을 이어서 진행하고 다이얼로그를 띄움
//!
//! ## 파이프라인
//! ```text
//! fetch → notify → downloadPackage → downloadASC → verifyASC → verifyPackage → ready → install
//! ```
//! 각 단계의 실패는 `<step>Failed` 상태와 `errorText`로 기록되고, 사용자가 다시 시도할 때까지 멈춥니다.

// ══════════════════════════════════════════════════════
// 모듈
// ══════════════════════════════════════════════════════

pub mod clock;
pub mod controller;
pub mod error;
pub mod info;
pub mod package;
pub mod presenter;
pub mod service;
pub mod status;
pub mod store;
pub mod strategy;
pub mod throttle;
pub mod version;


// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{CheckResult, ControllerOptions, InstallOutcome, LifecycleController, UpdateSnapshot};
pub use error::UpdaterError;
pub use info::{DownloadedEvent, JsBundleInfo, ReleaseInfo, RunningVersion, UpdateInfo};
pub use package::{DownloadResult, FsPackageBackend, FsPackageConfig, NoopPackageBackend, PackageBackend};
pub use presenter::{DialogChoice, HeadlessPresenter, PlatformCapabilities, UpdateDialog, UpdatePresenter, UpdateRoute};
pub use service::{AppUpdateFacade, AppUpdateService, HttpReleaseSource, ReleaseSource, ServiceTimings};
pub use status::{StatusPresentation, StatusTone, UpdateFileType, UpdateStatus, UpdateStrategy};
pub use store::{StateFile, UpdateInfoStore};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 업데이트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enabled: bool,
    /// 업데이트 서버 주소 (`/utility/v1/app-update`의 베이스)
    pub api_base_url: String,
    /// 상태 파일 경로 (기본: `~/.wallet/updater-state.json`)
    pub state_path: Option<String>,
    /// 다운로드 스테이징 디렉터리 (기본: 상태 파일 옆 `updates/`)
    pub staging_dir: Option<String>,
    /// 번들 설치 디렉터리 (기본: 상태 파일 옆 `bundles/`)
    pub bundle_dir: Option<String>,
    /// 배포 서명 공개키 (base64)
    pub signing_public_key: Option<String>,
    /// 단계 최소 실행 시간 (ms)
    pub min_step_duration_ms: u64,
    /// 데몬 시작 시 업데이트 확인
    pub check_on_start: bool,
    pub request_timeout_secs: u64,
    /// 미리보기를 전체 화면 모달로 열기
    pub full_modal: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "https://api.wallet.example".to_string(),
            state_path: None,
            staging_dir: None,
            bundle_dir: None,
            signing_public_key: None,
            min_step_duration_ms: controller::MIN_EXECUTION_DURATION.as_millis() as u64,
            check_on_start: true,
            request_timeout_secs: 30,
            full_modal: false,
        }
    }
}

impl UpdateConfig {
    pub fn state_file(&self) -> StateFile {
        match self.state_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => StateFile::with_path(PathBuf::from(path)),
            None => StateFile::with_path(StateFile::default_path()),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.state_file()
            .path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("updates"))
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.bundle_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("bundles"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            min_step_duration: Duration::from_millis(self.min_step_duration_ms),
            full_modal: self.full_modal,
        }
    }
}

/// 조립된 업데이트 런타임
pub struct AppUpdater {
    pub store: UpdateInfoStore,
    pub service: Arc<AppUpdateService>,
    pub controller: Arc<LifecycleController>,
}

impl AppUpdater {
    /// 설정에 따라 저장소/서비스/컨트롤러를 조립
    ///
    /// 패키지를 지원하지 않는 플랫폼은 `NoopPackageBackend`를 받는다.
    pub async fn assemble(
        config: &UpdateConfig,
        running: RunningVersion,
        platform: PlatformCapabilities,
        presenter: Arc<dyn UpdatePresenter>,
    ) -> anyhow::Result<Self> {
        let store = UpdateInfoStore::load_or_default(config.state_file(), UpdateInfo::for_running(&running)).await;

        let packages: Arc<dyn PackageBackend> = if platform.supports_packages() {
            Arc::new(FsPackageBackend::new(FsPackageConfig {
                staging_dir: config.staging_dir(),
                bundle_dir: config.bundle_dir(),
                public_key_base64: config.signing_public_key.clone(),
                request_timeout: config.request_timeout(),
            })?)
        } else {
            tracing::info!("[AppUpdate] Package updates unsupported on this platform, using no-op backend");
            Arc::new(NoopPackageBackend)
        };
        let source = Arc::new(HttpReleaseSource::new(&config.api_base_url, config.request_timeout())?);

        let service = AppUpdateService::builder(store.clone(), source, packages.clone(), running.clone())
            .platform(platform)
            .build();
        let controller = LifecycleController::new(service.clone(), packages, presenter, running, platform)
            .with_options(config.controller_options());

        Ok(Self {
            store,
            service,
            controller: Arc::new(controller),
        })
    }
}
