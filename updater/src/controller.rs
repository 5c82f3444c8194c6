//! 업데이트 라이프사이클 컨트롤러
//!
//! 영속 상태를 읽고 해당 단계부터 파이프라인을 이어서 진행합니다.
//!
//! ```text
//! (start) ─fetch→ notify ─[auto]→ downloadPackage → downloadASC → verifyASC → verifyPackage → ready
//!                   ├─[force]→ 강제 업데이트 미리보기 (이후 자동 동작 없음)
//!                   └─[manual, native/desktop]→ 업데이트 다이얼로그 ─confirm→ downloadPackage
//! ready ─[seamless + bundle]→ 번들 바로 설치
//!       ─[silent]→ 조용한 업데이트 다이얼로그 (30초 스로틀)
//!       ─[manual/force]→ 업데이트 다이얼로그 (1일 간격)
//! ```
//!
//! 모든 단계의 실패는 단계 경계에서 잡혀 `<step>Failed`로 기록되며 호출자에게 전파되지 않습니다.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{error_text, UpdaterError};
use crate::info::{self, DownloadedEvent, RunningVersion, UpdateInfo};
use crate::package::PackageBackend;
use crate::presenter::{DialogChoice, PlatformCapabilities, UpdateDialog, UpdatePresenter, UpdateRoute};
use crate::service::AppUpdateFacade;
use crate::status::{UpdateFileType, UpdateStatus, UpdateStrategy};
use crate::strategy::{is_auto_update_strategy, is_force_update_strategy, is_show_toast_error};
use crate::throttle::{update_dialog_allowed, LeadingThrottle};

/// 단계 최소 실행 시간 (스피너 깜빡임 방지)
pub const MIN_EXECUTION_DURATION: Duration = Duration::from_millis(3000);

/// 컨트롤러 옵션
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub min_step_duration: Duration,
    /// 미리보기/릴리스 노트를 전체 화면 모달로 여는지
    pub full_modal: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            min_step_duration: MIN_EXECUTION_DURATION,
            full_modal: false,
        }
    }
}

/// 수동 확인 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub is_force_update: bool,
    pub is_need_update: bool,
    pub update_file_type: UpdateFileType,
    pub response: UpdateInfo,
}

/// UI가 읽는 파생 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSnapshot {
    pub is_need_update: bool,
    pub update_file_type: UpdateFileType,
    pub data: UpdateInfo,
}

/// 설치 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum InstallOutcome {
    Installed,
    /// 설치 파일 없음. 미완료 상태로 되돌림
    PackageMissing,
    Failed { message: String },
}

type CheckFuture = Shared<BoxFuture<'static, Result<CheckResult, UpdaterError>>>;

pub struct LifecycleController {
    facade: Arc<dyn AppUpdateFacade>,
    packages: Arc<dyn PackageBackend>,
    presenter: Arc<dyn UpdatePresenter>,
    clock: Arc<dyn Clock>,
    running: RunningVersion,
    platform: PlatformCapabilities,
    options: ControllerOptions,
    /// 시작 확인을 아직 실행하지 않았는지
    launch_pending: AtomicBool,
    /// 강제 업데이트 미리보기를 띄웠으면 이후 자동 동작 생략
    force_preview_shown: AtomicBool,
    silent_dialog: LeadingThrottle,
    check_in_flight: StdMutex<Option<CheckFuture>>,
}

impl LifecycleController {
    pub fn new(
        facade: Arc<dyn AppUpdateFacade>,
        packages: Arc<dyn PackageBackend>,
        presenter: Arc<dyn UpdatePresenter>,
        running: RunningVersion,
        platform: PlatformCapabilities,
    ) -> Self {
        Self {
            facade,
            packages,
            presenter,
            clock: Arc::new(SystemClock),
            running,
            platform,
            options: ControllerOptions::default(),
            launch_pending: AtomicBool::new(true),
            force_preview_shown: AtomicBool::new(false),
            silent_dialog: LeadingThrottle::default(),
            check_in_flight: StdMutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn platform(&self) -> PlatformCapabilities {
        self.platform
    }

    pub fn running(&self) -> &RunningVersion {
        &self.running
    }

    pub fn facade(&self) -> &Arc<dyn AppUpdateFacade> {
        &self.facade
    }

    /// 시작 확인을 다시 실행할 수 있게 초기화 (테스트/재부팅 시퀀스용)
    pub fn reset_launch_state(&self) {
        self.launch_pending.store(true, Ordering::SeqCst);
        self.force_preview_shown.store(false, Ordering::SeqCst);
        self.silent_dialog.reset();
    }

    // ══════════════════════════════════════════════════════
    // 시작 확인
    // ══════════════════════════════════════════════════════

    /// 프로세스당 한 번 실행되는 시작 확인
    pub async fn run_startup_check(&self, auto_check: bool) {
        if !auto_check {
            return;
        }
        if self
            .launch_pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("[AppUpdate] Startup check already ran");
            return;
        }

        let info = match self.facade.get_update_info().await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!("[AppUpdate] Cannot read update state: {}", e);
                return;
            }
        };
        tracing::info!(
            "[AppUpdate] Startup check: status {}, strategy {:?}, latest {}",
            info.status,
            info.update_strategy,
            info.latest_version
        );

        if info::is_first_launch_after_updated(&info, &self.running) {
            if info.update_strategy != UpdateStrategy::Seamless {
                self.on_view_release_info();
            }
            log_failure("refresh update status", self.facade.refresh_update_status().await);
            self.fetch_update_info().await;
            return;
        }

        if info.status != UpdateStatus::Done && is_force_update_strategy(info.update_strategy) {
            self.force_preview_shown.store(true, Ordering::SeqCst);
            self.to_update_preview_page(true, Some(info.latest_version.clone()), Some(true))
                .await;
        }

        match info.status {
            UpdateStatus::UpdateIncomplete => {}
            UpdateStatus::DownloadPackage => self.download_package().await,
            UpdateStatus::DownloadAsc => self.download_asc().await,
            UpdateStatus::VerifyAsc => self.verify_asc().await,
            UpdateStatus::VerifyPackage => self.verify_package().await,
            UpdateStatus::Ready => {
                if self.force_preview_shown.load(Ordering::SeqCst) {
                    return;
                }
                let file_type = info::update_file_type(&info, &self.running);
                if file_type == UpdateFileType::JsBundle && info.update_strategy == UpdateStrategy::Seamless {
                    self.install_bundle_silently(info.downloaded_event.as_ref()).await;
                } else if info.update_strategy == UpdateStrategy::Silent {
                    self.show_silent_update_dialog().await;
                } else {
                    self.show_update_dialog(None).await;
                }
            }
            _ => self.fetch_update_info().await,
        }
    }

    /// 서버 확인 결과에 따라 자동 다운로드/강제 미리보기/알림 다이얼로그
    async fn fetch_update_info(&self) {
        let result = match self.check_for_updates().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("[AppUpdate] Update check failed: {}", e);
                return;
            }
        };
        if self.force_preview_shown.load(Ordering::SeqCst) || !result.is_need_update {
            return;
        }

        if is_auto_update_strategy(result.response.update_strategy) {
            self.download_package().await;
        } else if result.is_force_update {
            self.to_update_preview_page(true, Some(result.response.latest_version.clone()), Some(true))
                .await;
        } else if self.platform.shows_update_dialog() {
            self.show_update_dialog(Some(&result.response)).await;
        }
    }

    /// 강제 확인. 동시에 들어온 호출은 진행 중인 요청 결과를 함께 받는다
    pub async fn check_for_updates(&self) -> Result<CheckResult, UpdaterError> {
        let (future, joined) = {
            let mut slot = match self.check_in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slot.as_ref() {
                Some(in_flight) => (in_flight.clone(), true),
                None => {
                    let future = check_once(self.facade.clone(), self.running.clone()).boxed().shared();
                    *slot = Some(future.clone());
                    (future, false)
                }
            }
        };
        if joined {
            tracing::debug!("[AppUpdate] Joining in-flight update check");
        }

        let result = future.clone().await;

        let mut slot = match self.check_in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().map_or(false, |current| current.ptr_eq(&future)) {
            *slot = None;
        }
        result
    }

    // ══════════════════════════════════════════════════════
    // 파이프라인 단계
    // ══════════════════════════════════════════════════════

    /// 단계 작업과 최소 실행 시간을 함께 기다림
    async fn with_min_duration<T>(&self, op: impl Future<Output = T>) -> T {
        let (result, _) = tokio::join!(op, tokio::time::sleep(self.options.min_step_duration));
        result
    }

    fn toast_if_allowed(&self, strategy: UpdateStrategy, message: &str) {
        if is_show_toast_error(strategy) {
            self.presenter.show_toast_error(message);
        }
    }

    async fn current_info(&self) -> Option<UpdateInfo> {
        match self.facade.get_update_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::error!("[Pipeline] Cannot read update state: {}", e);
                None
            }
        }
    }

    pub async fn download_package(&self) {
        let Some(info) = self.current_info().await else {
            return;
        };
        let file_type = info::update_file_type(&info, &self.running);
        tracing::info!(
            "[Pipeline] Download {:?} {} (strategy {:?})",
            file_type,
            info.latest_version,
            info.update_strategy
        );

        match self.try_download_package(&info, file_type).await {
            Ok(true) => self.download_asc().await,
            Ok(false) => tracing::info!("[Pipeline] Backend produced no artifact, waiting for platform"),
            Err(e) => {
                tracing::warn!("[Pipeline] Download failed: {}", e);
                log_failure("record download failure", self.facade.download_package_failed(Some(e)).await);
                self.toast_if_allowed(info.update_strategy, error_text::UPDATE_FAILED);
            }
        }
    }

    async fn try_download_package(&self, info: &UpdateInfo, file_type: UpdateFileType) -> Result<bool, UpdaterError> {
        self.facade.download_package().await?;
        let previous = self.facade.get_download_event().await?.unwrap_or_default();
        let params = download_params(info, file_type, previous);

        let Some(result) = self.packages.download_package(file_type, &params).await? else {
            return Ok(false);
        };
        self.facade.update_downloaded_event(result.merge_into(params)).await?;
        Ok(true)
    }

    pub async fn download_asc(&self) {
        let Some(info) = self.current_info().await else {
            return;
        };
        let file_type = info::update_file_type(&info, &self.running);
        let params = match self.facade.get_download_event().await {
            Ok(Some(params)) => params,
            Ok(None) => {
                log_failure("record signature failure", self.facade.download_asc_failed(None).await);
                return;
            }
            Err(e) => {
                log_failure("record signature failure", self.facade.download_asc_failed(Some(e)).await);
                return;
            }
        };

        tracing::info!("[Pipeline] Download signature");
        let result = async {
            self.facade.download_asc().await?;
            self.with_min_duration(self.packages.download_asc(file_type, &params)).await
        }
        .await;

        match result {
            Ok(()) => self.verify_asc().await,
            Err(e) => {
                tracing::warn!("[Pipeline] Signature download failed: {}", e);
                log_failure("record signature failure", self.facade.download_asc_failed(Some(e)).await);
                self.toast_if_allowed(info.update_strategy, error_text::UPDATE_FAILED);
            }
        }
    }

    pub async fn verify_asc(&self) {
        let Some(info) = self.current_info().await else {
            return;
        };
        let file_type = info::update_file_type(&info, &self.running);
        let params = match self.facade.get_download_event().await {
            Ok(Some(params)) => params,
            Ok(None) => {
                log_failure("record verification failure", self.facade.verify_asc_failed(None).await);
                return;
            }
            Err(e) => {
                log_failure("record verification failure", self.facade.verify_asc_failed(Some(e)).await);
                return;
            }
        };

        tracing::info!("[Pipeline] Verify signature");
        let result = async {
            self.facade.verify_asc().await?;
            self.with_min_duration(self.packages.verify_asc(file_type, &params)).await
        }
        .await;

        match result {
            Ok(()) => self.verify_package().await,
            Err(e) => {
                tracing::warn!("[Pipeline] Signature verification failed: {}", e);
                log_failure("record verification failure", self.facade.verify_asc_failed(Some(e)).await);
                self.toast_if_allowed(info.update_strategy, error_text::UPDATE_FAILED);
            }
        }
    }

    pub async fn verify_package(&self) {
        let Some(info) = self.current_info().await else {
            return;
        };
        let file_type = info::update_file_type(&info, &self.running);
        let params = match self.facade.get_download_event().await {
            Ok(Some(params)) => params,
            Ok(None) => {
                log_failure("record verification failure", self.facade.verify_package_failed(None).await);
                return;
            }
            Err(e) => {
                log_failure("record verification failure", self.facade.verify_package_failed(Some(e)).await);
                return;
            }
        };

        tracing::info!("[Pipeline] Verify package");
        let result = async {
            self.facade.verify_package().await?;
            self.with_min_duration(self.packages.verify_package(file_type, &params)).await?;
            self.facade.ready_to_install().await
        }
        .await;

        match result {
            Ok(()) => tracing::info!("[Pipeline] Update ready to install"),
            Err(e) => {
                tracing::warn!("[Pipeline] Package verification failed: {}", e);
                log_failure("record verification failure", self.facade.verify_package_failed(Some(e)).await);
                self.toast_if_allowed(info.update_strategy, error_text::UPDATE_FAILED);
            }
        }
    }

    // ══════════════════════════════════════════════════════
    // 설치
    // ══════════════════════════════════════════════════════

    pub async fn install_package(&self) -> InstallOutcome {
        let Some(data) = self.current_info().await else {
            return InstallOutcome::Failed {
                message: error_text::UPDATE_FAILED.to_string(),
            };
        };
        let file_type = info::update_file_type(&data, &self.running);
        tracing::info!("[Pipeline] Install {:?}", file_type);

        let result = match file_type {
            UpdateFileType::JsBundle => match data.downloaded_event.as_ref() {
                Some(event) => self.packages.install_bundle(event).await,
                None => Err(UpdaterError::missing_artifact(None)),
            },
            UpdateFileType::AppShell => self.packages.install_package(&data).await,
        };

        match result {
            Ok(()) => {
                tracing::info!("[Pipeline] Install finished");
                InstallOutcome::Installed
            }
            Err(e) if e.is_missing_artifact() => {
                tracing::warn!("[Pipeline] Install package missing");
                log_failure("reset to incomplete", self.facade.reset_to_incomplete().await);
                // 설치는 항상 사용자가 시작하므로 전략과 무관하게 복구 다이얼로그를 띄운다
                self.show_update_incomplete_dialog(false).await;
                InstallOutcome::PackageMissing
            }
            Err(e) => {
                tracing::warn!("[Pipeline] Install failed: {}", e);
                let message = e.to_string();
                self.toast_if_allowed(data.update_strategy, &message);
                InstallOutcome::Failed { message }
            }
        }
    }

    /// 시작 시 seamless 번들 설치. 실패는 기록만 한다
    async fn install_bundle_silently(&self, event: Option<&DownloadedEvent>) {
        let Some(event) = event else {
            tracing::warn!("[Pipeline] Seamless bundle ready but no downloaded event");
            return;
        };
        match self.packages.install_bundle(event).await {
            Ok(()) => tracing::info!("[Pipeline] Seamless bundle installed"),
            Err(e) => tracing::warn!("[Pipeline] Seamless bundle install failed: {}", e),
        }
    }

    pub async fn manual_install_package(&self) {
        let params = match self.facade.get_download_event().await {
            Ok(params) => params,
            Err(e) => {
                tracing::error!("[Pipeline] Cannot read downloaded event: {}", e);
                None
            }
        };

        let result = match params.as_ref() {
            Some(event) => {
                tracing::info!("[Pipeline] Manual install {:?}", event.downloaded_file);
                self.packages
                    .manual_install_package(event, self.running.build_number)
                    .await
            }
            None => Err(UpdaterError::install("No download event found")),
        };

        if let Err(e) = result {
            tracing::warn!("[Pipeline] Manual install failed: {}", e);
            self.presenter.show_toast_error(error_text::UPDATE_FAILED);
            log_failure("reset to incomplete", self.facade.reset_to_incomplete().await);
            self.show_update_incomplete_dialog(true).await;
        }
    }

    // ══════════════════════════════════════════════════════
    // 다이얼로그 / 화면 이동
    // ══════════════════════════════════════════════════════

    /// 미완료 다이얼로그. 확인 → 다시 받기, 취소 → 미완료 상태 유지
    pub async fn show_update_incomplete_dialog(&self, pop_on_confirm: bool) {
        match self.presenter.show_dialog(UpdateDialog::UpdateIncomplete).await {
            DialogChoice::Confirm => {
                if pop_on_confirm {
                    self.presenter.navigate(UpdateRoute::PopStack);
                }
                self.download_package().await;
            }
            DialogChoice::Cancel => {
                log_failure("reset to incomplete", self.facade.reset_to_incomplete().await);
            }
        }
    }

    /// 업데이트 알림 다이얼로그 (하루 한 번)
    pub async fn show_update_dialog(&self, release: Option<&UpdateInfo>) {
        self.presenter.when_app_unlocked().await;
        let Some(current) = self.current_info().await else {
            return;
        };
        if !update_dialog_allowed(current.last_update_dialog_shown_at, self.clock.now_ms()) {
            tracing::debug!("[AppUpdate] Update dialog shown within the last day, skipping");
            return;
        }
        log_failure("record dialog time", self.facade.update_last_dialog_shown_at().await);

        let summary = release.and_then(|r| r.summary.clone()).filter(|s| !s.is_empty());
        let store_url = release.and_then(|r| r.store_url.clone()).filter(|s| !s.is_empty());
        let dialog = UpdateDialog::UpdateAvailable {
            summary,
            latest_version: current.latest_version.clone(),
        };
        if self.presenter.show_dialog(dialog).await != DialogChoice::Confirm {
            tracing::info!("[AppUpdate] Update dialog dismissed");
            return;
        }
        tracing::info!("[AppUpdate] Update dialog confirmed");

        if let Some(url) = store_url.filter(|_| !self.platform.is_extension) {
            self.presenter.navigate(UpdateRoute::OpenExternal { url });
            return;
        }
        let Some(latest) = self.current_info().await else {
            return;
        };
        self.to_download_verify_page().await;
        if latest.status != UpdateStatus::Ready {
            self.download_package().await;
        }
    }

    /// 조용한 업데이트 준비 완료 다이얼로그 (30초 안의 중복 호출 무시)
    pub async fn show_silent_update_dialog(&self) {
        let Some(current) = self.current_info().await else {
            return;
        };
        self.presenter.when_app_unlocked().await;
        if !self.silent_dialog.try_fire(self.clock.now_ms()) {
            tracing::debug!("[AppUpdate] Silent update dialog throttled");
            return;
        }
        let dialog = UpdateDialog::SilentUpdateReady {
            summary: current.summary.filter(|s| !s.is_empty()),
        };
        if self.presenter.show_dialog(dialog).await == DialogChoice::Confirm {
            self.to_download_verify_page().await;
        }
    }

    pub async fn to_update_preview_page(&self, full: bool, latest_version: Option<String>, is_force_update: Option<bool>) {
        let Some(current) = self.current_info().await else {
            return;
        };
        self.presenter.navigate(UpdateRoute::UpdatePreview {
            latest_version: latest_version.unwrap_or(current.latest_version),
            is_force_update: is_force_update.unwrap_or_else(|| is_force_update_strategy(current.update_strategy)),
            auto_close: full,
        });
    }

    pub async fn to_download_verify_page(&self) {
        let strategy = self
            .current_info()
            .await
            .map(|info| info.update_strategy)
            .unwrap_or_default();
        self.presenter.navigate(UpdateRoute::DownloadVerify {
            is_force_update: is_force_update_strategy(strategy),
        });
    }

    pub fn on_view_release_info(&self) {
        if self.platform.is_e2e {
            return;
        }
        self.presenter.navigate(UpdateRoute::WhatsNew {
            full: self.options.full_modal,
        });
    }

    /// 사용자가 업데이트 항목을 눌렀을 때. 현재 상태에 따라 분기
    pub async fn on_update_action(&self) {
        let Some(info) = self.current_info().await else {
            return;
        };
        tracing::info!("[AppUpdate] Update action in status {}", info.status);
        match info.status {
            UpdateStatus::Done | UpdateStatus::Notify => {
                self.to_update_preview_page(self.options.full_modal, None, None).await;
            }
            UpdateStatus::UpdateIncomplete => self.show_update_incomplete_dialog(false).await,
            UpdateStatus::ManualInstall => self.presenter.navigate(UpdateRoute::ManualInstall),
            _ => self.to_download_verify_page().await,
        }
    }

    pub async fn snapshot(&self) -> Result<UpdateSnapshot, UpdaterError> {
        let data = self.facade.get_update_info().await?;
        let (is_need_update, update_file_type) = info::is_need_update(&data, &self.running);
        Ok(UpdateSnapshot {
            is_need_update,
            update_file_type,
            data,
        })
    }
}

async fn check_once(facade: Arc<dyn AppUpdateFacade>, running: RunningVersion) -> Result<CheckResult, UpdaterError> {
    tracing::info!("[AppUpdate] Checking for updates");
    let response = facade.fetch_app_update_info(true).await?;
    let (is_need_update, update_file_type) = info::is_need_update(&response, &running);
    let is_force_update = is_force_update_strategy(response.update_strategy);
    tracing::info!(
        "[AppUpdate] Check finished: need update {}, force {}, type {:?}",
        is_need_update,
        is_force_update,
        update_file_type
    );
    Ok(CheckResult {
        is_force_update,
        is_need_update,
        update_file_type,
        response,
    })
}

/// 다운로드 요청 파라미터. 번들이면 번들 정보를, 아니면 패키지 정보를 쓴다
fn download_params(info: &UpdateInfo, file_type: UpdateFileType, previous: DownloadedEvent) -> DownloadedEvent {
    let bundle = info.js_bundle.as_ref().filter(|_| file_type == UpdateFileType::JsBundle);
    DownloadedEvent {
        latest_version: Some(info.latest_version.clone()),
        bundle_version: info.js_bundle_version.clone(),
        download_url: match file_type {
            UpdateFileType::JsBundle => bundle.map(|b| b.download_url.clone()),
            UpdateFileType::AppShell => info.download_url.clone(),
        },
        file_size: match file_type {
            UpdateFileType::JsBundle => bundle.map(|b| b.file_size),
            UpdateFileType::AppShell => Some(info.file_size.unwrap_or(0)),
        },
        signature: bundle.and_then(|b| b.signature.clone()),
        sha256: bundle.and_then(|b| b.sha256.clone()),
        ..previous
    }
}

fn log_failure(action: &str, result: Result<(), UpdaterError>) {
    if let Err(e) = result {
        tracing::error!("[AppUpdate] Failed to {}: {}", action, e);
    }
}
