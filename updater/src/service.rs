//! 업데이트 서비스: 컨트롤러가 호출하는 백엔드 파사드
//!
//! ## 역할
//! - 릴리스 정보 조회와 레코드 병합 (`fetch_app_update_info`)
//! - 파이프라인 단계별 상태 기록 (`download_package`, `verify_asc` 등)
//! - 실패 원인 → 사용자 표시용 에러 텍스트 변환
//!
//! ## 백그라운드 타이머
//! - 동기화 재확인: 판정할 때마다 1시간 + 임의 0~30분 뒤로 다시 예약
//! - 다운로드 워치독: 30분 안에 다운로드가 끝나지 않으면 `downloadPackageFailed` 기록

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock, DAY_MS, HOUR_MS, MINUTE_MS};
use crate::error::{self, UpdaterError};
use crate::info::{self, DownloadedEvent, ReleaseInfo, RunningVersion, UpdateInfo};
use crate::package::PackageBackend;
use crate::presenter::PlatformCapabilities;
use crate::status::{UpdateStatus, UpdateStrategy};
use crate::store::UpdateInfoStore;

/// 최신 릴리스 정보 캐시 유효 시간
pub const LATEST_INFO_CACHE_MS: i64 = 5 * MINUTE_MS;
/// 변경 로그 캐시 유효 시간
pub const CHANGE_LOG_CACHE_MS: i64 = 5 * MINUTE_MS;

/// 백그라운드 타이머 간격
#[derive(Debug, Clone, Copy)]
pub struct ServiceTimings {
    pub sync_interval: Duration,
    /// 재확인 시각에 더해지는 임의 지연의 최대값
    pub sync_jitter: Duration,
    pub download_timeout: Duration,
}

impl Default for ServiceTimings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60 * 60),
            sync_jitter: Duration::from_secs(30 * 60),
            download_timeout: Duration::from_secs(30 * 60),
        }
    }
}

// ══════════════════════════════════════════════════════
// 파사드 트레이트
// ══════════════════════════════════════════════════════

/// 업데이트 상태를 바꾸는 모든 연산. 컨트롤러는 이 트레이트만 본다
#[async_trait]
pub trait AppUpdateFacade: Send + Sync {
    async fn get_update_info(&self) -> Result<UpdateInfo, UpdaterError>;

    async fn get_update_status(&self) -> Result<UpdateStatus, UpdaterError>;

    /// 서버에서 최신 정보를 받아 레코드에 병합
    async fn fetch_app_update_info(&self, force: bool) -> Result<UpdateInfo, UpdaterError>;

    /// 업데이트 후 첫 실행이면 레코드 초기화
    async fn refresh_update_status(&self) -> Result<(), UpdaterError>;

    async fn download_package(&self) -> Result<(), UpdaterError>;

    async fn download_package_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError>;

    async fn download_asc(&self) -> Result<(), UpdaterError>;

    async fn download_asc_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError>;

    async fn verify_asc(&self) -> Result<(), UpdaterError>;

    async fn verify_asc_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError>;

    async fn verify_package(&self) -> Result<(), UpdaterError>;

    async fn verify_package_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError>;

    async fn get_download_event(&self) -> Result<Option<DownloadedEvent>, UpdaterError>;

    async fn update_downloaded_event(&self, event: DownloadedEvent) -> Result<(), UpdaterError>;

    async fn update_download_url(&self, url: String) -> Result<(), UpdaterError>;

    async fn ready_to_install(&self) -> Result<(), UpdaterError>;

    async fn reset(&self) -> Result<(), UpdaterError>;

    async fn reset_to_incomplete(&self) -> Result<(), UpdaterError>;

    async fn reset_to_manual_install(&self) -> Result<(), UpdaterError>;

    async fn update_last_dialog_shown_at(&self) -> Result<(), UpdaterError>;

    async fn clear_last_dialog_shown_at(&self) -> Result<(), UpdaterError>;

    /// 받은 패키지를 지우고 레코드 초기화
    async fn clear_cache(&self) -> Result<(), UpdaterError>;

    async fn fetch_change_log(&self) -> Result<Option<String>, UpdaterError>;
}

// ══════════════════════════════════════════════════════
// 릴리스 정보 소스
// ══════════════════════════════════════════════════════

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// 최신 릴리스. 서버가 실패 코드를 돌려주면 `Ok(None)`
    async fn fetch_release(&self) -> Result<Option<ReleaseInfo>, UpdaterError>;

    async fn fetch_change_log(&self) -> Result<Option<String>, UpdaterError>;
}

/// 업데이트 서버 응답 봉투 (`code == 0`이면 성공)
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeLogData {
    #[serde(default)]
    change_log: Option<String>,
}

/// HTTP 릴리스 소스
pub struct HttpReleaseSource {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpReleaseSource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("wallet-updater/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    async fn get_envelope<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Envelope<T>, UpdaterError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, path, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpdaterError::Api {
                status_code: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| UpdaterError::Api {
                status_code: 200,
                message: format!("Invalid response from {}: {}", path, e),
            })
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_release(&self) -> Result<Option<ReleaseInfo>, UpdaterError> {
        let envelope: Envelope<ReleaseInfo> = self.get_envelope("/utility/v1/app-update").await?;
        if envelope.code != 0 {
            tracing::warn!("[AppUpdate] Update server returned code {}", envelope.code);
            return Ok(None);
        }
        Ok(Some(envelope.data.unwrap_or_default()))
    }

    async fn fetch_change_log(&self) -> Result<Option<String>, UpdaterError> {
        let envelope: Envelope<ChangeLogData> = self.get_envelope("/utility/v1/app-update/version-info").await?;
        if envelope.code != 0 {
            return Ok(None);
        }
        Ok(envelope.data.and_then(|d| d.change_log))
    }
}

// ══════════════════════════════════════════════════════
// AppUpdateService
// ══════════════════════════════════════════════════════

pub struct AppUpdateService {
    me: Weak<AppUpdateService>,
    store: UpdateInfoStore,
    source: Arc<dyn ReleaseSource>,
    packages: Arc<dyn PackageBackend>,
    clock: Arc<dyn Clock>,
    running: RunningVersion,
    platform: PlatformCapabilities,
    timings: ServiceTimings,
    /// 서비스 인스턴스의 첫 동기화 판정 여부
    first_sync: AtomicBool,
    latest_cache: Mutex<Option<(i64, ReleaseInfo)>>,
    change_log_cache: Mutex<Option<(i64, Option<String>)>>,
    sync_timer: StdMutex<Option<JoinHandle<()>>>,
    download_watchdog: StdMutex<Option<JoinHandle<()>>>,
}

/// `AppUpdateService` 생성기
pub struct AppUpdateServiceBuilder {
    store: UpdateInfoStore,
    source: Arc<dyn ReleaseSource>,
    packages: Arc<dyn PackageBackend>,
    running: RunningVersion,
    clock: Arc<dyn Clock>,
    platform: PlatformCapabilities,
    timings: ServiceTimings,
}

impl AppUpdateServiceBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn platform(mut self, platform: PlatformCapabilities) -> Self {
        self.platform = platform;
        self
    }

    pub fn timings(mut self, timings: ServiceTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn build(self) -> Arc<AppUpdateService> {
        Arc::new_cyclic(|me| AppUpdateService {
            me: me.clone(),
            store: self.store,
            source: self.source,
            packages: self.packages,
            clock: self.clock,
            running: self.running,
            platform: self.platform,
            timings: self.timings,
            first_sync: AtomicBool::new(true),
            latest_cache: Mutex::new(None),
            change_log_cache: Mutex::new(None),
            sync_timer: StdMutex::new(None),
            download_watchdog: StdMutex::new(None),
        })
    }
}

fn persist_error(err: anyhow::Error) -> UpdaterError {
    UpdaterError::FileSystem {
        operation: "persist".to_string(),
        path: "update state".to_string(),
        message: format!("{:#}", err),
    }
}

fn lock_slot(slot: &StdMutex<Option<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 예약된 타이머 취소
fn disarm(slot: &StdMutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = lock_slot(slot).take() {
        handle.abort();
    }
}

/// 기존 타이머를 취소하고 새 타이머 등록
fn arm(slot: &StdMutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Some(previous) = lock_slot(slot).replace(handle) {
        previous.abort();
    }
}

impl AppUpdateService {
    pub fn builder(
        store: UpdateInfoStore,
        source: Arc<dyn ReleaseSource>,
        packages: Arc<dyn PackageBackend>,
        running: RunningVersion,
    ) -> AppUpdateServiceBuilder {
        AppUpdateServiceBuilder {
            store,
            source,
            packages,
            running,
            clock: Arc::new(SystemClock),
            platform: PlatformCapabilities::default(),
            timings: ServiceTimings::default(),
        }
    }

    pub fn store(&self) -> &UpdateInfoStore {
        &self.store
    }

    pub fn running(&self) -> &RunningVersion {
        &self.running
    }

    async fn mutate<F>(&self, f: F) -> Result<UpdateInfo, UpdaterError>
    where
        F: FnOnce(&mut UpdateInfo),
    {
        self.store.update(f).await.map_err(persist_error)
    }

    async fn set_status_with_error(&self, status: UpdateStatus, error_text: String) -> Result<(), UpdaterError> {
        tracing::warn!("[AppUpdate] {} ({})", status, error_text);
        self.mutate(move |info| {
            info.error_text = Some(error_text);
            info.status = status;
        })
        .await?;
        Ok(())
    }

    /// 동기화 필요 여부 판정. 판정마다 재확인 타이머를 다시 예약한다
    async fn is_need_sync(&self, force: bool) -> bool {
        let info = self.store.get().await;
        disarm(&self.sync_timer);

        if matches!(info.status, UpdateStatus::DownloadPackage | UpdateStatus::Ready) {
            return false;
        }
        if self.first_sync.swap(false, Ordering::SeqCst) {
            return true;
        }
        if force {
            return true;
        }

        self.schedule_sync();
        let interval = if self.platform.is_extension { DAY_MS } else { HOUR_MS };
        self.clock.now_ms() - info.update_at > interval
    }

    fn schedule_sync(&self) {
        let jitter_ms = self.timings.sync_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        let delay = self.timings.sync_interval + Duration::from_millis(jitter);
        let me = self.me.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(service) = me.upgrade() else {
                return;
            };
            // 실행 중인 자신이 재예약 과정에서 취소되지 않도록 핸들을 먼저 떼어 낸다
            drop(lock_slot(&service.sync_timer).take());
            tracing::info!("[AppUpdate] Scheduled update re-check");
            if let Err(e) = service.fetch_app_update_info(false).await {
                tracing::warn!("[AppUpdate] Scheduled re-check failed: {}", e);
            }
        });
        arm(&self.sync_timer, handle);
        tracing::debug!("[AppUpdate] Next update check in {:?}", delay);
    }

    fn arm_download_watchdog(&self) {
        let timeout = self.timings.download_timeout;
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(service) = me.upgrade() else {
                return;
            };
            drop(lock_slot(&service.download_watchdog).take());
            tracing::warn!("[AppUpdate] Package download timed out after {:?}", timeout);
            let err = UpdaterError::Timeout {
                operation: "download".to_string(),
                duration_secs: timeout.as_secs(),
            };
            if let Err(e) = service.download_package_failed(Some(err)).await {
                tracing::error!("[AppUpdate] Failed to record download timeout: {}", e);
            }
        });
        arm(&self.download_watchdog, handle);
    }

    /// 최신 릴리스 (5분 캐시)
    async fn get_app_latest_info(&self, force: bool) -> Result<Option<ReleaseInfo>, UpdaterError> {
        let now = self.clock.now_ms();
        let mut cache = self.latest_cache.lock().await;
        if !force {
            if let Some((fetched_at, release)) = cache.as_ref() {
                if now - fetched_at < LATEST_INFO_CACHE_MS {
                    return Ok(Some(release.clone()));
                }
            }
        }

        match self.source.fetch_release().await? {
            Some(release) => {
                *cache = Some((now, release.clone()));
                Ok(Some(release))
            }
            // 실패 코드면 이전 캐시를 그대로 사용
            None => Ok(cache.as_ref().map(|(_, release)| release.clone())),
        }
    }

    async fn merge_release(&self, release: ReleaseInfo) -> Result<(), UpdaterError> {
        let should_update = info::gt_version(
            release.version.as_deref(),
            release.js_bundle_version.as_deref(),
            &self.running,
        );
        let now = self.clock.now_ms();
        let running_version = self.running.app_version.clone();

        let merged = self
            .mutate(move |prev| {
                let is_updating = prev.status != UpdateStatus::Done;
                if let Some(strategy) = release.update_strategy {
                    prev.update_strategy = strategy;
                }
                prev.js_bundle_version = release.js_bundle_version.filter(|v| !v.trim().is_empty());
                prev.js_bundle = release.js_bundle;
                prev.summary = Some(release.summary.unwrap_or_default());
                if release.change_log.is_some() {
                    prev.change_log = release.change_log;
                }
                if release.download_url.is_some() {
                    prev.download_url = release.download_url;
                }
                if release.file_size.is_some() {
                    prev.file_size = release.file_size;
                }
                if release.store_url.is_some() {
                    prev.store_url = release.store_url;
                }
                if let Some(version) = release.version.filter(|v| !v.trim().is_empty()) {
                    prev.latest_version = version;
                }
                prev.update_at = now;
                if should_update && !is_updating {
                    prev.status = UpdateStatus::Notify;
                    prev.previous_app_version = Some(running_version);
                }
            })
            .await?;

        tracing::info!(
            "[AppUpdate] Latest {} (bundle {:?}), status {}, strategy {:?}",
            merged.latest_version,
            merged.js_bundle_version,
            merged.status,
            merged.update_strategy
        );
        Ok(())
    }
}

#[async_trait]
impl AppUpdateFacade for AppUpdateService {
    async fn get_update_info(&self) -> Result<UpdateInfo, UpdaterError> {
        Ok(self.store.get().await)
    }

    async fn get_update_status(&self) -> Result<UpdateStatus, UpdaterError> {
        Ok(self.store.get().await.status)
    }

    async fn fetch_app_update_info(&self, force: bool) -> Result<UpdateInfo, UpdaterError> {
        self.refresh_update_status().await?;

        let need_sync = self.is_need_sync(force).await;
        tracing::debug!("[AppUpdate] Need sync: {}", need_sync);
        if !need_sync {
            return Ok(self.store.get().await);
        }

        match self.get_app_latest_info(force).await? {
            Some(release) if release.has_version() => self.merge_release(release).await?,
            _ => {
                tracing::info!("[AppUpdate] Release info carries no version, resetting");
                self.reset().await?;
            }
        }
        Ok(self.store.get().await)
    }

    async fn refresh_update_status(&self) -> Result<(), UpdaterError> {
        let current = self.store.get().await;
        if !info::is_first_launch_after_updated(&current, &self.running) {
            return Ok(());
        }
        tracing::info!("[AppUpdate] First launch after update to {}", self.running.app_version);
        self.mutate(|info| {
            info.update_at = 0;
            info.update_strategy = UpdateStrategy::Manual;
            info.error_text = None;
            info.status = UpdateStatus::Done;
            info.js_bundle_version = None;
            info.js_bundle = None;
            info.downloaded_event = None;
            info.previous_app_version = None;
        })
        .await?;
        Ok(())
    }

    async fn download_package(&self) -> Result<(), UpdaterError> {
        self.arm_download_watchdog();
        self.mutate(|info| {
            info.downloaded_event = None;
            info.status = UpdateStatus::DownloadPackage;
        })
        .await?;
        Ok(())
    }

    async fn download_package_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError> {
        disarm(&self.download_watchdog);
        let text = error::download_package_error_text(err.as_ref());
        if let Some(err) = &err {
            tracing::error!("[AppUpdate] Package download failed: {}", err);
        }
        self.set_status_with_error(UpdateStatus::DownloadPackageFailed, text).await
    }

    async fn download_asc(&self) -> Result<(), UpdaterError> {
        self.mutate(|info| info.status = UpdateStatus::DownloadAsc).await?;
        Ok(())
    }

    async fn download_asc_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError> {
        let text = error::download_asc_error_text(err.as_ref());
        if let Some(err) = &err {
            tracing::error!("[AppUpdate] Signature download failed: {}", err);
        }
        self.set_status_with_error(UpdateStatus::DownloadAscFailed, text).await
    }

    async fn verify_asc(&self) -> Result<(), UpdaterError> {
        self.mutate(|info| info.status = UpdateStatus::VerifyAsc).await?;
        Ok(())
    }

    async fn verify_asc_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError> {
        let text = error::verify_asc_error_text(err.as_ref());
        if let Some(err) = &err {
            tracing::error!("[AppUpdate] Signature verification failed: {}", err);
        }
        self.set_status_with_error(UpdateStatus::VerifyAscFailed, text).await
    }

    async fn verify_package(&self) -> Result<(), UpdaterError> {
        disarm(&self.download_watchdog);
        self.mutate(|info| info.status = UpdateStatus::VerifyPackage).await?;
        Ok(())
    }

    async fn verify_package_failed(&self, err: Option<UpdaterError>) -> Result<(), UpdaterError> {
        let text = error::verify_package_error_text(err.as_ref());
        if let Some(err) = &err {
            tracing::error!("[AppUpdate] Package verification failed: {}", err);
        }
        self.set_status_with_error(UpdateStatus::VerifyPackageFailed, text).await
    }

    async fn get_download_event(&self) -> Result<Option<DownloadedEvent>, UpdaterError> {
        Ok(self.store.get().await.downloaded_event)
    }

    async fn update_downloaded_event(&self, event: DownloadedEvent) -> Result<(), UpdaterError> {
        self.mutate(move |info| info.downloaded_event = Some(event)).await?;
        Ok(())
    }

    async fn update_download_url(&self, url: String) -> Result<(), UpdaterError> {
        self.mutate(move |info| {
            info.downloaded_event.get_or_insert_with(DownloadedEvent::default).download_url = Some(url);
        })
        .await?;
        Ok(())
    }

    async fn ready_to_install(&self) -> Result<(), UpdaterError> {
        disarm(&self.download_watchdog);
        self.mutate(|info| info.status = UpdateStatus::Ready).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), UpdaterError> {
        disarm(&self.sync_timer);
        disarm(&self.download_watchdog);
        let fresh = UpdateInfo {
            summary: Some(String::new()),
            ..UpdateInfo::for_running(&self.running)
        };
        self.store.set(fresh).await.map_err(persist_error)?;
        tracing::info!("[AppUpdate] Update state reset to {}", self.running.app_version);
        Ok(())
    }

    async fn reset_to_incomplete(&self) -> Result<(), UpdaterError> {
        self.mutate(|info| {
            info.error_text = None;
            info.status = UpdateStatus::UpdateIncomplete;
        })
        .await?;
        Ok(())
    }

    async fn reset_to_manual_install(&self) -> Result<(), UpdaterError> {
        self.mutate(|info| {
            info.error_text = None;
            info.status = UpdateStatus::ManualInstall;
        })
        .await?;
        Ok(())
    }

    async fn update_last_dialog_shown_at(&self) -> Result<(), UpdaterError> {
        let now = self.clock.now_ms();
        self.mutate(move |info| info.last_update_dialog_shown_at = Some(now)).await?;
        Ok(())
    }

    async fn clear_last_dialog_shown_at(&self) -> Result<(), UpdaterError> {
        self.mutate(|info| info.last_update_dialog_shown_at = None).await?;
        Ok(())
    }

    async fn clear_cache(&self) -> Result<(), UpdaterError> {
        disarm(&self.download_watchdog);
        self.packages.clear_package().await?;
        self.reset().await
    }

    async fn fetch_change_log(&self) -> Result<Option<String>, UpdaterError> {
        let now = self.clock.now_ms();
        let mut cache = self.change_log_cache.lock().await;
        if let Some((fetched_at, change_log)) = cache.as_ref() {
            if now - fetched_at < CHANGE_LOG_CACHE_MS {
                return Ok(change_log.clone());
            }
        }
        let change_log = self.source.fetch_change_log().await?;
        *cache = Some((now, change_log.clone()));
        Ok(change_log)
    }
}

impl Drop for AppUpdateService {
    fn drop(&mut self) {
        disarm(&self.sync_timer);
        disarm(&self.download_watchdog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_data_is_optional() {
        let failed: Envelope<ReleaseInfo> = serde_json::from_str(r#"{ "code": 1 }"#).unwrap();
        assert_eq!(failed.code, 1);
        assert!(failed.data.is_none());

        let ok: Envelope<ChangeLogData> =
            serde_json::from_str(r#"{ "code": 0, "data": { "changeLog": "- fixes" } }"#).unwrap();
        assert_eq!(ok.data.and_then(|d| d.change_log).as_deref(), Some("- fixes"));
    }
}
