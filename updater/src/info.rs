//! 영속 업데이트 레코드와 서버 응답 모델
//!
//! `UpdateInfo`는 프로세스 전체에서 하나만 존재하며 상태 파일에 camelCase JSON으로 저장됩니다.
//! 저장 → 로드 왕복 시 값이 바뀌지 않아야 재시작 후 파이프라인을 이어서 진행할 수 있습니다.

use serde::{Deserialize, Serialize};

use crate::status::{UpdateFileType, UpdateStatus, UpdateStrategy};
use crate::version;

/// 기본 최신 버전 (아직 한 번도 확인하지 않은 상태)
pub const DEFAULT_LATEST_VERSION: &str = "0.0.0";

/// 핫패치 번들 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsBundleInfo {
    pub download_url: String,
    #[serde(default)]
    pub file_size: u64,
    /// 번들 서명 (base64)
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// 다운로드된 아티팩트 정보: 검증/설치 단계로 그대로 전달된다
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// 다운로드된 서명 파일 경로
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asc_file: Option<String>,
}

/// 영속 업데이트 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub latest_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_bundle_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_bundle: Option<JsBundleInfo>,
    /// 마지막 확인 시각 (epoch ms)
    #[serde(default)]
    pub update_at: i64,
    #[serde(default)]
    pub status: UpdateStatus,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_dialog_shown_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_event: Option<DownloadedEvent>,
    /// 실패 상태에서 사용자에게 보여줄 번역 키 또는 원문 메시지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// 스토어 배포 앱이면 스토어 페이지 URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    /// 업데이트 알림 시점의 실행 버전 (업데이트 후 첫 실행 판정용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_app_version: Option<String>,
}

impl Default for UpdateInfo {
    fn default() -> Self {
        Self {
            latest_version: DEFAULT_LATEST_VERSION.to_string(),
            js_bundle_version: None,
            js_bundle: None,
            update_at: 0,
            status: UpdateStatus::Done,
            update_strategy: UpdateStrategy::Manual,
            last_update_dialog_shown_at: None,
            downloaded_event: None,
            error_text: None,
            summary: None,
            change_log: None,
            download_url: None,
            file_size: None,
            store_url: None,
            previous_app_version: None,
        }
    }
}

impl UpdateInfo {
    /// 실행 중인 버전을 최신으로 간주하는 초기 레코드
    pub fn for_running(running: &RunningVersion) -> Self {
        Self {
            latest_version: running.app_version.clone(),
            js_bundle_version: running.bundle_version.clone(),
            ..Self::default()
        }
    }
}

/// 현재 실행 중인 앱의 버전 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningVersion {
    pub app_version: String,
    #[serde(default)]
    pub bundle_version: Option<String>,
    #[serde(default = "default_build_number")]
    pub build_number: u32,
}

fn default_build_number() -> u32 {
    1
}

impl RunningVersion {
    pub fn new(app_version: &str, bundle_version: Option<&str>) -> Self {
        Self {
            app_version: app_version.to_string(),
            bundle_version: bundle_version.map(str::to_string),
            build_number: 1,
        }
    }
}

/// 업데이트 서버 응답 (`/utility/v1/app-update`의 `data`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub js_bundle_version: Option<String>,
    #[serde(default)]
    pub js_bundle: Option<JsBundleInfo>,
    #[serde(default)]
    pub update_strategy: Option<UpdateStrategy>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub change_log: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub store_url: Option<String>,
}

impl ReleaseInfo {
    pub fn has_version(&self) -> bool {
        non_empty(&self.version).is_some() || non_empty(&self.js_bundle_version).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ══════════════════════════════════════════════════════
// 버전 판정
// ══════════════════════════════════════════════════════

/// 서버 버전이 실행 중인 버전보다 새로운지
///
/// 네이티브 버전이 올라갔거나, 네이티브 버전이 같고 번들 버전만 올라간 경우 true.
pub fn gt_version(latest_version: Option<&str>, js_bundle_version: Option<&str>, running: &RunningVersion) -> bool {
    let latest = latest_version.map(str::trim).filter(|s| !s.is_empty());
    if let Some(latest) = latest {
        if version::is_newer(latest, &running.app_version) {
            return true;
        }
    }
    is_bundle_update(latest, js_bundle_version, running)
}

fn is_bundle_update(latest: Option<&str>, js_bundle_version: Option<&str>, running: &RunningVersion) -> bool {
    let Some(bundle) = js_bundle_version.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let same_native = latest.map_or(true, |l| version::same_version(l, &running.app_version));
    if !same_native {
        return false;
    }
    match running.bundle_version.as_deref() {
        Some(current) => version::is_newer(bundle, current),
        None => version::SemVer::parse(bundle).is_some(),
    }
}

/// 다운로드 대상 종류 판정
pub fn update_file_type(info: &UpdateInfo, running: &RunningVersion) -> UpdateFileType {
    if is_bundle_update(
        Some(info.latest_version.as_str()),
        info.js_bundle_version.as_deref(),
        running,
    ) {
        UpdateFileType::JsBundle
    } else {
        UpdateFileType::AppShell
    }
}

/// 업데이트가 필요한지와 대상 종류
pub fn is_need_update(info: &UpdateInfo, running: &RunningVersion) -> (bool, UpdateFileType) {
    let should_update = info.status != UpdateStatus::Done
        && gt_version(
            Some(info.latest_version.as_str()),
            info.js_bundle_version.as_deref(),
            running,
        );
    (should_update, update_file_type(info, running))
}

/// 업데이트 설치 후 첫 실행인지
///
/// 알림 시점의 버전(`previousAppVersion`)과 실행 버전이 다르고,
/// 실행 버전이 레코드의 최신 버전에 도달했으면 설치가 끝난 것으로 본다.
pub fn is_first_launch_after_updated(info: &UpdateInfo, running: &RunningVersion) -> bool {
    let Some(previous) = info.previous_app_version.as_deref() else {
        return false;
    };
    if version::same_version(previous, &running.app_version) {
        // 번들만 교체된 경우: 번들 버전이 최신에 도달했는지
        return match (info.js_bundle_version.as_deref(), running.bundle_version.as_deref()) {
            (Some(target), Some(current)) => {
                info.status != UpdateStatus::Done && version::same_version(target, current)
            }
            _ => false,
        };
    }
    !version::is_newer(&info.latest_version, &running.app_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> RunningVersion {
        RunningVersion::new("5.2.0", Some("3"))
    }

    #[test]
    fn default_record() {
        let info = UpdateInfo::default();
        assert_eq!(info.latest_version, "0.0.0");
        assert_eq!(info.status, UpdateStatus::Done);
        assert_eq!(info.update_strategy, UpdateStrategy::Manual);
    }

    #[test]
    fn record_round_trips_through_json() {
        let info = UpdateInfo {
            latest_version: "5.3.0".into(),
            js_bundle_version: Some("4".into()),
            update_at: 1_700_000_000_000,
            status: UpdateStatus::VerifyAsc,
            update_strategy: UpdateStrategy::Silent,
            last_update_dialog_shown_at: Some(1_700_000_000_500),
            downloaded_event: Some(DownloadedEvent {
                downloaded_file: Some("/tmp/5.3.0.zip".into()),
                download_url: Some("https://example.com/5.3.0.zip".into()),
                ..Default::default()
            }),
            error_text: Some("update_network_exception_check_connection".into()),
            summary: Some("bug fixes".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"latestVersion\":\"5.3.0\""));
        assert!(json.contains("\"status\":\"verifyASC\""));
        let back: UpdateInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let info: UpdateInfo = serde_json::from_str(r#"{"latestVersion":"1.0.0"}"#).unwrap();
        assert_eq!(info.status, UpdateStatus::Done);
        assert_eq!(info.update_at, 0);
    }

    #[test]
    fn native_update_detected() {
        assert!(gt_version(Some("5.3.0"), None, &running()));
        assert!(!gt_version(Some("5.2.0"), None, &running()));
        assert!(!gt_version(Some("5.1.0"), Some("9"), &running()));
    }

    #[test]
    fn bundle_update_detected_only_on_same_native() {
        assert!(gt_version(Some("5.2.0"), Some("4"), &running()));
        assert!(!gt_version(Some("5.2.0"), Some("3"), &running()));
    }

    #[test]
    fn file_type_follows_bundle_rule() {
        let mut info = UpdateInfo {
            latest_version: "5.2.0".into(),
            js_bundle_version: Some("4".into()),
            ..Default::default()
        };
        assert_eq!(update_file_type(&info, &running()), UpdateFileType::JsBundle);
        info.latest_version = "5.3.0".into();
        assert_eq!(update_file_type(&info, &running()), UpdateFileType::AppShell);
    }

    #[test]
    fn need_update_requires_pending_status() {
        let mut info = UpdateInfo {
            latest_version: "5.3.0".into(),
            ..Default::default()
        };
        assert!(!is_need_update(&info, &running()).0);
        info.status = UpdateStatus::Notify;
        assert_eq!(is_need_update(&info, &running()), (true, UpdateFileType::AppShell));
    }

    #[test]
    fn first_launch_after_native_update() {
        let info = UpdateInfo {
            latest_version: "5.3.0".into(),
            status: UpdateStatus::Ready,
            previous_app_version: Some("5.2.0".into()),
            ..Default::default()
        };
        assert!(!is_first_launch_after_updated(&info, &running()));
        assert!(is_first_launch_after_updated(&info, &RunningVersion::new("5.3.0", None)));
    }

    #[test]
    fn first_launch_after_bundle_update() {
        let info = UpdateInfo {
            latest_version: "5.2.0".into(),
            js_bundle_version: Some("4".into()),
            status: UpdateStatus::Ready,
            previous_app_version: Some("5.2.0".into()),
            ..Default::default()
        };
        assert!(!is_first_launch_after_updated(&info, &running()));
        assert!(is_first_launch_after_updated(&info, &RunningVersion::new("5.2.0", Some("4"))));
    }

    #[test]
    fn release_without_versions() {
        let release = ReleaseInfo {
            version: Some("  ".into()),
            ..Default::default()
        };
        assert!(!release.has_version());
    }
}
