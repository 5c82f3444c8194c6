//! 업데이트 상태/전략 열거형
//!
//! 영속 레코드(`UpdateInfo`)의 `status`, `updateStrategy` 필드와
//! 상태별 표시 메타데이터를 정의합니다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 업데이트 파이프라인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UpdateStatus {
    #[default]
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "notify")]
    Notify,
    #[serde(rename = "downloadPackage")]
    DownloadPackage,
    #[serde(rename = "downloadPackageFailed")]
    DownloadPackageFailed,
    #[serde(rename = "downloadASC")]
    DownloadAsc,
    #[serde(rename = "downloadASCFailed")]
    DownloadAscFailed,
    #[serde(rename = "verifyASC")]
    VerifyAsc,
    #[serde(rename = "verifyASCFailed")]
    VerifyAscFailed,
    #[serde(rename = "verifyPackage")]
    VerifyPackage,
    #[serde(rename = "verifyPackageFailed")]
    VerifyPackageFailed,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "updateIncomplete")]
    UpdateIncomplete,
    #[serde(rename = "manualInstall")]
    ManualInstall,
    #[serde(rename = "failed")]
    Failed,
}

/// 상태 표시 톤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Neutral,
    Info,
    Progress,
    Success,
    Critical,
}

/// 상태별 표시 메타데이터 (UI는 이 값만 읽음)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusPresentation {
    /// 번역 키
    pub label_key: &'static str,
    pub tone: StatusTone,
    /// 스피너 표시 여부
    pub busy: bool,
}

impl UpdateStatus {
    pub const ALL: [UpdateStatus; 14] = [
        UpdateStatus::Done,
        UpdateStatus::Notify,
        UpdateStatus::DownloadPackage,
        UpdateStatus::DownloadPackageFailed,
        UpdateStatus::DownloadAsc,
        UpdateStatus::DownloadAscFailed,
        UpdateStatus::VerifyAsc,
        UpdateStatus::VerifyAscFailed,
        UpdateStatus::VerifyPackage,
        UpdateStatus::VerifyPackageFailed,
        UpdateStatus::Ready,
        UpdateStatus::UpdateIncomplete,
        UpdateStatus::ManualInstall,
        UpdateStatus::Failed,
    ];

    /// 직렬화 키 ("downloadASC" 등)
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Done => "done",
            UpdateStatus::Notify => "notify",
            UpdateStatus::DownloadPackage => "downloadPackage",
            UpdateStatus::DownloadPackageFailed => "downloadPackageFailed",
            UpdateStatus::DownloadAsc => "downloadASC",
            UpdateStatus::DownloadAscFailed => "downloadASCFailed",
            UpdateStatus::VerifyAsc => "verifyASC",
            UpdateStatus::VerifyAscFailed => "verifyASCFailed",
            UpdateStatus::VerifyPackage => "verifyPackage",
            UpdateStatus::VerifyPackageFailed => "verifyPackageFailed",
            UpdateStatus::Ready => "ready",
            UpdateStatus::UpdateIncomplete => "updateIncomplete",
            UpdateStatus::ManualInstall => "manualInstall",
            UpdateStatus::Failed => "failed",
        }
    }

    /// 실패 상태 여부
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            UpdateStatus::DownloadPackageFailed
                | UpdateStatus::DownloadAscFailed
                | UpdateStatus::VerifyAscFailed
                | UpdateStatus::VerifyPackageFailed
                | UpdateStatus::Failed
        )
    }

    /// 다운로드/검증 단계 진행 중 여부
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            UpdateStatus::DownloadPackage
                | UpdateStatus::DownloadAsc
                | UpdateStatus::VerifyAsc
                | UpdateStatus::VerifyPackage
        )
    }

    /// 파이프라인 순서상 위치. 실패/리셋 상태는 `None`
    pub fn pipeline_stage(&self) -> Option<u8> {
        match self {
            UpdateStatus::Done => Some(0),
            UpdateStatus::Notify => Some(1),
            UpdateStatus::DownloadPackage => Some(2),
            UpdateStatus::DownloadAsc => Some(3),
            UpdateStatus::VerifyAsc => Some(4),
            UpdateStatus::VerifyPackage => Some(5),
            UpdateStatus::Ready => Some(6),
            UpdateStatus::DownloadPackageFailed
            | UpdateStatus::DownloadAscFailed
            | UpdateStatus::VerifyAscFailed
            | UpdateStatus::VerifyPackageFailed
            | UpdateStatus::UpdateIncomplete
            | UpdateStatus::ManualInstall
            | UpdateStatus::Failed => None,
        }
    }

    /// 상태 → 표시 메타데이터. 새 상태가 추가되면 컴파일 단계에서 누락이 드러난다.
    pub fn presentation(&self) -> StatusPresentation {
        let (label_key, tone, busy) = match self {
            UpdateStatus::Done => ("update_app_up_to_date", StatusTone::Neutral, false),
            UpdateStatus::Notify => ("update_update_available", StatusTone::Info, false),
            UpdateStatus::DownloadPackage => ("update_downloading_package", StatusTone::Progress, true),
            UpdateStatus::DownloadPackageFailed => ("update_download_failed", StatusTone::Critical, false),
            UpdateStatus::DownloadAsc => ("update_downloading_signature", StatusTone::Progress, true),
            UpdateStatus::DownloadAscFailed => ("update_download_failed", StatusTone::Critical, false),
            UpdateStatus::VerifyAsc => ("update_verifying_signature", StatusTone::Progress, true),
            UpdateStatus::VerifyAscFailed => ("update_verification_failed", StatusTone::Critical, false),
            UpdateStatus::VerifyPackage => ("update_verifying_package", StatusTone::Progress, true),
            UpdateStatus::VerifyPackageFailed => ("update_verification_failed", StatusTone::Critical, false),
            UpdateStatus::Ready => ("update_ready_to_install", StatusTone::Success, false),
            UpdateStatus::UpdateIncomplete => ("update_update_incomplete_text", StatusTone::Critical, false),
            UpdateStatus::ManualInstall => ("update_manual_install", StatusTone::Info, false),
            UpdateStatus::Failed => ("global_update_failed", StatusTone::Critical, false),
        };
        StatusPresentation { label_key, tone, busy }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 서버가 내려주는 업데이트 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    #[default]
    Manual,
    Force,
    Silent,
    Seamless,
}

impl UpdateStrategy {
    pub const ALL: [UpdateStrategy; 4] = [
        UpdateStrategy::Manual,
        UpdateStrategy::Force,
        UpdateStrategy::Silent,
        UpdateStrategy::Seamless,
    ];
}

/// 다운로드 대상 파일 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateFileType {
    /// 네이티브/데스크톱 전체 패키지
    #[serde(rename = "appShell")]
    AppShell,
    /// 핫패치 번들
    #[serde(rename = "jsBundle")]
    JsBundle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names_match_as_str() {
        for status in UpdateStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            let back: UpdateStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn asc_statuses_keep_upper_case_suffix() {
        assert_eq!(serde_json::to_string(&UpdateStatus::DownloadAsc).unwrap(), "\"downloadASC\"");
        assert_eq!(serde_json::to_string(&UpdateStatus::VerifyAscFailed).unwrap(), "\"verifyASCFailed\"");
    }

    #[test]
    fn pipeline_stages_are_strictly_increasing() {
        let order = [
            UpdateStatus::Done,
            UpdateStatus::Notify,
            UpdateStatus::DownloadPackage,
            UpdateStatus::DownloadAsc,
            UpdateStatus::VerifyAsc,
            UpdateStatus::VerifyPackage,
            UpdateStatus::Ready,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].pipeline_stage() < pair[1].pipeline_stage());
        }
        assert!(UpdateStatus::VerifyAscFailed.pipeline_stage().is_none());
    }

    #[test]
    fn busy_only_while_in_progress() {
        for status in UpdateStatus::ALL {
            assert_eq!(status.presentation().busy, status.is_in_progress(), "{}", status);
        }
    }

    #[test]
    fn failed_states_render_critical() {
        for status in UpdateStatus::ALL.iter().filter(|s| s.is_failed()) {
            assert_eq!(status.presentation().tone, StatusTone::Critical);
        }
    }

    #[test]
    fn strategy_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&UpdateStrategy::Seamless).unwrap(), "\"seamless\"");
        let s: UpdateStrategy = serde_json::from_str("\"force\"").unwrap();
        assert_eq!(s, UpdateStrategy::Force);
    }
}
