//! UI 포트: 다이얼로그/토스트/화면 이동 요청
//!
//! 컨트롤러는 UI를 직접 그리지 않고 이 트레이트로 요청만 보냅니다.
//! 호스트(데몬)는 요청을 큐에 쌓아 두고 연결된 UI가 가져가게 합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 컨트롤러가 띄우는 다이얼로그 종류
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UpdateDialog {
    /// 새 버전 알림 (수동/강제 전략)
    #[serde(rename_all = "camelCase")]
    UpdateAvailable {
        summary: Option<String>,
        latest_version: String,
    },
    /// 조용히 받아 둔 업데이트 설치 준비 완료
    SilentUpdateReady { summary: Option<String> },
    /// 설치 파일 누락/설치 실패. 다시 받기 또는 나중에
    UpdateIncomplete,
}

/// 다이얼로그 응답
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogChoice {
    Confirm,
    /// 취소 또는 닫기
    Cancel,
}

/// 화면 이동 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "camelCase")]
pub enum UpdateRoute {
    /// 업데이트 미리보기
    #[serde(rename_all = "camelCase")]
    UpdatePreview {
        latest_version: String,
        is_force_update: bool,
        /// 전체 화면 모달로 열고 업데이트가 끝나면 자동으로 닫음
        auto_close: bool,
    },
    /// 다운로드/검증 진행 화면
    #[serde(rename_all = "camelCase")]
    DownloadVerify { is_force_update: bool },
    ManualInstall,
    /// 릴리스 노트
    WhatsNew { full: bool },
    PopStack,
    OpenExternal { url: String },
}

/// 실행 플랫폼 능력: 시작 시 한 번 결정해서 주입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformCapabilities {
    pub is_native: bool,
    pub is_desktop: bool,
    pub is_extension: bool,
    /// E2E 테스트 실행 중 (릴리스 노트 생략)
    pub is_e2e: bool,
}

impl PlatformCapabilities {
    pub fn desktop() -> Self {
        Self { is_desktop: true, ..Self::default() }
    }

    /// 업데이트 알림 다이얼로그를 띄우는 플랫폼인지
    pub fn shows_update_dialog(&self) -> bool {
        self.is_native || self.is_desktop
    }

    /// 패키지 다운로드/설치를 지원하는 플랫폼인지
    pub fn supports_packages(&self) -> bool {
        self.is_native || self.is_desktop
    }
}

#[async_trait]
pub trait UpdatePresenter: Send + Sync {
    /// 다이얼로그를 띄우고 사용자 응답을 기다림
    async fn show_dialog(&self, dialog: UpdateDialog) -> DialogChoice;

    fn show_toast_error(&self, message: &str);

    fn navigate(&self, route: UpdateRoute);

    /// 앱 잠금이 풀릴 때까지 대기
    async fn when_app_unlocked(&self);
}

/// UI가 없는 호스트용. 다이얼로그는 모두 취소로 응답
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPresenter;

#[async_trait]
impl UpdatePresenter for HeadlessPresenter {
    async fn show_dialog(&self, dialog: UpdateDialog) -> DialogChoice {
        tracing::info!("[Presenter] No UI attached, dismissing {:?}", dialog);
        DialogChoice::Cancel
    }

    fn show_toast_error(&self, message: &str) {
        tracing::warn!("[Presenter] {}", message);
    }

    fn navigate(&self, route: UpdateRoute) {
        tracing::info!("[Presenter] Navigate {:?}", route);
    }

    async fn when_app_unlocked(&self) {}
}
