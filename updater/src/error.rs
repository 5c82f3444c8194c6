//! 에러 분류 및 사용자 표시용 에러 텍스트 매핑
//!
//! ## 처리 원칙
//! - 파이프라인 단계의 에러는 단계 경계에서 잡혀 `<step>Failed` 상태로 저장됩니다.
//! - UI 트리로 전파되는 에러는 없습니다. 토스트는 전략 분류기가 허용할 때만 띄웁니다.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 설치 파일이 없을 때의 에러 코드
pub const NOT_FOUND_PACKAGE: &str = "NOT_FOUND_PACKAGE";

/// 업데이터 에러 타입
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 패키지/서명 다운로드 실패
    #[error("Download failed: {message}")]
    DownloadFailure {
        message: String,
        /// HTTP 상태 코드 (있으면)
        status_code: Option<u16>,
    },
    /// 서명(ASC) 검증 실패
    #[error("Signature verification failed: {message}")]
    SignatureVerificationFailure { message: String },
    /// 패키지 무결성 검증 실패
    #[error("Package verification failed: {message}")]
    PackageVerificationFailure { message: String },
    /// 설치 실패
    #[error("Install failed: {message}")]
    InstallFailure { message: String },
    /// 다운로드된 아티팩트를 찾을 수 없음
    #[error("NOT_FOUND_PACKAGE")]
    MissingDownloadArtifact { path: Option<String> },
    /// 네트워크 연결 실패
    #[error("Network error: {message}")]
    Network { message: String, recoverable: bool },
    /// HTTP 요청 타임아웃
    #[error("Timeout after {duration_secs}s: {operation}")]
    Timeout { operation: String, duration_secs: u64 },
    /// 업데이트 서버 응답 오류
    #[error("API error ({status_code}): {message}")]
    Api { status_code: u16, message: String },
    /// 파일 시스템 오류
    #[error("File system error during {operation} on '{path}': {message}")]
    FileSystem { operation: String, path: String, message: String },
    /// 설정 오류
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl UpdaterError {
    pub fn download(message: impl Into<String>) -> Self {
        UpdaterError::DownloadFailure { message: message.into(), status_code: None }
    }

    pub fn signature(message: impl Into<String>) -> Self {
        UpdaterError::SignatureVerificationFailure { message: message.into() }
    }

    pub fn package(message: impl Into<String>) -> Self {
        UpdaterError::PackageVerificationFailure { message: message.into() }
    }

    pub fn install(message: impl Into<String>) -> Self {
        UpdaterError::InstallFailure { message: message.into() }
    }

    pub fn missing_artifact(path: Option<String>) -> Self {
        UpdaterError::MissingDownloadArtifact { path }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            UpdaterError::DownloadFailure { .. } => "DOWNLOAD_FAILED",
            UpdaterError::SignatureVerificationFailure { .. } => "UPDATE_SIGNATURE_VERIFICATION_FAILED",
            UpdaterError::PackageVerificationFailure { .. } => "UPDATE_INSTALLATION_NOT_SAFE",
            UpdaterError::InstallFailure { .. } => "INSTALL_FAILED",
            UpdaterError::MissingDownloadArtifact { .. } => NOT_FOUND_PACKAGE,
            UpdaterError::Network { .. } => "NETWORK_ERROR",
            UpdaterError::Timeout { .. } => "TIMEOUT",
            UpdaterError::Api { .. } => "API_ERROR",
            UpdaterError::FileSystem { .. } => "FILE_SYSTEM_ERROR",
            UpdaterError::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// 재다운로드/재시도로 복구 가능한 에러인지
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::Network { recoverable, .. } => *recoverable,
            UpdaterError::Timeout { .. } => true,
            UpdaterError::Api { status_code, .. } => *status_code >= 500,
            UpdaterError::DownloadFailure { .. } => true,
            UpdaterError::PackageVerificationFailure { .. } => true,
            UpdaterError::MissingDownloadArtifact { .. } => true,
            UpdaterError::SignatureVerificationFailure { .. } => false,
            UpdaterError::InstallFailure { .. } => false,
            UpdaterError::FileSystem { .. } => false,
            UpdaterError::Config { .. } => false,
        }
    }

    pub fn is_missing_artifact(&self) -> bool {
        matches!(self, UpdaterError::MissingDownloadArtifact { .. })
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, operation: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            UpdaterError::Timeout {
                operation: operation.to_string(),
                duration_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            UpdaterError::Network {
                message: "Software caused connection abort".to_string(),
                recoverable: true,
            }
        } else if let Some(status) = err.status() {
            UpdaterError::Api {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            UpdaterError::Network {
                message: err.to_string(),
                recoverable: err.is_request() || err.is_body(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return UpdaterError::missing_artifact(Some(path.to_string()));
        }
        UpdaterError::FileSystem {
            operation: operation.to_string(),
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// 다운로드 실패 매핑에 쓰는 HTTP 상태 코드
    fn status_code(&self) -> Option<u16> {
        match self {
            UpdaterError::DownloadFailure { status_code, .. } => *status_code,
            UpdaterError::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    fn raw_message(&self) -> String {
        match self {
            UpdaterError::DownloadFailure { message, .. }
            | UpdaterError::SignatureVerificationFailure { message }
            | UpdaterError::PackageVerificationFailure { message }
            | UpdaterError::InstallFailure { message }
            | UpdaterError::Network { message, .. }
            | UpdaterError::Api { message, .. }
            | UpdaterError::Config { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ══════════════════════════════════════════════════════
// 사용자 표시용 에러 텍스트 (번역 키)
// ══════════════════════════════════════════════════════

pub mod error_text {
    pub const NETWORK_EXCEPTION: &str = "update_network_exception_check_connection";
    pub const SERVER_NOT_RESPONDING: &str = "update_server_not_responding_try_later";
    pub const NETWORK_INSTABILITY: &str = "update_network_instability_check_connection";
    pub const DOWNLOAD_TIMED_OUT: &str = "update_download_timed_out_check_connection";
    pub const SIGNATURE_VERIFICATION_FAILED: &str = "update_signature_verification_failed_alert_text";
    pub const INSTALLATION_NOT_SAFE: &str = "update_installation_not_safe_alert_text";
    pub const PACKAGE_NAME_MISMATCH: &str = "update_package_name_mismatch";
    pub const UPDATE_FAILED: &str = "global_update_failed";
}

fn is_server_status(code: Option<u16>) -> bool {
    matches!(code, Some(500) | Some(404) | Some(403))
}

/// 패키지 다운로드 실패 → 에러 텍스트
pub fn download_package_error_text(err: Option<&UpdaterError>) -> String {
    let Some(err) = err else {
        return error_text::NETWORK_EXCEPTION.to_string();
    };
    if matches!(err, UpdaterError::Timeout { .. }) {
        return error_text::DOWNLOAD_TIMED_OUT.to_string();
    }
    if is_server_status(err.status_code()) {
        return error_text::SERVER_NOT_RESPONDING.to_string();
    }
    let message = err.raw_message();
    if message.contains("Server not responding") || message.starts_with("Cannot download") {
        error_text::SERVER_NOT_RESPONDING.to_string()
    } else if message.contains("Software caused connection abort") {
        error_text::NETWORK_INSTABILITY.to_string()
    } else if message.is_empty() {
        error_text::NETWORK_EXCEPTION.to_string()
    } else {
        message
    }
}

/// 서명 다운로드 실패 → 에러 텍스트
pub fn download_asc_error_text(err: Option<&UpdaterError>) -> String {
    if is_server_status(err.and_then(UpdaterError::status_code)) {
        error_text::SERVER_NOT_RESPONDING.to_string()
    } else {
        error_text::NETWORK_INSTABILITY.to_string()
    }
}

/// 서명 검증 실패 → 에러 텍스트
pub fn verify_asc_error_text(err: Option<&UpdaterError>) -> String {
    match err.map(UpdaterError::raw_message) {
        Some(message) if message == "UPDATE_SIGNATURE_VERIFICATION_FAILED_ALERT_TEXT" || message.is_empty() => {
            error_text::SIGNATURE_VERIFICATION_FAILED.to_string()
        }
        Some(message) => message,
        None => error_text::SIGNATURE_VERIFICATION_FAILED.to_string(),
    }
}

/// 패키지 검증 실패 → 에러 텍스트
pub fn verify_package_error_text(err: Option<&UpdaterError>) -> String {
    match err.map(UpdaterError::raw_message) {
        Some(message) if message == "PACKAGE_NAME_MISMATCH" => error_text::PACKAGE_NAME_MISMATCH.to_string(),
        Some(message) if message == "UPDATE_INSTALLATION_NOT_SAFE_ALERT_TEXT" || message.is_empty() => {
            error_text::INSTALLATION_NOT_SAFE.to_string()
        }
        Some(message) => message,
        None => error_text::INSTALLATION_NOT_SAFE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_displays_code() {
        let err = UpdaterError::missing_artifact(None);
        assert_eq!(err.to_string(), NOT_FOUND_PACKAGE);
        assert_eq!(err.error_code(), NOT_FOUND_PACKAGE);
        assert!(err.is_missing_artifact());
    }

    #[test]
    fn io_not_found_maps_to_missing_artifact() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(UpdaterError::from_io(&io, "read", "/tmp/x").is_missing_artifact());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(UpdaterError::from_io(&io, "read", "/tmp/x").error_code(), "FILE_SYSTEM_ERROR");
    }

    #[test]
    fn download_error_text_mapping() {
        assert_eq!(download_package_error_text(None), error_text::NETWORK_EXCEPTION);
        assert_eq!(
            download_package_error_text(Some(&UpdaterError::DownloadFailure {
                message: "boom".into(),
                status_code: Some(404),
            })),
            error_text::SERVER_NOT_RESPONDING
        );
        assert_eq!(
            download_package_error_text(Some(&UpdaterError::download("Cannot download file"))),
            error_text::SERVER_NOT_RESPONDING
        );
        assert_eq!(
            download_package_error_text(Some(&UpdaterError::download("Software caused connection abort"))),
            error_text::NETWORK_INSTABILITY
        );
        assert_eq!(
            download_package_error_text(Some(&UpdaterError::Timeout { operation: "download".into(), duration_secs: 1800 })),
            error_text::DOWNLOAD_TIMED_OUT
        );
        assert_eq!(download_package_error_text(Some(&UpdaterError::download("disk full"))), "disk full");
    }

    #[test]
    fn asc_and_package_error_text_mapping() {
        assert_eq!(download_asc_error_text(None), error_text::NETWORK_INSTABILITY);
        assert_eq!(
            download_asc_error_text(Some(&UpdaterError::Api { status_code: 500, message: String::new() })),
            error_text::SERVER_NOT_RESPONDING
        );
        assert_eq!(verify_asc_error_text(None), error_text::SIGNATURE_VERIFICATION_FAILED);
        assert_eq!(
            verify_package_error_text(Some(&UpdaterError::package("PACKAGE_NAME_MISMATCH"))),
            error_text::PACKAGE_NAME_MISMATCH
        );
        assert_eq!(verify_package_error_text(None), error_text::INSTALLATION_NOT_SAFE);
    }

    #[test]
    fn recoverability() {
        assert!(UpdaterError::download("x").is_recoverable());
        assert!(!UpdaterError::signature("x").is_recoverable());
        assert!(UpdaterError::Api { status_code: 503, message: String::new() }.is_recoverable());
        assert!(!UpdaterError::Api { status_code: 404, message: String::new() }.is_recoverable());
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(UpdaterError::install("denied")).unwrap();
        assert_eq!(json["type"], "InstallFailure");
        assert_eq!(json["details"]["message"], "denied");
    }
}
