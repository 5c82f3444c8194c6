//! IPC 토큰 기반 인증 미들웨어
//!
//! 데몬 시작 시 랜덤 토큰을 생성하여 파일에 저장합니다.
//! 지갑 UI는 이 파일을 읽어서 `X-Wallet-Token` 헤더에 포함시킵니다.
//! 토큰이 일치하지 않는 요청은 401 Unauthorized로 거부됩니다.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wallet_updater_lib::throttle::LeadingThrottle;
use wallet_updater_lib::{Clock, SystemClock};

pub const TOKEN_HEADER: &str = "X-Wallet-Token";

/// 토큰 파일의 기본 경로
pub fn token_file_path() -> PathBuf {
    if let Ok(path) = std::env::var("WALLET_TOKEN_PATH") {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .map(|appdata| PathBuf::from(appdata).join("wallet").join(".ipc_token"))
            .unwrap_or_else(|_| PathBuf::from("config/.ipc_token"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".config").join("wallet").join(".ipc_token"))
            .unwrap_or_else(|_| PathBuf::from("config/.ipc_token"))
    }
}

/// 미들웨어 상태. 토큰이 없으면 인증 비활성화
#[derive(Clone)]
pub struct AuthToken {
    token: Option<Arc<String>>,
    /// 인증 실패 로그 스팸 억제 (30초당 1회)
    fail_log: Arc<LeadingThrottle>,
    suppressed: Arc<AtomicU64>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(Arc::new(token.into())),
            fail_log: Arc::new(LeadingThrottle::default()),
            suppressed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            token: None,
            ..Self::new(String::new())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// 데몬 시작 시 호출: 랜덤 토큰을 생성하고 파일에 저장
    pub fn generate_and_save(path: &Path) -> anyhow::Result<Self> {
        let token = uuid::Uuid::new_v4().to_string();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &token)?;

        // 파일 퍼미션 제한 (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!("[IPC] Auth token ({}…) saved to {}", &token[..8], path.display());
        Ok(Self::new(token))
    }

    fn log_failure(&self, uri: &axum::http::Uri, provided: &str) {
        if !self.fail_log.try_fire(SystemClock.now_ms()) {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
        let hint = if provided.is_empty() {
            "(empty)"
        } else {
            &provided[..provided.len().min(8)]
        };
        if suppressed > 0 {
            tracing::warn!("[IPC] Auth failed for {}: got={}… (suppressed {} previous)", uri, hint, suppressed);
        } else {
            tracing::warn!("[IPC] Auth failed for {}: got={}…", uri, hint);
        }
    }
}

/// axum 미들웨어: `X-Wallet-Token` 헤더 검증
pub async fn auth_middleware(
    State(auth): State<AuthToken>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = auth.token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided == expected.as_str() {
        Ok(next.run(req).await)
    } else {
        auth.log_failure(req.uri(), provided);
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".ipc_token");

        let auth = AuthToken::generate_and_save(&path).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(auth.token.as_deref().map(String::as_str), Some(saved.as_str()));
        assert!(auth.is_enabled());
        assert!(!AuthToken::disabled().is_enabled());
    }
}
