//! IPC HTTP 서버: 지갑 UI ↔ 업데이트 데몬

pub mod auth;
pub mod prompts;
pub mod updates;

use anyhow::Result;
use axum::{middleware, routing::get, Json, Router};
use serde_json::json;
use std::future::Future;
use tower_http::trace::TraceLayer;

use auth::{auth_middleware, AuthToken};
use updates::{updates_router, UpdateState};

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub updates: UpdateState,
    pub auth: AuthToken,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(updates: UpdateState, auth: AuthToken, listen_addr: &str) -> Self {
        Self {
            updates,
            auth,
            listen_addr: listen_addr.to_string(),
        }
    }

    /// 인증 미들웨어와 요청 로그가 붙은 전체 라우터
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health))
            .merge(updates_router(self.updates.clone()))
            .layer(middleware::from_fn_with_state(self.auth.clone(), auth_middleware))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("[IPC] Listening on http://{}", self.listen_addr);

        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}

/// GET /api/health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}
