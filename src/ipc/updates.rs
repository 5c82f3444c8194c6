//! 데몬 내장 앱 업데이트 API: `/api/app-update/*`
//!
//! ## 엔드포인트
//! - `GET  /api/app-update/status`        현재 레코드 + 파생 플래그
//! - `POST /api/app-update/check`         수동 업데이트 확인
//! - `POST /api/app-update/action`        업데이트 항목 클릭 (상태별 분기)
//! - `POST /api/app-update/download`      패키지 다운로드부터 파이프라인 실행
//! - `POST /api/app-update/verify`        서명 검증부터 파이프라인 재실행
//! - `POST /api/app-update/install`       준비된 업데이트 설치
//! - `POST /api/app-update/manual-install` 설치 파일 위치 열기
//! - `POST /api/app-update/reset`         레코드 초기화
//! - `POST /api/app-update/clear-cache`   받은 파일 삭제 + 초기화
//! - `GET  /api/app-update/changelog`     변경 로그 (5분 캐시)
//! - `GET  /api/app-update/prompts`       대기 중인 다이얼로그/토스트/화면 이동
//! - `POST /api/app-update/prompts/:id`   다이얼로그 응답
//! - `POST /api/app-update/lock`          앱 잠금 상태 변경
//!
//! 다이얼로그 응답을 기다릴 수 있는 작업은 백그라운드로 실행하고 바로 202를 돌려줍니다.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use wallet_updater_lib::strategy::{
    is_auto_update_strategy, is_force_update_strategy, is_show_app_update_ui_when_updating,
};
use wallet_updater_lib::{AppUpdateFacade, DialogChoice, LifecycleController, UpdaterError};

use super::prompts::PromptBroker;

// ═══════════════════════════════════════════════════════
// 공유 상태
// ═══════════════════════════════════════════════════════

#[derive(Clone)]
pub struct UpdateState {
    pub controller: Arc<LifecycleController>,
    pub prompts: Arc<PromptBroker>,
}

impl UpdateState {
    pub fn new(controller: Arc<LifecycleController>, prompts: Arc<PromptBroker>) -> Self {
        Self { controller, prompts }
    }

    fn facade(&self) -> &Arc<dyn AppUpdateFacade> {
        self.controller.facade()
    }

    /// 컨트롤러 작업을 백그라운드로 실행
    fn spawn<F, Fut>(&self, action: &'static str, f: F) -> Response
    where
        F: FnOnce(Arc<LifecycleController>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("[IPC] Starting {}", action);
        tokio::spawn(f(self.controller.clone()));
        (StatusCode::ACCEPTED, Json(json!({ "ok": true, "started": action }))).into_response()
    }
}

// ═══════════════════════════════════════════════════════
// 라우터
// ═══════════════════════════════════════════════════════

/// `/api/app-update/*` 라우트를 포함하는 axum Router 생성
pub fn updates_router(state: UpdateState) -> Router {
    Router::new()
        .route("/api/app-update/status", get(get_status))
        .route("/api/app-update/check", post(check_updates))
        .route("/api/app-update/action", post(update_action))
        .route("/api/app-update/download", post(start_download))
        .route("/api/app-update/verify", post(start_verify))
        .route("/api/app-update/install", post(start_install))
        .route("/api/app-update/manual-install", post(start_manual_install))
        .route("/api/app-update/reset", post(reset))
        .route("/api/app-update/clear-cache", post(clear_cache))
        .route("/api/app-update/changelog", get(get_change_log))
        .route("/api/app-update/prompts", get(list_prompts))
        .route("/api/app-update/prompts/:id", post(resolve_prompt))
        .route("/api/app-update/lock", post(set_lock))
        .with_state(state)
}

/// 업데이터 에러 → HTTP 응답
fn error_response(err: &UpdaterError) -> Response {
    let status = match err {
        UpdaterError::Network { .. } | UpdaterError::Timeout { .. } | UpdaterError::Api { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "ok": false,
            "error": err.to_string(),
            "error_code": err.error_code(),
        })),
    )
        .into_response()
}

// ═══════════════════════════════════════════════════════
// 핸들러
// ═══════════════════════════════════════════════════════

/// GET /api/app-update/status: 저장된 레코드만 읽음 (서버 호출 없음)
async fn get_status(State(state): State<UpdateState>) -> Response {
    match state.controller.snapshot().await {
        Ok(snapshot) => {
            let strategy = snapshot.data.update_strategy;
            let status = snapshot.data.status;
            Json(json!({
                "ok": true,
                "isNeedUpdate": snapshot.is_need_update,
                "updateFileType": snapshot.update_file_type,
                "isForceUpdate": is_force_update_strategy(strategy),
                "isAutoUpdate": is_auto_update_strategy(strategy),
                "showUpdateUi": is_show_app_update_ui_when_updating(strategy, status),
                "presentation": status.presentation(),
                "platform": state.controller.platform(),
                "data": snapshot.data,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/app-update/check: 서버에서 최신 정보를 받아 병합
async fn check_updates(State(state): State<UpdateState>) -> Response {
    match state.controller.check_for_updates().await {
        Ok(result) => Json(json!({ "ok": true, "result": result })).into_response(),
        Err(e) => {
            tracing::warn!("[IPC] Update check failed: {}", e);
            error_response(&e)
        }
    }
}

async fn update_action(State(state): State<UpdateState>) -> Response {
    state.spawn("action", |c| async move { c.on_update_action().await })
}

async fn start_download(State(state): State<UpdateState>) -> Response {
    state.spawn("download", |c| async move { c.download_package().await })
}

async fn start_verify(State(state): State<UpdateState>) -> Response {
    state.spawn("verify", |c| async move { c.verify_asc().await })
}

async fn start_install(State(state): State<UpdateState>) -> Response {
    state.spawn("install", |c| async move {
        let outcome = c.install_package().await;
        tracing::info!("[IPC] Install outcome: {:?}", outcome);
    })
}

async fn start_manual_install(State(state): State<UpdateState>) -> Response {
    state.spawn("manual-install", |c| async move { c.manual_install_package().await })
}

async fn reset(State(state): State<UpdateState>) -> Response {
    match state.facade().reset().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn clear_cache(State(state): State<UpdateState>) -> Response {
    match state.facade().clear_cache().await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_change_log(State(state): State<UpdateState>) -> Response {
    match state.facade().fetch_change_log().await {
        Ok(change_log) => Json(json!({ "ok": true, "changeLog": change_log })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_prompts(State(state): State<UpdateState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "locked": state.prompts.is_locked(),
        "prompts": state.prompts.take_pending(),
    }))
}

#[derive(Deserialize)]
struct ResolveRequest {
    choice: DialogChoice,
}

/// POST /api/app-update/prompts/:id: Body: `{ "choice": "confirm" | "cancel" }`
async fn resolve_prompt(
    State(state): State<UpdateState>,
    Path(id): Path<u64>,
    Json(body): Json<ResolveRequest>,
) -> Response {
    if state.prompts.resolve(id, body.choice) {
        Json(json!({ "ok": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": format!("No pending dialog {}", id) })),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct LockRequest {
    locked: bool,
}

async fn set_lock(State(state): State<UpdateState>, Json(body): Json<LockRequest>) -> impl IntoResponse {
    state.prompts.set_locked(body.locked);
    Json(json!({ "ok": true, "locked": body.locked }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use wallet_updater_lib::{
        AppUpdateService, ControllerOptions, NoopPackageBackend, PlatformCapabilities, ReleaseInfo, ReleaseSource,
        RunningVersion, UpdateInfo, UpdateInfoStore, UpdateStatus, UpdateStrategy,
    };

    struct StaticRelease(Option<ReleaseInfo>);

    #[async_trait]
    impl ReleaseSource for StaticRelease {
        async fn fetch_release(&self) -> Result<Option<ReleaseInfo>, UpdaterError> {
            Ok(self.0.clone())
        }

        async fn fetch_change_log(&self) -> Result<Option<String>, UpdaterError> {
            Ok(Some("- fixes".to_string()))
        }
    }

    fn test_state(info: UpdateInfo, release: Option<ReleaseInfo>) -> (UpdateState, UpdateInfoStore) {
        let running = RunningVersion::new("5.2.0", None);
        let store = UpdateInfoStore::in_memory(info);
        let packages = Arc::new(NoopPackageBackend);
        let service = AppUpdateService::builder(store.clone(), Arc::new(StaticRelease(release)), packages.clone(), running.clone())
            .build();
        let prompts = Arc::new(PromptBroker::default());
        let controller = LifecycleController::new(service, packages, prompts.clone(), running, PlatformCapabilities::desktop())
            .with_options(ControllerOptions {
                min_step_duration: std::time::Duration::ZERO,
                full_modal: false,
            });
        (UpdateState::new(Arc::new(controller), prompts), store)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_reports_snapshot_and_flags() {
        let info = UpdateInfo {
            latest_version: "5.3.0".to_string(),
            status: UpdateStatus::Notify,
            update_strategy: UpdateStrategy::Force,
            ..UpdateInfo::default()
        };
        let (state, _) = test_state(info, None);
        let app = updates_router(state);

        let (status, json) = call(&app, "GET", "/api/app-update/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["isNeedUpdate"], true);
        assert_eq!(json["isForceUpdate"], true);
        assert_eq!(json["showUpdateUi"], true);
        assert_eq!(json["data"]["status"], "notify");
        assert_eq!(json["data"]["latestVersion"], "5.3.0");
    }

    #[tokio::test]
    async fn check_merges_release() {
        let release = ReleaseInfo {
            version: Some("5.3.0".to_string()),
            update_strategy: Some(UpdateStrategy::Manual),
            ..ReleaseInfo::default()
        };
        let (state, store) = test_state(UpdateInfo::for_running(&RunningVersion::new("5.2.0", None)), Some(release));
        let app = updates_router(state);

        let (status, json) = call(&app, "POST", "/api/app-update/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"]["isNeedUpdate"], true);
        assert_eq!(json["result"]["response"]["latestVersion"], "5.3.0");
        assert_eq!(store.get().await.status, UpdateStatus::Notify);
    }

    #[tokio::test]
    async fn reset_and_changelog() {
        let info = UpdateInfo {
            latest_version: "5.3.0".to_string(),
            status: UpdateStatus::VerifyAscFailed,
            ..UpdateInfo::default()
        };
        let (state, store) = test_state(info, None);
        let app = updates_router(state);

        let (status, _) = call(&app, "POST", "/api/app-update/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        let after = store.get().await;
        assert_eq!(after.status, UpdateStatus::Done);
        assert_eq!(after.latest_version, "5.2.0");

        let (_, json) = call(&app, "GET", "/api/app-update/changelog", None).await;
        assert_eq!(json["changeLog"], "- fixes");
    }

    #[tokio::test]
    async fn dialog_round_trip_through_prompts() {
        let info = UpdateInfo {
            latest_version: "5.3.0".to_string(),
            status: UpdateStatus::UpdateIncomplete,
            ..UpdateInfo::default()
        };
        let (state, store) = test_state(info, None);
        let app = updates_router(state);

        let (status, json) = call(&app, "POST", "/api/app-update/action", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["started"], "action");

        let id = loop {
            let (_, json) = call(&app, "GET", "/api/app-update/prompts", None).await;
            if let Some(prompt) = json["prompts"].as_array().and_then(|p| p.first()) {
                assert_eq!(prompt["type"], "dialog");
                assert_eq!(prompt["dialog"]["kind"], "updateIncomplete");
                break prompt["id"].as_u64().unwrap();
            }
            tokio::task::yield_now().await;
        };

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/app-update/prompts/{}", id),
            Some(json!({ "choice": "cancel" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/app-update/prompts/{}", id),
            Some(json!({ "choice": "cancel" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(store.get().await.status, UpdateStatus::UpdateIncomplete);
    }

    #[tokio::test]
    async fn lock_state_is_reported() {
        let (state, _) = test_state(UpdateInfo::default(), None);
        let app = updates_router(state);

        let (_, json) = call(&app, "POST", "/api/app-update/lock", Some(json!({ "locked": true }))).await;
        assert_eq!(json["locked"], true);
        let (_, json) = call(&app, "GET", "/api/app-update/prompts", None).await;
        assert_eq!(json["locked"], true);
        assert!(json["prompts"].as_array().unwrap().is_empty());
    }
}
