//! Per-session counters: the observable side of each relay session.

use crate::error::{AppError, AppResult};
use crate::relay::{Lifecycle, RelaySession};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub state: Lifecycle,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub last_error: Option<String>,
}

impl From<&RelaySession> for SessionInfo {
    fn from(session: &RelaySession) -> Self {
        Self {
            session_id: session.id().to_string(),
            state: session.lifecycle(),
            frames_sent: session.frames_sent(),
            frames_received: session.frames_received(),
            last_error: session.last_error(),
        }
    }
}

pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let sessions: Vec<SessionInfo> = state
        .registry
        .sessions()
        .iter()
        .map(|s| SessionInfo::from(s.as_ref()))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active": state.registry.active_count(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .registry
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("session '{}'", session_id)))?;

    Ok(HttpResponse::Ok().json(SessionInfo::from(session.as_ref())))
}

/// Forget a closed session record. Active sessions answer 409; they end
/// when their client disconnects.
pub async fn delete_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let removed = state.registry.unregister(&session_id)?;
    let session =
        removed.ok_or_else(|| AppError::NotFound(format!("session '{}'", session_id)))?;

    info!(session_id = %session_id, "Closed session record removed");
    Ok(HttpResponse::Ok().json(SessionInfo::from(session.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_list_and_get_sessions() {
        let state = AppState::new(AppConfig::default());
        state
            .registry
            .register(Arc::new(RelaySession::new("3333")))
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/sessions", web::get().to(list_sessions))
                .route("/sessions/{session_id}", web::get().to(get_session)),
        )
        .await;

        let req = test::TestRequest::get().uri("/sessions").to_request();
        let value: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(value["active"], 1);
        assert_eq!(value["sessions"][0]["session_id"], "3333");
        assert_eq!(value["sessions"][0]["state"], "active");
        assert_eq!(value["sessions"][0]["frames_sent"], 0);

        let req = test::TestRequest::get().uri("/sessions/3333").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/sessions/4444").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_delete_only_removes_closed_records() {
        let state = AppState::new(AppConfig::default());
        let closed = Arc::new(RelaySession::new("done"));
        closed.mark_closed();
        state.registry.register(closed).unwrap();
        state
            .registry
            .register(Arc::new(RelaySession::new("live")))
            .unwrap();
        let registry = state.registry.clone();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/sessions/{session_id}", web::delete().to(delete_session)),
        )
        .await;

        let req = test::TestRequest::delete().uri("/sessions/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(registry.get("live").is_some());

        let req = test::TestRequest::delete().uri("/sessions/done").to_request();
        let value: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(value["state"], "closed");
        assert!(registry.get("done").is_none());

        let req = test::TestRequest::delete().uri("/sessions/done").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
