//! 헬스 체크 endpoint.
//!
//! `/health`는 프로세스 생존 여부만, `/health/ready`는 작업 문서와
//! 작업 로그 경로, 현재 작업 상태를 함께 보고합니다.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::state::AppState;
use etf_core::JobStatus;

/// 준비 상태 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// "healthy" | "degraded"
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub timestamp: String,
    pub job_document: Probe,
    pub job_log: Probe,
    pub runner: Probe,
}

/// 개별 확인 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Up,
    Down,
    /// 아직 한 번도 생성되지 않음
    Missing,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Probe {
    pub state: ProbeState,
    pub detail: String,
}

impl Probe {
    fn new(state: ProbeState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
        }
    }

    fn path(path: &Path, present: bool) -> Self {
        let state = if present { ProbeState::Up } else { ProbeState::Missing };
        Self::new(state, path.display().to_string())
    }
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /health/ready
pub async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let doc_path = state.document_store.path();
    let job_document = Probe::path(doc_path, doc_path.exists());
    let job_log = Probe::path(&state.log_dir, state.log_dir.is_dir());

    let snapshot = state.runner.snapshot();
    let runner = if snapshot.status.is_active() && !state.runner.is_running() {
        // 다른 프로세스가 남긴 실행 중 문서
        Probe::new(
            ProbeState::Down,
            format!("{} {} (실행기 없음)", snapshot.job_id, snapshot.status),
        )
    } else if snapshot.status == JobStatus::Idle {
        Probe::new(ProbeState::Up, "idle")
    } else {
        Probe::new(ProbeState::Up, format!("{} {}", snapshot.job_id, snapshot.status))
    };

    let status = if runner.state == ProbeState::Down {
        "degraded"
    } else {
        "healthy"
    };

    let body = ReadinessResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        job_document,
        job_log,
        runner,
    };
    (StatusCode::OK, Json(body))
}

/// 헬스 체크 라우터 생성.
pub fn health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(health_ready))
}
