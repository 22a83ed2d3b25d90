//! 작업 제어 HTTP API.
//!
//! 전체 수집/재시도/중단 요청과 작업 상태, 작업 로그 조회를 제공합니다.

pub mod error;
pub mod health;
pub mod jobs;
pub mod state;

use std::sync::Arc;

use axum::Router;

pub use error::{ApiErrorResponse, ApiResult};
pub use health::health_router;
pub use jobs::jobs_router;
pub use state::AppState;

/// API 라우터 생성.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/health", health_router())
        .nest("/jobs", jobs_router())
        .with_state(state)
}
