//! 작업 제어/조회 endpoint.
//!
//! - `POST /jobs/full`: 전체 수집 시작
//! - `POST /jobs/retry`: 지정 심볼 재시도
//! - `POST /jobs/cancel`: 실행 중인 작업 중단 요청
//! - `GET /jobs/status`, `/jobs/document`, `/jobs/view`: 상태 조회
//! - `GET /jobs/logs`, `/jobs/history`: 작업 로그 조회

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError, ValidationErrors};

use super::error::{api_error, from_collector_error, ApiResult};
use super::state::AppState;
use etf_core::{
    is_valid_symbol, joblog, monitor, JobDocument, JobStatus, JobSummary, LogEntry, LogQuery,
    StatusView, Symbol,
};

/// 로그 조회 기본 개수.
const DEFAULT_LOG_LIMIT: usize = 100;
/// 작업 이력 기본 개수.
const DEFAULT_HISTORY_LIMIT: usize = 20;

// ==================== 검증 ====================

fn validate_symbol(value: &String) -> Result<(), ValidationError> {
    if !is_valid_symbol(value) {
        return Err(ValidationError::new("invalid_symbol")
            .with_message(format!("잘못된 심볼 형식입니다: {}", value).into()));
    }
    Ok(())
}

fn validate_symbol_list(values: &Vec<String>) -> Result<(), ValidationError> {
    values.iter().try_for_each(validate_symbol)
}

fn validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{}: 유효하지 않은 값", field))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// ==================== 요청/응답 타입 ====================

/// 재시도 요청. `symbol` 또는 `symbols` 중 하나 이상.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RetryRequest {
    #[validate(custom(function = "validate_symbol"))]
    pub symbol: Option<String>,
    #[validate(
        length(min = 1, max = 50, message = "심볼은 1-50개 사이여야 합니다"),
        custom(function = "validate_symbol_list")
    )]
    pub symbols: Option<Vec<String>>,
}

impl RetryRequest {
    /// 요청 심볼 목록 (입력 순서, 중복 제거).
    pub fn targets(&self) -> Vec<Symbol> {
        let mut targets: Vec<Symbol> = Vec::new();
        let raw = self.symbol.iter().chain(self.symbols.iter().flatten());
        for symbol in raw.filter_map(|s| Symbol::parse(s).ok()) {
            if !targets.contains(&symbol) {
                targets.push(symbol);
            }
        }
        targets
    }
}

/// 작업 시작 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// 재시도 시작 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    /// 재시도 ID
    pub job_id: String,
    pub parent_job_id: String,
    pub symbols: Vec<String>,
    pub status: JobStatus,
}

/// 중단 요청 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub message: String,
}

/// 진행률.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub current: usize,
    pub total: usize,
    pub current_symbol: Option<String>,
    /// 실패 단위의 에러 목록
    pub errors: Vec<String>,
}

/// 작업 상태 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// 초기 문서이면 `null`
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub progress: ProgressInfo,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub total_rows: u64,
    /// 실행 중인 재시도 ID
    pub active_retry: Option<String>,
}

impl From<&JobDocument> for JobStatusResponse {
    fn from(doc: &JobDocument) -> Self {
        let progress = doc.progress();
        Self {
            job_id: (!doc.is_initial()).then(|| doc.job_id.clone()),
            status: doc.status,
            progress: ProgressInfo {
                current: progress.current,
                total: progress.total,
                current_symbol: doc.current_symbol.clone(),
                errors: doc.unit_errors(),
            },
            start_time: doc.start_time,
            end_time: doc.end_time,
            total_downloaded: doc.total_downloaded,
            total_uploaded: doc.total_uploaded,
            total_rows: doc.total_rows,
            active_retry: doc.active_retry().map(|t| t.retry_id.clone()),
        }
    }
}

/// 로그 조회 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub count: usize,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// 작업 이력 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub jobs: Vec<JobSummary>,
}

// ==================== 핸들러 ====================

/// 전체 수집 작업을 시작합니다.
///
/// POST /jobs/full
pub async fn start_full_job(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let run = state.runner.start_full().await.map_err(from_collector_error)?;
    let job_id = run.job_id.clone();
    state.runner.spawn(run);

    info!(job_id = %job_id, "전체 수집 작업 시작");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id,
            status: JobStatus::Pending,
            message: "전체 수집 작업이 시작되었습니다".to_string(),
        }),
    ))
}

/// 지정 심볼을 재시도합니다.
///
/// POST /jobs/retry
pub async fn retry_symbols(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RetryRequest>,
) -> ApiResult<(StatusCode, Json<RetryResponse>)> {
    if let Err(errors) = request.validate() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            validation_message(&errors),
        ));
    }
    let targets = request.targets();
    if targets.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "symbol 또는 symbols가 필요합니다",
        ));
    }

    let run = state
        .runner
        .start_retry(&targets)
        .await
        .map_err(from_collector_error)?;
    let response = RetryResponse {
        job_id: run.retry_id().unwrap_or_default().to_string(),
        parent_job_id: run.job_id.clone(),
        symbols: targets.iter().map(|s| s.to_string()).collect(),
        status: JobStatus::Running,
    };
    state.runner.spawn(run);

    info!(retry_id = %response.job_id, symbols = ?response.symbols, "재시도 시작");
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// 실행 중인 작업에 중단을 요청합니다.
///
/// POST /jobs/cancel
pub async fn cancel_job(State(state): State<Arc<AppState>>) -> ApiResult<Json<CancelResponse>> {
    let job_id = state.runner.cancel().await.map_err(from_collector_error)?;
    Ok(Json(CancelResponse {
        job_id,
        message: "중단 요청을 보냈습니다. 진행 중인 단위가 끝나면 중단됩니다".to_string(),
    }))
}

/// GET /jobs/status
pub async fn job_status(State(state): State<Arc<AppState>>) -> Json<JobStatusResponse> {
    Json(JobStatusResponse::from(&state.runner.snapshot()))
}

/// GET /jobs/document
pub async fn job_document(State(state): State<Arc<AppState>>) -> Json<JobDocument> {
    Json(state.runner.snapshot())
}

/// 작업 문서 우선, 없으면 로그 재생으로 만든 상태 뷰.
///
/// GET /jobs/view
pub async fn job_view(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    Json(monitor::load_view(&state.document_store, &state.log_dir))
}

/// 작업 로그를 최신순으로 조회합니다.
///
/// GET /jobs/logs?limit&job_id&symbol&level&min_level
pub async fn job_logs(
    State(state): State<Arc<AppState>>,
    Query(mut query): Query<LogQuery>,
) -> ApiResult<Json<LogsResponse>> {
    query.limit = Some(query.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    let entries = joblog::read_entries(&state.log_dir).map_err(|e| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "LOG_READ_ERROR", e.to_string())
    })?;
    let entries: Vec<LogEntry> = query.apply(&entries).into_iter().cloned().collect();
    Ok(Json(LogsResponse {
        count: entries.len(),
        entries,
    }))
}

/// 로그에 기록된 작업 이력.
///
/// GET /jobs/history?limit
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let entries = joblog::read_entries(&state.log_dir).map_err(|e| {
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "LOG_READ_ERROR", e.to_string())
    })?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let jobs = joblog::summarize_jobs(&entries).into_iter().take(limit).collect();
    Ok(Json(HistoryResponse { jobs }))
}

/// 작업 라우터 생성.
pub fn jobs_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/full", post(start_full_job))
        .route("/retry", post(retry_symbols))
        .route("/cancel", post(cancel_job))
        .route("/status", get(job_status))
        .route("/document", get(job_document))
        .route("/view", get(job_view))
        .route("/logs", get(job_logs))
        .route("/history", get(job_history))
}
