//! 통합 API 에러 응답 타입.
//!
//! 모든 엔드포인트가 같은 형식으로 에러를 반환합니다.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollectorError;
use etf_core::CoreError;

/// 통합 API 에러 응답.
///
/// ```json
/// {
///   "code": "JOB_ACTIVE",
///   "message": "작업이 이미 실행 중입니다: full_20250101_000000",
///   "timestamp": 1738300800
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "VALIDATION_ERROR", "JOB_ACTIVE")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 추가 에러 상세 정보
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// 에러 발생 타임스탬프 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 기본 에러 생성 (타임스탬프 포함).
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }

    /// 상세 정보 포함 에러 생성.
    pub fn with_details(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiErrorResponse>)>;

/// 상태 코드와 에러 본문을 만듭니다.
pub fn api_error(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiErrorResponse>) {
    (status, Json(ApiErrorResponse::new(code, message)))
}

/// Collector 에러를 HTTP 에러로 변환합니다.
///
/// - 실행 중 충돌 → 409
/// - 잘못된 요청 (심볼, 중단 대상 없음, 상위 작업 없음) → 400
/// - 그 외 → 500
pub fn from_collector_error(err: CollectorError) -> (StatusCode, Json<ApiErrorResponse>) {
    if err.is_conflict() {
        return api_error(StatusCode::CONFLICT, "JOB_ACTIVE", err.to_string());
    }
    match &err {
        CollectorError::NotRunning => api_error(StatusCode::BAD_REQUEST, "NOT_RUNNING", err.to_string()),
        CollectorError::Core(CoreError::InvalidSymbol(_)) | CollectorError::Core(CoreError::UnknownSymbol(_)) => {
            api_error(StatusCode::BAD_REQUEST, "INVALID_SYMBOL", err.to_string())
        }
        CollectorError::Core(CoreError::NoParentJob) => {
            api_error(StatusCode::BAD_REQUEST, "NO_PARENT_JOB", err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "요청 처리 실패");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let error = ApiErrorResponse::with_details(
            "VALIDATION_ERROR",
            "잘못된 심볼",
            serde_json::json!({"field": "symbol"}),
        );
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["details"]["field"], "symbol");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_status_mapping() {
        let (status, body) = from_collector_error(CollectorError::JobActive("full_1".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "JOB_ACTIVE");

        let (status, _) = from_collector_error(CollectorError::NotRunning);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            from_collector_error(CollectorError::Core(CoreError::UnknownSymbol("QQQ".into())));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "INVALID_SYMBOL");

        let (status, _) = from_collector_error(CollectorError::Config("x".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
