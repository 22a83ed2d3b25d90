//! 에러 타입 정의.

use thiserror::Error;

use etf_core::CoreError;
use etf_data::{DataError, UploadError, ValidationError};

/// 로그인/세션 에러.
///
/// 작업 전체에 치명적입니다.
#[derive(Debug, Error)]
pub enum AuthError {
    /// 자격증명이 설정되지 않음
    #[error("로그인 자격증명이 설정되지 않았습니다 (TV_USERNAME, TV_PASSWORD)")]
    MissingCredentials,

    /// 자격증명 거부
    #[error("로그인 거부: {0}")]
    Rejected(String),

    /// 로그인 응답 형식이 예상과 다름
    #[error("로그인 절차가 변경된 것으로 보입니다: {0}")]
    FlowChanged(String),

    /// 네트워크 에러
    #[error("로그인 요청 실패: {0}")]
    Network(String),

    /// 세션 파일 저장 실패
    #[error("세션 파일 저장 실패: {0}")]
    SessionFile(#[from] CoreError),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}

/// 단위 다운로드 에러.
///
/// 단위 범위로 기록되며 작업을 중단시키지 않습니다.
#[derive(Debug, Error)]
pub enum FetchError {
    /// 다운로드 대기 시간 초과
    #[error("다운로드 시간 초과: {0}")]
    Timeout(String),

    /// 표 형식 OHLCV가 아닌 내보내기 파일
    #[error("잘못된 내보내기 파일: {0}")]
    InvalidExport(String),

    /// 차트 페이지 이동/설정 실패
    #[error("차트 페이지 이동 실패: {0}")]
    NavigationFailure(String),

    /// 로그인 페이지로 리다이렉트됨
    #[error("세션이 유효하지 않습니다")]
    SessionInvalid,
}

impl FetchError {
    /// 같은 단위 안에서 다시 시도할 수 있는 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::NavigationFailure(_) | FetchError::SessionInvalid
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else {
            FetchError::NavigationFailure(err.to_string())
        }
    }
}

/// Collector 에러 타입.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 인증 에러
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// 작업 문서/로그 에러
    #[error(transparent)]
    Core(#[from] CoreError),

    /// 저장소 에러
    #[error(transparent)]
    Data(#[from] DataError),

    /// 업로드 에러
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// 검증 에러
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 진행 중인 작업이 있음
    #[error("작업이 이미 실행 중입니다: {0}")]
    JobActive(String),

    /// 중단할 작업이 없음
    #[error("실행 중인 작업이 없습니다")]
    NotRunning,

    /// 파일 입출력 에러
    #[error("파일 입출력 에러: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// 다른 작업이 실행 중이어서 거부되었는지 확인.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CollectorError::JobActive(_) | CollectorError::Core(CoreError::JobActive(_))
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::Timeout("60s".into()).is_retryable());
        assert!(FetchError::SessionInvalid.is_retryable());
        assert!(!FetchError::InvalidExport("no close".into()).is_retryable());
    }

    #[test]
    fn test_conflict_detection() {
        assert!(CollectorError::JobActive("full_1".into()).is_conflict());
        assert!(CollectorError::Core(CoreError::JobActive("full_1".into())).is_conflict());
        assert!(!CollectorError::NotRunning.is_conflict());
    }
}
