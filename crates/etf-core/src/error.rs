//! 핵심 도메인 에러 타입.

use thiserror::Error;

use crate::job::{JobStatus, TimeframeStatus};
use crate::types::Timeframe;

/// 도메인 모델 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 잘못된 심볼 식별자
    #[error("잘못된 심볼: {0}")]
    InvalidSymbol(String),

    /// 알 수 없는 타임프레임
    #[error("알 수 없는 타임프레임: {0}")]
    InvalidTimeframe(String),

    /// 작업 문서에 없는 심볼
    #[error("작업에 없는 심볼: {0}")]
    UnknownSymbol(String),

    /// 허용되지 않는 작업 상태 전이
    #[error("작업 상태 전이 불가: {from} -> {to}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },

    /// 허용되지 않는 타임프레임 상태 전이
    #[error("{symbol}/{timeframe} 상태 전이 불가: {from} -> {to}")]
    InvalidUnitTransition {
        symbol: String,
        timeframe: Timeframe,
        from: TimeframeStatus,
        to: TimeframeStatus,
    },

    /// 재시도 작업을 찾을 수 없음
    #[error("재시도 작업을 찾을 수 없음: {0}")]
    RetryNotFound(String),

    /// 재시도할 상위 작업이 없음 (초기 문서)
    #[error("재시도할 작업 기록이 없습니다")]
    NoParentJob,

    /// 진행 중인 작업이 있음
    #[error("작업이 이미 실행 중입니다: {0}")]
    JobActive(String),

    /// 파일 입출력 에러
    #[error("파일 입출력 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 도메인 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;
