//! # ETF Core
//!
//! ETF 데이터 수집 파이프라인의 핵심 도메인 모델을 제공합니다.
//!
//! 이 크레이트는 수집기, 업로드 서비스, 모니터링이 공유하는 타입을 정의합니다:
//! - 심볼 및 타임프레임 정의
//! - 작업 문서 (Job / SymbolRecord / TimeframeRecord / RetryTask)
//! - 상태 열거형과 집계 규칙
//! - 작업 문서의 원자적 저장
//! - 구조화된 작업 로그와 로그 기반 상태 재구성
//! - 로깅 인프라

pub mod error;
pub mod job;
pub mod joblog;
pub mod logging;
pub mod monitor;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use job::*;
pub use joblog::{JobEvent, JobLog, JobSummary, LogEntry, LogLevel, LogQuery};
pub use logging::*;
pub use monitor::{StatusCounts, StatusView, ViewSource};
pub use types::*;
