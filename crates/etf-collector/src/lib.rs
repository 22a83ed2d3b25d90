//! # ETF Collector
//!
//! 차트 서비스에서 ETF OHLCV 내보내기 파일을 받아 DB에 업로드하는
//! 작업 실행기와 작업 제어 서버입니다.
//!
//! ## 구성
//! - `session`: 로그인과 세션 쿠키 파일 관리
//! - `fetch`: 심볼/타임프레임 단위 다운로드
//! - `tracker`: 작업 문서와 작업 로그 기록
//! - `runner`: 전체 수집/재시도 실행, 중단 처리
//! - `api`: 작업 제어 HTTP API
//!
//! ## 사용법
//! ```bash
//! # 전체 수집 (포그라운드)
//! etf-collector run
//!
//! # 실패 심볼만 재시도
//! etf-collector retry --symbols AAPL,NVDA
//!
//! # 작업 제어 서버
//! etf-collector serve
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod fetch;
pub mod runner;
pub mod session;
pub mod stats;
pub mod tracker;

pub use config::ScraperConfig;
pub use error::{AuthError, CollectorError, FetchError, Result};
pub use fetch::{ChartExporter, FetchResult, Fetcher, HttpChartExporter};
pub use runner::{JobRunner, RunKind, RunnerSettings, StartedRun};
pub use session::{Authenticator, HttpAuthenticator, SessionHandle, SessionManager, StoredCookie};
pub use stats::RunStats;
pub use tracker::Tracker;
