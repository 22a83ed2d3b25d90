//! API 서버 공유 상태.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::runner::JobRunner;
use etf_core::DocumentStore;

/// 핸들러가 공유하는 상태.
pub struct AppState {
    /// 작업 실행기
    pub runner: Arc<JobRunner>,
    /// 작업 문서 저장소 (모니터링 뷰용 읽기 전용)
    pub document_store: DocumentStore,
    /// 작업 로그 디렉토리
    pub log_dir: PathBuf,
    /// 서버 버전
    pub version: String,
    /// 서버 시작 시각
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(runner: Arc<JobRunner>, document_store: DocumentStore, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            document_store,
            log_dir: log_dir.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    /// 서버 업타임(초).
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
