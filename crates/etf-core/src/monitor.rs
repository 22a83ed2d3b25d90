//! 모니터링용 읽기 전용 상태 뷰.
//!
//! 대시보드는 작업 문서를 직접 해석하지 않고 이 뷰를 사용합니다.
//! 문서가 없거나 초기 문서이면 작업 로그를 재생하여 같은 형태의 뷰를
//! 만듭니다.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::job::{DocumentStore, JobDocument, JobStatus, Progress, RetryTask, SymbolStatus};
use crate::joblog;
use crate::types::Timeframe;

/// 뷰를 만든 데이터 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewSource {
    /// 작업 문서
    Document,
    /// 작업 로그 재생
    Log,
    /// 기록 없음
    None,
}

/// 심볼 상태별 개수.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub downloading: usize,
    pub uploading: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: SymbolStatus) {
        match status {
            SymbolStatus::Pending => self.pending += 1,
            SymbolStatus::Downloading => self.downloading += 1,
            SymbolStatus::Uploading => self.uploading += 1,
            SymbolStatus::Completed => self.completed += 1,
            SymbolStatus::Partial => self.partial += 1,
            SymbolStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.downloading
            + self.uploading
            + self.completed
            + self.partial
            + self.failed
    }
}

/// 모니터링 상태 뷰.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub source: ViewSource,
    /// 초기 문서이면 `None`
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_symbol: Option<String>,
    pub current_timeframe: Option<Timeframe>,
    pub progress: Progress,
    pub counts: StatusCounts,
    pub symbols: IndexMap<String, SymbolStatus>,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub total_rows: u64,
    pub errors: Vec<String>,
    /// 가장 최근 재시도 작업
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_retry: Option<RetryTask>,
    /// 문서가 마지막으로 갱신된 시각
    pub updated_at: DateTime<Utc>,
}

impl StatusView {
    pub fn from_document(doc: &JobDocument, source: ViewSource) -> Self {
        let mut counts = StatusCounts::default();
        let symbols: IndexMap<String, SymbolStatus> = doc
            .symbols
            .iter()
            .map(|(name, record)| {
                counts.add(record.status);
                (name.clone(), record.status)
            })
            .collect();

        Self {
            source,
            job_id: (!doc.is_initial()).then(|| doc.job_id.clone()),
            status: doc.status,
            start_time: doc.start_time,
            end_time: doc.end_time,
            current_symbol: doc.current_symbol.clone(),
            current_timeframe: doc.current_timeframe,
            progress: doc.progress(),
            counts,
            symbols,
            total_downloaded: doc.total_downloaded,
            total_uploaded: doc.total_uploaded,
            total_rows: doc.total_rows,
            errors: doc.unit_errors(),
            latest_retry: doc.retry_tasks.last().cloned(),
            updated_at: doc.updated_at,
        }
    }

    /// 작업 또는 재시도가 진행 중인지 여부.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
            || self
                .latest_retry
                .as_ref()
                .is_some_and(|task| task.status.is_active())
    }

    /// 마지막 실행의 결과.
    ///
    /// 상위 작업이 끝난 뒤 재시도가 있었으면 재시도의 상태입니다.
    pub fn outcome(&self) -> JobStatus {
        match (&self.latest_retry, self.end_time) {
            (Some(task), Some(end)) if task.start_time >= end => task.status,
            _ => self.status,
        }
    }

    /// 진행 중으로 표시되지만 `threshold`보다 오래 갱신되지 않았는지 여부.
    ///
    /// 실행하던 프로세스가 비정상 종료된 문서를 가려냅니다.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.is_active()
            && (now - self.updated_at)
                .to_std()
                .is_ok_and(|age| age > threshold)
    }

    /// 기록이 전혀 없을 때의 뷰.
    pub fn empty() -> Self {
        Self::from_document(&JobDocument::initial(), ViewSource::None)
    }
}

/// 작업 문서 우선, 없으면 로그 재생으로 상태 뷰를 만듭니다.
pub fn load_view(store: &DocumentStore, log_dir: &Path) -> StatusView {
    if let Some(doc) = store.read().filter(|d| !d.is_initial()) {
        return StatusView::from_document(&doc, ViewSource::Document);
    }

    let entries = match joblog::read_entries(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %log_dir.display(), error = %e, "작업 로그 읽기 실패");
            return StatusView::empty();
        }
    };

    match joblog::replay(&entries) {
        Some(doc) => StatusView::from_document(&doc, ViewSource::Log),
        None => StatusView::empty(),
    }
}
