//! 작업 상태 추적기.
//!
//! 작업 문서의 유일한 변경 주체입니다. 변경할 때마다:
//! - 문서를 원자적으로 저장 (실패하면 에러 반환, 작업에 치명적)
//! - 구조화 작업 로그에 항목 추가 (실패는 경고만)
//! - `watch` 채널로 스냅샷 발행

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::warn;

use crate::Result;
use etf_core::{
    DocumentStore, JobDocument, JobEvent, JobLog, JobStatus, LogEntry, LogLevel, RetryTask,
    Symbol, SymbolStatus, Timeframe, UnitUpdate,
};

/// 작업 상태 추적기.
pub struct Tracker {
    doc: JobDocument,
    store: DocumentStore,
    log: JobLog,
    tx: watch::Sender<JobDocument>,
}

impl Tracker {
    /// 저장된 문서를 불러와 추적기를 만듭니다.
    pub fn load(store: DocumentStore, log: JobLog) -> Self {
        let doc = store.load();
        let (tx, _rx) = watch::channel(doc.clone());
        Self { doc, store, log, tx }
    }

    /// 스냅샷 구독.
    pub fn subscribe(&self) -> watch::Receiver<JobDocument> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> JobDocument {
        self.doc.clone()
    }

    pub fn document(&self) -> &JobDocument {
        &self.doc
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    fn persist(&mut self) -> Result<()> {
        self.store.save(&self.doc)?;
        self.tx.send_replace(self.doc.clone());
        Ok(())
    }

    fn append(&self, entry: LogEntry) {
        if let Err(e) = self.log.append(&entry) {
            warn!(error = %e, dir = %self.log.dir().display(), "작업 로그 기록 실패");
        }
    }

    /// 이전 프로세스가 남긴 실행 중 상태를 실패로 정리합니다.
    ///
    /// 정리한 경우 `true`.
    pub fn recover_stale(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let mut recovered = false;
        let job_id = self.doc.job_id.clone();

        let active_retries: Vec<String> = self
            .doc
            .retry_tasks
            .iter()
            .filter(|t| t.status.is_active())
            .map(|t| t.retry_id.clone())
            .collect();
        for retry_id in active_retries {
            let error = "이전 프로세스가 재시도 도중 종료되었습니다".to_string();
            self.doc.fail_retry(&retry_id, &error, now)?;
            self.append(
                LogEntry::new(now, LogLevel::Error, &job_id, "비정상 종료된 재시도를 실패 처리")
                    .with_event(JobEvent::RetryFinished {
                        retry_id,
                        status: JobStatus::Failed,
                        cancelled: false,
                        error: Some(error),
                    }),
            );
            recovered = true;
        }

        if self.doc.status.is_active() {
            let error = "이전 프로세스가 작업 도중 종료되었습니다".to_string();
            self.doc.fail(error.clone(), now)?;
            self.append(
                LogEntry::new(now, LogLevel::Error, &job_id, "비정상 종료된 작업을 실패 처리")
                    .with_event(JobEvent::JobFailed { error }),
            );
            recovered = true;
        }

        if recovered {
            self.persist()?;
        }
        Ok(recovered)
    }

    /// 새 전체 작업을 `pending` 상태로 만듭니다.
    pub fn start_job(
        &mut self,
        symbols: &[Symbol],
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Result<String> {
        if self.doc.is_active() {
            return Err(etf_core::CoreError::JobActive(self.doc.job_id.clone()).into());
        }

        let job_id = JobDocument::full_job_id(now);
        self.doc = JobDocument::new(job_id.clone(), symbols, timeframes, now);
        self.persist()?;

        let ordered = Timeframe::coarse_to_fine(timeframes);
        self.append(
            LogEntry::new(
                now,
                LogLevel::Info,
                &job_id,
                format!("작업 생성: 심볼 {}개 × 타임프레임 {}개", symbols.len(), ordered.len()),
            )
            .with_event(JobEvent::JobStarted {
                symbols: self.doc.symbols.keys().cloned().collect(),
                timeframes: ordered,
            }),
        );
        Ok(job_id)
    }

    /// pending → running.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.doc.begin(now)?;
        self.persist()
    }

    /// 단위 상태를 갱신합니다.
    pub fn update(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        update: UnitUpdate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.doc.apply(symbol, timeframe, &update, now)?;
        self.persist()?;

        let (level, message) = match &update {
            UnitUpdate::Downloading { attempt } => {
                (LogLevel::Info, format!("다운로드 시작 (시도 {})", attempt))
            }
            UnitUpdate::Downloaded { rows } => {
                (LogLevel::Debug, format!("다운로드 완료: {}행", rows))
            }
            UnitUpdate::Uploading => (LogLevel::Debug, "업로드 시작".to_string()),
            UnitUpdate::Succeeded { rows } => (LogLevel::Info, format!("업로드 완료: {}행", rows)),
            UnitUpdate::Failed { error } => (LogLevel::Error, format!("실패: {}", error)),
        };
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, level, job_id, message)
                .with_symbol(symbol)
                .with_timeframe(timeframe)
                .with_event(JobEvent::Unit { update }),
        );
        Ok(())
    }

    /// 재시도 전 실패한 시도를 기록합니다 (문서 변경 없음).
    pub fn note_attempt_failure(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        attempt: u32,
        error: &str,
        now: DateTime<Utc>,
    ) {
        self.append(
            LogEntry::new(
                now,
                LogLevel::Warning,
                &self.doc.job_id,
                format!("시도 {} 실패, 재시도 예정: {}", attempt, error),
            )
            .with_symbol(symbol)
            .with_timeframe(timeframe),
        );
    }

    /// 심볼 상태를 확정합니다.
    pub fn settle_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<SymbolStatus> {
        let status = self.doc.settle_symbol(symbol, now)?;
        self.persist()?;

        let level = match status {
            SymbolStatus::Completed => LogLevel::Info,
            SymbolStatus::Partial => LogLevel::Warning,
            _ => LogLevel::Error,
        };
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, level, job_id, format!("심볼 처리 완료: {}", status))
                .with_symbol(symbol)
                .with_event(JobEvent::SymbolSettled { status }),
        );
        Ok(status)
    }

    /// 작업을 종료 상태로 전환합니다.
    pub fn finalize(&mut self, now: DateTime<Utc>, cancelled: bool) -> Result<JobStatus> {
        let status = self.doc.finalize(now, cancelled)?;
        self.persist()?;

        let level = match status {
            JobStatus::Completed => LogLevel::Info,
            JobStatus::Partial => LogLevel::Warning,
            _ => LogLevel::Error,
        };
        let message = if cancelled {
            format!("작업 중단됨: {}", status)
        } else {
            format!(
                "작업 종료: {} (업로드 {}건, {}행)",
                status, self.doc.total_uploaded, self.doc.total_rows
            )
        };
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, level, job_id, message)
                .with_event(JobEvent::JobFinished { status, cancelled }),
        );
        Ok(status)
    }

    /// 치명적 오류로 작업을 실패 처리합니다.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.doc.fail(error, now)?;
        self.persist()?;
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, LogLevel::Critical, job_id, format!("작업 실패: {}", error))
                .with_event(JobEvent::JobFailed {
                    error: error.to_string(),
                }),
        );
        Ok(())
    }

    /// 재시도 작업을 등록합니다.
    pub fn start_retry(&mut self, symbols: &[Symbol], now: DateTime<Utc>) -> Result<RetryTask> {
        let task = self.doc.start_retry(symbols, now)?.clone();
        self.persist()?;
        self.append(
            LogEntry::new(
                now,
                LogLevel::Info,
                &task.parent_job_id,
                format!("재시도 시작 {}: {}", task.retry_id, task.symbols.join(",")),
            )
            .with_event(JobEvent::RetryStarted {
                retry_id: task.retry_id.clone(),
                symbols: task.symbols.clone(),
            }),
        );
        Ok(task)
    }

    /// 재시도 작업을 종료합니다.
    pub fn finish_retry(
        &mut self,
        retry_id: &str,
        now: DateTime<Utc>,
        cancelled: bool,
    ) -> Result<JobStatus> {
        let status = self.doc.finish_retry(retry_id, now, cancelled)?;
        self.persist()?;
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, LogLevel::Info, job_id, format!("재시도 종료 {}: {}", retry_id, status))
                .with_event(JobEvent::RetryFinished {
                    retry_id: retry_id.to_string(),
                    status,
                    cancelled,
                    error: None,
                }),
        );
        Ok(status)
    }

    /// 재시도 작업을 실패 처리합니다.
    pub fn fail_retry(&mut self, retry_id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.doc.fail_retry(retry_id, error, now)?;
        self.persist()?;
        let job_id = self.doc.job_id.clone();
        self.append(
            LogEntry::new(now, LogLevel::Critical, job_id, format!("재시도 실패 {}: {}", retry_id, error))
                .with_event(JobEvent::RetryFinished {
                    retry_id: retry_id.to_string(),
                    status: JobStatus::Failed,
                    cancelled: false,
                    error: Some(error.to_string()),
                }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etf_core::{joblog, TimeframeStatus};
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> Tracker {
        Tracker::load(
            DocumentStore::new(dir.path().join("job_status.json")),
            JobLog::new(dir.path().join("logs")),
        )
    }

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|s| Symbol::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_every_update_is_persisted_and_published() {
        let dir = TempDir::new().unwrap();
        let mut tracker = tracker(&dir);
        let rx = tracker.subscribe();
        let now = Utc::now();

        tracker
            .start_job(&symbols(&["AAPL"]), &[Timeframe::Day1], now)
            .unwrap();
        tracker.begin(now).unwrap();
        tracker
            .update("AAPL", Timeframe::Day1, UnitUpdate::Downloading { attempt: 1 }, now)
            .unwrap();

        let on_disk = tracker.store().read().unwrap();
        assert_eq!(
            on_disk.symbols["AAPL"].timeframes[&Timeframe::Day1].status,
            TimeframeStatus::Downloading
        );
        assert_eq!(rx.borrow().status, JobStatus::Running);
    }

    #[test]
    fn test_rejects_second_job_while_active() {
        let dir = TempDir::new().unwrap();
        let mut tracker = tracker(&dir);
        let now = Utc::now();
        tracker.start_job(&symbols(&["AAPL"]), &[Timeframe::Day1], now).unwrap();

        let err = tracker
            .start_job(&symbols(&["AAPL"]), &[Timeframe::Day1], now)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_recover_stale_running_document() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        {
            let mut crashed = tracker(&dir);
            crashed.start_job(&symbols(&["AAPL"]), &[Timeframe::Day1], now).unwrap();
            crashed.begin(now).unwrap();
        }

        let mut restarted = tracker(&dir);
        assert!(restarted.recover_stale(Utc::now()).unwrap());
        assert_eq!(restarted.document().status, JobStatus::Failed);
        assert!(!restarted.recover_stale(Utc::now()).unwrap());

        // 로그만으로도 같은 결과가 재구성됨
        let entries = joblog::read_entries(&dir.path().join("logs")).unwrap();
        let replayed = joblog::replay(&entries).unwrap();
        assert_eq!(replayed.status, JobStatus::Failed);
    }
}
