//! 구조화된 작업 로그.
//!
//! 작업 진행 상황을 일자별 파일 `scraper_YYYYMMDD.log`에 JSON 한 줄씩
//! 기록합니다. 각 항목은 작업/심볼/타임프레임 태그와 선택적인 이벤트를
//! 가지며, 이벤트만으로 작업 문서를 재구성할 수 있습니다([`replay`]).
//! 모니터링 측은 작업 문서가 없을 때 이 로그를 대신 읽습니다.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::job::{JobDocument, JobStatus, SymbolStatus, UnitUpdate};
use crate::types::{Symbol, Timeframe};

/// 로그 파일 이름 접두사.
pub const LOG_FILE_PREFIX: &str = "scraper_";

/// 로그 레벨 (심각도 순).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(format!("알 수 없는 로그 레벨: {}", s)),
        }
    }
}

/// 작업 문서 재구성에 필요한 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted {
        symbols: Vec<String>,
        timeframes: Vec<Timeframe>,
    },
    Unit {
        update: UnitUpdate,
    },
    SymbolSettled {
        status: SymbolStatus,
    },
    JobFinished {
        status: JobStatus,
        cancelled: bool,
    },
    JobFailed {
        error: String,
    },
    RetryStarted {
        retry_id: String,
        symbols: Vec<String>,
    },
    RetryFinished {
        retry_id: String,
        status: JobStatus,
        #[serde(default)]
        cancelled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// 작업 로그 한 줄.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<JobEvent>,
}

impl LogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        job_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            level,
            job_id: job_id.into(),
            symbol: None,
            timeframe: None,
            message: message.into(),
            event: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn with_event(mut self, event: JobEvent) -> Self {
        self.event = Some(event);
        self
    }

    fn mirror_to_tracing(&self) {
        let symbol = self.symbol.as_deref().unwrap_or("-");
        let timeframe = self.timeframe.map(|tf| tf.label()).unwrap_or("-");

        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    job_id = %self.job_id,
                    symbol,
                    timeframe,
                    "{}",
                    self.message
                )
            };
        }

        match self.level {
            LogLevel::Debug => emit!(debug),
            LogLevel::Info => emit!(info),
            LogLevel::Warning => emit!(warn),
            LogLevel::Error | LogLevel::Critical => emit!(error),
        }
    }
}

/// 일자별 JSON lines 작업 로그 기록기.
#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 항목 시각 기준의 로그 파일 경로.
    pub fn file_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}{}.log",
            LOG_FILE_PREFIX,
            timestamp.format("%Y%m%d")
        ))
    }

    /// 항목을 파일에 추가하고 tracing으로도 출력합니다.
    pub fn append(&self, entry: &LogEntry) -> CoreResult<()> {
        entry.mirror_to_tracing();

        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(entry.timestamp))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// 디렉토리의 모든 로그 항목을 기록 순서대로 읽습니다.
    pub fn read_all(&self) -> CoreResult<Vec<LogEntry>> {
        read_entries(&self.dir)
    }
}

/// 로그 디렉토리의 `scraper_*.log` 파일을 읽습니다.
///
/// 파싱할 수 없는 줄은 건너뜁니다. 디렉토리가 없으면 빈 목록입니다.
pub fn read_entries(dir: &Path) -> CoreResult<Vec<LogEntry>> {
    let listing = match std::fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files: Vec<PathBuf> = listing
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(".log"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for path in files {
        let reader = BufReader::new(std::fs::File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) => skipped += 1,
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, dir = %dir.display(), "파싱할 수 없는 로그 줄 건너뜀");
    }

    Ok(entries)
}

/// 로그 이벤트로 가장 최근 작업의 문서를 재구성합니다.
///
/// 마지막 `JobStarted` 이후의 같은 작업 이벤트를 작업 문서와 동일한
/// 전이 규칙으로 적용합니다. 시작 이벤트가 없으면 `None`.
pub fn replay(entries: &[LogEntry]) -> Option<JobDocument> {
    let start = entries
        .iter()
        .rposition(|e| matches!(e.event, Some(JobEvent::JobStarted { .. })))?;
    let first = &entries[start];
    let job_id = first.job_id.as_str();

    let mut doc = match &first.event {
        Some(JobEvent::JobStarted {
            symbols,
            timeframes,
        }) => {
            let symbols: Vec<Symbol> = symbols
                .iter()
                .filter_map(|s| Symbol::parse(s).ok())
                .collect();
            JobDocument::new(job_id, &symbols, timeframes, first.timestamp)
        }
        _ => return None,
    };
    doc.begin(first.timestamp).ok()?;

    for entry in entries[start + 1..].iter().filter(|e| e.job_id == job_id) {
        let Some(event) = &entry.event else { continue };
        let now = entry.timestamp;
        let symbol = entry.symbol.as_deref();

        let applied = match event {
            JobEvent::JobStarted { .. } => Ok(()),
            JobEvent::Unit { update } => match (symbol, entry.timeframe) {
                (Some(symbol), Some(tf)) => doc.apply(symbol, tf, update, now),
                _ => Ok(()),
            },
            JobEvent::SymbolSettled { .. } => match symbol {
                Some(symbol) => doc.settle_symbol(symbol, now).map(|_| ()),
                None => Ok(()),
            },
            JobEvent::JobFinished { cancelled, .. } => doc.finalize(now, *cancelled).map(|_| ()),
            JobEvent::JobFailed { error } => doc.fail(error.clone(), now),
            JobEvent::RetryStarted { symbols, .. } => {
                let symbols: Vec<Symbol> = symbols
                    .iter()
                    .filter_map(|s| Symbol::parse(s).ok())
                    .collect();
                doc.start_retry(&symbols, now).map(|_| ())
            }
            JobEvent::RetryFinished {
                retry_id,
                status,
                cancelled,
                error,
            } => {
                let retry_id = doc
                    .active_retry()
                    .map(|t| t.retry_id.clone())
                    .unwrap_or_else(|| retry_id.clone());
                if *status == JobStatus::Failed && !*cancelled {
                    doc.fail_retry(&retry_id, error.as_deref().unwrap_or(&entry.message), now)
                } else {
                    doc.finish_retry(&retry_id, now, *cancelled).map(|_| ())
                }
            }
        };

        if let Err(e) = applied {
            tracing::debug!(error = %e, job_id, "로그 재구성 중 이벤트 무시");
        }
    }

    Some(doc)
}

/// 로그 조회 조건.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    pub job_id: Option<String>,
    pub symbol: Option<String>,
    /// 정확히 일치하는 레벨
    pub level: Option<LogLevel>,
    /// 이 레벨 이상
    pub min_level: Option<LogLevel>,
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.job_id.as_deref().map_or(true, |id| entry.job_id == id)
            && self
                .symbol
                .as_deref()
                .map_or(true, |s| entry.symbol.as_deref() == Some(s))
            && self.level.map_or(true, |l| entry.level == l)
            && self.min_level.map_or(true, |l| entry.level >= l)
    }

    /// 조건에 맞는 항목을 최신순으로 반환합니다.
    pub fn apply<'a>(&self, entries: &'a [LogEntry]) -> Vec<&'a LogEntry> {
        let limit = self.limit.unwrap_or(usize::MAX);
        entries
            .iter()
            .rev()
            .filter(|e| self.matches(e))
            .take(limit)
            .collect()
    }
}

/// 로그에 기록된 작업 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub entries: usize,
    pub errors: usize,
    /// 마지막 종료 이벤트의 상태
    pub status: Option<JobStatus>,
}

/// 작업 ID별 요약을 최신 시작순으로 반환합니다.
pub fn summarize_jobs(entries: &[LogEntry]) -> Vec<JobSummary> {
    let mut summaries: indexmap::IndexMap<&str, JobSummary> = indexmap::IndexMap::new();
    for entry in entries {
        let summary = summaries
            .entry(entry.job_id.as_str())
            .or_insert_with(|| JobSummary {
                job_id: entry.job_id.clone(),
                start_time: entry.timestamp,
                end_time: entry.timestamp,
                entries: 0,
                errors: 0,
                status: None,
            });
        summary.entries += 1;
        summary.start_time = summary.start_time.min(entry.timestamp);
        summary.end_time = summary.end_time.max(entry.timestamp);
        if entry.level >= LogLevel::Error {
            summary.errors += 1;
        }
        match &entry.event {
            Some(JobEvent::JobFinished { status, .. }) => summary.status = Some(*status),
            Some(JobEvent::JobFailed { .. }) => summary.status = Some(JobStatus::Failed),
            _ => {}
        }
    }

    let mut list: Vec<JobSummary> = summaries.into_values().collect();
    list.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, sec).unwrap()
    }

    fn unit(sec: u32, symbol: &str, tf: Timeframe, update: UnitUpdate) -> LogEntry {
        LogEntry::new(at(sec), LogLevel::Info, "job1", "unit")
            .with_symbol(symbol)
            .with_timeframe(tf)
            .with_event(JobEvent::Unit { update })
    }

    fn settled(sec: u32, symbol: &str, status: SymbolStatus) -> LogEntry {
        LogEntry::new(at(sec), LogLevel::Info, "job1", "settled")
            .with_symbol(symbol)
            .with_event(JobEvent::SymbolSettled { status })
    }

    fn scenario_entries() -> Vec<LogEntry> {
        let mut entries = vec![LogEntry::new(at(0), LogLevel::Info, "job1", "start").with_event(
            JobEvent::JobStarted {
                symbols: vec!["AAPL".into(), "NVDA".into()],
                timeframes: vec![Timeframe::Day1, Timeframe::Week1],
            },
        )];
        for (symbol, tf, rows) in [
            ("AAPL", Timeframe::Day1, Some(100)),
            ("AAPL", Timeframe::Week1, None),
            ("NVDA", Timeframe::Day1, Some(50)),
            ("NVDA", Timeframe::Week1, Some(20)),
        ] {
            entries.push(unit(1, symbol, tf, UnitUpdate::Downloading { attempt: 1 }));
            match rows {
                Some(rows) => {
                    entries.push(unit(2, symbol, tf, UnitUpdate::Downloaded { rows }));
                    entries.push(unit(3, symbol, tf, UnitUpdate::Uploading));
                    entries.push(unit(4, symbol, tf, UnitUpdate::Succeeded { rows }));
                }
                None => entries.push(unit(
                    4,
                    symbol,
                    tf,
                    UnitUpdate::Failed {
                        error: "timeout".into(),
                    },
                )),
            }
        }
        entries.push(settled(5, "AAPL", SymbolStatus::Partial));
        entries.push(settled(6, "NVDA", SymbolStatus::Completed));
        entries.push(
            LogEntry::new(at(7), LogLevel::Warning, "job1", "done").with_event(
                JobEvent::JobFinished {
                    status: JobStatus::Partial,
                    cancelled: false,
                },
            ),
        );
        entries
    }

    #[test]
    fn test_replay_rebuilds_document() {
        let doc = replay(&scenario_entries()).unwrap();
        assert_eq!(doc.job_id, "job1");
        assert_eq!(doc.status, JobStatus::Partial);
        assert_eq!(doc.symbols["AAPL"].status, SymbolStatus::Partial);
        assert_eq!(doc.symbols["NVDA"].status, SymbolStatus::Completed);
        assert_eq!(doc.total_rows, 170);
        assert_eq!(doc.total_uploaded, 3);
    }

    #[test]
    fn test_replay_without_start_is_none() {
        let entries = vec![LogEntry::new(at(0), LogLevel::Info, "job1", "hello")];
        assert!(replay(&entries).is_none());
    }

    #[test]
    fn test_append_and_read_skip_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::new(dir.path());
        for entry in scenario_entries() {
            log.append(&entry).unwrap();
        }

        let path = log.file_for(at(0));
        assert!(path.ends_with("scraper_20250106.log"));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "2025-01-06 09:00:00 - INFO - plain text line").unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), scenario_entries().len());
        assert_eq!(replay(&entries).unwrap().total_rows, 170);
    }

    #[test]
    fn test_read_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        let level: LogLevel = serde_json::from_str("\"WARN\"").unwrap();
        assert_eq!(level, LogLevel::Warning);
        assert_eq!(serde_json::to_string(&LogLevel::Critical).unwrap(), "\"CRITICAL\"");
        assert!(LogLevel::Error > LogLevel::Warning);
    }

    #[test]
    fn test_query_filters_newest_first() {
        let entries = scenario_entries();
        let query = LogQuery {
            symbol: Some("AAPL".into()),
            limit: Some(2),
            ..Default::default()
        };
        let found = query.apply(&entries);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].message, "settled");

        let warnings = LogQuery {
            min_level: Some(LogLevel::Warning),
            ..Default::default()
        };
        assert_eq!(warnings.apply(&entries).len(), 1);
    }

    #[test]
    fn test_summarize_jobs() {
        let mut entries = scenario_entries();
        entries.push(
            LogEntry::new(at(30), LogLevel::Error, "job2", "login failed")
                .with_event(JobEvent::JobFailed {
                    error: "auth".into(),
                }),
        );

        let summaries = summarize_jobs(&entries);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].job_id, "job2");
        assert_eq!(summaries[0].errors, 1);
        assert_eq!(summaries[0].status, Some(JobStatus::Failed));
        assert_eq!(summaries[1].status, Some(JobStatus::Partial));
        assert_eq!(summaries[1].entries, entries.len() - 1);
    }
}
