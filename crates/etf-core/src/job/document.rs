//! 작업 문서 (JobDocument) 모델.
//!
//! 작업 문서는 수집 파이프라인만 변경하며, 모니터링 측은 스냅샷만 읽습니다.
//! 모든 상태 변경은 이 모듈의 메서드를 통해서만 이루어지므로 집계 규칙과
//! 카운터 불변식(단조 증가, `total_rows == success 행 수 합계`)이 한 곳에서
//! 유지됩니다.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::status::{JobStatus, SymbolStatus, TimeframeStatus};
use crate::error::{CoreError, CoreResult};
use crate::types::{Symbol, Timeframe};

/// 한 번도 실행되지 않은 상태를 나타내는 작업 ID.
pub const INITIAL_JOB_ID: &str = "initial";

/// 단위 작업 (심볼, 타임프레임) 기록.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeframeRecord {
    pub status: TimeframeStatus,
    /// 마지막으로 성공한 업로드의 행 수
    pub rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// 현재 시도 번호 (1부터)
    #[serde(default)]
    pub attempts: u32,
}

/// 심볼 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    pub status: SymbolStatus,
    pub timeframes: IndexMap<Timeframe, TimeframeRecord>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolRecord {
    fn new(symbol: &str, timeframes: &[Timeframe]) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: SymbolStatus::Pending,
            timeframes: timeframes
                .iter()
                .map(|tf| (*tf, TimeframeRecord::default()))
                .collect(),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    /// 성공하지 않은 타임프레임 (재시도 대상).
    pub fn unfinished_timeframes(&self) -> Vec<Timeframe> {
        self.timeframes
            .iter()
            .filter(|(_, record)| record.status != TimeframeStatus::Success)
            .map(|(tf, _)| *tf)
            .collect()
    }

    /// 성공한 타임프레임의 행 수 합계.
    pub fn success_rows(&self) -> u64 {
        self.timeframes
            .values()
            .filter(|r| r.status == TimeframeStatus::Success)
            .map(|r| r.rows)
            .sum()
    }

    /// 타임프레임 상태로 심볼 상태를 다시 계산합니다.
    fn settle(&mut self, now: DateTime<Utc>) -> SymbolStatus {
        let status = SymbolStatus::aggregate(self.timeframes.values().map(|r| r.status));
        self.status = status;
        self.error = self.failure_summary();
        if status.is_terminal() {
            self.end_time = Some(now);
        }
        status
    }

    /// 진행 중이던 단위를 실패로 닫습니다. 닫을 것이 있었으면 `true`.
    fn abort_in_flight(&mut self, error: &str, now: DateTime<Utc>) -> bool {
        let mut touched = matches!(
            self.status,
            SymbolStatus::Downloading | SymbolStatus::Uploading
        );
        for unit in self.timeframes.values_mut() {
            if unit.status == TimeframeStatus::Downloading {
                unit.status = TimeframeStatus::Failed;
                unit.error = Some(error.to_string());
                touched = true;
            }
        }
        if touched {
            self.settle(now);
        }
        touched
    }

    fn failure_summary(&self) -> Option<String> {
        let errors: Vec<String> = self
            .timeframes
            .iter()
            .filter_map(|(tf, r)| r.error.as_ref().map(|e| format!("{}: {}", tf, e)))
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}

/// 외부 요청으로 생성되는 범위 재시도 작업.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryTask {
    pub retry_id: String,
    pub parent_job_id: String,
    pub symbols: Vec<String>,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// 단위 작업 상태 변경 요청.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitUpdate {
    /// 다운로드 시도 시작
    Downloading { attempt: u32 },
    /// 다운로드 완료 (업로드 전)
    Downloaded { rows: u64 },
    /// 업로드 시작
    Uploading,
    /// 업로드 성공
    Succeeded { rows: u64 },
    /// 시도 실패 (재시도 예산 소진)
    Failed { error: String },
}

impl UnitUpdate {
    /// 결과 타임프레임 상태.
    pub fn target_status(&self) -> TimeframeStatus {
        match self {
            UnitUpdate::Downloading { .. } | UnitUpdate::Downloaded { .. } | UnitUpdate::Uploading => {
                TimeframeStatus::Downloading
            }
            UnitUpdate::Succeeded { .. } => TimeframeStatus::Success,
            UnitUpdate::Failed { .. } => TimeframeStatus::Failed,
        }
    }
}

/// 작업 진행률.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 종료 상태에 도달한 단위 수
    pub current: usize,
    /// 전체 단위 수
    pub total: usize,
}

/// 작업 문서.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub job_id: String,
    pub status: JobStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_symbol: Option<String>,
    pub current_timeframe: Option<Timeframe>,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub total_rows: u64,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub symbols: IndexMap<String, SymbolRecord>,
    #[serde(default)]
    pub retry_tasks: Vec<RetryTask>,
    pub updated_at: DateTime<Utc>,
}

impl JobDocument {
    /// 한 번도 실행되지 않은 초기 문서.
    pub fn initial() -> Self {
        Self {
            job_id: INITIAL_JOB_ID.to_string(),
            status: JobStatus::Idle,
            start_time: None,
            end_time: None,
            current_symbol: None,
            current_timeframe: None,
            total_downloaded: 0,
            total_uploaded: 0,
            total_rows: 0,
            cancelled: false,
            error: None,
            symbols: IndexMap::new(),
            retry_tasks: Vec::new(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// 전체 수집 작업 ID (`full_YYYYMMDD_HHMMSS`).
    pub fn full_job_id(now: DateTime<Utc>) -> String {
        format!("full_{}", now.format("%Y%m%d_%H%M%S"))
    }

    /// 새 작업 문서를 생성합니다. 모든 단위는 `pending`입니다.
    ///
    /// 타임프레임은 긴 범위 → 짧은 범위 순서로 정렬됩니다.
    pub fn new(
        job_id: impl Into<String>,
        symbols: &[Symbol],
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Self {
        let ordered = Timeframe::coarse_to_fine(timeframes);
        let mut records = IndexMap::with_capacity(symbols.len());
        for symbol in symbols {
            records
                .entry(symbol.as_str().to_string())
                .or_insert_with(|| SymbolRecord::new(symbol.as_str(), &ordered));
        }

        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            symbols: records,
            updated_at: now,
            ..Self::initial()
        }
    }

    pub fn is_initial(&self) -> bool {
        self.job_id == INITIAL_JOB_ID
    }

    /// 작업 또는 재시도가 진행 중인지 여부.
    pub fn is_active(&self) -> bool {
        self.status.is_active() || self.active_retry().is_some()
    }

    /// 진행 중인 재시도 작업.
    pub fn active_retry(&self) -> Option<&RetryTask> {
        self.retry_tasks.iter().find(|t| t.status.is_active())
    }

    fn transition(&mut self, next: JobStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidJobTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// pending → running.
    pub fn begin(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(JobStatus::Running)?;
        self.start_time = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// 단위 작업 상태를 갱신합니다.
    ///
    /// 이미 `success`인 단위는 변경할 수 없고, 다운로드 이후 단계는
    /// `downloading` 상태에서만 허용됩니다.
    pub fn apply(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        update: &UnitUpdate,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let record = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| CoreError::UnknownSymbol(symbol.to_string()))?;
        let unit = record
            .timeframes
            .get_mut(&timeframe)
            .ok_or_else(|| CoreError::InvalidTimeframe(timeframe.to_string()))?;

        let from = unit.status;
        let allowed = match update {
            UnitUpdate::Downloading { .. } => from != TimeframeStatus::Success,
            UnitUpdate::Downloaded { .. } | UnitUpdate::Uploading | UnitUpdate::Succeeded { .. } => {
                from == TimeframeStatus::Downloading
            }
            UnitUpdate::Failed { .. } => from != TimeframeStatus::Success,
        };
        if !allowed {
            return Err(CoreError::InvalidUnitTransition {
                symbol: symbol.to_string(),
                timeframe,
                from,
                to: update.target_status(),
            });
        }

        match update {
            UnitUpdate::Downloading { attempt } => {
                unit.status = TimeframeStatus::Downloading;
                unit.attempts = *attempt;
                unit.error = None;
                record.status = SymbolStatus::Downloading;
                if record.start_time.is_none() || record.end_time.is_some() {
                    record.start_time = Some(now);
                    record.end_time = None;
                }
                self.current_symbol = Some(symbol.to_string());
                self.current_timeframe = Some(timeframe);
            }
            UnitUpdate::Downloaded { .. } => {
                unit.downloaded_at = Some(now);
                self.total_downloaded += 1;
            }
            UnitUpdate::Uploading => {
                record.status = SymbolStatus::Uploading;
            }
            UnitUpdate::Succeeded { rows } => {
                unit.status = TimeframeStatus::Success;
                unit.rows = *rows;
                unit.error = None;
                unit.uploaded_at = Some(now);
                self.total_uploaded += 1;
            }
            UnitUpdate::Failed { error } => {
                unit.status = TimeframeStatus::Failed;
                unit.error = Some(error.clone());
            }
        }

        self.recompute_totals();
        self.updated_at = now;
        Ok(())
    }

    /// 심볼의 모든 단위 처리 후 심볼 상태를 확정합니다.
    pub fn settle_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> CoreResult<SymbolStatus> {
        let record = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| CoreError::UnknownSymbol(symbol.to_string()))?;

        let status = record.settle(now);
        self.updated_at = now;
        Ok(status)
    }

    /// 작업을 종료 상태로 전환합니다.
    ///
    /// 중단된 작업은 성공한 단위 유무로 `partial`/`failed`가 결정되며,
    /// 도달하지 못한 심볼은 `pending`으로 남습니다.
    pub fn finalize(&mut self, now: DateTime<Utc>, cancelled: bool) -> CoreResult<JobStatus> {
        let next = if cancelled {
            JobStatus::for_cancelled(self.any_success())
        } else {
            JobStatus::aggregate(self.symbols.values().map(|r| r.status))
        };
        self.transition(next)?;
        self.cancelled = cancelled;
        self.end_time = Some(now);
        self.current_symbol = None;
        self.current_timeframe = None;
        self.updated_at = now;
        Ok(next)
    }

    /// 치명적 오류(인증 실패, 비정상 종료)로 작업을 실패 처리합니다.
    ///
    /// 진행 중이던 단위는 같은 오류로 `failed`가 되고 해당 심볼 상태도
    /// 다시 계산됩니다.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.abort_in_flight(&error, now);
        self.error = Some(error);
        self.end_time = Some(now);
        self.current_symbol = None;
        self.current_timeframe = None;
        self.updated_at = now;
        Ok(())
    }

    /// 재시도 작업을 등록합니다.
    ///
    /// 상위 작업의 상태는 변경하지 않습니다.
    pub fn start_retry(
        &mut self,
        symbols: &[Symbol],
        now: DateTime<Utc>,
    ) -> CoreResult<&RetryTask> {
        if self.is_initial() {
            return Err(CoreError::NoParentJob);
        }
        if self.is_active() {
            return Err(CoreError::JobActive(self.job_id.clone()));
        }
        if let Some(unknown) = symbols.iter().find(|s| !self.symbols.contains_key(s.as_str())) {
            return Err(CoreError::UnknownSymbol(unknown.to_string()));
        }

        let mut names: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if !names.iter().any(|n| n == symbol.as_str()) {
                names.push(symbol.as_str().to_string());
            }
        }

        let retry_id = format!(
            "retry_{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            self.retry_tasks.len() + 1
        );
        self.retry_tasks.push(RetryTask {
            retry_id,
            parent_job_id: self.job_id.clone(),
            symbols: names,
            status: JobStatus::Running,
            start_time: now,
            end_time: None,
        });
        self.updated_at = now;

        let index = self.retry_tasks.len() - 1;
        Ok(&self.retry_tasks[index])
    }

    /// 재시도 작업을 종료합니다. 상태는 대상 심볼의 상태로 결정됩니다.
    pub fn finish_retry(
        &mut self,
        retry_id: &str,
        now: DateTime<Utc>,
        cancelled: bool,
    ) -> CoreResult<JobStatus> {
        let index = self
            .retry_tasks
            .iter()
            .position(|t| t.retry_id == retry_id)
            .ok_or_else(|| CoreError::RetryNotFound(retry_id.to_string()))?;

        let symbols = self.retry_tasks[index].symbols.clone();
        let status = if cancelled {
            let any_success = symbols
                .iter()
                .filter_map(|s| self.symbols.get(s))
                .any(|r| r.status == SymbolStatus::Completed || r.status == SymbolStatus::Partial);
            JobStatus::for_cancelled(any_success)
        } else {
            JobStatus::aggregate(
                symbols
                    .iter()
                    .filter_map(|s| self.symbols.get(s))
                    .map(|r| r.status),
            )
        };

        let task = &mut self.retry_tasks[index];
        if !task.status.can_transition_to(status) {
            return Err(CoreError::InvalidJobTransition {
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        task.end_time = Some(now);
        self.current_symbol = None;
        self.current_timeframe = None;
        self.updated_at = now;
        Ok(status)
    }

    /// 진행 중인 재시도를 실패 처리합니다. 진행 중이던 단위도 닫습니다.
    pub fn fail_retry(&mut self, retry_id: &str, error: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let task = self
            .retry_tasks
            .iter_mut()
            .find(|t| t.retry_id == retry_id)
            .ok_or_else(|| CoreError::RetryNotFound(retry_id.to_string()))?;
        if !task.status.can_transition_to(JobStatus::Failed) {
            return Err(CoreError::InvalidJobTransition {
                from: task.status,
                to: JobStatus::Failed,
            });
        }
        task.status = JobStatus::Failed;
        task.end_time = Some(now);
        self.abort_in_flight(error, now);
        self.current_symbol = None;
        self.current_timeframe = None;
        self.updated_at = now;
        Ok(())
    }

    fn abort_in_flight(&mut self, error: &str, now: DateTime<Utc>) {
        for record in self.symbols.values_mut() {
            record.abort_in_flight(error, now);
        }
    }

    /// `total_rows`를 성공 단위 행 수 합계로 다시 계산합니다.
    pub fn recompute_totals(&mut self) {
        self.total_rows = self.symbols.values().map(SymbolRecord::success_rows).sum();
    }

    /// 성공한 단위가 하나라도 있는지 여부.
    pub fn any_success(&self) -> bool {
        self.symbols
            .values()
            .flat_map(|r| r.timeframes.values())
            .any(|r| r.status == TimeframeStatus::Success)
    }

    /// 종료 상태에 도달한 단위 수 / 전체 단위 수.
    pub fn progress(&self) -> Progress {
        let units = self.symbols.values().flat_map(|r| r.timeframes.values());
        let (mut current, mut total) = (0, 0);
        for unit in units {
            total += 1;
            if unit.status.is_terminal() {
                current += 1;
            }
        }
        Progress { current, total }
    }

    /// 실패한 단위의 `"SYMBOL/timeframe: error"` 목록.
    pub fn unit_errors(&self) -> Vec<String> {
        self.symbols
            .values()
            .flat_map(|record| {
                record.timeframes.iter().filter_map(move |(tf, unit)| {
                    match (unit.status, unit.error.as_ref()) {
                        (TimeframeStatus::Failed, Some(error)) => {
                            Some(format!("{}/{}: {}", record.symbol, tf, error))
                        }
                        _ => None,
                    }
                })
            })
            .collect()
    }

    /// 완료되지 않은 심볼 목록 (재시도 후보).
    pub fn failed_symbols(&self) -> Vec<String> {
        self.symbols
            .values()
            .filter(|r| matches!(r.status, SymbolStatus::Partial | SymbolStatus::Failed))
            .map(|r| r.symbol.clone())
            .collect()
    }
}

impl Default for JobDocument {
    fn default() -> Self {
        Self::initial()
    }
}
