//! 업로드된 테이블 데이터 검증.
//!
//! 테이블마다 다음을 확인합니다:
//! - 존재 여부와 행 존재
//! - 최신성: 마지막 `time`이 어제 이후
//! - OHLCV 컬럼 NULL 비율
//! - 중복 시간
//! - 가격 이상치: 0 이하 가격, 최근 구간의 급격한 종가 변동
//!
//! 실패한 테이블은 심볼로 되돌려 범위 재시도 대상으로 사용합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::DataError;
use crate::export::OhlcvRow;
use crate::storage::{OhlcvStore, TableStats};
use crate::table::TableName;
use etf_core::{Symbol, Timeframe};

/// 검증 오류.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// 검증에 실패한 테이블이 있음
    #[error("검증 실패: {failed}/{total} 테이블")]
    Failed { failed: usize, total: usize },

    /// 저장소 오류
    #[error("저장소 오류: {0}")]
    Store(#[from] DataError),

    /// 보고서 저장 오류
    #[error("보고서 저장 실패: {0}")]
    Report(#[from] etf_core::CoreError),
}

/// 검증 기준값.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// 허용 NULL 비율
    pub max_null_ratio: f64,
    /// 허용 종가 변동 비율
    pub max_price_change: f64,
    /// 변동 검사 대상 최근 행 수
    pub recent_rows: usize,
    /// 마지막 데이터가 오늘부터 며칠 전까지 허용되는지
    pub max_age_days: i64,
    /// 검사할 타임프레임 (테이블 접미사 기준으로 중복 제거)
    pub timeframes: Vec<Timeframe>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_null_ratio: 0.05,
            max_price_change: 0.5,
            recent_rows: 1000,
            max_age_days: 1,
            timeframes: vec![Timeframe::Year1, Timeframe::Day1],
        }
    }
}

/// 개별 검사 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    fn new(passed: bool, message: impl Into<String>) -> Self {
        Self {
            passed,
            message: message.into(),
        }
    }
}

/// 테이블 검사 결과 묶음.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChecks {
    pub recent_data: CheckResult,
    pub null_values: CheckResult,
    pub duplicates: CheckResult,
    pub price_anomalies: CheckResult,
}

impl TableChecks {
    pub fn all_passed(&self) -> bool {
        self.recent_data.passed
            && self.null_values.passed
            && self.duplicates.passed
            && self.price_anomalies.passed
    }
}

/// 테이블 검증 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableStatus {
    Passed,
    Failed,
    /// 테이블이 없거나 조회 중 오류
    Error,
}

/// 테이블 하나의 검증 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub symbol: String,
    pub exists: bool,
    pub row_count: u64,
    pub status: TableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<TableChecks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 검증 요약.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_tables: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub pass_rate: f64,
    pub fail_rate: f64,
    pub error_rate: f64,
}

/// 검증 보고서.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: DateTime<Utc>,
    pub summary: ValidationSummary,
    pub tables: BTreeMap<String, TableReport>,
    pub failed_tables: Vec<String>,
}

impl ValidationReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            summary: ValidationSummary::default(),
            tables: BTreeMap::new(),
            failed_tables: Vec::new(),
        }
    }

    fn record(&mut self, table: String, report: TableReport) {
        self.summary.total_tables += 1;
        match report.status {
            TableStatus::Passed => self.summary.passed += 1,
            TableStatus::Failed => {
                self.summary.failed += 1;
                self.failed_tables.push(table.clone());
            }
            TableStatus::Error => {
                self.summary.errors += 1;
                self.failed_tables.push(table.clone());
            }
        }
        self.tables.insert(table, report);
    }

    fn finish(&mut self) {
        let total = self.summary.total_tables;
        if total > 0 {
            let rate = |n: usize| n as f64 / total as f64;
            self.summary.pass_rate = rate(self.summary.passed);
            self.summary.fail_rate = rate(self.summary.failed);
            self.summary.error_rate = rate(self.summary.errors);
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed_tables.is_empty()
    }

    /// 실패/오류 테이블의 심볼 (중복 제거, 보고서 순서).
    pub fn failed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for table in &self.failed_tables {
            if let Some(report) = self.tables.get(table) {
                if !symbols.contains(&report.symbol) {
                    symbols.push(report.symbol.clone());
                }
            }
        }
        symbols
    }

    /// 실패한 테이블이 있으면 `ValidationError::Failed`.
    pub fn ensure_passed(&self) -> Result<(), ValidationError> {
        if self.all_passed() {
            Ok(())
        } else {
            Err(ValidationError::Failed {
                failed: self.failed_tables.len(),
                total: self.summary.total_tables,
            })
        }
    }

    /// `validation_report_YYYYMMDD_HHMMSS.json`으로 저장하고 경로를 반환합니다.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ValidationError> {
        let path = dir.join(format!(
            "validation_report_{}.json",
            self.timestamp.format("%Y%m%d_%H%M%S")
        ));
        etf_core::write_json_atomic(&path, self)?;
        Ok(path)
    }
}

/// 최신성 검사: 마지막 데이터 날짜가 `today - max_age_days` 이후인지.
pub fn check_recent(last_time: Option<DateTime<Utc>>, today: NaiveDate, max_age_days: i64) -> CheckResult {
    let Some(last) = last_time else {
        return CheckResult::new(false, "날짜 데이터 없음");
    };
    let latest = last.date_naive();
    let days_old = (today - latest).num_days();
    let passed = latest >= today - Duration::days(max_age_days);
    let message = if passed {
        format!("최신 데이터 있음 ({}, {}일 전)", latest, days_old)
    } else {
        format!("오래된 데이터 ({}, {}일 전)", latest, days_old)
    };
    CheckResult::new(passed, message)
}

/// NULL 비율 검사.
pub fn check_nulls(stats: &TableStats, max_ratio: f64) -> CheckResult {
    let ratio = stats.null_ratio();
    CheckResult::new(
        ratio <= max_ratio,
        format!("최대 NULL 비율: {:.2}% (기준 {:.2}%)", ratio * 100.0, max_ratio * 100.0),
    )
}

/// 중복 시간 검사.
pub fn check_duplicates(stats: &TableStats) -> CheckResult {
    let duplicates = stats.duplicate_times();
    CheckResult::new(duplicates == 0, format!("중복 시간 {}건", duplicates))
}

/// 가격 이상치 검사.
///
/// `recent`는 시간 오름차순이어야 합니다.
pub fn check_prices(nonpositive: u64, recent: &[OhlcvRow], max_change: f64) -> CheckResult {
    let closes: Vec<f64> = recent.iter().filter_map(|r| r.close).collect();
    let extreme = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && ((w[1] - w[0]) / w[0]).abs() > max_change)
        .count();

    let mut issues = Vec::new();
    if nonpositive > 0 {
        issues.push(format!("0 이하 가격 {}행", nonpositive));
    }
    if extreme > 0 {
        issues.push(format!("{:.0}% 초과 가격 변동 {}건", max_change * 100.0, extreme));
    }

    if issues.is_empty() {
        CheckResult::new(true, "가격 이상 없음")
    } else {
        CheckResult::new(false, issues.join(", "))
    }
}

/// 저장소 기반 검증기.
pub struct DataValidator {
    store: Arc<dyn OhlcvStore>,
    config: ValidationConfig,
}

impl DataValidator {
    pub fn new(store: Arc<dyn OhlcvStore>, config: ValidationConfig) -> Self {
        Self { store, config }
    }

    /// 심볼 목록의 모든 대상 테이블을 검증합니다.
    pub async fn validate(&self, symbols: &[Symbol], now: DateTime<Utc>) -> ValidationReport {
        let mut report = ValidationReport::new(now);
        let today = now.date_naive();

        for symbol in symbols {
            let mut tables: Vec<TableName> = self
                .config
                .timeframes
                .iter()
                .map(|tf| TableName::new(symbol, *tf))
                .collect();
            tables.dedup();

            for table in tables {
                let result = self.validate_table(&table, today).await;
                match result.status {
                    TableStatus::Passed => info!(table = %table, "검증 통과"),
                    _ => warn!(
                        table = %table,
                        status = ?result.status,
                        error = result.error.as_deref().unwrap_or(""),
                        "검증 실패"
                    ),
                }
                report.record(table.name(), result);
            }
        }

        report.finish();
        info!(
            total = report.summary.total_tables,
            passed = report.summary.passed,
            failed = report.summary.failed,
            errors = report.summary.errors,
            "데이터 검증 완료"
        );
        report
    }

    async fn validate_table(&self, table: &TableName, today: NaiveDate) -> TableReport {
        let mut report = TableReport {
            symbol: table.symbol().to_string(),
            exists: false,
            row_count: 0,
            status: TableStatus::Error,
            checks: None,
            error: None,
        };

        match self.run_checks(table, today, &mut report).await {
            Ok(()) => report,
            Err(e) => {
                report.status = TableStatus::Error;
                report.error = Some(e.to_string());
                report
            }
        }
    }

    async fn run_checks(
        &self,
        table: &TableName,
        today: NaiveDate,
        report: &mut TableReport,
    ) -> Result<(), DataError> {
        if !self.store.table_exists(table).await? {
            report.error = Some("테이블 없음".to_string());
            return Ok(());
        }
        report.exists = true;

        let stats = self.store.table_stats(table).await?;
        report.row_count = stats.rows;
        if stats.rows == 0 {
            report.status = TableStatus::Failed;
            report.error = Some("빈 테이블".to_string());
            return Ok(());
        }

        let recent = self.store.recent_rows(table, self.config.recent_rows).await?;
        let checks = TableChecks {
            recent_data: check_recent(stats.last_time, today, self.config.max_age_days),
            null_values: check_nulls(&stats, self.config.max_null_ratio),
            duplicates: check_duplicates(&stats),
            price_anomalies: check_prices(
                stats.nonpositive_prices,
                &recent,
                self.config.max_price_change,
            ),
        };
        report.status = if checks.all_passed() {
            TableStatus::Passed
        } else {
            TableStatus::Failed
        };
        report.checks = Some(checks);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(day: u32, close: Option<f64>) -> OhlcvRow {
        OhlcvRow {
            time: Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Some(100),
            rsi: None,
            macd: None,
        }
    }

    #[test]
    fn test_check_recent() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2025, 1, 9, 21, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2025, 1, 7, 21, 0, 0).unwrap();

        assert!(check_recent(Some(yesterday), today, 1).passed);
        assert!(!check_recent(Some(stale), today, 1).passed);
        assert!(!check_recent(None, today, 1).passed);
    }

    #[test]
    fn test_check_prices() {
        let calm = vec![row(1, Some(100.0)), row(2, Some(120.0)), row(3, Some(110.0))];
        assert!(check_prices(0, &calm, 0.5).passed);

        let spike = vec![row(1, Some(100.0)), row(2, Some(160.0))];
        assert!(!check_prices(0, &spike, 0.5).passed);

        assert!(!check_prices(2, &calm, 0.5).passed);
    }

    #[test]
    fn test_check_nulls_and_duplicates() {
        let stats = TableStats {
            rows: 100,
            distinct_times: 100,
            null_volume: 5,
            ..Default::default()
        };
        assert!(check_nulls(&stats, 0.05).passed);
        assert!(check_duplicates(&stats).passed);

        let bad = TableStats {
            rows: 100,
            distinct_times: 98,
            null_close: 6,
            ..Default::default()
        };
        assert!(!check_nulls(&bad, 0.05).passed);
        assert!(!check_duplicates(&bad).passed);
    }

    #[test]
    fn test_report_summary_and_failed_symbols() {
        let mut report = ValidationReport::new(Utc::now());
        let passed = TableReport {
            symbol: "AAPL".into(),
            exists: true,
            row_count: 10,
            status: TableStatus::Passed,
            checks: None,
            error: None,
        };
        let failed = TableReport {
            symbol: "NVDA".into(),
            status: TableStatus::Failed,
            ..passed.clone()
        };
        let missing = TableReport {
            symbol: "NVDA".into(),
            exists: false,
            status: TableStatus::Error,
            ..passed.clone()
        };
        report.record("AAPL_D".into(), passed);
        report.record("NVDA_D".into(), failed);
        report.record("NVDA_1h".into(), missing);
        report.finish();

        assert_eq!(report.summary.total_tables, 3);
        assert_eq!(report.summary.errors, 1);
        assert!((report.summary.pass_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.failed_symbols(), vec!["NVDA".to_string()]);
        assert!(matches!(
            report.ensure_passed(),
            Err(ValidationError::Failed { failed: 2, total: 3 })
        ));
    }
}
