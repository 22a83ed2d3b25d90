//! 테스트용 인메모리 저장소.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{OhlcvStore, TableStats, TimeRange, WriteOutcome};
use crate::error::{DataError, Result};
use crate::export::OhlcvRow;
use crate::table::TableName;
use etf_core::Timeframe;

/// `time` 기본키 테이블을 BTreeMap으로 흉내 내는 저장소.
#[derive(Default)]
pub struct MemoryOhlcvStore {
    tables: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, (String, OhlcvRow)>>>,
    /// 남은 연결 실패 횟수
    unavailable: AtomicU32,
    /// 삭제 이후 단계에서 실패할 남은 쓰기 횟수
    write_failures: AtomicU32,
}

impl MemoryOhlcvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `n`번의 호출을 `ConnectionUnavailable`로 실패시킵니다.
    pub fn fail_next(&self, n: u32) {
        self.unavailable.store(n, Ordering::SeqCst);
    }

    /// 다음 `n`번의 쓰기를 구간 삭제 뒤, UPSERT 도중에 실패시킵니다.
    pub fn fail_next_write(&self, n: u32) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    /// 테이블의 모든 행 (시간순).
    pub async fn rows(&self, table: &TableName) -> Vec<OhlcvRow> {
        self.tables
            .lock()
            .await
            .get(&table.name())
            .map(|rows| rows.values().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default()
    }

    /// 행에 기록된 timeframe 태그 목록.
    pub async fn timeframe_tags(&self, table: &TableName) -> Vec<String> {
        self.tables
            .lock()
            .await
            .get(&table.name())
            .map(|rows| rows.values().map(|(tag, _)| tag.clone()).collect())
            .unwrap_or_default()
    }

    /// 테이블에 행을 직접 넣습니다 (검증 테스트용).
    pub async fn insert_raw(&self, table: &TableName, rows: Vec<OhlcvRow>) {
        let mut tables = self.tables.lock().await;
        let entry = tables.entry(table.name()).or_default();
        for row in rows {
            entry.insert(row.time, (String::new(), row));
        }
    }

    fn check_available(&self) -> Result<()> {
        let remaining = self.unavailable.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable.store(remaining - 1, Ordering::SeqCst);
            return Err(DataError::ConnectionUnavailable(
                "인메모리 저장소 연결 실패 (주입)".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OhlcvStore for MemoryOhlcvStore {
    async fn ensure_table(&self, table: &TableName) -> Result<()> {
        self.check_available()?;
        self.tables.lock().await.entry(table.name()).or_default();
        Ok(())
    }

    async fn write_rows(
        &self,
        table: &TableName,
        timeframe: Timeframe,
        rows: &[OhlcvRow],
        replace: Option<TimeRange>,
    ) -> Result<WriteOutcome> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let current = tables
            .get(&table.name())
            .ok_or_else(|| DataError::Query(format!("테이블 없음: {}", table)))?;

        // 사본에 적용한 뒤 성공했을 때만 교체
        let mut staged = current.clone();
        let mut outcome = WriteOutcome::default();
        if let Some(range) = replace {
            let before = staged.len();
            staged.retain(|time, _| *time < range.from || *time > range.to);
            outcome.deleted = (before - staged.len()) as u64;
        }

        let remaining = self.write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.write_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DataError::ConnectionUnavailable(
                "인메모리 저장소 쓰기 중 연결 끊김 (주입)".to_string(),
            ));
        }

        for row in rows {
            staged.insert(row.time, (timeframe.label().to_string(), row.clone()));
        }
        outcome.upserted = rows.len() as u64;
        tables.insert(table.name(), staged);
        Ok(outcome)
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        self.check_available()?;
        Ok(self.tables.lock().await.contains_key(&table.name()))
    }

    async fn count_rows(&self, table: &TableName) -> Result<u64> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .await
            .get(&table.name())
            .map(|rows| rows.len() as u64)
            .unwrap_or(0))
    }

    async fn table_stats(&self, table: &TableName) -> Result<TableStats> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let Some(entry) = tables.get(&table.name()) else {
            return Err(DataError::Query(format!("테이블 없음: {}", table)));
        };

        let mut stats = TableStats {
            rows: entry.len() as u64,
            distinct_times: entry.len() as u64,
            first_time: entry.keys().next().copied(),
            last_time: entry.keys().next_back().copied(),
            ..Default::default()
        };
        for (_, row) in entry.values() {
            stats.null_open += u64::from(row.open.is_none());
            stats.null_high += u64::from(row.high.is_none());
            stats.null_low += u64::from(row.low.is_none());
            stats.null_close += u64::from(row.close.is_none());
            stats.null_volume += u64::from(row.volume.is_none());
            let prices = [row.open, row.high, row.low, row.close];
            stats.nonpositive_prices += u64::from(prices.iter().flatten().any(|p| *p <= 0.0));
        }
        Ok(stats)
    }

    async fn recent_rows(&self, table: &TableName, limit: usize) -> Result<Vec<OhlcvRow>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let Some(entry) = tables.get(&table.name()) else {
            return Ok(Vec::new());
        };
        let skip = entry.len().saturating_sub(limit);
        Ok(entry.values().skip(skip).map(|(_, row)| row.clone()).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
