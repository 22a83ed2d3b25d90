//! OHLCV 테이블 저장소.
//!
//! 업로드 서비스와 검증기는 [`OhlcvStore`] 트레이트만 사용하므로 테스트에서는
//! 인메모리 구현으로 교체할 수 있습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::export::OhlcvRow;
use crate::table::TableName;
use etf_core::Timeframe;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryOhlcvStore;
pub use postgres::{DatabaseConfig, PgOhlcvStore};

/// 테이블 통계 (검증용).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub rows: u64,
    pub distinct_times: u64,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub null_open: u64,
    pub null_high: u64,
    pub null_low: u64,
    pub null_close: u64,
    pub null_volume: u64,
    /// 시가/고가/저가/종가 중 0 이하 값이 있는 행 수
    pub nonpositive_prices: u64,
}

impl TableStats {
    /// 중복 시간 수.
    pub fn duplicate_times(&self) -> u64 {
        self.rows.saturating_sub(self.distinct_times)
    }

    /// OHLCV 컬럼별 NULL 비율 중 최댓값 (0.0 ~ 1.0).
    pub fn null_ratio(&self) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        let worst = [
            self.null_open,
            self.null_high,
            self.null_low,
            self.null_close,
            self.null_volume,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        worst as f64 / self.rows as f64
    }
}

/// 삭제 구간 `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// 쓰기 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub deleted: u64,
    pub upserted: u64,
}

/// OHLCV 테이블 저장소.
#[async_trait]
pub trait OhlcvStore: Send + Sync {
    /// 테이블이 없으면 생성하고, 있으면 스키마를 확인합니다.
    ///
    /// 기존 테이블에 필요한 컬럼이 없으면 `SchemaMismatch`.
    async fn ensure_table(&self, table: &TableName) -> Result<()>;

    /// 행을 `time` 기준으로 UPSERT합니다.
    ///
    /// `replace`가 주어지면 그 구간을 먼저 지웁니다. 삭제와 모든 청크는 한
    /// 트랜잭션이므로 도중에 실패하면 기존 행은 그대로 남습니다.
    async fn write_rows(
        &self,
        table: &TableName,
        timeframe: Timeframe,
        rows: &[OhlcvRow],
        replace: Option<TimeRange>,
    ) -> Result<WriteOutcome>;

    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    async fn count_rows(&self, table: &TableName) -> Result<u64>;

    async fn table_stats(&self, table: &TableName) -> Result<TableStats>;

    /// 최근 `limit`개 행을 시간 오름차순으로 반환합니다.
    async fn recent_rows(&self, table: &TableName, limit: usize) -> Result<Vec<OhlcvRow>>;

    /// 연결 확인.
    async fn ping(&self) -> Result<()>;
}

/// 정상 테이블 스키마의 컬럼.
pub const EXPECTED_COLUMNS: [&str; 10] = [
    "time",
    "symbol",
    "timeframe",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "rsi",
    "macd",
];
