//! 실행 통계 구조체.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 작업/재시도 실행 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// 처리한 단위 수
    pub units: usize,
    /// 성공 단위 수
    pub succeeded: usize,
    /// 실패 단위 수
    pub failed: usize,
    /// 전체 시도 횟수 (재시도 포함)
    pub attempts: usize,
    /// 업로드한 총 행 수
    pub rows: u64,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, rows: u64) {
        self.units += 1;
        self.succeeded += 1;
        self.rows += rows;
    }

    pub fn record_failure(&mut self) {
        self.units += 1;
        self.failed += 1;
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.units == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.units as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            units = self.units,
            succeeded = self.succeeded,
            failed = self.failed,
            attempts = self.attempts,
            rows = self.rows,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "실행 완료"
        );
    }
}
