//! 작업/심볼/타임프레임 상태 열거형과 집계 규칙.
//!
//! 모든 상태는 닫힌 열거형이며 JSON 문자열과의 매핑은 `as_str`에서
//! 한 번만 정의됩니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 작업(및 재시도 작업) 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 생성됨, 아직 시작 전
    Pending,
    /// 실행 중
    Running,
    /// 모든 심볼 완료
    Completed,
    /// 일부 심볼만 완료
    Partial,
    /// 완료된 심볼 없음
    Failed,
    /// 한 번도 실행되지 않은 초기 문서
    Idle,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Idle => "idle",
        }
    }

    /// 종료 상태 여부.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }

    /// 진행 중(pending/running) 여부.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// 상태 전이 가능 여부.
    ///
    /// 전이는 pending → running → {completed, partial, failed} 방향으로만
    /// 허용됩니다. pending에서 바로 failed로 가는 것은 시작 전 실패입니다.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Idle, JobStatus::Pending) => true,
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// 심볼 상태 목록으로 작업의 최종 상태를 계산합니다.
    ///
    /// - 모든 심볼 completed → `Completed`
    /// - 하나 이상 completed → `Partial`
    /// - completed 없음 → `Failed`
    pub fn aggregate<I>(symbols: I) -> JobStatus
    where
        I: IntoIterator<Item = SymbolStatus>,
    {
        let mut total = 0usize;
        let mut completed = 0usize;
        for status in symbols {
            total += 1;
            if status == SymbolStatus::Completed {
                completed += 1;
            }
        }

        if completed == total {
            JobStatus::Completed
        } else if completed > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        }
    }

    /// 중단된 작업의 최종 상태.
    ///
    /// 성공한 단위가 하나라도 있으면 `Partial`, 없으면 `Failed`입니다.
    pub fn for_cancelled(any_success: bool) -> JobStatus {
        if any_success {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        }
    }

    /// CLI 종료 코드 (completed 0, partial 2, 그 외 1).
    pub fn exit_code(&self) -> i32 {
        match self {
            JobStatus::Completed => 0,
            JobStatus::Partial => 2,
            _ => 1,
        }
    }
}

/// 심볼 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolStatus {
    Pending,
    Downloading,
    Uploading,
    Completed,
    Partial,
    Failed,
}

impl SymbolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolStatus::Pending => "pending",
            SymbolStatus::Downloading => "downloading",
            SymbolStatus::Uploading => "uploading",
            SymbolStatus::Completed => "completed",
            SymbolStatus::Partial => "partial",
            SymbolStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SymbolStatus::Completed | SymbolStatus::Partial | SymbolStatus::Failed
        )
    }

    /// 타임프레임 상태 목록으로 심볼 상태를 계산합니다.
    ///
    /// - 모두 success → `Completed`
    /// - success가 있고 나머지가 있음 → `Partial`
    /// - success 없이 failed가 있음 → `Failed`
    /// - 그 외 (모두 미시작) → `Pending`
    pub fn aggregate<I>(timeframes: I) -> SymbolStatus
    where
        I: IntoIterator<Item = TimeframeStatus>,
    {
        let (mut success, mut failed, mut other) = (0usize, 0usize, 0usize);
        for status in timeframes {
            match status {
                TimeframeStatus::Success => success += 1,
                TimeframeStatus::Failed => failed += 1,
                TimeframeStatus::Pending | TimeframeStatus::Downloading => other += 1,
            }
        }

        if failed == 0 && other == 0 {
            SymbolStatus::Completed
        } else if success > 0 {
            SymbolStatus::Partial
        } else if failed > 0 {
            SymbolStatus::Failed
        } else {
            SymbolStatus::Pending
        }
    }
}

/// 타임프레임(단위 작업) 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeStatus {
    #[default]
    Pending,
    Downloading,
    Success,
    Failed,
}

impl TimeframeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeframeStatus::Pending => "pending",
            TimeframeStatus::Downloading => "downloading",
            TimeframeStatus::Success => "success",
            TimeframeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TimeframeStatus::Success | TimeframeStatus::Failed)
    }
}

macro_rules! impl_status_text {
    ($ty:ty, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.trim().to_lowercase();
                $(
                    if lowered == <$ty>::$variant.as_str() {
                        return Ok(<$ty>::$variant);
                    }
                )+
                Err(format!("알 수 없는 상태: {}", s))
            }
        }
    };
}

impl_status_text!(
    JobStatus,
    [Pending, Running, Completed, Partial, Failed, Idle]
);
impl_status_text!(
    SymbolStatus,
    [Pending, Downloading, Uploading, Completed, Partial, Failed]
);
impl_status_text!(TimeframeStatus, [Pending, Downloading, Success, Failed]);
