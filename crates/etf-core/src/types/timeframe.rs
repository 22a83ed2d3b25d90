//! 차트 내보내기 타임프레임 정의.
//!
//! 타임프레임은 차트 화면의 조회 범위(예: `12개월`, `1일`)이며,
//! 범위마다 내보내기 CSV의 봉 간격과 저장 테이블 접미사가 정해집니다.
//!
//! | 범위 | 봉 간격 | 테이블 접미사 |
//! |------|---------|---------------|
//! | 12개월 | 일봉 | `D` |
//! | 1개월 | 일봉 | `D` |
//! | 1주 | 일봉 | `D` |
//! | 1일 | 1시간봉 | `1h` |
//! | 1시간 | 10분봉 | `10m` |
//! | 10분 | 1분봉 | `1m` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 차트 조회 범위.
///
/// 선언 순서가 긴 범위 → 짧은 범위 순서이며 `Ord`도 이 순서를 따릅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 12개월
    #[serde(rename = "12개월")]
    Year1,
    /// 1개월
    #[serde(rename = "1개월")]
    Month1,
    /// 1주
    #[serde(rename = "1주")]
    Week1,
    /// 1일
    #[serde(rename = "1일")]
    Day1,
    /// 1시간
    #[serde(rename = "1시간")]
    Hour1,
    /// 10분
    #[serde(rename = "10분")]
    Min10,
}

impl Timeframe {
    /// 모든 타임프레임 (긴 범위 → 짧은 범위).
    pub const ALL: [Timeframe; 6] = [
        Timeframe::Year1,
        Timeframe::Month1,
        Timeframe::Week1,
        Timeframe::Day1,
        Timeframe::Hour1,
        Timeframe::Min10,
    ];

    /// 작업 문서와 로그에 쓰이는 표시 이름.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Year1 => "12개월",
            Timeframe::Month1 => "1개월",
            Timeframe::Week1 => "1주",
            Timeframe::Day1 => "1일",
            Timeframe::Hour1 => "1시간",
            Timeframe::Min10 => "10분",
        }
    }

    /// 내보내기 요청의 조회 범위 코드.
    pub fn range_code(&self) -> &'static str {
        match self {
            Timeframe::Year1 => "12M",
            Timeframe::Month1 => "1M",
            Timeframe::Week1 => "1W",
            Timeframe::Day1 => "1D",
            Timeframe::Hour1 => "1H",
            Timeframe::Min10 => "10m",
        }
    }

    /// 내보내기 CSV의 봉 간격 코드.
    pub fn bar_interval(&self) -> &'static str {
        match self {
            Timeframe::Year1 | Timeframe::Month1 | Timeframe::Week1 => "1D",
            Timeframe::Day1 => "60",
            Timeframe::Hour1 => "10",
            Timeframe::Min10 => "1",
        }
    }

    /// 저장 테이블 접미사 (`{SYMBOL}_{suffix}`).
    pub fn table_suffix(&self) -> &'static str {
        match self {
            Timeframe::Year1 | Timeframe::Month1 | Timeframe::Week1 => "D",
            Timeframe::Day1 => "1h",
            Timeframe::Hour1 => "10m",
            Timeframe::Min10 => "1m",
        }
    }

    /// 조회 범위의 길이 (분 단위).
    pub fn span_minutes(&self) -> u64 {
        match self {
            Timeframe::Year1 => 365 * 24 * 60,
            Timeframe::Month1 => 30 * 24 * 60,
            Timeframe::Week1 => 7 * 24 * 60,
            Timeframe::Day1 => 24 * 60,
            Timeframe::Hour1 => 60,
            Timeframe::Min10 => 10,
        }
    }

    /// 긴 범위 → 짧은 범위로 정렬하고 중복을 제거합니다.
    pub fn coarse_to_fine(timeframes: &[Timeframe]) -> Vec<Timeframe> {
        let mut sorted = timeframes.to_vec();
        sorted.sort_by(|a, b| b.span_minutes().cmp(&a.span_minutes()));
        sorted.dedup();
        sorted
    }

    /// 쉼표로 구분된 타임프레임 목록을 파싱합니다.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, CoreError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    /// 표시 이름 또는 범위 코드에서 파싱합니다.
    pub fn from_label(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.label() == s || tf.range_code() == s)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s.trim()).ok_or_else(|| CoreError::InvalidTimeframe(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_labels_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
            assert_eq!(tf.range_code().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("1년".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_table_suffix() {
        assert_eq!(Timeframe::Year1.table_suffix(), "D");
        assert_eq!(Timeframe::Week1.table_suffix(), "D");
        assert_eq!(Timeframe::Day1.table_suffix(), "1h");
        assert_eq!(Timeframe::Hour1.table_suffix(), "10m");
        assert_eq!(Timeframe::Min10.table_suffix(), "1m");
    }

    #[test]
    fn test_coarse_to_fine_order() {
        let ordered = Timeframe::coarse_to_fine(&[
            Timeframe::Day1,
            Timeframe::Min10,
            Timeframe::Week1,
            Timeframe::Day1,
            Timeframe::Year1,
        ]);
        assert_eq!(
            ordered,
            vec![Timeframe::Year1, Timeframe::Week1, Timeframe::Day1, Timeframe::Min10]
        );
        assert_eq!(Timeframe::coarse_to_fine(&Timeframe::ALL), Timeframe::ALL.to_vec());
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&Timeframe::Day1).unwrap();
        assert_eq!(json, "\"1일\"");
        let tf: Timeframe = serde_json::from_str("\"1주\"").unwrap();
        assert_eq!(tf, Timeframe::Week1);
    }

    #[test]
    fn test_parse_list() {
        let list = Timeframe::parse_list("1일, 1주").unwrap();
        assert_eq!(list, vec![Timeframe::Day1, Timeframe::Week1]);
    }
}
