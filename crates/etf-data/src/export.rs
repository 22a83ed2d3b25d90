//! 차트 내보내기 CSV 파싱.
//!
//! 내보내기 파일은 `time`(또는 `date`), `open`, `high`, `low`, `close` 컬럼이
//! 필수이고 `volume`, `rsi`, `macd`는 선택입니다. 헤더는 소문자로 정규화하며
//! 그 외 지표 컬럼은 무시합니다.
//!
//! 값 처리 규칙:
//! - 시간: 숫자면 Unix 초, 아니면 RFC 3339 또는 `%Y-%m-%d[ %H:%M:%S]` (UTC)
//! - 숫자로 읽을 수 없는 값은 NULL
//! - 시간이 없는 행은 버림
//! - 시간순 정렬 후 같은 시간은 마지막 행만 유지

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// 파싱된 OHLCV 행.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub time: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
}

/// 헤더에서 찾은 컬럼 위치.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportColumns {
    pub time: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: Option<usize>,
    pub rsi: Option<usize>,
    pub macd: Option<usize>,
}

impl ExportColumns {
    /// 헤더 행을 검사합니다. 필수 컬럼이 없으면 `InvalidData`.
    pub fn from_headers<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<String> = headers
            .into_iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
            .collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                DataError::InvalidData(format!("필수 컬럼 없음: {} (헤더: {})", name, names.join(",")))
            })
        };

        let time = find("time")
            .or_else(|| find("date"))
            .ok_or_else(|| DataError::InvalidData(format!("시간 컬럼 없음 (헤더: {})", names.join(","))))?;

        Ok(Self {
            time,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
            rsi: find("rsi"),
            macd: find("macd"),
        })
    }
}

/// 파싱 결과.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedExport {
    /// 시간순, 시간 중복 제거된 행
    pub rows: Vec<OhlcvRow>,
    /// 시간을 읽을 수 없어 버린 행 수
    pub dropped: usize,
    /// 같은 시간으로 덮어쓴 행 수
    pub duplicates: usize,
}

impl ParsedExport {
    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.rows.first().map(|r| r.time)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.rows.last().map(|r| r.time)
    }
}

/// 시간 문자열을 UTC 시각으로 변환합니다.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() {
            return Utc.timestamp_opt(secs.trunc() as i64, 0).single();
        }
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_f64(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_volume(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>()
        .ok()
        .or_else(|| parse_f64(Some(raw)).map(|v| v.round() as i64))
}

/// CSV 리더에서 내보내기 데이터를 파싱합니다.
pub fn parse_export<R: Read>(reader: R) -> Result<ParsedExport> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ExportColumns::from_headers(csv.headers()?.iter())?;

    let mut by_time: BTreeMap<DateTime<Utc>, OhlcvRow> = BTreeMap::new();
    let mut dropped = 0usize;
    let mut duplicates = 0usize;

    for record in csv.records() {
        let record = record?;
        let Some(time) = record.get(columns.time).and_then(parse_time) else {
            dropped += 1;
            continue;
        };

        let row = OhlcvRow {
            time,
            open: parse_f64(record.get(columns.open)),
            high: parse_f64(record.get(columns.high)),
            low: parse_f64(record.get(columns.low)),
            close: parse_f64(record.get(columns.close)),
            volume: match columns.volume {
                Some(idx) => parse_volume(record.get(idx)),
                None => Some(0),
            },
            rsi: columns.rsi.and_then(|idx| parse_f64(record.get(idx))),
            macd: columns.macd.and_then(|idx| parse_f64(record.get(idx))),
        };

        if by_time.insert(time, row).is_some() {
            duplicates += 1;
        }
    }

    Ok(ParsedExport {
        rows: by_time.into_values().collect(),
        dropped,
        duplicates,
    })
}

/// 파일에서 내보내기 데이터를 파싱합니다.
pub fn parse_export_file(path: &Path) -> Result<ParsedExport> {
    let file = std::fs::File::open(path)?;
    parse_export(std::io::BufReader::new(file))
}

/// 다운로드된 파일이 표 형식 OHLCV인지 헤더만 검사합니다.
///
/// 로그인 페이지 같은 HTML 응답이나 필수 컬럼이 없는 파일은 `InvalidData`.
pub fn inspect_file_header(path: &Path) -> Result<ExportColumns> {
    let mut head = Vec::with_capacity(512);
    std::fs::File::open(path)?
        .take(4096)
        .read_to_end(&mut head)?;

    let text = String::from_utf8_lossy(&head);
    let first_line = text
        .trim_start_matches('\u{feff}')
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| DataError::InvalidData("빈 파일".to_string()))?;

    if first_line.trim_start().starts_with('<') {
        return Err(DataError::InvalidData(
            "HTML 응답 (표 형식 데이터가 아님)".to_string(),
        ));
    }

    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(first_line.as_bytes());
    let header = csv
        .records()
        .next()
        .transpose()?
        .ok_or_else(|| DataError::InvalidData("헤더 없음".to_string()))?;

    ExportColumns::from_headers(header.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::io::Write;

    const SAMPLE: &str = "\
time,open,high,low,close,Volume,RSI,Plot
1704153600,187.15,188.44,183.89,185.64,82488700,55.1,1
1704240000,184.22,185.88,183.43,184.25,58414500,,2
,1,1,1,1,1,1,1
1704153600,187.20,188.50,183.90,185.70,82488800,55.2,3
";

    #[test]
    fn test_parse_sorts_dedupes_and_drops() {
        let parsed = parse_export(SAMPLE.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.dropped, 1);
        assert_eq!(parsed.duplicates, 1);

        let first = &parsed.rows[0];
        assert_eq!(first.time.timestamp(), 1704153600);
        assert_eq!(first.close, Some(185.70));
        assert_eq!(first.volume, Some(82488800));
        assert_eq!(first.rsi, Some(55.2));
        assert_eq!(first.macd, None);
        assert_eq!(parsed.rows[1].rsi, None);
    }

    #[test]
    fn test_missing_volume_defaults_to_zero() {
        let csv = "Date,Open,High,Low,Close\n2024-01-02,1,2,0.5,1.5\n2024-01-03,1,2,x,1.5\n";
        let parsed = parse_export(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].volume, Some(0));
        assert_eq!(parsed.rows[1].low, None);
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_export("time,open,high,close\n1,1,1,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::InvalidData(_)));
    }

    #[test]
    fn test_parse_time_formats() {
        let rfc = parse_time("2024-01-02T14:30:00+09:00").unwrap();
        assert_eq!(rfc.hour(), 5);
        assert!(parse_time("2024-01-02 09:30:00").is_some());
        assert!(parse_time("2024-01-02T09:30:00").is_some());
        assert_eq!(parse_time("2024-01-02").unwrap().hour(), 0);
        assert_eq!(parse_time("1704153600.0").unwrap().timestamp(), 1704153600);
        assert!(parse_time("yesterday").is_none());
        assert!(parse_time("").is_none());
    }

    #[test]
    fn test_inspect_header_rejects_html() {
        let dir = tempfile::tempdir().unwrap();

        let html = dir.path().join("login.csv");
        std::fs::File::create(&html)
            .unwrap()
            .write_all(b"<!DOCTYPE html><html><body>Sign in</body></html>")
            .unwrap();
        assert!(matches!(
            inspect_file_header(&html),
            Err(DataError::InvalidData(_))
        ));

        let good = dir.path().join("AAPL_1일.csv");
        std::fs::write(&good, SAMPLE).unwrap();
        let columns = inspect_file_header(&good).unwrap();
        assert_eq!(columns.time, 0);
        assert_eq!(columns.volume, Some(5));
        assert_eq!(columns.macd, None);

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        assert!(inspect_file_header(&empty).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn rows_are_sorted_and_unique(times in prop::collection::vec(1_600_000_000i64..1_700_000_000, 0..40)) {
                let mut body = String::from("time,open,high,low,close\n");
                for t in &times {
                    body.push_str(&format!("{},1,2,0.5,1.5\n", t));
                }
                let parsed = parse_export(body.as_bytes()).unwrap();

                let mut unique = times.clone();
                unique.sort_unstable();
                unique.dedup();
                prop_assert_eq!(parsed.rows.len(), unique.len());
                prop_assert_eq!(parsed.duplicates, times.len() - unique.len());
                prop_assert!(parsed.rows.windows(2).all(|w| w[0].time < w[1].time));
            }
        }
    }
}
