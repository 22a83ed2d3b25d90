//! 종목 심볼 정의.
//!
//! 심볼은 대문자, 숫자, 점(`.`)으로만 구성되며 최대 10자입니다 (예: `AAPL`, `BRK.B`).
//! 테이블 이름과 파일 이름에 그대로 사용되므로 생성 시점에 검증합니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 심볼 최대 길이.
pub const MAX_SYMBOL_LEN: usize = 10;

/// 검증된 종목 심볼.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// 문자열을 검증하여 심볼을 생성합니다.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if is_valid_symbol(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CoreError::InvalidSymbol(raw.to_string()))
        }
    }

    /// 심볼 문자열 반환.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 쉼표로 구분된 심볼 목록을 파싱합니다 (공백 허용, 빈 항목 무시).
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, CoreError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// 허용 패턴 `^[A-Z0-9.]{1,10}$` 검사.
pub fn is_valid_symbol(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_SYMBOL_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 기본 수집 대상 종목 목록.
pub const DEFAULT_SYMBOLS: [&str; 30] = [
    "NVDA", "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "BRK.B", "UNH", "JNJ", "V", "XOM",
    "WMT", "JPM", "MA", "PG", "CVX", "HD", "LLY", "ABBV", "MRK", "AVGO", "PEP", "KO", "COST",
    "ADBE", "TMO", "MCD", "CSCO", "CRM",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_symbols() {
        assert!(Symbol::parse("AAPL").is_ok());
        assert!(Symbol::parse("BRK.B").is_ok());
        assert!(Symbol::parse("005930").is_ok());
        assert!(Symbol::parse("ABCDEFGHIJ").is_ok());
    }

    #[test]
    fn test_invalid_symbols() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("aapl").is_err());
        assert!(Symbol::parse("ABCDEFGHIJK").is_err());
        assert!(Symbol::parse("AA PL").is_err());
        assert!(Symbol::parse("\"; DROP").is_err());
        assert!(Symbol::parse("NASDAQ:AAPL").is_err());
    }

    #[test]
    fn test_parse_list() {
        let symbols = Symbol::parse_list("AAPL, NVDA,,BRK.B ").unwrap();
        let names: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(names, vec!["AAPL", "NVDA", "BRK.B"]);

        assert!(Symbol::parse_list("AAPL,nvda").is_err());
    }

    #[test]
    fn test_default_symbols_are_valid() {
        for raw in DEFAULT_SYMBOLS {
            assert!(is_valid_symbol(raw), "{raw}");
        }
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let ok: Symbol = serde_json::from_str("\"MSFT\"").unwrap();
        assert_eq!(ok.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>("\"msft\"").is_err());
    }
}
