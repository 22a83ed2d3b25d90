//! 심볼/타임프레임별 저장 테이블 이름.

use std::fmt;

use etf_core::{Symbol, Timeframe};

/// `{SYMBOL}_{suffix}` 형식의 테이블 이름.
///
/// 심볼은 `^[A-Z0-9.]{1,10}$`로 검증되어 있으므로 따옴표로 감싼 식별자로
/// SQL에 그대로 넣을 수 있습니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    symbol: Symbol,
    suffix: &'static str,
}

impl TableName {
    pub fn new(symbol: &Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.clone(),
            suffix: timeframe.table_suffix(),
        }
    }

    /// 심볼이 사용하는 모든 테이블 (중복 접미사 제거).
    pub fn all_for(symbol: &Symbol) -> Vec<Self> {
        let mut tables: Vec<Self> = Timeframe::ALL
            .iter()
            .map(|tf| Self::new(symbol, *tf))
            .collect();
        tables.dedup();
        tables
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    /// 따옴표 없는 이름 (`AAPL_1h`).
    pub fn name(&self) -> String {
        format!("{}_{}", self.symbol, self.suffix)
    }

    /// SQL 식별자 (`"AAPL_1h"`).
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.name())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbol, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        let aapl = Symbol::parse("AAPL").unwrap();
        assert_eq!(TableName::new(&aapl, Timeframe::Year1).name(), "AAPL_D");
        assert_eq!(TableName::new(&aapl, Timeframe::Week1).name(), "AAPL_D");
        assert_eq!(TableName::new(&aapl, Timeframe::Day1).name(), "AAPL_1h");
        assert_eq!(TableName::new(&aapl, Timeframe::Hour1).quoted(), "\"AAPL_10m\"");
        assert_eq!(TableName::new(&aapl, Timeframe::Min10).to_string(), "AAPL_1m");
    }

    #[test]
    fn test_all_for_dedupes_daily() {
        let brk = Symbol::parse("BRK.B").unwrap();
        let names: Vec<String> = TableName::all_for(&brk).iter().map(TableName::name).collect();
        assert_eq!(names, vec!["BRK.B_D", "BRK.B_1h", "BRK.B_10m", "BRK.B_1m"]);
    }
}
