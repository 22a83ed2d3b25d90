//! 데이터 모듈 오류 타입.

use thiserror::Error;

/// 저장소/파싱 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// DB 또는 터널에 연결할 수 없음
    #[error("저장소 연결 불가: {0}")]
    ConnectionUnavailable(String),

    /// 기존 테이블 스키마가 예상과 다름
    #[error("테이블 스키마 불일치: {0}")]
    SchemaMismatch(String),

    /// 잘못된 데이터 형식
    #[error("잘못된 데이터: {0}")]
    InvalidData(String),

    /// 쿼리 실행 오류
    #[error("쿼리 오류: {0}")]
    Query(String),

    /// 설정 오류
    #[error("설정 오류: {0}")]
    Config(String),

    /// 파일 입출력 오류
    #[error("파일 입출력 오류: {0}")]
    Io(#[from] std::io::Error),

    /// CSV 파싱 오류
    #[error("CSV 파싱 오류: {0}")]
    Csv(#[from] csv::Error),

    /// 직렬화 오류
    #[error("직렬화 오류: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DataError {
    /// 같은 작업을 다시 시도할 가치가 있는지 여부.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::ConnectionUnavailable(_))
    }
}

/// PostgreSQL 오류 코드: 존재하지 않는 컬럼.
const PG_UNDEFINED_COLUMN: &str = "42703";
/// PostgreSQL 오류 코드: 컬럼 타입 불일치.
const PG_DATATYPE_MISMATCH: &str = "42804";
/// PostgreSQL 오류 코드: 연결 예외 계열.
const PG_CONNECTION_EXCEPTION_CLASS: &str = "08";

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => DataError::ConnectionUnavailable(e.to_string()),
            sqlx::Error::Tls(e) => DataError::ConnectionUnavailable(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                DataError::ConnectionUnavailable("연결 풀 대기 시간 초과".to_string())
            }
            sqlx::Error::PoolClosed => {
                DataError::ConnectionUnavailable("연결 풀이 닫혔습니다".to_string())
            }
            sqlx::Error::Configuration(e) => DataError::Config(e.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DataError::SchemaMismatch(format!("컬럼 {} 디코딩 실패: {}", index, source))
            }
            sqlx::Error::ColumnNotFound(column) => {
                DataError::SchemaMismatch(format!("컬럼 없음: {}", column))
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                if code == PG_UNDEFINED_COLUMN || code == PG_DATATYPE_MISMATCH {
                    DataError::SchemaMismatch(db_err.message().to_string())
                } else if code.starts_with(PG_CONNECTION_EXCEPTION_CLASS) {
                    DataError::ConnectionUnavailable(db_err.message().to_string())
                } else {
                    DataError::Query(db_err.message().to_string())
                }
            }
            _ => DataError::Query(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_connection_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(DataError::from(sqlx::Error::Io(io)).is_retryable());
        assert!(DataError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DataError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(!DataError::InvalidData("x".into()).is_retryable());
    }

    #[test]
    fn test_column_not_found_is_schema_mismatch() {
        let err = DataError::from(sqlx::Error::ColumnNotFound("rsi".into()));
        assert!(matches!(err, DataError::SchemaMismatch(_)));
    }
}
