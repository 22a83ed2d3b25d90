//! 데이터 업로드 및 검증.
//!
//! 이 crate는 다음을 제공합니다:
//! - 차트 내보내기 CSV 파싱
//! - `{SYMBOL}_{suffix}` 테이블 저장소 (PostgreSQL, 테스트용 인메모리)
//! - SSH 터널 관리
//! - 파일/디렉토리 업로드 서비스
//! - 업로드된 데이터 검증 보고서

pub mod error;
pub mod export;
pub mod storage;
pub mod table;
pub mod tunnel;
pub mod upload;
pub mod validation;

pub use error::{DataError, Result};
pub use export::{inspect_file_header, parse_export, parse_export_file, OhlcvRow, ParsedExport};
pub use table::TableName;
pub use tunnel::{Tunnel, TunnelConfig, TunnelState};
pub use upload::{
    parse_export_filename, FileUploadOutcome, UploadError, UploadMode, UploadResult, Uploader,
};
pub use validation::{
    DataValidator, TableReport, TableStatus, ValidationConfig, ValidationError, ValidationReport,
};

// 저장소 타입 재내보내기
pub use storage::{DatabaseConfig, OhlcvStore, PgOhlcvStore, TableStats, TimeRange, WriteOutcome};
#[cfg(any(test, feature = "test-utils"))]
pub use storage::MemoryOhlcvStore;
