//! 내보내기 파일 업로드 서비스.
//!
//! 파일을 파싱해 `{SYMBOL}_{suffix}` 테이블에 `time` 기준으로 UPSERT합니다.
//! 같은 파일을 여러 번 올려도 행 수는 한 번 올린 것과 같고, 앞선 시도에서
//! 일부만 반영된 구간도 다음 시도가 완성합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::DataError;
use crate::export::{parse_export_file, ParsedExport};
use crate::storage::{OhlcvStore, TimeRange};
use crate::table::TableName;
use crate::tunnel::Tunnel;
use etf_core::{Symbol, Timeframe};

/// 업로드 오류.
#[derive(Debug, Error)]
pub enum UploadError {
    /// 터널/DB에 연결할 수 없음 (재시도 가능)
    #[error("저장소 연결 불가: {0}")]
    ConnectionUnavailable(String),

    /// 테이블 스키마 불일치 (사람이 확인해야 함)
    #[error("스키마 불일치: {0}")]
    SchemaMismatch(String),

    /// 파일 내용이 잘못됨
    #[error("잘못된 데이터: {0}")]
    InvalidData(String),

    /// 그 외 쿼리 오류
    #[error("쿼리 오류: {0}")]
    Query(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::ConnectionUnavailable(_))
    }
}

impl From<DataError> for UploadError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::ConnectionUnavailable(msg) => UploadError::ConnectionUnavailable(msg),
            DataError::SchemaMismatch(msg) => UploadError::SchemaMismatch(msg),
            DataError::InvalidData(msg) => UploadError::InvalidData(msg),
            DataError::Csv(e) => UploadError::InvalidData(e.to_string()),
            DataError::Io(e) => UploadError::InvalidData(format!("파일 읽기 실패: {}", e)),
            other => UploadError::Query(other.to_string()),
        }
    }
}

/// 쓰기 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadMode {
    /// `time` 기준 UPSERT
    #[default]
    Upsert,
    /// 파일의 시간 구간을 지우고 UPSERT (한 트랜잭션)
    ReplaceRange,
}

/// 업로드 결과.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub table: String,
    pub rows_parsed: usize,
    pub rows_upserted: u64,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
    pub deleted_rows: u64,
}

/// 디렉토리 업로드의 파일별 결과.
#[derive(Debug, Clone, Serialize)]
pub struct FileUploadOutcome {
    pub file: PathBuf,
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    /// 성공 시 결과
    pub result: Option<UploadResult>,
    /// 실패 또는 건너뛴 이유
    pub error: Option<String>,
}

/// `{SYMBOL}_{timeframe}.csv` 파일 이름을 해석합니다.
///
/// 타임프레임은 표시 이름(`1일`) 또는 범위 코드(`1D`)를 받습니다.
pub fn parse_export_filename(path: &Path) -> Option<(Symbol, Timeframe)> {
    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (symbol, timeframe) = stem.split_once('_')?;
    Some((Symbol::parse(symbol).ok()?, timeframe.parse().ok()?))
}

/// 업로드 서비스.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn OhlcvStore>,
    tunnel: Option<Arc<Tunnel>>,
    mode: UploadMode,
}

impl Uploader {
    pub fn new(store: Arc<dyn OhlcvStore>) -> Self {
        Self {
            store,
            tunnel: None,
            mode: UploadMode::Upsert,
        }
    }

    pub fn with_tunnel(mut self, tunnel: Arc<Tunnel>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn with_mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn store(&self) -> &Arc<dyn OhlcvStore> {
        &self.store
    }

    /// 터널과 DB 연결을 확인합니다.
    pub async fn check_connection(&self) -> Result<(), UploadError> {
        if let Some(tunnel) = &self.tunnel {
            tunnel.ensure().await?;
        }
        self.store.ping().await?;
        Ok(())
    }

    /// 파일 하나를 업로드합니다.
    #[instrument(skip(self), fields(symbol = %symbol, timeframe = %timeframe))]
    pub async fn upload(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        path: &Path,
    ) -> Result<UploadResult, UploadError> {
        let parsed = parse_export_file(path)?;
        if parsed.dropped > 0 {
            warn!(dropped = parsed.dropped, file = %path.display(), "시간 값이 없는 행 제외");
        }
        self.upload_parsed(symbol, timeframe, &parsed).await
    }

    /// 이미 파싱된 데이터를 업로드합니다.
    pub async fn upload_parsed(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        parsed: &ParsedExport,
    ) -> Result<UploadResult, UploadError> {
        let table = TableName::new(symbol, timeframe);
        let mut result = UploadResult {
            table: table.name(),
            rows_parsed: parsed.rows.len(),
            rows_upserted: 0,
            dropped_rows: parsed.dropped,
            duplicate_rows: parsed.duplicates,
            deleted_rows: 0,
        };
        if parsed.rows.is_empty() {
            warn!(table = %table, "업로드할 행이 없습니다");
            return Ok(result);
        }

        if let Some(tunnel) = &self.tunnel {
            tunnel.ensure().await?;
        }
        self.store.ensure_table(&table).await?;

        let replace = match (self.mode, parsed.first_time(), parsed.last_time()) {
            (UploadMode::ReplaceRange, Some(from), Some(to)) => Some(TimeRange { from, to }),
            _ => None,
        };
        let written = self
            .store
            .write_rows(&table, timeframe, &parsed.rows, replace)
            .await?;
        result.deleted_rows = written.deleted;
        result.rows_upserted = written.upserted;

        info!(
            table = %table,
            rows = result.rows_upserted,
            deleted = result.deleted_rows,
            "업로드 완료"
        );
        Ok(result)
    }

    /// 디렉토리의 `{SYMBOL}_{timeframe}.csv` 파일을 모두 업로드합니다.
    ///
    /// 파일별 실패는 결과에 기록하고 다음 파일로 진행합니다.
    pub async fn upload_dir(&self, dir: &Path) -> Result<Vec<FileUploadOutcome>, UploadError> {
        let listing = std::fs::read_dir(dir)
            .map_err(|e| UploadError::InvalidData(format!("{}: {}", dir.display(), e)))?;
        let mut files: Vec<PathBuf> = listing
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
            .collect();
        files.sort();

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let Some((symbol, timeframe)) = parse_export_filename(&file) else {
                warn!(file = %file.display(), "파일 이름을 해석할 수 없어 건너뜀");
                outcomes.push(FileUploadOutcome {
                    file,
                    symbol: None,
                    timeframe: None,
                    result: None,
                    error: Some("파일 이름 형식이 {SYMBOL}_{timeframe}.csv가 아님".to_string()),
                });
                continue;
            };

            let outcome = match self.upload(&symbol, timeframe, &file).await {
                Ok(result) => (Some(result), None),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "파일 업로드 실패");
                    (None, Some(e.to_string()))
                }
            };
            outcomes.push(FileUploadOutcome {
                file,
                symbol: Some(symbol.to_string()),
                timeframe: Some(timeframe),
                result: outcome.0,
                error: outcome.1,
            });
        }
        Ok(outcomes)
    }
}
