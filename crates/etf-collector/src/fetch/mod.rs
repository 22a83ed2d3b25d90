//! 심볼/타임프레임 단위 다운로드.
//!
//! [`ChartExporter`]가 차트 이동, 타임프레임 설정, 내보내기와 다운로드를
//! 수행하고 [`Fetcher`]가 대기 시간 제한과 파일 검사를 담당합니다.

pub mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;
use crate::session::SessionHandle;
use etf_core::{Symbol, Timeframe};
use etf_data::{inspect_file_header, parse_export_file, ParsedExport};

pub use http::HttpChartExporter;

/// 다운로드 결과.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// 파싱된 행 수
    pub rows: u64,
    pub file_path: PathBuf,
    /// 업로드에 그대로 사용하는 파싱 결과
    pub parsed: ParsedExport,
}

/// 차트 내보내기 수행자.
#[async_trait]
pub trait ChartExporter: Send + Sync {
    /// 차트 내보내기 파일을 `dest`에 저장합니다.
    ///
    /// 로그인 페이지로 리다이렉트되면 `FetchError::SessionInvalid`.
    async fn export(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        session: &SessionHandle,
        dest: &Path,
    ) -> Result<(), FetchError>;
}

/// 단위 다운로드 실행기.
#[derive(Clone)]
pub struct Fetcher {
    exporter: Arc<dyn ChartExporter>,
    download_dir: PathBuf,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(exporter: Arc<dyn ChartExporter>, download_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            exporter,
            download_dir: download_dir.into(),
            timeout,
        }
    }

    /// 단위의 다운로드 파일 경로 (`{SYMBOL}_{timeframe}.csv`).
    pub fn file_path(&self, symbol: &Symbol, timeframe: Timeframe) -> PathBuf {
        self.download_dir
            .join(format!("{}_{}.csv", symbol, timeframe.label()))
    }

    /// 한 번의 다운로드 시도.
    pub async fn fetch(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        session: &SessionHandle,
    ) -> Result<FetchResult, FetchError> {
        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| FetchError::NavigationFailure(format!("다운로드 디렉토리 생성 실패: {}", e)))?;
        let dest = self.file_path(symbol, timeframe);

        match tokio::time::timeout(
            self.timeout,
            self.exporter.export(symbol, timeframe, session, &dest),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout(format!(
                    "{}초 안에 다운로드가 끝나지 않았습니다",
                    self.timeout.as_secs()
                )))
            }
        }

        inspect_file_header(&dest).map_err(|e| FetchError::InvalidExport(e.to_string()))?;
        let parsed =
            parse_export_file(&dest).map_err(|e| FetchError::InvalidExport(e.to_string()))?;
        if parsed.rows.is_empty() {
            return Err(FetchError::InvalidExport("데이터 행이 없습니다".to_string()));
        }

        debug!(file = %dest.display(), rows = parsed.rows.len(), "다운로드 파일 확인");
        Ok(FetchResult {
            rows: parsed.rows.len() as u64,
            file_path: dest,
            parsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct SlowExporter;

    #[async_trait]
    impl ChartExporter for SlowExporter {
        async fn export(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _session: &SessionHandle,
            _dest: &Path,
        ) -> Result<(), FetchError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        }
    }

    struct BodyExporter(&'static str);

    #[async_trait]
    impl ChartExporter for BodyExporter {
        async fn export(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _session: &SessionHandle,
            dest: &Path,
        ) -> Result<(), FetchError> {
            std::fs::write(dest, self.0).unwrap();
            Ok(())
        }
    }

    fn session() -> SessionHandle {
        SessionHandle::new(Vec::new(), chrono::Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(Arc::new(SlowExporter), dir.path(), Duration::from_secs(60));
        let symbol = Symbol::parse("AAPL").unwrap();

        let err = fetcher.fetch(&symbol, Timeframe::Day1, &session()).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_valid_export() {
        let dir = TempDir::new().unwrap();
        let exporter = BodyExporter("time,open,high,low,close,Volume\n1704067200,1,2,0.5,1.5,10\n");
        let fetcher = Fetcher::new(Arc::new(exporter), dir.path(), Duration::from_secs(60));
        let symbol = Symbol::parse("AAPL").unwrap();

        let result = fetcher.fetch(&symbol, Timeframe::Week1, &session()).await.unwrap();
        assert_eq!(result.rows, 1);
        assert_eq!(result.file_path, dir.path().join("AAPL_1주.csv"));
    }

    #[tokio::test]
    async fn test_html_is_invalid_export() {
        let dir = TempDir::new().unwrap();
        let exporter = BodyExporter("<!DOCTYPE html><html>login</html>");
        let fetcher = Fetcher::new(Arc::new(exporter), dir.path(), Duration::from_secs(60));
        let symbol = Symbol::parse("AAPL").unwrap();

        let err = fetcher.fetch(&symbol, Timeframe::Day1, &session()).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidExport(_)));
    }
}
