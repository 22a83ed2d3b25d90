//! HTTP 기반 차트 내보내기.
//!
//! 1. 차트 페이지로 이동 (세션 확인)
//! 2. 범위/봉 간격을 쿼리로 지정해 내보내기 요청
//! 3. 응답 본문을 임시 파일에 받은 뒤 대상 경로로 교체

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use tempfile::NamedTempFile;
use tracing::debug;

use super::ChartExporter;
use crate::config::UpstreamConfig;
use crate::error::FetchError;
use crate::session::SessionHandle;
use etf_core::{Symbol, Timeframe};

/// reqwest 기반 [`ChartExporter`].
pub struct HttpChartExporter {
    client: Client,
    config: UpstreamConfig,
}

impl HttpChartExporter {
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `FetchError::NavigationFailure`를 반환합니다.
    pub fn new(config: UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FetchError::NavigationFailure(format!("HTTP client 생성 실패: {}", e)))?;
        Ok(Self { client, config })
    }

    /// 차트 페이지 URL.
    pub fn chart_url(&self, symbol: &Symbol) -> String {
        self.config
            .chart_url_template
            .replace("{base}", &self.config.base_url)
            .replace("{symbol}", symbol.as_str())
    }

    /// 내보내기 URL.
    pub fn export_url(&self, symbol: &Symbol, timeframe: Timeframe) -> String {
        self.config
            .export_url_template
            .replace("{base}", &self.config.base_url)
            .replace("{symbol}", symbol.as_str())
            .replace("{range}", timeframe.range_code())
            .replace("{interval}", timeframe.bar_interval())
    }

    /// 로그인 페이지로 보내졌는지 확인합니다.
    fn is_login_redirect(&self, response: &Response) -> bool {
        let status = response.status();
        status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || response.url().path().starts_with(self.config.login_path.trim_end_matches('/'))
    }

    async fn get(&self, url: &str, session: &SessionHandle) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::COOKIE, session.cookie_header())
            .send()
            .await?;
        if self.is_login_redirect(&response) {
            return Err(FetchError::SessionInvalid);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChartExporter for HttpChartExporter {
    async fn export(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        session: &SessionHandle,
        dest: &Path,
    ) -> Result<(), FetchError> {
        let chart = self.get(&self.chart_url(symbol), session).await?;
        if !chart.status().is_success() {
            return Err(FetchError::NavigationFailure(format!(
                "차트 페이지 HTTP {}",
                chart.status()
            )));
        }

        let url = self.export_url(symbol, timeframe);
        debug!(url = %url, "내보내기 요청");
        let mut response = self.get(&url, session).await?;
        if !response.status().is_success() {
            return Err(FetchError::NavigationFailure(format!(
                "내보내기 HTTP {}",
                response.status()
            )));
        }
        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            return Err(FetchError::SessionInvalid);
        }

        let dir = dest
            .parent()
            .ok_or_else(|| FetchError::NavigationFailure("잘못된 다운로드 경로".to_string()))?;
        let io_err = |e: std::io::Error| FetchError::NavigationFailure(format!("다운로드 저장 실패: {}", e));

        let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).map_err(io_err)?;
        }
        file.as_file().sync_all().map_err(io_err)?;
        file.persist(dest).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;

    #[test]
    fn test_urls() {
        let config = ScraperConfig::from_lookup(|key| match key {
            "UPSTREAM_BASE_URL" => Some("https://charts.example.com/".to_string()),
            _ => None,
        })
        .unwrap();
        let exporter = HttpChartExporter::new(config.upstream).unwrap();
        let symbol = Symbol::parse("BRK.B").unwrap();

        assert_eq!(
            exporter.chart_url(&symbol),
            "https://charts.example.com/chart/?symbol=BRK.B"
        );
        assert_eq!(
            exporter.export_url(&symbol, Timeframe::Hour1),
            "https://charts.example.com/chart/export/?symbol=BRK.B&range=1H&interval=10"
        );
    }
}
