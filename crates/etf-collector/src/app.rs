//! 설정으로부터 실행 구성요소를 조립합니다.

use std::sync::Arc;

use tracing::info;

use crate::config::ScraperConfig;
use crate::error::CollectorError;
use crate::fetch::{Fetcher, HttpChartExporter};
use crate::runner::{JobRunner, RunnerSettings};
use crate::session::{HttpAuthenticator, SessionManager};
use crate::tracker::Tracker;
use crate::Result;
use etf_core::{DocumentStore, JobLog};
use etf_data::{OhlcvStore, PgOhlcvStore, Tunnel, Uploader};

/// DB 저장소와 터널.
pub struct StoreHandles {
    pub store: Arc<dyn OhlcvStore>,
    pub tunnel: Arc<Tunnel>,
}

impl StoreHandles {
    /// 설정된 DB에 지연 연결하는 저장소를 만듭니다.
    ///
    /// 실제 연결은 첫 쿼리 시점이므로 터널이 나중에 열려도 됩니다.
    pub fn connect(config: &ScraperConfig) -> Result<Self> {
        let database = config.require_database()?;
        let store = PgOhlcvStore::connect_lazy(database)?;
        let tunnel = Arc::new(Tunnel::new(config.tunnel.clone()));
        Ok(Self {
            store: Arc::new(store),
            tunnel,
        })
    }

    /// 터널을 거치는 업로드 서비스.
    pub fn uploader(&self, config: &ScraperConfig) -> Uploader {
        Uploader::new(self.store.clone())
            .with_tunnel(self.tunnel.clone())
            .with_mode(config.job.upload_mode)
    }
}

/// 작업 문서 저장소.
pub fn document_store(config: &ScraperConfig) -> DocumentStore {
    DocumentStore::new(&config.job.document_path)
}

/// 세션 관리자.
pub fn session_manager(config: &ScraperConfig) -> Result<SessionManager> {
    let authenticator = HttpAuthenticator::new(config.upstream.clone())?;
    Ok(SessionManager::new(
        &config.session.cookie_file,
        Arc::new(authenticator),
    ))
}

/// 작업 실행기를 조립합니다.
pub fn build_runner(config: &ScraperConfig, uploader: Uploader) -> Result<JobRunner> {
    let tracker = Tracker::load(document_store(config), JobLog::new(&config.job.log_dir));
    let sessions = Arc::new(session_manager(config)?);
    let exporter = HttpChartExporter::new(config.upstream.clone())
        .map_err(|e| CollectorError::Config(e.to_string()))?;
    let fetcher = Fetcher::new(
        Arc::new(exporter),
        &config.fetch.download_dir,
        config.fetch.timeout(),
    );
    let settings = RunnerSettings::from_config(config);

    info!(
        symbols = settings.symbols.len(),
        timeframes = settings.timeframes.len(),
        max_attempts = settings.max_attempts,
        document = %config.job.document_path.display(),
        "작업 실행기 준비"
    );
    Ok(JobRunner::new(tracker, sessions, fetcher, uploader, settings))
}
