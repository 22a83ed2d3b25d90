//! 작업 실행기.
//!
//! 한 번에 하나의 전체 작업 또는 재시도만 실행합니다. 실행 잠금은
//! `try_lock_owned`로 얻으며, 잠금을 얻지 못한 요청은 즉시 거부됩니다.
//! 단위는 심볼 순서 × 타임프레임(긴 범위 → 짧은 범위) 순서로 하나씩
//! 처리하고, 중단 요청은 단위 사이에서만 확인합니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::config::ScraperConfig;
use crate::error::{CollectorError, FetchError};
use crate::fetch::{FetchResult, Fetcher};
use crate::session::{SessionHandle, SessionManager};
use crate::stats::RunStats;
use crate::tracker::Tracker;
use crate::Result;
use etf_core::{JobDocument, JobStatus, Symbol, Timeframe, UnitUpdate};
use etf_data::{UploadError, Uploader};

/// 실행 설정.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub symbols: Vec<Symbol>,
    pub timeframes: Vec<Timeframe>,
    /// 단위당 최대 시도 횟수
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// 단위 사이 대기
    pub request_delay: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            symbols: config.job.symbols.clone(),
            timeframes: config.job.timeframes.clone(),
            max_attempts: config.fetch.max_attempts,
            retry_delay: config.fetch.retry_delay(),
            request_delay: config.fetch.request_delay(),
        }
    }
}

/// 실행 종류.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunKind {
    Full,
    Retry { retry_id: String, symbols: Vec<Symbol> },
}

/// 시작된 실행. 실행 잠금을 보유합니다.
#[derive(Debug)]
pub struct StartedRun {
    pub job_id: String,
    pub kind: RunKind,
    token: CancellationToken,
    _guard: OwnedMutexGuard<()>,
}

impl StartedRun {
    /// 재시도이면 재시도 ID.
    pub fn retry_id(&self) -> Option<&str> {
        match &self.kind {
            RunKind::Full => None,
            RunKind::Retry { retry_id, .. } => Some(retry_id),
        }
    }
}

/// 단위 시도 에러.
enum UnitError {
    Fetch(FetchError),
    Upload(UploadError),
    /// 재로그인 후에도 세션이 거부됨
    SessionRejected,
    /// 작업에 치명적인 에러
    Fatal(CollectorError),
}

impl UnitError {
    fn is_retryable(&self) -> bool {
        match self {
            UnitError::Fetch(e) => e.is_retryable(),
            UnitError::Upload(e) => e.is_retryable(),
            UnitError::SessionRejected | UnitError::Fatal(_) => false,
        }
    }

    fn message(&self) -> String {
        match self {
            UnitError::Fetch(e) => e.to_string(),
            UnitError::Upload(e) => e.to_string(),
            UnitError::SessionRejected => "다시 로그인한 뒤에도 세션이 유효하지 않습니다".to_string(),
            UnitError::Fatal(e) => e.to_string(),
        }
    }
}

impl From<CollectorError> for UnitError {
    fn from(err: CollectorError) -> Self {
        UnitError::Fatal(err)
    }
}

/// 한 번의 실행 동안 유지되는 상태.
struct RunContext {
    job_id: String,
    session: SessionHandle,
    relogged: bool,
    token: CancellationToken,
    stats: RunStats,
}

/// 작업 실행기.
pub struct JobRunner {
    tracker: Arc<Mutex<Tracker>>,
    snapshots: watch::Receiver<JobDocument>,
    sessions: Arc<SessionManager>,
    fetcher: Fetcher,
    uploader: Uploader,
    settings: RunnerSettings,
    run_lock: Arc<Mutex<()>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl JobRunner {
    pub fn new(
        tracker: Tracker,
        sessions: Arc<SessionManager>,
        fetcher: Fetcher,
        uploader: Uploader,
        settings: RunnerSettings,
    ) -> Self {
        let snapshots = tracker.subscribe();
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            snapshots,
            sessions,
            fetcher,
            uploader,
            settings,
            run_lock: Arc::new(Mutex::new(())),
            cancel: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// 최신 작업 문서 스냅샷.
    pub fn snapshot(&self) -> JobDocument {
        self.snapshots.borrow().clone()
    }

    /// 스냅샷 구독.
    pub fn subscribe(&self) -> watch::Receiver<JobDocument> {
        self.snapshots.clone()
    }

    /// 실행 중인 작업/재시도가 있는지 여부.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// 이전 프로세스가 남긴 실행 중 상태를 정리합니다.
    pub async fn recover_stale(&self) -> Result<bool> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Ok(false);
        };
        let recovered = self.tracker.lock().await.recover_stale(Utc::now())?;
        if recovered {
            warn!("비정상 종료된 작업 상태를 실패로 정리했습니다");
        }
        Ok(recovered)
    }

    fn acquire_run_lock(&self) -> Result<OwnedMutexGuard<()>> {
        self.run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| CollectorError::JobActive(self.snapshot().job_id))
    }

    async fn arm_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());
        token
    }

    /// 전체 작업을 시작합니다 (문서는 `pending`).
    pub async fn start_full(&self) -> Result<StartedRun> {
        let guard = self.acquire_run_lock()?;
        let job_id = self.tracker.lock().await.start_job(
            &self.settings.symbols,
            &self.settings.timeframes,
            Utc::now(),
        )?;
        let token = self.arm_cancel().await;
        Ok(StartedRun {
            job_id,
            kind: RunKind::Full,
            token,
            _guard: guard,
        })
    }

    /// 지정 심볼의 재시도를 시작합니다.
    pub async fn start_retry(&self, symbols: &[Symbol]) -> Result<StartedRun> {
        let guard = self.acquire_run_lock()?;
        let task = self.tracker.lock().await.start_retry(symbols, Utc::now())?;
        let token = self.arm_cancel().await;
        let symbols = task
            .symbols
            .iter()
            .map(|s| Symbol::parse(s))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(StartedRun {
            job_id: task.parent_job_id,
            kind: RunKind::Retry {
                retry_id: task.retry_id,
                symbols,
            },
            token,
            _guard: guard,
        })
    }

    /// 실행 중인 작업에 중단을 요청합니다. 대상 작업 ID를 반환합니다.
    pub async fn cancel(&self) -> Result<String> {
        let slot = self.cancel.lock().await;
        match slot.as_ref() {
            Some(token) if self.is_running() && !token.is_cancelled() => {
                token.cancel();
                let job_id = self.snapshot().job_id;
                info!(job_id = %job_id, "작업 중단 요청");
                Ok(job_id)
            }
            _ => Err(CollectorError::NotRunning),
        }
    }

    /// 백그라운드에서 실행합니다.
    pub fn spawn(self: &Arc<Self>, run: StartedRun) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = run.job_id.clone();
            if let Err(e) = runner.execute(run).await {
                error!(job_id = %job_id, error = %e, "작업 실행 실패");
            }
        })
    }

    /// 시작된 실행을 끝까지 수행하고 종료 상태를 반환합니다.
    pub async fn execute(&self, run: StartedRun) -> Result<JobStatus> {
        let started = Instant::now();
        let span = etf_core::unit_span!("job", run.job_id);
        let result = match &run.kind {
            RunKind::Full => self.execute_full(&run).instrument(span).await,
            RunKind::Retry { retry_id, symbols } => {
                self.execute_retry(&run, retry_id, symbols)
                    .instrument(span)
                    .await
            }
        };
        *self.cancel.lock().await = None;

        let (status, mut stats) = result?;
        stats.elapsed = started.elapsed();
        let operation = match run.kind {
            RunKind::Full => "전체 수집",
            RunKind::Retry { .. } => "재시도",
        };
        stats.log_summary(operation);
        info!(job_id = %run.job_id, status = %status, "실행 종료");
        Ok(status)
    }

    async fn execute_full(&self, run: &StartedRun) -> Result<(JobStatus, RunStats)> {
        self.tracker.lock().await.begin(Utc::now())?;

        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => {
                self.tracker.lock().await.fail(&e.to_string(), Utc::now())?;
                return Err(e.into());
            }
        };

        let mut ctx = RunContext {
            job_id: run.job_id.clone(),
            session,
            relogged: false,
            token: run.token.clone(),
            stats: RunStats::new(),
        };

        let plan: Vec<(Symbol, Vec<Timeframe>)> = {
            let ordered = Timeframe::coarse_to_fine(&self.settings.timeframes);
            self.settings
                .symbols
                .iter()
                .map(|s| (s.clone(), ordered.clone()))
                .collect()
        };

        let cancelled = match self.process(&plan, &mut ctx).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                self.fail_job(&e).await;
                return Err(e);
            }
        };

        let status = self.tracker.lock().await.finalize(Utc::now(), cancelled)?;
        Ok((status, ctx.stats))
    }

    async fn execute_retry(
        &self,
        run: &StartedRun,
        retry_id: &str,
        symbols: &[Symbol],
    ) -> Result<(JobStatus, RunStats)> {
        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => {
                self.tracker
                    .lock()
                    .await
                    .fail_retry(retry_id, &e.to_string(), Utc::now())?;
                return Err(e.into());
            }
        };

        let plan: Vec<(Symbol, Vec<Timeframe>)> = {
            let tracker = self.tracker.lock().await;
            let doc = tracker.document();
            symbols
                .iter()
                .filter_map(|s| {
                    doc.symbols
                        .get(s.as_str())
                        .map(|record| (s.clone(), record.unfinished_timeframes()))
                })
                .collect()
        };

        let mut ctx = RunContext {
            job_id: run.job_id.clone(),
            session,
            relogged: false,
            token: run.token.clone(),
            stats: RunStats::new(),
        };

        let cancelled = match self.process(&plan, &mut ctx).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                let mut tracker = self.tracker.lock().await;
                if let Err(fail_err) = tracker.fail_retry(retry_id, &e.to_string(), Utc::now()) {
                    error!(error = %fail_err, "재시도 실패 상태 기록 실패");
                }
                return Err(e);
            }
        };

        let status = self
            .tracker
            .lock()
            .await
            .finish_retry(retry_id, Utc::now(), cancelled)?;
        Ok((status, ctx.stats))
    }

    async fn fail_job(&self, err: &CollectorError) {
        let mut tracker = self.tracker.lock().await;
        if let Err(e) = tracker.fail(&err.to_string(), Utc::now()) {
            error!(error = %e, "작업 실패 상태 기록 실패");
        }
    }

    /// 계획된 단위를 순서대로 처리합니다. 중단되었으면 `true`.
    async fn process(
        &self,
        plan: &[(Symbol, Vec<Timeframe>)],
        ctx: &mut RunContext,
    ) -> Result<bool> {
        let mut first_unit = true;
        for (symbol, timeframes) in plan {
            let mut touched = false;
            for &timeframe in timeframes {
                if !first_unit {
                    pause(&ctx.token, self.settings.request_delay).await;
                }
                if ctx.token.is_cancelled() {
                    if touched {
                        self.tracker
                            .lock()
                            .await
                            .settle_symbol(symbol.as_str(), Utc::now())?;
                    }
                    warn!(job_id = %ctx.job_id, "중단 요청으로 작업을 종료합니다");
                    return Ok(true);
                }
                first_unit = false;
                touched = true;

                let span = etf_core::unit_span!("unit", ctx.job_id, symbol, timeframe);
                self.run_unit(symbol, timeframe, ctx).instrument(span).await?;
            }
            self.tracker
                .lock()
                .await
                .settle_symbol(symbol.as_str(), Utc::now())?;
        }
        Ok(ctx.token.is_cancelled())
    }

    /// 단위 하나를 최대 시도 횟수까지 처리합니다.
    ///
    /// 단위 실패는 기록만 하고 `Ok`를 반환합니다. 작업에 치명적인 에러만
    /// `Err`입니다.
    async fn run_unit(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            self.update(symbol, timeframe, UnitUpdate::Downloading { attempt })
                .await?;
            ctx.stats.attempts += 1;

            let err = match self.attempt(symbol, timeframe, ctx).await {
                Ok(rows) => {
                    ctx.stats.record_success(rows);
                    return Ok(());
                }
                Err(UnitError::Fatal(e)) => return Err(e),
                Err(err) => err,
            };

            let message = err.message();
            let can_retry = err.is_retryable()
                && attempt < self.settings.max_attempts
                && !ctx.token.is_cancelled();
            if can_retry {
                self.tracker.lock().await.note_attempt_failure(
                    symbol.as_str(),
                    timeframe,
                    attempt,
                    &message,
                    Utc::now(),
                );
                pause(&ctx.token, self.settings.retry_delay).await;
                attempt += 1;
                continue;
            }

            self.update(symbol, timeframe, UnitUpdate::Failed { error: message })
                .await?;
            ctx.stats.record_failure();
            return Ok(());
        }
    }

    /// 다운로드 → 업로드 한 번. 성공 시 행 수.
    async fn attempt(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        ctx: &mut RunContext,
    ) -> std::result::Result<u64, UnitError> {
        let fetched = self.fetch_unit(symbol, timeframe, ctx).await?;

        self.update(symbol, timeframe, UnitUpdate::Downloaded { rows: fetched.rows })
            .await?;
        self.update(symbol, timeframe, UnitUpdate::Uploading).await?;

        let result = self
            .uploader
            .upload_parsed(symbol, timeframe, &fetched.parsed)
            .await
            .map_err(UnitError::Upload)?;

        self.update(symbol, timeframe, UnitUpdate::Succeeded { rows: fetched.rows })
            .await?;
        info!(
            table = %result.table,
            rows = fetched.rows,
            upserted = result.rows_upserted,
            "단위 처리 완료"
        );
        Ok(fetched.rows)
    }

    /// 내려받기. 세션이 만료되었으면 실행당 한 번 다시 로그인하고 같은
    /// 시도 안에서 이어 받습니다.
    async fn fetch_unit(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        ctx: &mut RunContext,
    ) -> std::result::Result<FetchResult, UnitError> {
        match self.fetcher.fetch(symbol, timeframe, &ctx.session).await {
            Ok(fetched) => return Ok(fetched),
            Err(FetchError::SessionInvalid) if !ctx.relogged => {}
            Err(FetchError::SessionInvalid) => return Err(UnitError::SessionRejected),
            Err(e) => return Err(UnitError::Fetch(e)),
        }

        ctx.relogged = true;
        warn!(job_id = %ctx.job_id, "세션이 만료되어 다시 로그인합니다");
        ctx.session = self
            .sessions
            .refresh()
            .await
            .map_err(|e| UnitError::Fatal(e.into()))?;

        match self.fetcher.fetch(symbol, timeframe, &ctx.session).await {
            Ok(fetched) => Ok(fetched),
            Err(FetchError::SessionInvalid) => Err(UnitError::SessionRejected),
            Err(e) => Err(UnitError::Fetch(e)),
        }
    }

    async fn update(&self, symbol: &Symbol, timeframe: Timeframe, update: UnitUpdate) -> Result<()> {
        self.tracker
            .lock()
            .await
            .update(symbol.as_str(), timeframe, update, Utc::now())
    }
}

/// 중단 요청이 오면 즉시 깨어나는 대기.
async fn pause(token: &CancellationToken, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
