//! ETF 데이터 수집 CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::StatusCode;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use etf_collector::api::{create_router, AppState};
use etf_collector::app::{self, StoreHandles};
use etf_collector::{JobRunner, ScraperConfig};
use etf_core::{init_logging, monitor, JobStatus, LogConfig, StatusView, Symbol, Timeframe};
use etf_data::DataValidator;

#[derive(Parser)]
#[command(name = "etf-collector")]
#[command(about = "ETF OHLCV 수집/업로드/검증 도구", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error). 없으면 RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 작업 제어 HTTP 서버 실행
    Serve,

    /// 전체 수집 작업을 포그라운드로 실행 (완료 0, 부분 2, 실패 1)
    Run,

    /// 지정 심볼만 재시도
    Retry {
        /// 쉼표로 구분 (예: "AAPL,NVDA")
        #[arg(long)]
        symbols: String,
    },

    /// 현재 작업 상태 출력
    Status {
        /// 작업이 끝날 때까지 대기하고 종료 상태를 종료 코드로 반환
        #[arg(long)]
        wait: bool,

        /// 대기 시 확인 간격 (초)
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,

        /// 진행 중 문서가 이 시간(초) 넘게 갱신되지 않으면 실행 프로세스가
        /// 종료된 것으로 보고 대기를 멈춤
        #[arg(long, default_value_t = 1800)]
        stale_secs: u64,
    },

    /// 내보내기 파일 하나 업로드
    Upload {
        file: PathBuf,
        symbol: String,
        /// 타임프레임 라벨 (예: "1일")
        timeframe: String,
    },

    /// 디렉토리의 `{SYMBOL}_{timeframe}.csv` 파일 모두 업로드
    UploadDir { dir: PathBuf },

    /// DB 테이블 검증
    Validate {
        /// 검증할 심볼 (없으면 설정의 심볼 목록)
        #[arg(long)]
        symbols: Option<String>,
    },

    /// 세션 파일 관리
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// 저장된 세션을 삭제하여 다음 실행에서 다시 로그인
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!(e))?;

    let config = ScraperConfig::from_env()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Run => run_full(config).await,
        Commands::Retry { symbols } => {
            let symbols = Symbol::parse_list(&symbols)?;
            run_retry(config, symbols).await
        }
        Commands::Status {
            wait,
            interval_secs,
            stale_secs,
        } => {
            show_status(
                &config,
                wait,
                Duration::from_secs(interval_secs.max(1)),
                Duration::from_secs(stale_secs),
            )
            .await
        }
        Commands::Upload {
            file,
            symbol,
            timeframe,
        } => {
            let symbol = Symbol::parse(&symbol)?;
            let timeframe: Timeframe = timeframe.parse()?;
            let handles = StoreHandles::connect(&config)?;
            let uploader = handles.uploader(&config);
            let result = uploader.upload(&symbol, timeframe, &file).await;
            handles.tunnel.close().await;

            let result = result?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::UploadDir { dir } => {
            let handles = StoreHandles::connect(&config)?;
            let uploader = handles.uploader(&config);
            let outcomes = uploader.upload_dir(&dir).await;
            handles.tunnel.close().await;

            let outcomes = outcomes?;
            let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
            info!(files = outcomes.len(), failed, "디렉토리 업로드 완료");
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Validate { symbols } => {
            let symbols = match symbols {
                Some(raw) => Symbol::parse_list(&raw)?,
                None => config.job.symbols.clone(),
            };
            validate(&config, &symbols).await
        }
        Commands::Session {
            command: SessionCommand::Reset,
        } => {
            let sessions = app::session_manager(&config)?;
            if sessions.reset().await? {
                info!(path = %sessions.path().display(), "세션 파일 삭제");
            } else {
                info!(path = %sessions.path().display(), "삭제할 세션 파일이 없습니다");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(status: JobStatus) -> ExitCode {
    ExitCode::from(u8::try_from(status.exit_code()).unwrap_or(1))
}

/// 실행기를 만들고 이전 프로세스의 실행 중 상태를 정리합니다.
async fn prepare_runner(config: &ScraperConfig) -> anyhow::Result<(Arc<JobRunner>, StoreHandles)> {
    let handles = StoreHandles::connect(config)?;
    let runner = Arc::new(app::build_runner(config, handles.uploader(config))?);
    runner.recover_stale().await?;
    Ok((runner, handles))
}

/// Ctrl+C 수신 시 실행 중인 작업에 중단을 요청합니다.
fn cancel_on_ctrl_c(runner: Arc<JobRunner>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C 핸들러 설치 실패");
            return;
        }
        warn!("Ctrl+C 수신, 진행 중인 단위가 끝나면 중단합니다");
        if let Err(e) = runner.cancel().await {
            warn!(error = %e, "중단 요청 실패");
        }
    });
}

async fn run_full(config: ScraperConfig) -> anyhow::Result<ExitCode> {
    let (runner, handles) = prepare_runner(&config).await?;
    let run = runner.start_full().await?;
    info!(job_id = %run.job_id, "=== 전체 수집 시작 ===");

    cancel_on_ctrl_c(runner.clone());
    let result = runner.execute(run).await;
    handles.tunnel.close().await;

    let status = result?;
    let doc = runner.snapshot();
    info!(
        job_id = %doc.job_id,
        status = %status,
        total_uploaded = doc.total_uploaded,
        total_rows = doc.total_rows,
        failed_symbols = ?doc.failed_symbols(),
        "=== 전체 수집 종료 ==="
    );
    Ok(exit_code(status))
}

async fn run_retry(config: ScraperConfig, symbols: Vec<Symbol>) -> anyhow::Result<ExitCode> {
    let (runner, handles) = prepare_runner(&config).await?;
    let run = runner.start_retry(&symbols).await?;
    info!(
        retry_id = run.retry_id().unwrap_or_default(),
        parent_job_id = %run.job_id,
        "=== 재시도 시작 ==="
    );

    cancel_on_ctrl_c(runner.clone());
    let result = runner.execute(run).await;
    handles.tunnel.close().await;

    let status = result?;
    Ok(exit_code(status))
}

fn print_view(view: &StatusView) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(view)?);
    Ok(())
}

async fn show_status(
    config: &ScraperConfig,
    wait: bool,
    interval: Duration,
    stale_after: Duration,
) -> anyhow::Result<ExitCode> {
    let store = app::document_store(config);
    let mut view = monitor::load_view(&store, &config.job.log_dir);

    if !wait {
        print_view(&view)?;
        return Ok(ExitCode::SUCCESS);
    }

    while view.is_active() {
        if view.is_stale(chrono::Utc::now(), stale_after) {
            warn!(
                job_id = view.job_id.as_deref().unwrap_or("-"),
                updated_at = %view.updated_at,
                "작업 문서가 오래 갱신되지 않았습니다 (실행 프로세스 종료 의심)"
            );
            print_view(&view)?;
            return Ok(ExitCode::FAILURE);
        }

        info!(
            job_id = view.job_id.as_deref().unwrap_or("-"),
            status = %view.status,
            retry_id = view.latest_retry.as_ref().map(|t| t.retry_id.as_str()).unwrap_or("-"),
            progress = format!("{}/{}", view.progress.current, view.progress.total),
            current_symbol = view.current_symbol.as_deref().unwrap_or("-"),
            "작업 진행 중"
        );
        tokio::time::sleep(interval).await;
        view = monitor::load_view(&store, &config.job.log_dir);
    }

    print_view(&view)?;
    Ok(exit_code(view.outcome()))
}

async fn validate(config: &ScraperConfig, symbols: &[Symbol]) -> anyhow::Result<ExitCode> {
    let handles = StoreHandles::connect(config)?;
    if let Err(e) = handles.uploader(config).check_connection().await {
        handles.tunnel.close().await;
        return Err(e).context("DB 연결 확인 실패");
    }

    let validator = DataValidator::new(handles.store.clone(), config.validation.clone());
    let report = validator.validate(symbols, chrono::Utc::now()).await;
    handles.tunnel.close().await;

    std::fs::create_dir_all(&config.job.log_dir)?;
    let path = report.save(&config.job.log_dir)?;
    info!(
        report = %path.display(),
        total = report.summary.total_tables,
        passed = report.summary.passed,
        failed = report.summary.failed,
        errors = report.summary.errors,
        "검증 완료"
    );

    if report.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(symbols = ?report.failed_symbols(), "검증 실패 심볼 (retry --symbols 대상)");
        Ok(ExitCode::FAILURE)
    }
}

// ==================== 서버 ====================

/// CORS 레이어 (`CORS_ORIGINS` 쉼표 구분, 없으면 모두 허용).
fn cors_layer() -> CorsLayer {
    let allow_origin = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                AllowOrigin::list(origins)
            }
        }
        _ => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any)
}

async fn serve(config: ScraperConfig) -> anyhow::Result<ExitCode> {
    let (runner, handles) = prepare_runner(&config).await?;
    let state = Arc::new(AppState::new(
        runner.clone(),
        app::document_store(&config),
        &config.job.log_dir,
    ));

    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(30),
            ))
            .layer(cors_layer()),
    );

    let addr: SocketAddr = config
        .server
        .addr()
        .parse()
        .with_context(|| format!("잘못된 서버 주소: {}", config.server.addr()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("작업 제어 서버 시작: http://{}", addr);

    let shutdown_token = CancellationToken::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    // 실행 중인 작업은 다음 단위 경계에서 종료됨
    if runner.is_running() {
        if let Err(e) = runner.cancel().await {
            warn!(error = %e, "종료 시 작업 중단 요청 실패");
        }
        while runner.is_running() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    handles.tunnel.close().await;
    info!("서버 종료");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Ctrl+C 핸들러 설치 실패");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM 핸들러 설치 실패");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
}
