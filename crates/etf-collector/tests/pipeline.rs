//! 수집 → 업로드 → 작업 추적 통합 테스트.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use etf_collector::error::{AuthError, FetchError};
use etf_collector::session::{SessionFile, SESSION_COOKIE};
use etf_collector::{
    Authenticator, ChartExporter, Fetcher, JobRunner, RunnerSettings, SessionHandle,
    SessionManager, StoredCookie, Tracker,
};
use etf_core::{
    joblog, monitor, DocumentStore, JobLog, JobStatus, StatusView, Symbol, SymbolStatus,
    Timeframe, TimeframeStatus, ViewSource,
};
use etf_data::{MemoryOhlcvStore, TableName, Uploader};

// ==================== 가짜 구현 ====================

#[derive(Clone)]
enum Behavior {
    /// n행짜리 CSV 저장
    Rows(usize),
    /// 끝나지 않음 (다운로드 시간 초과)
    Hang,
    /// 게이트가 열릴 때까지 대기 후 n행
    Gated(usize),
}

struct ScriptedExporter {
    script: Mutex<HashMap<(String, Timeframe), Behavior>>,
    calls: Mutex<Vec<(String, Timeframe)>>,
    gate: Notify,
}

impl ScriptedExporter {
    fn new(script: &[(&str, Timeframe, Behavior)]) -> Arc<Self> {
        let script = script
            .iter()
            .map(|(s, tf, b)| ((s.to_string(), *tf), b.clone()))
            .collect();
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            gate: Notify::new(),
        })
    }

    fn set(&self, symbol: &str, timeframe: Timeframe, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .insert((symbol.to_string(), timeframe), behavior);
    }

    fn calls(&self) -> Vec<(String, Timeframe)> {
        self.calls.lock().unwrap().clone()
    }
}

fn write_csv(dest: &Path, rows: usize) {
    let mut body = String::from("time,open,high,low,close,Volume\n");
    for i in 0..rows {
        let time = 1_704_067_200 + i as i64 * 86_400;
        let price = 100.0 + i as f64 * 0.1;
        body.push_str(&format!(
            "{},{},{},{},{},{}\n",
            time,
            price,
            price + 1.0,
            price - 1.0,
            price + 0.5,
            1000 + i
        ));
    }
    std::fs::write(dest, body).unwrap();
}

#[async_trait]
impl ChartExporter for ScriptedExporter {
    async fn export(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        session: &SessionHandle,
        dest: &Path,
    ) -> Result<(), FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), timeframe));
        if session.cookie_header().contains("stale") {
            return Err(FetchError::SessionInvalid);
        }

        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or(Behavior::Rows(10));
        match behavior {
            Behavior::Rows(n) => write_csv(dest, n),
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Gated(n) => {
                self.gate.notified().await;
                write_csv(dest, n);
            }
        }
        Ok(())
    }
}

struct FakeAuth {
    logins: AtomicU32,
    reject: bool,
}

impl FakeAuth {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicU32::new(0),
            reject: false,
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            logins: AtomicU32::new(0),
            reject: true,
        })
    }
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn login(&self) -> Result<Vec<StoredCookie>, AuthError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(AuthError::Rejected("Invalid username or password".to_string()));
        }
        Ok(vec![StoredCookie {
            name: SESSION_COOKIE.to_string(),
            value: format!("fresh-{}", n),
            domain: None,
            path: None,
        }])
    }
}

// ==================== 하네스 ====================

struct Harness {
    dir: TempDir,
    runner: Arc<JobRunner>,
    store: Arc<MemoryOhlcvStore>,
    exporter: Arc<ScriptedExporter>,
    auth: Arc<FakeAuth>,
}

struct Options {
    symbols: Vec<&'static str>,
    timeframes: Vec<Timeframe>,
    max_attempts: u32,
    request_delay: Duration,
    stale_session: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL", "NVDA"],
            timeframes: vec![Timeframe::Day1, Timeframe::Week1],
            max_attempts: 2,
            request_delay: Duration::ZERO,
            stale_session: false,
        }
    }
}

fn harness(exporter: Arc<ScriptedExporter>, auth: Arc<FakeAuth>, options: Options) -> Harness {
    let dir = TempDir::new().unwrap();
    let session_path = dir.path().join("session.json");
    if options.stale_session {
        let file = SessionFile {
            saved_at: chrono::Utc::now(),
            cookies: vec![StoredCookie {
                name: SESSION_COOKIE.to_string(),
                value: "stale".to_string(),
                domain: None,
                path: None,
            }],
        };
        std::fs::write(&session_path, serde_json::to_string(&file).unwrap()).unwrap();
    }

    let tracker = Tracker::load(
        DocumentStore::new(dir.path().join("job_status.json")),
        JobLog::new(dir.path().join("logs")),
    );
    let sessions = Arc::new(SessionManager::new(session_path, auth.clone()));
    let fetcher = Fetcher::new(
        exporter.clone(),
        dir.path().join("downloads"),
        Duration::from_secs(60),
    );
    let store = Arc::new(MemoryOhlcvStore::new());
    let uploader = Uploader::new(store.clone());
    let settings = RunnerSettings {
        symbols: options
            .symbols
            .iter()
            .map(|s| Symbol::parse(s).unwrap())
            .collect(),
        timeframes: options.timeframes,
        max_attempts: options.max_attempts,
        retry_delay: Duration::ZERO,
        request_delay: options.request_delay,
    };
    let runner = Arc::new(JobRunner::new(tracker, sessions, fetcher, uploader, settings));

    Harness {
        dir,
        runner,
        store,
        exporter,
        auth,
    }
}

fn scenario_exporter() -> Arc<ScriptedExporter> {
    ScriptedExporter::new(&[
        ("AAPL", Timeframe::Day1, Behavior::Rows(100)),
        ("AAPL", Timeframe::Week1, Behavior::Hang),
        ("NVDA", Timeframe::Day1, Behavior::Rows(50)),
        ("NVDA", Timeframe::Week1, Behavior::Rows(20)),
    ])
}

fn symbol(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

// ==================== 테스트 ====================

#[tokio::test(start_paused = true)]
async fn test_partial_job_scenario() {
    let h = harness(scenario_exporter(), FakeAuth::new(), Options::default());

    let run = h.runner.start_full().await.unwrap();
    let status = h.runner.execute(run).await.unwrap();
    assert_eq!(status, JobStatus::Partial);

    let doc = h.runner.snapshot();
    assert_eq!(doc.status, JobStatus::Partial);
    assert_eq!(doc.symbols["AAPL"].status, SymbolStatus::Partial);
    assert_eq!(doc.symbols["NVDA"].status, SymbolStatus::Completed);
    assert_eq!(doc.total_rows, 170);
    assert_eq!(doc.total_uploaded, 3);

    let failed = &doc.symbols["AAPL"].timeframes[&Timeframe::Week1];
    assert_eq!(failed.status, TimeframeStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert!(failed.error.as_deref().unwrap().contains("시간 초과"));

    // 긴 범위부터 처리, 시간 초과 단위는 두 번 시도
    assert_eq!(
        h.exporter.calls(),
        vec![
            ("AAPL".to_string(), Timeframe::Week1),
            ("AAPL".to_string(), Timeframe::Week1),
            ("AAPL".to_string(), Timeframe::Day1),
            ("NVDA".to_string(), Timeframe::Week1),
            ("NVDA".to_string(), Timeframe::Day1),
        ]
    );

    let aapl_daily = h.store.rows(&TableName::new(&symbol("AAPL"), Timeframe::Day1)).await;
    assert_eq!(aapl_daily.len(), 100);
    assert_eq!(doc.failed_symbols(), vec!["AAPL".to_string()]);

    // 디스크의 문서도 같은 결과
    let on_disk = DocumentStore::new(h.dir.path().join("job_status.json"))
        .read()
        .unwrap();
    assert_eq!(on_disk, doc);
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_completes_failed_symbol() {
    let h = harness(scenario_exporter(), FakeAuth::new(), Options::default());
    let run = h.runner.start_full().await.unwrap();
    h.runner.execute(run).await.unwrap();
    let before = h.runner.snapshot();

    h.exporter.set("AAPL", Timeframe::Week1, Behavior::Rows(30));
    let run = h.runner.start_retry(&[symbol("AAPL")]).await.unwrap();
    let retry_id = run.retry_id().unwrap().to_string();
    assert_eq!(run.job_id, before.job_id);

    let status = h.runner.execute(run).await.unwrap();
    assert_eq!(status, JobStatus::Completed);

    let after = h.runner.snapshot();
    assert_eq!(after.job_id, before.job_id);
    assert_eq!(after.status, JobStatus::Partial);
    assert_eq!(after.symbols["AAPL"].status, SymbolStatus::Completed);
    assert_eq!(after.symbols["NVDA"], before.symbols["NVDA"]);
    assert_eq!(after.total_rows, 200);

    assert_eq!(after.retry_tasks.len(), 1);
    assert_eq!(after.retry_tasks[0].retry_id, retry_id);
    assert_eq!(after.retry_tasks[0].status, JobStatus::Completed);

    // 성공한 단위는 다시 받지 않음
    let retried: Vec<_> = h.exporter.calls().into_iter().skip(5).collect();
    assert_eq!(retried, vec![("AAPL".to_string(), Timeframe::Week1)]);
}

#[tokio::test]
async fn test_status_view_follows_retry() {
    let h = harness(scenario_exporter(), FakeAuth::new(), Options::default());
    let run = h.runner.start_full().await.unwrap();
    tokio::time::pause();
    h.runner.execute(run).await.unwrap();
    tokio::time::resume();

    let doc_store = DocumentStore::new(h.dir.path().join("job_status.json"));
    let log_dir = h.dir.path().join("logs");

    h.exporter.set("AAPL", Timeframe::Week1, Behavior::Gated(30));
    let run = h.runner.start_retry(&[symbol("AAPL")]).await.unwrap();
    let handle = h.runner.spawn(run);
    let mut rx = h.runner.subscribe();
    rx.wait_for(|doc| doc.current_symbol.is_some()).await.unwrap();

    let view = monitor::load_view(&doc_store, &log_dir);
    assert_eq!(view.status, JobStatus::Partial);
    assert!(view.is_active());
    assert!(view.latest_retry.is_some());

    h.exporter.gate.notify_one();
    handle.await.unwrap();

    let view = monitor::load_view(&doc_store, &log_dir);
    assert!(!view.is_active());
    assert_eq!(view.status, JobStatus::Partial);
    assert_eq!(view.outcome(), JobStatus::Completed);
}

#[tokio::test]
async fn test_retry_rejected_while_running() {
    let exporter = ScriptedExporter::new(&[("AAPL", Timeframe::Day1, Behavior::Gated(5))]);
    let h = harness(
        exporter,
        FakeAuth::new(),
        Options {
            symbols: vec!["AAPL"],
            timeframes: vec![Timeframe::Day1],
            ..Options::default()
        },
    );

    // 이전 작업 기록
    h.exporter.set("AAPL", Timeframe::Day1, Behavior::Rows(5));
    let run = h.runner.start_full().await.unwrap();
    h.runner.execute(run).await.unwrap();

    h.exporter.set("AAPL", Timeframe::Day1, Behavior::Gated(5));
    let run = h.runner.start_full().await.unwrap();
    let handle = h.runner.spawn(run);
    let mut rx = h.runner.subscribe();
    rx.wait_for(|doc| doc.current_symbol.is_some()).await.unwrap();
    assert!(h.runner.is_running());

    let err = h.runner.start_retry(&[symbol("AAPL")]).await.unwrap_err();
    assert!(err.is_conflict());
    let err = h.runner.start_full().await.unwrap_err();
    assert!(err.is_conflict());

    h.exporter.gate.notify_one();
    handle.await.unwrap();

    let doc = h.runner.snapshot();
    assert_eq!(doc.status, JobStatus::Completed);
    assert!(doc.retry_tasks.is_empty());
}

#[tokio::test]
async fn test_cancel_between_units() {
    let h = harness(
        ScriptedExporter::new(&[]),
        FakeAuth::new(),
        Options {
            request_delay: Duration::from_secs(30),
            ..Options::default()
        },
    );

    let run = h.runner.start_full().await.unwrap();
    let handle = h.runner.spawn(run);
    let mut rx = h.runner.subscribe();
    rx.wait_for(|doc| doc.total_uploaded == 1).await.unwrap();
    h.runner.cancel().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let doc = h.runner.snapshot();
    assert!(doc.cancelled);
    assert_eq!(doc.status, JobStatus::Partial);
    assert_eq!(doc.total_uploaded, 1);
    assert_eq!(doc.symbols["AAPL"].status, SymbolStatus::Partial);
    assert_eq!(doc.symbols["NVDA"].status, SymbolStatus::Pending);
    assert!(doc.symbols["NVDA"]
        .timeframes
        .values()
        .all(|t| t.status == TimeframeStatus::Pending));
    assert!(matches!(
        h.runner.cancel().await,
        Err(etf_collector::CollectorError::NotRunning)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_log_fallback_matches_document() {
    let h = harness(scenario_exporter(), FakeAuth::new(), Options::default());
    let run = h.runner.start_full().await.unwrap();
    h.runner.execute(run).await.unwrap();

    let doc_path = h.dir.path().join("job_status.json");
    let log_dir = h.dir.path().join("logs");
    let store = DocumentStore::new(&doc_path);
    let from_doc = monitor::load_view(&store, &log_dir);
    assert_eq!(from_doc.source, ViewSource::Document);

    std::fs::remove_file(&doc_path).unwrap();
    let from_log = monitor::load_view(&store, &log_dir);
    assert_eq!(from_log.source, ViewSource::Log);
    assert_eq!(from_log.counts, from_doc.counts);
    assert_eq!(from_log.status, from_doc.status);
    assert_eq!(from_log.total_rows, 170);

    let entries = joblog::read_entries(&log_dir).unwrap();
    let replayed = joblog::replay(&entries).unwrap();
    assert_eq!(
        StatusView::from_document(&replayed, ViewSource::Log).symbols,
        from_doc.symbols
    );
    assert!(entries
        .iter()
        .any(|e| e.level == etf_core::LogLevel::Warning && e.symbol.as_deref() == Some("AAPL")));
}

#[tokio::test]
async fn test_stale_session_triggers_single_relogin() {
    let h = harness(
        ScriptedExporter::new(&[]),
        FakeAuth::new(),
        Options {
            symbols: vec!["AAPL"],
            timeframes: vec![Timeframe::Day1],
            stale_session: true,
            ..Options::default()
        },
    );

    let run = h.runner.start_full().await.unwrap();
    let status = h.runner.execute(run).await.unwrap();
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 1);
    assert_eq!(h.exporter.calls().len(), 2);
}

#[tokio::test]
async fn test_relogin_keeps_attempt_budget() {
    let h = harness(
        ScriptedExporter::new(&[]),
        FakeAuth::new(),
        Options {
            symbols: vec!["AAPL"],
            timeframes: vec![Timeframe::Day1],
            max_attempts: 1,
            stale_session: true,
            ..Options::default()
        },
    );

    let run = h.runner.start_full().await.unwrap();
    assert_eq!(h.runner.execute(run).await.unwrap(), JobStatus::Completed);

    let unit = &h.runner.snapshot().symbols["AAPL"].timeframes[&Timeframe::Day1];
    assert_eq!(unit.status, TimeframeStatus::Success);
    assert_eq!(unit.attempts, 1);
    assert_eq!(h.auth.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_relogin_closes_unit() {
    let h = harness(
        ScriptedExporter::new(&[]),
        FakeAuth::rejecting(),
        Options {
            stale_session: true,
            ..Options::default()
        },
    );

    let run = h.runner.start_full().await.unwrap();
    let err = h.runner.execute(run).await.unwrap_err();
    assert!(matches!(err, etf_collector::CollectorError::Auth(_)));

    let doc = h.runner.snapshot();
    assert_eq!(doc.status, JobStatus::Failed);
    assert_eq!(doc.current_symbol, None);
    let aapl = &doc.symbols["AAPL"];
    assert_eq!(aapl.status, SymbolStatus::Failed);
    assert_eq!(aapl.timeframes[&Timeframe::Week1].status, TimeframeStatus::Failed);
    assert_eq!(aapl.timeframes[&Timeframe::Day1].status, TimeframeStatus::Pending);
    assert_eq!(doc.symbols["NVDA"].status, SymbolStatus::Pending);
    assert_eq!(doc.progress().current, 1);

    // 로그로 재구성해도 같은 상태
    let entries = joblog::read_entries(&h.dir.path().join("logs")).unwrap();
    let replayed = joblog::replay(&entries).unwrap();
    assert_eq!(replayed.symbols["AAPL"].status, SymbolStatus::Failed);
    assert_eq!(
        StatusView::from_document(&replayed, ViewSource::Log).counts,
        StatusView::from_document(&doc, ViewSource::Document).counts
    );
}

#[tokio::test]
async fn test_login_failure_is_fatal() {
    let h = harness(
        ScriptedExporter::new(&[]),
        FakeAuth::rejecting(),
        Options::default(),
    );

    let run = h.runner.start_full().await.unwrap();
    let err = h.runner.execute(run).await.unwrap_err();
    assert!(matches!(err, etf_collector::CollectorError::Auth(AuthError::Rejected(_))));

    let doc = h.runner.snapshot();
    assert_eq!(doc.status, JobStatus::Failed);
    assert!(doc.error.as_deref().unwrap().contains("로그인 거부"));
    assert!(h.exporter.calls().is_empty());
    assert!(!h.runner.is_running());
}

#[tokio::test]
async fn test_stale_running_document_recovered() {
    let h = harness(ScriptedExporter::new(&[]), FakeAuth::new(), Options::default());
    // 실행하지 않고 잠금만 놓아 비정상 종료를 흉내 냄
    let run = h.runner.start_full().await.unwrap();
    drop(run);

    let tracker = Tracker::load(
        DocumentStore::new(h.dir.path().join("job_status.json")),
        JobLog::new(h.dir.path().join("logs")),
    );
    assert_eq!(tracker.document().status, JobStatus::Pending);
    let restarted = JobRunner::new(
        tracker,
        Arc::new(SessionManager::new(h.dir.path().join("session.json"), h.auth.clone())),
        Fetcher::new(h.exporter.clone(), h.dir.path().join("downloads"), Duration::from_secs(60)),
        Uploader::new(h.store.clone()),
        RunnerSettings {
            symbols: vec![symbol("AAPL")],
            timeframes: vec![Timeframe::Day1],
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
        },
    );

    assert!(restarted.recover_stale().await.unwrap());
    assert_eq!(restarted.snapshot().status, JobStatus::Failed);
    assert!(!restarted.recover_stale().await.unwrap());

    let run = restarted.start_full().await.unwrap();
    assert_eq!(restarted.execute(run).await.unwrap(), JobStatus::Completed);
}
