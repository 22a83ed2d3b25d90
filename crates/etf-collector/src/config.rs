//! 환경변수 기반 설정 모듈.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::CollectorError;
use crate::Result;
use etf_core::{Symbol, Timeframe, DEFAULT_SYMBOLS};
use etf_data::{DatabaseConfig, TunnelConfig, UploadMode, ValidationConfig};

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// 데이터베이스 설정 (`DATABASE_URL`이 없으면 `None`)
    pub database: Option<DatabaseConfig>,
    /// SSH 터널 설정
    pub tunnel: TunnelConfig,
    /// 차트 서비스 설정
    pub upstream: UpstreamConfig,
    /// 세션 파일 설정
    pub session: SessionConfig,
    /// 다운로드 설정
    pub fetch: FetchConfig,
    /// 작업 설정
    pub job: JobConfig,
    /// HTTP 서버 설정
    pub server: ServerConfig,
    /// 데이터 검증 기준
    pub validation: ValidationConfig,
}

/// 차트 서비스 설정
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// 서비스 주소 (예: `https://www.tradingview.com`)
    pub base_url: String,
    /// 로그인 경로
    pub login_path: String,
    /// 차트 페이지 URL 템플릿 (`{base}`, `{symbol}`)
    pub chart_url_template: String,
    /// 내보내기 URL 템플릿 (`{base}`, `{symbol}`, `{range}`, `{interval}`)
    pub export_url_template: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// HTTP 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
}

/// 세션 파일 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 쿠키 저장 파일
    pub cookie_file: PathBuf,
}

/// 다운로드 설정
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// 내보내기 파일 저장 디렉토리
    pub download_dir: PathBuf,
    /// 단위당 다운로드 대기 시간 (초)
    pub timeout_secs: u64,
    /// 단위당 최대 시도 횟수
    pub max_attempts: u32,
    /// 재시도 간 대기 (밀리초)
    pub retry_delay_ms: u64,
    /// 단위 간 대기 (밀리초)
    pub request_delay_ms: u64,
}

/// 작업 설정
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// 작업 문서 경로
    pub document_path: PathBuf,
    /// 작업 로그 디렉토리
    pub log_dir: PathBuf,
    /// 처리 심볼 (처리 순서)
    pub symbols: Vec<Symbol>,
    /// 처리 타임프레임
    pub timeframes: Vec<Timeframe>,
    /// 업로드 방식
    pub upload_mode: UploadMode,
}

/// HTTP 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 단위당 시도 횟수 상한.
pub const MAX_ATTEMPTS_LIMIT: u32 = 3;

impl ScraperConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정을 만듭니다.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = &get;

        let database = get("DATABASE_URL").map(|url| DatabaseConfig {
            max_connections: env_var_parse(get, "DB_MAX_CONNECTIONS", 4),
            connect_timeout_secs: env_var_parse(get, "DB_CONNECT_TIMEOUT_SECS", 10),
            ..DatabaseConfig::new(url)
        });

        let tunnel_defaults = TunnelConfig::default();
        let tunnel = TunnelConfig {
            ssh_host: get("SSH_HOST"),
            ssh_user: get("SSH_USER"),
            ssh_port: env_var_parse(get, "SSH_PORT", tunnel_defaults.ssh_port),
            ssh_key_path: get("SSH_KEY_PATH").map(PathBuf::from),
            local_port: env_var_parse(get, "TUNNEL_LOCAL_PORT", tunnel_defaults.local_port),
            remote_host: get("TUNNEL_REMOTE_HOST").unwrap_or(tunnel_defaults.remote_host),
            remote_port: env_var_parse(get, "TUNNEL_REMOTE_PORT", tunnel_defaults.remote_port),
            use_existing: env_var_bool(get, "TUNNEL_USE_EXISTING", tunnel_defaults.use_existing),
            ready_timeout: Duration::from_secs(env_var_parse(get, "TUNNEL_READY_TIMEOUT_SECS", 15)),
        };

        let upstream = UpstreamConfig {
            base_url: get("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| "https://www.tradingview.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            login_path: get("UPSTREAM_LOGIN_PATH").unwrap_or_else(|| "/accounts/signin/".to_string()),
            chart_url_template: get("UPSTREAM_CHART_URL")
                .unwrap_or_else(|| "{base}/chart/?symbol={symbol}".to_string()),
            export_url_template: get("UPSTREAM_EXPORT_URL").unwrap_or_else(|| {
                "{base}/chart/export/?symbol={symbol}&range={range}&interval={interval}".to_string()
            }),
            username: get("TV_USERNAME").filter(|v| !v.is_empty()),
            password: get("TV_PASSWORD")
                .filter(|v| !v.is_empty())
                .map(|v| SecretString::new(v.into())),
            request_timeout_secs: env_var_parse(get, "UPSTREAM_REQUEST_TIMEOUT_SECS", 30),
        };

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string()));

        let session = SessionConfig {
            cookie_file: get("SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("cookies.json")),
        };

        let max_attempts: u32 = env_var_parse(get, "FETCH_MAX_ATTEMPTS", MAX_ATTEMPTS_LIMIT);
        let fetch = FetchConfig {
            download_dir: get("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("downloads")),
            timeout_secs: env_var_parse(get, "FETCH_TIMEOUT_SECS", 60),
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT),
            retry_delay_ms: env_var_parse(get, "FETCH_RETRY_DELAY_MS", 2000),
            request_delay_ms: env_var_parse(get, "FETCH_REQUEST_DELAY_MS", 1000),
        };

        let symbols = match get("SYMBOLS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Symbol::parse_list(&raw)
                .map_err(|e| CollectorError::Config(format!("SYMBOLS: {}", e)))?,
            None => DEFAULT_SYMBOLS
                .iter()
                .map(|s| Symbol::parse(s))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        let timeframes = match get("TIMEFRAMES").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Timeframe::parse_list(&raw)
                .map_err(|e| CollectorError::Config(format!("TIMEFRAMES: {}", e)))?,
            None => Timeframe::ALL.to_vec(),
        };
        let upload_mode = if env_var_bool(get, "UPLOAD_REPLACE_RANGE", false) {
            UploadMode::ReplaceRange
        } else {
            UploadMode::Upsert
        };
        let job = JobConfig {
            document_path: get("JOB_DOCUMENT")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("job_status.json")),
            log_dir: get("JOB_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            symbols,
            timeframes,
            upload_mode,
        };

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_var_parse(get, "SERVER_PORT", 8001),
        };

        let validation_defaults = ValidationConfig::default();
        let validation = ValidationConfig {
            max_null_ratio: env_var_parse(get, "VALIDATION_MAX_NULL_RATIO", validation_defaults.max_null_ratio),
            max_price_change: env_var_parse(
                get,
                "VALIDATION_MAX_PRICE_CHANGE",
                validation_defaults.max_price_change,
            ),
            recent_rows: env_var_parse(get, "VALIDATION_RECENT_ROWS", validation_defaults.recent_rows),
            max_age_days: env_var_parse(get, "VALIDATION_MAX_AGE_DAYS", validation_defaults.max_age_days),
            timeframes: match get("VALIDATION_TIMEFRAMES").filter(|v| !v.trim().is_empty()) {
                Some(raw) => Timeframe::parse_list(&raw)
                    .map_err(|e| CollectorError::Config(format!("VALIDATION_TIMEFRAMES: {}", e)))?,
                None => validation_defaults.timeframes,
            },
        };

        Ok(Self {
            database,
            tunnel,
            upstream,
            session,
            fetch,
            job,
            server,
            validation,
        })
    }

    /// DB 설정을 요구하는 명령에서 사용합니다.
    pub fn require_database(&self) -> Result<&DatabaseConfig> {
        self.database.as_ref().ok_or_else(|| {
            CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })
    }
}

impl FetchConfig {
    /// 다운로드 대기 시간을 Duration으로 반환
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 재시도 간 대기를 Duration으로 반환
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 단위 간 대기를 Duration으로 반환
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(get: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(get: &dyn Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    get(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ScraperConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ScraperConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.database.is_none());
        assert!(config.require_database().is_err());
        assert_eq!(config.job.symbols.len(), DEFAULT_SYMBOLS.len());
        assert_eq!(config.job.timeframes, Timeframe::ALL.to_vec());
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.session.cookie_file, PathBuf::from("data/cookies.json"));
        assert!(config.upstream.username.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://etf@127.0.0.1:5432/etf"),
            ("SYMBOLS", "AAPL, NVDA"),
            ("TIMEFRAMES", "1일,1주"),
            ("FETCH_MAX_ATTEMPTS", "10"),
            ("TUNNEL_USE_EXISTING", "false"),
            ("TV_PASSWORD", "hunter2"),
            ("UPLOAD_REPLACE_RANGE", "1"),
        ])
        .unwrap();

        assert_eq!(config.require_database().unwrap().max_connections, 4);
        let symbols: Vec<&str> = config.job.symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["AAPL", "NVDA"]);
        assert_eq!(config.job.timeframes, vec![Timeframe::Day1, Timeframe::Week1]);
        assert_eq!(config.fetch.max_attempts, MAX_ATTEMPTS_LIMIT);
        assert!(!config.tunnel.use_existing);
        assert_eq!(
            config.upstream.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
        assert_eq!(config.job.upload_mode, UploadMode::ReplaceRange);
    }

    #[test]
    fn test_invalid_symbol_list() {
        let err = config_from(&[("SYMBOLS", "AAPL,bad symbol")]).unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
    }
}
