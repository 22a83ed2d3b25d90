//! tracing 기반 운영 로깅 초기화.
//!
//! 운영자용 로그(stdout)를 담당합니다. 대시보드가 읽는 작업 로그 파일은
//! [`crate::joblog`]가 별도로 기록합니다.
//!
//! 지원 형식:
//! - **pretty**: 개발용 여러 줄 형식
//! - **json**: 로그 수집기용 JSON 형식
//! - **compact**: cron 출력용 한 줄 형식

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 여러 줄 형식
    #[default]
    Pretty,
    /// JSON 형식
    Json,
    /// 한 줄 형식
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("알 수 없는 로그 형식: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 필터 지시자 (예: "info", "etf_collector=debug,sqlx=warn")
    pub level: String,
    /// 출력 형식
    pub format: LogFormat,
    /// span 진입/종료 이벤트 출력 여부
    pub with_span_events: bool,
    /// 파일명/줄 번호 출력 여부
    pub with_file: bool,
    /// 모듈 경로 출력 여부
    pub with_target: bool,
    /// ANSI 색상 사용 여부
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl LogConfig {
    /// 주어진 레벨로 설정을 생성합니다.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// `RUST_LOG`, `LOG_FORMAT`, `NO_COLOR` 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            level,
            format,
            with_ansi: std::env::var_os("NO_COLOR").is_none(),
            ..Default::default()
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_file)
            .with_target(self.with_target)
            .with_ansi(self.with_ansi)
            .with_span_events(self.span_events());

        match self.format {
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Json => base.json().with_ansi(false).boxed(),
            LogFormat::Compact => base.compact().boxed(),
        }
    }
}

/// 주어진 설정으로 전역 subscriber를 설치합니다.
///
/// `RUST_LOG`가 설정되어 있으면 `config.level`보다 우선합니다.
///
/// ```no_run
/// use etf_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("debug").with_format(LogFormat::Json)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(env_filter)
        .try_init()?;

    tracing::debug!(format = ?config.format, level = %config.level, "로깅 초기화 완료");
    Ok(())
}

/// 작업/심볼/타임프레임 필드가 붙은 span을 생성합니다.
///
/// ```
/// let span = etf_core::unit_span!("fetch", "full_20250101_000000", "AAPL", "1일");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! unit_span {
    ($name:expr, $job_id:expr) => {
        tracing::info_span!($name, job_id = %$job_id)
    };
    ($name:expr, $job_id:expr, $symbol:expr) => {
        tracing::info_span!($name, job_id = %$job_id, symbol = %$symbol)
    };
    ($name:expr, $job_id:expr, $symbol:expr, $timeframe:expr) => {
        tracing::info_span!(
            $name,
            job_id = %$job_id,
            symbol = %$symbol,
            timeframe = %$timeframe
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("etf_collector=debug")
            .with_format(LogFormat::Compact)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, "etf_collector=debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }
}
