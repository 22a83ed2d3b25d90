//! 차트 서비스 로그인 세션 관리.
//!
//! 로그인 쿠키를 파일에 저장하고 다음 실행에서 재사용합니다.
//! - 파일이 있고 형식이 올바르면 로그인 없이 사용
//! - 세션이 무효로 판정되면 한 번 다시 로그인하고 파일을 덮어씀
//! - 파일 삭제(`session reset`)가 수동 복구 방법

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::AuthError;

/// 로그인 세션 쿠키 이름.
pub const SESSION_COOKIE: &str = "sessionid";

/// 저장된 쿠키 하나.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// 세션 파일 내용.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub saved_at: DateTime<Utc>,
    pub cookies: Vec<StoredCookie>,
}

/// 다운로드 요청에 사용하는 세션.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHandle {
    cookies: Arc<Vec<StoredCookie>>,
    saved_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn new(cookies: Vec<StoredCookie>, saved_at: DateTime<Utc>) -> Self {
        Self {
            cookies: Arc::new(cookies),
            saved_at,
        }
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.cookies
    }

    pub fn saved_at(&self) -> DateTime<Utc> {
        self.saved_at
    }

    /// `Cookie` 요청 헤더 값 (`a=1; b=2`).
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 로그인 수행자.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 새로 로그인하고 세션 쿠키를 반환합니다.
    async fn login(&self) -> Result<Vec<StoredCookie>, AuthError>;
}

/// 로그인 응답 본문.
#[derive(Debug, Deserialize)]
struct SigninResponse {
    #[serde(default)]
    error: Option<String>,
}

/// 폼 로그인 기반 인증.
pub struct HttpAuthenticator {
    client: Client,
    config: UpstreamConfig,
}

impl HttpAuthenticator {
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `AuthError::Network`를 반환합니다.
    pub fn new(config: UpstreamConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AuthError::Network(format!("HTTP client 생성 실패: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn login(&self) -> Result<Vec<StoredCookie>, AuthError> {
        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_ref())
        else {
            return Err(AuthError::MissingCredentials);
        };

        let url = format!("{}{}", self.config.base_url, self.config.login_path);
        info!(url = %url, "차트 서비스 로그인 중...");

        let form = [
            ("username", username),
            ("password", password.expose_secret()),
            ("remember", "on"),
        ];
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::REFERER, &self.config.base_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let cookies: Vec<StoredCookie> = response
            .cookies()
            .map(|c| StoredCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
                domain: c.domain().map(str::to_string),
                path: c.path().map(str::to_string),
            })
            .collect();
        let body = response.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Rejected(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(AuthError::FlowChanged(format!("HTTP {}", status)));
        }

        if let Ok(signin) = serde_json::from_str::<SigninResponse>(&body) {
            if let Some(error) = signin.error.filter(|e| !e.is_empty()) {
                return Err(AuthError::Rejected(error));
            }
        }

        if !cookies.iter().any(|c| c.name == SESSION_COOKIE) {
            return Err(AuthError::FlowChanged(format!(
                "로그인 응답에 {} 쿠키가 없습니다",
                SESSION_COOKIE
            )));
        }

        info!(cookies = cookies.len(), "로그인 성공");
        Ok(cookies)
    }
}

/// 세션 파일과 로그인을 관리합니다.
pub struct SessionManager {
    path: PathBuf,
    authenticator: Arc<dyn Authenticator>,
    current: Mutex<Option<SessionHandle>>,
}

impl SessionManager {
    pub fn new(path: impl Into<PathBuf>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            path: path.into(),
            authenticator,
            current: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 세션을 확보합니다.
    ///
    /// 메모리 → 세션 파일 → 새 로그인 순서로 시도합니다.
    pub async fn acquire(&self) -> Result<SessionHandle, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref() {
            return Ok(handle.clone());
        }

        if let Some(file) = read_session_file(&self.path) {
            debug!(path = %self.path.display(), saved_at = %file.saved_at, "저장된 세션 사용");
            let handle = SessionHandle::new(file.cookies, file.saved_at);
            *current = Some(handle.clone());
            return Ok(handle);
        }

        let handle = self.login_and_save().await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// 무효 판정된 세션을 버리고 다시 로그인합니다.
    pub async fn refresh(&self) -> Result<SessionHandle, AuthError> {
        let mut current = self.current.lock().await;
        warn!(path = %self.path.display(), "세션이 무효하여 다시 로그인합니다");
        *current = None;
        let handle = self.login_and_save().await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    async fn login_and_save(&self) -> Result<SessionHandle, AuthError> {
        let cookies = self.authenticator.login().await?;
        let file = SessionFile {
            saved_at: Utc::now(),
            cookies,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(etf_core::CoreError::from)?;
        }
        etf_core::write_json_atomic(&self.path, &file)?;
        info!(path = %self.path.display(), "세션 파일 저장");
        Ok(SessionHandle::new(file.cookies, file.saved_at))
    }

    /// 세션 파일을 삭제합니다. 파일이 있었으면 `true`.
    pub async fn reset(&self) -> std::io::Result<bool> {
        *self.current.lock().await = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 세션 파일을 읽습니다. 없거나 손상되었거나 쿠키가 비어 있으면 `None`.
pub fn read_session_file(path: &Path) -> Option<SessionFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "세션 파일 읽기 실패");
            return None;
        }
    };
    match serde_json::from_str::<SessionFile>(&raw) {
        Ok(file) if !file.cookies.is_empty() => Some(file),
        Ok(_) => {
            warn!(path = %path.display(), "세션 파일에 쿠키가 없습니다");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "세션 파일 형식 오류");
            None
        }
    }
}
