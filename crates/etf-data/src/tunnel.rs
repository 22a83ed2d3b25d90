//! SSH 로컬 포워딩 터널.
//!
//! 저장소는 `127.0.0.1:{local_port}`로 접속하며, 이 포트는 SSH 로컬 포워딩으로
//! 원격 DB 포트에 연결됩니다. 이미 열린 터널이 있으면 재사용하고, 없으면
//! `ssh -N -L`을 자식 프로세스로 띄운 뒤 포트가 열릴 때까지 기다립니다.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DataError, Result};

/// 포트 확인 시 연결 시도 타임아웃.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
/// 터널 준비 확인 간격.
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// 터널 설정.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// SSH 서버 (없으면 새 터널을 만들지 않음)
    pub ssh_host: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_port: u16,
    pub ssh_key_path: Option<PathBuf>,
    /// 로컬 포워딩 포트
    pub local_port: u16,
    /// SSH 서버에서 본 DB 호스트
    pub remote_host: String,
    pub remote_port: u16,
    /// 열린 로컬 포트를 기존 터널로 간주하고 재사용
    pub use_existing: bool,
    /// 새 터널의 포트가 열리기까지 기다리는 시간
    pub ready_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ssh_host: None,
            ssh_user: None,
            ssh_port: 22,
            ssh_key_path: None,
            local_port: 5432,
            remote_host: "127.0.0.1".to_string(),
            remote_port: 5432,
            use_existing: true,
            ready_timeout: Duration::from_secs(15),
        }
    }
}

/// 터널 확보 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// 이미 열려 있던 포트를 재사용
    Existing,
    /// 이 프로세스가 띄운 SSH 터널
    Spawned,
}

/// 로컬 포트가 TCP 연결을 받는지 확인합니다.
pub async fn is_port_open(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// SSH 터널 관리자.
pub struct Tunnel {
    config: TunnelConfig,
    child: Mutex<Option<Child>>,
}

impl Tunnel {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// 터널을 사용할 수 있는 상태로 만듭니다.
    ///
    /// 열 수 없으면 `ConnectionUnavailable`.
    pub async fn ensure(&self) -> Result<TunnelState> {
        let port = self.config.local_port;
        let mut child = self.child.lock().await;

        if let Some(running) = child.as_mut() {
            match running.try_wait() {
                Ok(None) if is_port_open(port).await => return Ok(TunnelState::Spawned),
                Ok(None) => {}
                Ok(Some(status)) => {
                    warn!(%status, "SSH 터널 프로세스 종료됨");
                    *child = None;
                }
                Err(e) => {
                    warn!(error = %e, "SSH 터널 상태 확인 실패");
                    *child = None;
                }
            }
        }

        if child.is_none() && self.config.use_existing && is_port_open(port).await {
            info!(port, "기존 SSH 터널 사용");
            return Ok(TunnelState::Existing);
        }

        let Some(host) = self.config.ssh_host.as_deref() else {
            return Err(DataError::ConnectionUnavailable(format!(
                "로컬 포트 {}가 닫혀 있고 SSH 호스트가 설정되지 않았습니다",
                port
            )));
        };

        if child.is_none() {
            *child = Some(self.spawn(host)?);
        }

        let deadline = tokio::time::Instant::now() + self.config.ready_timeout;
        loop {
            if is_port_open(port).await {
                info!(port, host, "SSH 터널 연결됨");
                return Ok(TunnelState::Spawned);
            }
            if let Some(running) = child.as_mut() {
                if let Ok(Some(status)) = running.try_wait() {
                    *child = None;
                    return Err(DataError::ConnectionUnavailable(format!(
                        "SSH 터널 프로세스가 종료되었습니다 ({})",
                        status
                    )));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DataError::ConnectionUnavailable(format!(
                    "SSH 터널 포트 {} 대기 시간 초과",
                    port
                )));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    fn spawn(&self, host: &str) -> Result<Child> {
        let c = &self.config;
        let destination = match c.ssh_user.as_deref() {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };

        let mut command = Command::new("ssh");
        command
            .arg("-N")
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "ServerAliveInterval=30"])
            .arg("-p")
            .arg(c.ssh_port.to_string())
            .arg("-L")
            .arg(format!("{}:{}:{}", c.local_port, c.remote_host, c.remote_port));
        if let Some(key) = &c.ssh_key_path {
            command.arg("-i").arg(key);
        }
        command
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        info!(host, local_port = c.local_port, remote_port = c.remote_port, "SSH 터널 생성 중...");
        command
            .spawn()
            .map_err(|e| DataError::ConnectionUnavailable(format!("ssh 실행 실패: {}", e)))
    }

    /// 이 프로세스가 띄운 터널을 종료합니다.
    pub async fn close(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "SSH 터널 종료 실패");
            } else {
                info!("SSH 터널 종료");
            }
        }
    }
}
