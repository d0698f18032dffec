//! Tor identity management: control-port rotation, egress verification and
//! the pre-flight reachability check for anonymized runs.

pub mod control;

use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::TorConfig;
use crate::error::{ReconError, Result};
pub use control::{CircuitState, ControlReply, ControlSession};

pub const IP_LOG_FILE: &str = "scan_tor_ip.txt";

/// What one rotation request achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub state: CircuitState,
    pub verified_ip: Option<String>,
}

#[derive(Deserialize)]
struct EchoBody {
    origin: String,
}

/// Pulls the address out of an IP-echo response: `{"origin": "..."}` or a bare address.
pub fn parse_echo_body(body: &str) -> Option<String> {
    if let Ok(echo) = serde_json::from_str::<EchoBody>(body) {
        let ip = echo.origin.split(',').next().unwrap_or_default().trim().to_string();
        return (!ip.is_empty()).then_some(ip);
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.contains(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Serializes identity rotation for the whole run. Every request opens, uses and
/// closes its own [`ControlSession`]; the mutex keeps two stages from rotating at once.
pub struct CircuitController {
    config: TorConfig,
    rotation: Mutex<()>,
}

impl CircuitController {
    pub fn new(config: TorConfig) -> Self {
        Self { config, rotation: Mutex::new(()) }
    }

    pub fn config(&self) -> &TorConfig {
        &self.config
    }

    /// Both the SOCKS entry and the control port must accept TCP connections.
    /// Read-only; an `Err` here means the run must not start.
    pub async fn check_prerequisites(&self) -> Result<()> {
        println!("[*] Checking Tor prerequisites...");
        let limit = Duration::from_secs(self.config.probe_timeout_secs);
        for (label, addr) in [("SOCKS proxy", &self.config.socks_addr), ("ControlPort", &self.config.control_addr)] {
            match tokio::time::timeout(limit, TcpStream::connect(addr.as_str())).await {
                Ok(Ok(_)) => println!("[+] Tor {} ({}) is reachable.", label, addr),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Tor {} ({}) is not reachable", label, addr);
                    return Err(ReconError::FatalPrecondition(format!("Tor {} at {} is not reachable", label, addr)));
                }
                Err(_) => {
                    tracing::error!("Tor {} ({}) did not answer within {:?}", label, addr, limit);
                    return Err(ReconError::FatalPrecondition(format!("Tor {} at {} timed out", label, addr)));
                }
            }
        }
        Ok(())
    }

    /// Requests a new identity and records the resulting egress address in
    /// `out_dir/scan_tor_ip.txt`. A failed verification still counts as a rotation.
    pub async fn rotate(&self, out_dir: &Path) -> Result<Rotation> {
        let _turn = self.rotation.lock().await;
        tracing::info!("Requesting new Tor identity...");

        let state = self.request_newnym().await.map_err(|e| {
            tracing::error!("Tor rotation aborted: {}", e);
            e
        })?;
        tracing::info!("Tor identity renewed");

        tokio::time::sleep(Duration::from_secs(self.config.grace_period_secs)).await;

        match self.egress_ip().await {
            Ok(ip) => {
                self.log_ip(out_dir, &ip).await;
                tracing::info!("New Tor egress IP appears to be {}", ip);
                Ok(Rotation { state: CircuitState::Verified, verified_ip: Some(ip) })
            }
            Err(e) => {
                tracing::warn!("Could not verify new Tor egress IP: {}", e);
                Ok(Rotation { state, verified_ip: None })
            }
        }
    }

    async fn request_newnym(&self) -> Result<CircuitState> {
        let mut session = ControlSession::connect(&self.config.control_addr).await?;
        let cookie = tokio::fs::read(&self.config.cookie_path).await.map_err(|e| {
            ReconError::Protocol(format!("cannot read control cookie {}: {}", self.config.cookie_path.display(), e))
        })?;
        session.authenticate(&cookie).await?;
        session.signal_newnym().await?;
        Ok(session.state())
    }

    /// Current exit address as seen through the SOCKS proxy.
    pub async fn egress_ip(&self) -> Result<String> {
        let proxy = Proxy::all(self.config.socks_proxy_url())
            .map_err(|e| ReconError::Protocol(format!("invalid socks proxy: {}", e)))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(self.config.echo_timeout_secs))
            .build()
            .map_err(|e| ReconError::Protocol(format!("cannot build echo client: {}", e)))?;
        let body = client
            .get(&self.config.ip_echo_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ReconError::Protocol(format!("ip echo request failed: {}", e)))?
            .text()
            .await
            .map_err(|e| ReconError::Protocol(format!("ip echo body unreadable: {}", e)))?;
        parse_echo_body(&body).ok_or_else(|| ReconError::parse("ip echo response", body.trim()))
    }

    async fn log_ip(&self, out_dir: &Path, ip: &str) {
        let path = out_dir.join(IP_LOG_FILE);
        let line = format!("{} - {}\n", chrono::Local::now().to_rfc3339(), ip);
        let written = async {
            let mut f = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            f.write_all(line.as_bytes()).await?;
            f.flush().await
        };
        if let Err(e) = written.await {
            tracing::error!(error = %e, path = %path.display(), "failed to append to tor ip log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::control::tests::fake_control_port;
    use super::*;
    use crate::utils::test_dir;
    use tokio::net::TcpListener;

    fn config_for(control_addr: String, cookie: &Path) -> TorConfig {
        TorConfig {
            control_addr,
            // nothing listens here, so verification fails fast
            socks_addr: "127.0.0.1:1".to_string(),
            cookie_path: cookie.to_path_buf(),
            ip_echo_url: "http://127.0.0.1:1/ip".to_string(),
            grace_period_secs: 0,
            probe_timeout_secs: 1,
            echo_timeout_secs: 1,
        }
    }

    #[test]
    fn echo_bodies() {
        assert_eq!(parse_echo_body("{\n  \"origin\": \"185.220.101.4\"\n}\n").as_deref(), Some("185.220.101.4"));
        assert_eq!(parse_echo_body("{\"origin\": \"1.1.1.1, 2.2.2.2\"}").as_deref(), Some("1.1.1.1"));
        assert_eq!(parse_echo_body("203.0.113.9\n").as_deref(), Some("203.0.113.9"));
        assert_eq!(parse_echo_body("").as_deref(), None);
        assert_eq!(parse_echo_body("{\"ip\": 1}").as_deref(), None);
    }

    #[tokio::test]
    async fn rotation_survives_failed_verification() {
        let dir = test_dir("rotate-unverified");
        let cookie = dir.join("control.authcookie");
        std::fs::write(&cookie, [0xde, 0xad]).unwrap();
        let (addr, server) = fake_control_port(vec!["250 OK\r\n", "250 OK\r\n"]).await;

        let controller = CircuitController::new(config_for(addr, &cookie));
        let rotation = controller.rotate(&dir).await.unwrap();
        assert_eq!(rotation, Rotation { state: CircuitState::RotationSent, verified_ip: None });
        assert!(!dir.join(IP_LOG_FILE).exists());

        let received = server.await.unwrap();
        assert_eq!(received, vec!["AUTHENTICATE dead".to_string(), "SIGNAL NEWNYM".to_string()]);
    }

    #[tokio::test]
    async fn rejected_cookie_aborts_rotation() {
        let dir = test_dir("rotate-rejected");
        let cookie = dir.join("control.authcookie");
        std::fs::write(&cookie, [0x01]).unwrap();
        let (addr, server) = fake_control_port(vec!["515 Authentication failed\r\n"]).await;

        let controller = CircuitController::new(config_for(addr, &cookie));
        let err = controller.rotate(&dir).await.unwrap_err();
        assert!(matches!(err, ReconError::Protocol(_)));
        assert!(!err.is_fatal());
        assert_eq!(server.await.unwrap(), vec!["AUTHENTICATE 01".to_string()]);
    }

    #[tokio::test]
    async fn missing_cookie_is_a_protocol_failure() {
        let dir = test_dir("rotate-no-cookie");
        let (addr, _server) = fake_control_port(vec![]).await;
        let controller = CircuitController::new(config_for(addr, &dir.join("absent.cookie")));
        assert!(matches!(controller.rotate(&dir).await, Err(ReconError::Protocol(_))));
    }

    #[tokio::test]
    async fn prerequisites_need_both_ports() {
        let socks = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = TorConfig {
            socks_addr: socks.local_addr().unwrap().to_string(),
            control_addr: control.local_addr().unwrap().to_string(),
            probe_timeout_secs: 2,
            ..TorConfig::default()
        };
        assert!(CircuitController::new(cfg.clone()).check_prerequisites().await.is_ok());

        drop(control);
        let err = CircuitController::new(cfg.clone()).check_prerequisites().await.unwrap_err();
        assert!(err.is_fatal());

        cfg.control_addr = cfg.socks_addr.clone();
        drop(socks);
        assert!(CircuitController::new(cfg).check_prerequisites().await.unwrap_err().is_fatal());
    }
}
