use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NMAP_OPTIONS: &str = "-sV -sC -O -T4 -A -Pn --top-ports 1000";

/// Run-wide settings. Every field has a default so a partial JSON file is enough.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tor: TorConfig,
    pub heartbeat_interval_ms: u64,
    pub masscan_rate: u32,
    pub nmap_options: String,
    /// Upper bound on concurrent vulnerability scan jobs.
    pub vuln_concurrency: usize,
    pub httpx_threads: u16,
    pub gobuster_wordlist: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            heartbeat_interval_ms: 1000,
            masscan_rate: 1000,
            nmap_options: DEFAULT_NMAP_OPTIONS.to_string(),
            vuln_concurrency: 12,
            httpx_threads: 50,
            gobuster_wordlist: PathBuf::from("/usr/share/seclists/Discovery/DNS/subdomains-top1million-5000.txt"),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    pub socks_addr: String,
    pub control_addr: String,
    pub cookie_path: PathBuf,
    pub ip_echo_url: String,
    /// Wait after NEWNYM before the egress address is queried.
    pub grace_period_secs: u64,
    pub probe_timeout_secs: u64,
    pub echo_timeout_secs: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: "127.0.0.1:9050".to_string(),
            control_addr: "127.0.0.1:9051".to_string(),
            cookie_path: PathBuf::from("/var/run/tor/control.authcookie"),
            ip_echo_url: "https://httpbin.org/ip".to_string(),
            grace_period_secs: 5,
            probe_timeout_secs: 2,
            echo_timeout_secs: 15,
        }
    }
}

impl TorConfig {
    /// `socks5h` so hostnames are resolved on the Tor side.
    pub fn socks_proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks_addr)
    }
}
