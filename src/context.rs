use reqwest::{Client, Proxy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::anonymizer::CircuitController;
use crate::config::Config;
use crate::external::{Executor, ToolInvocation};

/// Everything one scan run shares between its stages. Built once per run and
/// handed to each component instead of living in globals.
pub struct RunContext {
    pub out_dir: PathBuf,
    pub config: Config,
    pub use_tor: bool,
    pub stealth: bool,
    pub executor: Arc<dyn Executor>,
    pub circuit: Option<Arc<CircuitController>>,
}

impl RunContext {
    pub fn new(out_dir: PathBuf, config: Config, use_tor: bool, stealth: bool, executor: Arc<dyn Executor>) -> Self {
        let circuit = use_tor.then(|| Arc::new(CircuitController::new(config.tor.clone())));
        Self { out_dir, config, use_tor, stealth, executor, circuit }
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.out_dir.join(file_name)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Applies the run's routing flag to a freshly built invocation.
    pub fn route(&self, invocation: ToolInvocation) -> ToolInvocation {
        invocation.proxied(self.use_tor)
    }

    /// Rotates the Tor identity if anonymized routing is on. Failures are
    /// logged; the caller carries on with the current circuit.
    pub async fn rotate_identity(&self, before: &str) {
        let Some(circuit) = &self.circuit else { return };
        tracing::info!("Rotating Tor identity before {}", before);
        match circuit.rotate(&self.out_dir).await {
            Ok(rotation) => tracing::debug!(state = %rotation.state, ip = ?rotation.verified_ip, "rotation finished"),
            Err(e) => tracing::warn!("Continuing without a fresh identity: {}", e),
        }
    }

    /// HTTP client for in-process requests, tunnelled through Tor when enabled.
    pub fn http_client(&self) -> anyhow::Result<Client> {
        let mut builder = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(30));
        if self.use_tor {
            builder = builder.proxy(Proxy::all(self.config.tor.socks_proxy_url())?);
        }
        Ok(builder.build()?)
    }
}
