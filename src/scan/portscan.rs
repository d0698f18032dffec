use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::error::{ReconError, Result};
use crate::external::tools;
use crate::output::nmap_merge::{ConsolidatedReport, ResultMerger, MERGED_REPORT_FILE};
use crate::scan::sweep::{open_ports, parse_sweep_output};
use crate::utils::sanitize_filename;

pub const MASSCAN_DIR: &str = "masscan_scans";
pub const NMAP_TEMP_DIR: &str = "nmap_temp_scans";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedHost {
    pub host: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PortScanSummary {
    /// Hosts whose detailed scan produced a fragment for the merged report.
    pub scanned: Vec<String>,
    pub skipped: Vec<SkippedHost>,
    pub report: Option<ConsolidatedReport>,
}

/// First IPv4 address of `host`, else the first address of any family.
pub async fn resolve_host(host: &str) -> Option<IpAddr> {
    let addrs: Vec<IpAddr> = match tokio::net::lookup_host((host, 0)).await {
        Ok(it) => it.map(|sa| sa.ip()).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "lookup of {} failed", host);
            return None;
        }
    };
    addrs.iter().find(|ip| ip.is_ipv4()).or_else(|| addrs.first()).copied()
}

/// Fast sweep then targeted nmap scan, one host at a time.
pub struct PortScanPipeline<'a> {
    ctx: &'a RunContext,
    nmap_options: Vec<String>,
}

impl<'a> PortScanPipeline<'a> {
    /// `nmap_options` is ignored in stealth mode.
    pub fn new(ctx: &'a RunContext, nmap_options: &str) -> Self {
        let nmap_options = if ctx.stealth {
            tracing::info!("Stealth mode: nmap runs with fragmented packets and decoys");
            tools::stealth_nmap_options()
        } else {
            tools::split_options(nmap_options)
        };
        Self { ctx, nmap_options }
    }

    pub async fn run(&self, hosts: &[String]) -> Result<PortScanSummary> {
        let masscan_dir = self.ctx.path(MASSCAN_DIR);
        let nmap_dir = self.ctx.path(NMAP_TEMP_DIR);
        std::fs::create_dir_all(&masscan_dir)?;
        std::fs::create_dir_all(&nmap_dir)?;

        let mut summary = PortScanSummary::default();
        let mut merger = ResultMerger::new();

        for (i, host) in hosts.iter().enumerate() {
            tracing::info!("[{}/{}] Port scanning {}", i + 1, hosts.len(), host);
            match self.scan_host(host, &masscan_dir, &nmap_dir).await {
                Ok(fragment) => {
                    if merger.add_file(host, &fragment) {
                        summary.scanned.push(host.clone());
                    } else {
                        summary.skipped.push(SkippedHost { host: host.clone(), reason: "no usable nmap result".into() });
                    }
                }
                Err(reason) => {
                    tracing::warn!("Skipping {}: {}", host, reason);
                    summary.skipped.push(SkippedHost { host: host.clone(), reason });
                }
            }
        }

        match merger.write(&self.ctx.path(MERGED_REPORT_FILE)) {
            Ok(report) => {
                if let Err(e) = std::fs::remove_dir_all(&nmap_dir) {
                    tracing::warn!(error = %e, "could not remove {}", nmap_dir.display());
                }
                summary.report = Some(report);
            }
            Err(ReconError::NothingToMerge) => {}
            Err(e) => tracing::error!("Could not write merged nmap report: {}", e),
        }
        Ok(summary)
    }

    /// Path of the host's nmap XML on success, else why the host was dropped.
    async fn scan_host(&self, host: &str, masscan_dir: &Path, nmap_dir: &Path) -> std::result::Result<PathBuf, String> {
        let ctx = self.ctx;
        ctx.rotate_identity(host).await;

        let ip = resolve_host(host).await.ok_or_else(|| "could not resolve".to_string())?;
        let safe = sanitize_filename(host);

        let sweep_out = masscan_dir.join(format!("{}.json", safe));
        let sweep = tools::masscan(&ip.to_string(), &sweep_out, ctx.config.masscan_rate);
        ctx.executor.execute(&ctx.route(sweep)).await.check().map_err(|e| e.to_string())?;

        let data = match std::fs::read_to_string(&sweep_out) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(format!("could not read sweep output: {}", e)),
        };
        let findings = parse_sweep_output(&data, &sweep_out.display().to_string()).map_err(|e| e.to_string())?;
        let ports = open_ports(&findings);
        if ports.is_empty() {
            return Err("no open ports".to_string());
        }
        tracing::info!("{} ({}) open ports: {:?}", host, ip, ports);

        let nmap_out = nmap_dir.join(format!("{}.xml", safe));
        let detailed = tools::nmap(host, &ports, &self.nmap_options, &nmap_out);
        ctx.executor.execute(&ctx.route(detailed)).await.check().map_err(|e| e.to_string())?;
        Ok(nmap_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::external::{ExecutionResult, Executor, ToolInvocation};
    use crate::utils::test_dir;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Writes canned masscan / nmap output to the paths the pipeline asks for.
    #[derive(Default)]
    struct ScriptedScanners {
        calls: Mutex<Vec<ToolInvocation>>,
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let i = args.iter().position(|a| a == flag).unwrap();
        &args[i + 1]
    }

    #[async_trait]
    impl Executor for ScriptedScanners {
        async fn execute(&self, invocation: &ToolInvocation) -> ExecutionResult {
            self.calls.lock().push(invocation.clone());
            let args = invocation.arguments();
            match invocation.program() {
                "masscan" => {
                    let body = format!(
                        "[\n{{\"ip\": \"{}\", \"ports\": [{{\"port\": 443, \"proto\": \"tcp\", \"status\": \"open\"}}]}},\n]\n",
                        args[0]
                    );
                    std::fs::write(value_after(args, "-oJ"), body).unwrap();
                }
                "nmap" => {
                    let xml = format!(
                        "<?xml version=\"1.0\"?><nmaprun><host><address addr=\"{}\"/></host></nmaprun>",
                        args[args.len() - 3]
                    );
                    std::fs::write(value_after(args, "-oX"), xml).unwrap();
                }
                other => panic!("unexpected tool {other}"),
            }
            ExecutionResult { command: invocation.to_string(), exit_succeeded: true, ..Default::default() }
        }
    }

    #[tokio::test]
    async fn scans_resolvable_hosts_and_merges() {
        let dir = test_dir("portscan-pipeline");
        let scanners = Arc::new(ScriptedScanners::default());
        let ctx = RunContext::new(dir.clone(), Config::default(), false, false, scanners.clone());
        let hosts = vec!["localhost".to_string(), "nothing.invalid".to_string()];

        let summary = PortScanPipeline::new(&ctx, "-sV -Pn").run(&hosts).await.unwrap();

        assert_eq!(summary.scanned, vec!["localhost"]);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].host, "nothing.invalid");
        let report = summary.report.unwrap();
        assert_eq!(report.host_count(), 1);
        assert!(dir.join(MERGED_REPORT_FILE).exists());
        assert!(!dir.join(NMAP_TEMP_DIR).exists());

        let calls = scanners.calls.lock();
        let nmap = calls.iter().find(|c| c.program() == "nmap").unwrap();
        assert_eq!(&nmap.arguments()[..4], &["-p", "443", "-sV", "-Pn"]);
        assert!(nmap.arguments().contains(&"localhost".to_string()));
    }

    #[tokio::test]
    async fn stealth_replaces_nmap_options() {
        let dir = test_dir("portscan-stealth");
        let ctx = RunContext::new(dir, Config::default(), false, true, Arc::new(ScriptedScanners::default()));
        let pipeline = PortScanPipeline::new(&ctx, "-sV -Pn");
        assert_eq!(pipeline.nmap_options, tools::stealth_nmap_options());
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let ip = resolve_host("localhost").await.unwrap();
        assert!(ip.is_loopback());
        assert!(resolve_host("no-such-host.invalid").await.is_none());
    }
}
