use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::concurrent::ConcurrentRunner;
use crate::context::RunContext;
use crate::error::Result;
use crate::external::{tools, Executor, ToolInvocation};
use crate::utils::{read_lines, sanitize_filename};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulnTool {
    Nikto,
    Wpscan,
    Nuclei,
}

impl VulnTool {
    pub const ALL: [VulnTool; 3] = [VulnTool::Nikto, VulnTool::Wpscan, VulnTool::Nuclei];

    pub fn name(self) -> &'static str {
        match self {
            VulnTool::Nikto => "nikto",
            VulnTool::Wpscan => "wpscan",
            VulnTool::Nuclei => "nuclei",
        }
    }

    /// `<tool>_<safe host>.txt` inside the run directory.
    pub fn output_path(self, out_dir: &Path, url: &str) -> PathBuf {
        out_dir.join(format!("{}_{}.txt", self.name(), sanitize_filename(url)))
    }

    /// `None` when the tool does not apply to this URL.
    pub fn invocation(self, url: &str, out_dir: &Path) -> Option<ToolInvocation> {
        let out = self.output_path(out_dir, url);
        match self {
            VulnTool::Nikto => Some(tools::nikto(url, &out)),
            VulnTool::Wpscan => looks_like_wordpress(url).then(|| tools::wpscan(url, &out)),
            VulnTool::Nuclei => Some(tools::nuclei(url, &out)),
        }
    }
}

impl fmt::Display for VulnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// URL-substring guess; no fingerprinting.
pub fn looks_like_wordpress(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("wp-") || lower.contains("wordpress")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Runs nikto, wpscan and nuclei against every live host on a bounded pool.
pub struct VulnFanOut {
    executor: Arc<dyn Executor>,
    out_dir: PathBuf,
    proxied: bool,
    concurrency: usize,
}

impl VulnFanOut {
    pub fn new(executor: Arc<dyn Executor>, out_dir: PathBuf, proxied: bool, concurrency: usize) -> Self {
        Self { executor, out_dir, proxied, concurrency }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        Self::new(ctx.executor.clone(), ctx.out_dir.clone(), ctx.use_tor, ctx.config.vuln_concurrency)
    }

    pub async fn run(&self, live_hosts_file: &Path) -> Result<FanOutReport> {
        let hosts = read_lines(live_hosts_file)?;
        tracing::info!(
            "Starting vulnerability scans on {} hosts ({} concurrent jobs)",
            hosts.len(),
            self.concurrency
        );

        let jobs: Vec<(VulnTool, String)> = hosts
            .iter()
            .flat_map(|host| VulnTool::ALL.iter().map(move |tool| (*tool, host.clone())))
            .collect();
        let tasks = jobs.len();

        let executor = self.executor.clone();
        let out_dir = self.out_dir.clone();
        let proxied = self.proxied;
        let runner = ConcurrentRunner::new(self.concurrency);
        let outcomes = runner
            .execute(jobs, move |(tool, url): (VulnTool, String)| {
                let executor = executor.clone();
                let out_dir = out_dir.clone();
                async move { run_job(executor.as_ref(), tool, &url, &out_dir, proxied).await }
            })
            .await;

        let mut report = FanOutReport { tasks, ..Default::default() };
        for outcome in outcomes {
            match outcome {
                Some(JobOutcome::Succeeded) => report.succeeded += 1,
                Some(JobOutcome::Skipped) => report.skipped += 1,
                Some(JobOutcome::Failed) | None => report.failed += 1,
            }
        }
        tracing::info!(
            "Vulnerability scans finished: {} succeeded, {} failed, {} skipped",
            report.succeeded,
            report.failed,
            report.skipped
        );
        Ok(report)
    }
}

async fn run_job(executor: &dyn Executor, tool: VulnTool, url: &str, out_dir: &Path, proxied: bool) -> JobOutcome {
    let Some(invocation) = tool.invocation(url, out_dir) else {
        tracing::debug!("{} not applicable to {}", tool, url);
        return JobOutcome::Skipped;
    };
    let result = executor.execute(&invocation.proxied(proxied)).await;
    if result.exit_succeeded {
        JobOutcome::Succeeded
    } else if result.skipped {
        JobOutcome::Skipped
    } else {
        tracing::warn!("{} against {} failed: {}", tool, url, result.error.as_deref().unwrap_or("unknown error"));
        JobOutcome::Failed
    }
}
