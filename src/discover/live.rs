use crate::context::RunContext;
use crate::error::Result;
use crate::external::tools;
use crate::utils::{read_lines, write_lines};

pub const HTTPX_INPUT_FILE: &str = "httpx_input.txt";
pub const LIVE_HOSTS_FILE: &str = "live_web_hosts.txt";

/// Probes the aggregated subdomains with httpx and returns the live URLs.
/// A failed or skipped httpx run yields an empty list.
pub async fn probe_live_hosts(ctx: &RunContext, subdomains: &[String]) -> Result<Vec<String>> {
    tracing::info!("Checking which of {} subdomains serve HTTP...", subdomains.len());
    let input = ctx.path(HTTPX_INPUT_FILE);
    let output = ctx.path(LIVE_HOSTS_FILE);
    write_lines(&input, subdomains)?;

    ctx.rotate_identity("httpx").await;
    let invocation = tools::httpx(&input, ctx.config.httpx_threads, &output);
    let result = ctx.executor.execute(&ctx.route(invocation)).await;
    if let Err(e) = result.check() {
        tracing::warn!("Liveness probe did not complete: {}", e);
    }

    match read_lines(&output) {
        Ok(live) => {
            tracing::info!("{} live web hosts", live.len());
            Ok(live)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("httpx produced no {}", LIVE_HOSTS_FILE);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
