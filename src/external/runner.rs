use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use which::which;

use crate::error::ReconError;
use crate::external::tools::{Route, ToolInvocation};

pub const PROXY_HELPER: &str = "proxychains4";

/// How long output readers may keep draining after the child has exited.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Outcome of one external command. Never shared between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: String,
    pub exit_succeeded: bool,
    /// Not run at all because a routing prerequisite was missing.
    pub skipped: bool,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn skipped(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { command: command.into(), skipped: true, error: Some(reason.into()), ..Default::default() }
    }

    pub fn failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { command: command.into(), error: Some(reason.into()), ..Default::default() }
    }

    pub fn check(&self) -> Result<(), ReconError> {
        if self.exit_succeeded {
            return Ok(());
        }
        if self.skipped {
            return Err(ReconError::ToolUnavailable { tool: PROXY_HELPER.to_string() });
        }
        Err(ReconError::Execution {
            command: self.command.clone(),
            reason: self.error.clone().unwrap_or_else(|| "unknown failure".to_string()),
        })
    }
}

/// Anything that can run a [`ToolInvocation`]. The pipelines only see this trait.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation) -> ExecutionResult;
}

/// Liveness signal drawn while a child process runs.
pub trait Heartbeat: Send + Sync {
    fn beat(&self, id: u64, label: &str);
    fn done(&self, _id: u64) {}
}

/// One spinner line per running command.
pub struct SpinnerHeartbeat {
    progress: MultiProgress,
    bars: Mutex<HashMap<u64, ProgressBar>>,
}

impl SpinnerHeartbeat {
    pub fn new() -> Self {
        Self { progress: MultiProgress::new(), bars: Mutex::new(HashMap::new()) }
    }

    fn spinner(&self, label: &str) -> ProgressBar {
        let pb = self.progress.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {elapsed:>4} {msg}") {
            pb.set_style(style.tick_strings(&["*  ", "** ", "***", " **", "  *", "   "]));
        }
        pb.set_message(label.to_string());
        pb
    }
}

impl Default for SpinnerHeartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat for SpinnerHeartbeat {
    fn beat(&self, id: u64, label: &str) {
        let mut bars = self.bars.lock();
        let pb = bars.entry(id).or_insert_with(|| self.spinner(label));
        pb.tick();
    }

    fn done(&self, id: u64) {
        if let Some(pb) = self.bars.lock().remove(&id) {
            pb.finish_and_clear();
        }
    }
}

#[derive(Debug)]
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Runs external tools as supervised child processes.
///
/// Every call spawns two output readers and one heartbeat ticker and joins all
/// three before returning.
pub struct ProcessHarness {
    heartbeat: Arc<dyn Heartbeat>,
    interval: Duration,
    proxy_helper: String,
    next_id: AtomicU64,
}

impl ProcessHarness {
    pub fn new(interval: Duration) -> Self {
        Self::with_heartbeat(Arc::new(SpinnerHeartbeat::new()), interval)
    }

    pub fn with_heartbeat(heartbeat: Arc<dyn Heartbeat>, interval: Duration) -> Self {
        Self { heartbeat, interval, proxy_helper: PROXY_HELPER.to_string(), next_id: AtomicU64::new(1) }
    }

    pub fn with_proxy_helper(mut self, helper: impl Into<String>) -> Self {
        self.proxy_helper = helper.into();
        self
    }

    /// Program and argv after applying the routing flag, or a skipped result
    /// when proxying was requested but the helper is missing.
    fn resolve_route(&self, invocation: &ToolInvocation) -> Result<(String, Vec<String>), ExecutionResult> {
        match invocation.route() {
            Route::Direct => Ok((invocation.program().to_string(), invocation.arguments().to_vec())),
            Route::Proxied => {
                if which(&self.proxy_helper).is_err() {
                    tracing::error!(
                        "'{}' not found but proxied routing was requested; cannot run {}",
                        self.proxy_helper,
                        invocation.program()
                    );
                    return Err(ExecutionResult::skipped(
                        invocation.to_string(),
                        format!("{} not installed", self.proxy_helper),
                    ));
                }
                let mut args = Vec::with_capacity(invocation.arguments().len() + 1);
                args.push(invocation.program().to_string());
                args.extend(invocation.arguments().iter().cloned());
                Ok((self.proxy_helper.clone(), args))
            }
        }
    }

    pub async fn execute(&self, invocation: &ToolInvocation) -> ExecutionResult {
        let shown = invocation.to_string();
        let (program, args) = match self.resolve_route(invocation) {
            Ok(resolved) => resolved,
            Err(skipped) => return skipped,
        };

        tracing::info!("Executing: {}", shown);
        let mut child = match Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start command: {}", shown);
                return ExecutionResult::failed(shown, format!("failed to start: {}", e));
            }
        };

        let captured: Arc<Mutex<Vec<OutputLine>>> = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = child.stdout.take().map(|out| tokio::spawn(drain(out, captured.clone(), OutputLine::Stdout)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(drain(err, captured.clone(), OutputLine::Stderr)));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let ticker = tokio::spawn(heartbeat_loop(
            self.heartbeat.clone(),
            id,
            shown.clone(),
            self.interval,
            stop.clone(),
        ));

        let status = child.wait().await;
        stop.cancel();
        let _ = ticker.await;
        self.heartbeat.done(id);

        // a backgrounded grandchild can keep the pipes open past the child's exit
        for mut task in [stdout_task, stderr_task].into_iter().flatten() {
            match tokio::time::timeout(READER_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "output reader for {} did not finish cleanly", shown),
                Err(_) => {
                    task.abort();
                    tracing::warn!("{} exited but its output pipes stayed open; keeping what was read", shown);
                }
            }
        }

        let lines = std::mem::take(&mut *captured.lock());
        let mut result = ExecutionResult { command: shown, ..Default::default() };
        for line in lines {
            match line {
                OutputLine::Stdout(l) => result.stdout_lines.push(l),
                OutputLine::Stderr(l) => result.stderr_lines.push(l),
            }
        }

        if !result.stderr_lines.is_empty() {
            tracing::debug!("{} wrote to stderr:\n{}", result.command, result.stderr_lines.join("\n"));
        }

        match status {
            Ok(status) if status.success() => result.exit_succeeded = true,
            Ok(status) => result.error = Some(format!("exited with {}", status)),
            Err(e) => result.error = Some(format!("wait failed: {}", e)),
        }

        if !result.exit_succeeded {
            tracing::error!("Command failed: {}", result.command);
            if !result.stdout_lines.is_empty() {
                tracing::error!("Captured stdout:\n{}", result.stdout_lines.join("\n"));
            }
            if let Some(err) = &result.error {
                tracing::error!("Error: {}", err);
            }
        }
        result
    }
}

#[async_trait]
impl Executor for ProcessHarness {
    async fn execute(&self, invocation: &ToolInvocation) -> ExecutionResult {
        ProcessHarness::execute(self, invocation).await
    }
}

/// Reads one pipe to EOF. Invalid UTF-8 is replaced rather than ending the
/// read, so a chatty child can never block on a full pipe.
async fn drain<R>(reader: R, sink: Arc<Mutex<Vec<OutputLine>>>, tag: fn(String) -> OutputLine)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end_matches(&['\r', '\n'][..]).to_string();
                sink.lock().push(tag(line));
            }
            Err(e) => {
                tracing::debug!(error = %e, "output reader stopped");
                break;
            }
        }
    }
}

async fn heartbeat_loop(sink: Arc<dyn Heartbeat>, id: u64, label: String, period: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => sink.beat(id, &label),
        }
    }
}
