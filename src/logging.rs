use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_FILE: &str = "app_execute.log";

/// `debug` with `--debug`, else `info`; run progress is always shown.
pub fn level_for(debug: bool, _verbose: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn filter(level: &str) -> EnvFilter {
    // HTTP stack stays at INFO so debug runs are not flooded
    let directives = format!("shadow_pulse={level},reqwest=info,hyper=info,h2=info");
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the process-wide subscriber: the console, plus `log_file` when given.
/// The file always records at `info` or finer so a run keeps a full trace.
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let console = fmt::layer().with_ansi(true).with_target(false).with_filter(filter(level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file_level = if level == "debug" { "debug" } else { "info" };
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter(file_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file_layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_precedence() {
        assert_eq!(level_for(true, true), "debug");
        assert_eq!(level_for(false, true), "info");
        assert_eq!(level_for(false, false), "info");
    }
}
