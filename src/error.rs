use thiserror::Error;

/// Failure taxonomy shared by every stage of a run.
///
/// Only [`ReconError::FatalPrecondition`] is meant to stop a whole run; the
/// other variants describe a single command, host or data source and are
/// logged and stepped over by the caller.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("required tool '{tool}' is not installed")]
    ToolUnavailable { tool: String },

    #[error("command '{command}' failed: {reason}")]
    Execution { command: String, reason: String },

    #[error("tor control protocol: {0}")]
    Protocol(String),

    #[error("could not parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("no host fragments to merge")]
    NothingToMerge,

    #[error("{0}")]
    FatalPrecondition(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReconError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconError::FatalPrecondition(_))
    }

    pub(crate) fn parse(source_name: impl Into<String>, reason: impl ToString) -> Self {
        ReconError::Parse { source_name: source_name.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
