pub mod runner;
pub mod tools;

pub use runner::{ExecutionResult, Executor, Heartbeat, ProcessHarness, SpinnerHeartbeat};
pub use tools::{Route, ToolInvocation};
