pub mod anonymizer;
pub mod concurrent;
pub mod config;
pub mod context;
pub mod discover;
pub mod error;
pub mod external;
pub mod logging;
pub mod output;
pub mod scan;
pub mod utils;

pub use crate::context::RunContext;
pub use crate::error::{ReconError, Result};
