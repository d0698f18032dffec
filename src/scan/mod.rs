pub mod portscan;
pub mod screenshot;
pub mod sweep;
pub mod vuln;

pub use portscan::{PortScanPipeline, PortScanSummary};
pub use screenshot::capture_screenshots;
pub use vuln::{FanOutReport, VulnFanOut};
