pub mod nmap_merge;

pub use nmap_merge::{ConsolidatedReport, ResultMerger, MERGED_REPORT_FILE};
