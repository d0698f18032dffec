pub mod crtsh;
pub mod live;
pub mod subdomain;

pub use live::{probe_live_hosts, LIVE_HOSTS_FILE};
pub use subdomain::{aggregate_subdomains, SubdomainEnumerator, FINAL_SUBDOMAINS_FILE};
