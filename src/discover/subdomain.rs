use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::path::Path;

use crate::context::RunContext;
use crate::discover::crtsh::crtsh_subdomains;
use crate::error::{ReconError, Result};
use crate::external::tools::{self, ToolInvocation};
use crate::utils::{read_lines, write_lines};

/// One-name-per-line outputs.
pub const LINE_SOURCES: &[&str] = &["subfinder.txt", "findomain.txt", "crtsh.txt", "gobuster.txt"];
pub const DNSRECON_FILE: &str = "dnsrecon.json";
pub const DNSENUM_FILE: &str = "dnsenum.xml";
pub const FINAL_SUBDOMAINS_FILE: &str = "final_subdomains.txt";

/// `name` of every object in a dnsrecon JSON report. Entries without one
/// (scan metadata records) are ignored.
pub fn parse_dnsrecon(data: &str) -> Result<Vec<String>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(data).map_err(|e| ReconError::parse(DNSRECON_FILE, e))?;
    Ok(entries
        .iter()
        .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect())
}

/// Text of each `<hostname>` directly inside a `<host>` of a dnsenum XML report.
pub fn parse_dnsenum(data: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(data);
    reader.trim_text(true);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event().map_err(|e| ReconError::parse(DNSENUM_FILE, e))? {
            Event::Start(e) => path.push(e.name().as_ref().to_vec()),
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let n = path.len();
                if n >= 2 && path[n - 1] == b"hostname" && path[n - 2] == b"host" {
                    let name = t.unescape().map_err(|e| ReconError::parse(DNSENUM_FILE, e))?;
                    names.push(name.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(names)
}

/// Folds every discovery output found in `dir` into one sorted set.
/// Missing files are normal; malformed structured files are logged and skipped.
pub fn collect_subdomains(dir: &Path) -> BTreeSet<String> {
    let mut set = BTreeSet::new();

    for name in LINE_SOURCES {
        match read_lines(&dir.join(name)) {
            Ok(lines) => set.extend(lines),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "could not read {}", name),
        }
    }

    let structured: [(&str, fn(&str) -> Result<Vec<String>>); 2] =
        [(DNSRECON_FILE, parse_dnsrecon), (DNSENUM_FILE, parse_dnsenum)];
    for (name, parse) in structured {
        let Ok(data) = std::fs::read_to_string(dir.join(name)) else { continue };
        match parse(&data) {
            Ok(names) => set.extend(names.into_iter().map(|n| n.trim().to_string())),
            Err(e) => tracing::warn!("skipping {}: {}", name, e),
        }
    }

    set.remove("");
    set
}

/// Merges the discovery outputs in `dir`, writes `final_subdomains.txt` and
/// returns the list. An empty result is fatal for the run.
pub fn aggregate_subdomains(dir: &Path) -> Result<Vec<String>> {
    tracing::info!("Combining and cleaning subdomain lists...");
    let list: Vec<String> = collect_subdomains(dir).into_iter().collect();
    if list.is_empty() {
        tracing::error!("No subdomains found");
        return Err(ReconError::FatalPrecondition("no subdomains were discovered".to_string()));
    }
    let path = dir.join(FINAL_SUBDOMAINS_FILE);
    write_lines(&path, &list)?;
    tracing::info!("Combined {} unique subdomains into {}", list.len(), path.display());
    Ok(list)
}

/// `Found: <name>` lines printed by `gobuster dns`.
pub fn gobuster_names(stdout: &[String]) -> Vec<String> {
    stdout
        .iter()
        .filter_map(|l| l.trim().strip_prefix("Found:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Runs the discovery tools for a domain, then aggregates their outputs.
pub struct SubdomainEnumerator<'a> {
    ctx: &'a RunContext,
}

impl<'a> SubdomainEnumerator<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Tool invocations for this run; stealth keeps to passive sources.
    pub fn plan(&self, domain: &str) -> Vec<(&'static str, ToolInvocation)> {
        let ctx = self.ctx;
        let mut plan = vec![("subfinder", tools::subfinder(domain, &ctx.path("subfinder.txt"), ctx.stealth))];
        if ctx.stealth {
            tracing::info!("Stealth mode: passive subdomain sources only");
            return plan;
        }
        plan.push(("findomain", tools::findomain(domain, &ctx.path("findomain.txt"))));
        plan.push(("dnsrecon", tools::dnsrecon(domain, &ctx.path(DNSRECON_FILE))));
        plan.push(("dnsenum", tools::dnsenum(domain, &ctx.path(DNSENUM_FILE))));
        if tools::is_installed("gobuster") {
            let wordlist = &ctx.config.gobuster_wordlist;
            if wordlist.exists() {
                plan.push(("gobuster", tools::gobuster_dns(domain, wordlist)));
            } else {
                tracing::warn!(
                    "gobuster is installed but the wordlist {} is missing (apt-get install seclists); skipping it",
                    wordlist.display()
                );
            }
        }
        plan
    }

    pub async fn run(&self, domain: &str) -> Result<Vec<String>> {
        tracing::info!("Starting subdomain enumeration for {}", domain);
        let ctx = self.ctx;

        for (name, invocation) in self.plan(domain) {
            ctx.rotate_identity(name).await;
            let result = ctx.executor.execute(&ctx.route(invocation)).await;
            if name == "gobuster" && result.exit_succeeded {
                let found = gobuster_names(&result.stdout_lines);
                if let Err(e) = write_lines(&ctx.path("gobuster.txt"), &found) {
                    tracing::warn!(error = %e, "could not write gobuster results");
                }
            }
        }

        ctx.rotate_identity("crt.sh").await;
        self.fetch_crtsh(domain).await;

        aggregate_subdomains(ctx.out_dir())
    }

    async fn fetch_crtsh(&self, domain: &str) {
        let client = match self.ctx.http_client() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("crt.sh skipped, no HTTP client: {}", e);
                return;
            }
        };
        match crtsh_subdomains(&client, domain).await {
            Ok(names) => {
                tracing::info!("crt.sh found {} names", names.len());
                if let Err(e) = write_lines(&self.ctx.path("crtsh.txt"), &names) {
                    tracing::warn!(error = %e, "could not write crt.sh results");
                }
            }
            Err(e) => tracing::warn!("crt.sh query failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_dir;

    #[test]
    fn dnsrecon_ignores_metadata_entries() {
        let data = r#"[{"type":"ScanInfo","arguments":"-d example.test"},{"type":"A","name":"mail.example.test","address":"192.0.2.5"},{"name":""}]"#;
        assert_eq!(parse_dnsrecon(data).unwrap(), vec!["mail.example.test", ""]);
        assert!(parse_dnsrecon("{not json").is_err());
    }

    #[test]
    fn dnsenum_hostnames() {
        let data = r#"<?xml version="1.0"?>
<magictree class="MtBranchObject">
  <testdata class="MtBranchObject">
    <host><hostname>ns1.example.test</hostname><ip>192.0.2.1</ip></host>
    <host><hostname>dev &amp; test.example.test</hostname></host>
    <hostname>not-in-host.example.test</hostname>
  </testdata>
</magictree>"#;
        assert_eq!(parse_dnsenum(data).unwrap(), vec!["ns1.example.test", "dev & test.example.test"]);
    }

    #[test]
    fn gobuster_found_lines() {
        let out = vec!["Found: www.example.test".to_string(), "noise".to_string(), "Found: api.example.test [10.0.0.1]".to_string()];
        assert_eq!(gobuster_names(&out), vec!["www.example.test", "api.example.test"]);
    }

    #[test]
    fn malformed_structured_source_is_skipped() {
        let dir = test_dir("subdomain-malformed");
        std::fs::write(dir.join("subfinder.txt"), "a.example.test\n").unwrap();
        std::fs::write(dir.join(DNSRECON_FILE), "[{\"name\": ").unwrap();
        std::fs::write(dir.join(DNSENUM_FILE), "<host><hostname>b.example.test</hostname></host>").unwrap();
        let set: Vec<_> = collect_subdomains(&dir).into_iter().collect();
        assert_eq!(set, vec!["a.example.test", "b.example.test"]);
    }

    #[test]
    fn empty_result_is_fatal() {
        let dir = test_dir("subdomain-empty");
        std::fs::write(dir.join("findomain.txt"), "\n  \n").unwrap();
        let err = aggregate_subdomains(&dir).unwrap_err();
        assert!(err.is_fatal());
        assert!(!dir.join(FINAL_SUBDOMAINS_FILE).exists());
    }
}
