use serde::Deserialize;
use std::collections::BTreeSet;

use crate::error::{ReconError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
}

/// One open port reported by the fast sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortFinding {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Deserialize)]
struct MasscanRecord {
    ip: String,
    #[serde(default)]
    ports: Vec<MasscanPort>,
}

#[derive(Debug, Deserialize)]
struct MasscanPort {
    port: u16,
    #[serde(default)]
    proto: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl MasscanPort {
    fn is_open_tcp(&self) -> bool {
        let tcp = self.proto.as_deref().map_or(true, |p| p.eq_ignore_ascii_case("tcp"));
        let open = self.status.as_deref().map_or(true, |s| s.eq_ignore_ascii_case("open"));
        tcp && open
    }
}

/// masscan leaves a comma after the last record of its JSON array.
fn drop_trailing_comma(s: &str) -> String {
    if let Some(body) = s.strip_suffix(']') {
        if let Some(body) = body.trim_end().strip_suffix(',') {
            return format!("{}]", body);
        }
    }
    s.to_string()
}

fn parse_records(data: &str) -> std::result::Result<Vec<MasscanRecord>, serde_json::Error> {
    // single-result runs emit a bare object instead of an array
    let wrapped = if data.starts_with('{') { format!("[{}]", data) } else { data.to_string() };
    match serde_json::from_str(&drop_trailing_comma(&wrapped)) {
        Ok(records) => Ok(records),
        Err(array_err) => {
            let mut records = Vec::new();
            for line in data.lines() {
                let line = line.trim().trim_end_matches(',');
                if line.is_empty() || line == "[" || line == "]" {
                    continue;
                }
                match serde_json::from_str::<MasscanRecord>(line) {
                    Ok(r) => records.push(r),
                    Err(_) => return Err(array_err),
                }
            }
            Ok(records)
        }
    }
}

/// Decodes masscan `-oJ` output into findings. Empty input means nothing was open.
pub fn parse_sweep_output(data: &str, source_name: &str) -> Result<Vec<PortFinding>> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let records = parse_records(trimmed).map_err(|e| ReconError::parse(source_name, e))?;
    let mut findings = Vec::new();
    for record in records {
        for port in record.ports.iter().filter(|p| p.is_open_tcp()) {
            findings.push(PortFinding { ip: record.ip.clone(), port: port.port, protocol: Protocol::Tcp });
        }
    }
    Ok(findings)
}

/// Distinct port numbers in ascending order.
pub fn open_ports(findings: &[PortFinding]) -> Vec<u16> {
    findings.iter().map(|f| f.port).collect::<BTreeSet<_>>().into_iter().collect()
}
