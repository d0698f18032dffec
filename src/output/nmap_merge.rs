use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::error::{ReconError, Result};

pub const MERGED_REPORT_FILE: &str = "nmap_scan.xml";

/// One host's `<host>` element, kept as parsed events. Text content is kept
/// byte for byte; whitespace-only runs between elements are dropped.
#[derive(Debug, Clone)]
pub struct HostFragment {
    pub key: String,
    events: Vec<Event<'static>>,
}

impl HostFragment {
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

/// The merged document as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedReport {
    pub path: PathBuf,
    pub hosts: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ConsolidatedReport {
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

/// Finds the first complete top-level `<host>` element of an nmap XML document.
/// `None` when the document has none or ends before the element closes.
pub fn extract_host_element(xml: &str) -> std::result::Result<Option<Vec<Event<'static>>>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut captured = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if depth == 0 && e.name().as_ref() == b"host" => {
                depth = 1;
                captured.push(Event::Start(e.into_owned()));
            }
            Event::Eof => return Ok(None),
            Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => {}
            event if depth > 0 => {
                match &event {
                    Event::Start(_) => depth += 1,
                    Event::End(_) => depth -= 1,
                    _ => {}
                }
                captured.push(event.into_owned());
                if depth == 0 {
                    return Ok(Some(captured));
                }
            }
            _ => {}
        }
    }
}

fn xml_error(e: impl Display) -> ReconError {
    ReconError::parse("merged nmap report", e)
}

/// Collects per-host detailed-scan results and writes them once inside a
/// single `<nmaprun>` envelope.
#[derive(Debug, Default)]
pub struct ResultMerger {
    fragments: Vec<HostFragment>,
}

impl ResultMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.key.clone()).collect()
    }

    /// Reads one nmap output file. Unreadable, partial or host-less files and
    /// repeated keys contribute nothing and return `false`.
    pub fn add_file(&mut self, key: &str, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(xml) => self.add_document(key, &xml),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable nmap output {}", path.display());
                false
            }
        }
    }

    pub fn add_document(&mut self, key: &str, xml: &str) -> bool {
        if self.fragments.iter().any(|f| f.key == key) {
            tracing::warn!("duplicate nmap result for {}, keeping the first", key);
            return false;
        }
        match extract_host_element(xml) {
            Ok(Some(events)) => {
                self.fragments.push(HostFragment { key: key.to_string(), events });
                true
            }
            Ok(None) => {
                tracing::warn!("no complete <host> element in nmap output for {}", key);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed nmap output for {}", key);
                false
            }
        }
    }

    fn render(&self, finished: DateTime<Utc>) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let count = self.fragments.len().to_string();
        let start = finished.timestamp().to_string();
        let timestr = finished.to_rfc2822();
        let summary = format!("Merged {} hosts", count);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))).map_err(xml_error)?;
        writer.write_event(Event::DocType(BytesText::from_escaped("nmaprun"))).map_err(xml_error)?;
        let root = BytesStart::new("nmaprun").with_attributes([
            ("scanner", "nmap"),
            ("args", "merged by shadow-pulse"),
            ("start", start.as_str()),
            ("xmloutputversion", "1.05"),
        ]);
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        for fragment in &self.fragments {
            for event in &fragment.events {
                writer.write_event(event.clone()).map_err(xml_error)?;
            }
        }

        writer.write_event(Event::Start(BytesStart::new("runstats"))).map_err(xml_error)?;
        let finished_el = BytesStart::new("finished").with_attributes([
            ("time", start.as_str()),
            ("timestr", timestr.as_str()),
            ("summary", summary.as_str()),
            ("exit", "success"),
        ]);
        writer.write_event(Event::Empty(finished_el)).map_err(xml_error)?;
        let hosts_el = BytesStart::new("hosts").with_attributes([
            ("up", count.as_str()),
            ("down", "0"),
            ("total", count.as_str()),
        ]);
        writer.write_event(Event::Empty(hosts_el)).map_err(xml_error)?;
        writer.write_event(Event::End(BytesEnd::new("runstats"))).map_err(xml_error)?;
        writer.write_event(Event::End(BytesEnd::new("nmaprun"))).map_err(xml_error)?;

        let mut out = writer.into_inner();
        out.push(b'\n');
        Ok(out)
    }

    /// Serializes the envelope to `path`. With no fragments nothing is written
    /// and [`ReconError::NothingToMerge`] is returned.
    pub fn write(&self, path: &Path) -> Result<ConsolidatedReport> {
        if self.fragments.is_empty() {
            tracing::warn!("No host data found in individual nmap scans to merge");
            return Err(ReconError::NothingToMerge);
        }
        let generated_at = Utc::now();
        let bytes = self.render(generated_at)?;
        std::fs::write(path, bytes)?;
        tracing::info!("Merged {} nmap host scans into {}", self.fragments.len(), path.display());
        Ok(ConsolidatedReport { path: path.to_path_buf(), hosts: self.hosts(), generated_at })
    }
}
