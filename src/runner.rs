use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::Instrument;

use crate::cli::{Cli, Commands};
use shadow_pulse::anonymizer::CircuitController;
use shadow_pulse::config::Config;
use shadow_pulse::discover::{probe_live_hosts, SubdomainEnumerator, LIVE_HOSTS_FILE};
use shadow_pulse::external::{tools, ProcessHarness};
use shadow_pulse::scan::{capture_screenshots, PortScanPipeline, VulnFanOut};
use shadow_pulse::{logging, utils, RunContext};

fn print_ascii_logo() {
    println!(
        r#"
  ____  _               _                 ____        _
 / ___|| |__   __ _  __| | _____      __ |  _ \ _   _| |___  ___
 \___ \| '_ \ / _` |/ _` |/ _ \ \ /\ / / | |_) | | | | / __|/ _ \
  ___) | | | | (_| | (_| | (_) \ V  V /  |  __/| |_| | \__ \  __/
 |____/|_| |_|\__,_|\__,_|\___/ \_/\_/   |_|    \__,_|_|___/\___|

                      Recon Pipeline v{}
    "#,
        env!("CARGO_PKG_VERSION")
    );
}

const DEFAULT_RESULTS_DIR: &str = "shadowPulse_Result";

/// Options of one `scan` invocation after CLI defaults are applied.
struct ScanRequest {
    domain: String,
    out: PathBuf,
    config: Config,
    live: bool,
    tor: bool,
    stealth: bool,
    ports: bool,
    vulns: bool,
    screenshots: bool,
}

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    let level = logging::level_for(cli.debug, cli.verbose);

    match cli.command {
        Commands::Doctor { config } => {
            logging::init(level, None)?;
            print_ascii_logo();
            let config = load_config(config)?;
            let report = run_doctor(&config).await;
            if !report.tools_ok {
                anyhow::bail!("some required tools are missing");
            }
            Ok(())
        }
        Commands::Scan { domain, out, config, live, nmap_options, tor, stealth, no_ports_scan, no_vuln_scan, no_screenshots } => {
            let mut config = load_config(config)?;
            if let Some(opts) = nmap_options {
                config.nmap_options = opts;
            }
            let request = ScanRequest {
                domain,
                out: base_output_dir(out, std::env::var_os("HOME"))?,
                config,
                live,
                tor,
                stealth,
                ports: !no_ports_scan,
                vulns: !no_vuln_scan,
                screenshots: !no_screenshots,
            };
            run_scan(request, level).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// `--out` when given, else `$HOME/shadowPulse_Result`.
fn base_output_dir(out: Option<PathBuf>, home: Option<OsString>) -> anyhow::Result<PathBuf> {
    if let Some(out) = out {
        return Ok(out);
    }
    let home = home.filter(|h| !h.is_empty()).context("HOME is not set; pass --out to choose a results directory")?;
    Ok(PathBuf::from(home).join(DEFAULT_RESULTS_DIR))
}

/// Outcome of the `doctor` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DoctorReport {
    tools_ok: bool,
    tor_ok: bool,
    wordlist_ok: bool,
}

async fn run_doctor(config: &Config) -> DoctorReport {
    let tools_ok = tools::check_dependencies();
    let tor_ok = match CircuitController::new(config.tor.clone()).check_prerequisites().await {
        Ok(()) => true,
        Err(e) => {
            println!("[!] {} (only needed for --tor)", e);
            false
        }
    };
    let wordlist_ok = tools::check_wordlist(&config.gobuster_wordlist);
    DoctorReport { tools_ok, tor_ok, wordlist_ok }
}

async fn run_scan(req: ScanRequest, level: &str) -> anyhow::Result<()> {
    print_ascii_logo();

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let run_dir = run_dir_name(&req.out, &req.domain, &stamp);
    utils::ensure_dir(&run_dir)?;
    logging::init(level, Some(&run_dir.join(logging::LOG_FILE)))?;

    if req.tor {
        println!("[+] Tor mode enabled.");
        CircuitController::new(req.config.tor.clone())
            .check_prerequisites()
            .await
            .context("Tor prerequisite check failed; run `doctor` for details")?;
    }
    if req.stealth {
        println!("[+] Stealth mode enabled. Noisy scans are disabled or modified.");
    }
    println!("[+] Results will be saved in: {}", run_dir.display());

    let span = tracing::info_span!("run", domain = %req.domain, tor = req.tor, stealth = req.stealth);
    run_phases(req, run_dir).instrument(span).await
}

async fn run_phases(req: ScanRequest, run_dir: PathBuf) -> anyhow::Result<()> {
    let mut timings = PhaseTimings::default();

    let started = Instant::now();
    tools::check_dependencies();
    timings.record("Dependency Check", started);

    let executor = Arc::new(ProcessHarness::new(req.config.heartbeat_interval()));
    let nmap_options = req.config.nmap_options.clone();
    let ctx = RunContext::new(run_dir, req.config, req.tor, req.stealth, executor);

    ctx.rotate_identity("subdomain enumeration").await;
    let started = Instant::now();
    let subdomains = SubdomainEnumerator::new(&ctx).run(&req.domain).await?;
    timings.record("Subdomain Enumeration", started);

    ctx.rotate_identity("liveness probe").await;
    let started = Instant::now();
    let live_hosts = probe_live_hosts(&ctx, &subdomains).await?;
    timings.record("Find Live Web Servers (httpx)", started);

    if !live_hosts.is_empty() && req.screenshots {
        ctx.rotate_identity("screenshots").await;
        let started = Instant::now();
        capture_screenshots(&ctx, &live_hosts).await?;
        timings.record("Take Screenshots", started);
    }

    if req.ports {
        let hosts = if req.live {
            tracing::info!("Port scanning LIVE hosts only (--live)");
            utils::extract_hosts(&live_hosts)
        } else {
            tracing::info!("Port scanning ALL enumerated subdomains");
            subdomains.clone()
        };
        ctx.rotate_identity("port scanning").await;
        let started = Instant::now();
        let summary = PortScanPipeline::new(&ctx, &nmap_options).run(&hosts).await?;
        timings.record("Port Scanning", started);
        match &summary.report {
            Some(report) => println!("[+] {} hosts in {}", report.host_count(), report.path.display()),
            None => println!("[!] No port-scan data was produced"),
        }
        for skipped in &summary.skipped {
            tracing::info!("{} skipped: {}", skipped.host, skipped.reason);
        }
    } else {
        tracing::info!("Skipping port scanning phase as requested");
    }

    if req.vulns && !live_hosts.is_empty() {
        ctx.rotate_identity("vulnerability scanning").await;
        let started = Instant::now();
        let report = VulnFanOut::from_context(&ctx).run(&ctx.path(LIVE_HOSTS_FILE)).await?;
        timings.record("Vulnerability Scanning", started);
        println!(
            "[+] Vulnerability scans: {} jobs, {} ok, {} failed, {} skipped",
            report.tasks, report.succeeded, report.failed, report.skipped
        );
    }

    timings.print();
    println!("[+] Reconnaissance scan complete! Results in {}", ctx.out_dir().display());
    Ok(())
}

/// Wall-clock time per phase, in execution order.
#[derive(Default)]
struct PhaseTimings {
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTimings {
    fn record(&mut self, phase: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        tracing::info!("{} finished in {:.2}s", phase, elapsed.as_secs_f64());
        self.phases.push((phase, elapsed));
    }

    fn print(&self) {
        let total: Duration = self.phases.iter().map(|(_, d)| *d).sum();
        if total.is_zero() {
            return;
        }
        let rule = "=".repeat(50);
        println!("\n{}\n{:^50}\n{}", rule, "Reconnaissance Statistics", rule);
        println!("{:<30}: {:>10}  {:>8}", "Phase", "Duration", "Share");
        println!("{}", "-".repeat(50));
        for (phase, d) in &self.phases {
            let share = d.as_secs_f64() / total.as_secs_f64() * 100.0;
            println!("{:<30}: {:>9.2}s  ({:>5.1}%)", phase, d.as_secs_f64(), share);
        }
        println!("{}", "-".repeat(50));
        println!("{:<30}: {:>9.2}s  (100.0%)", "Total Time", total.as_secs_f64());
        println!("{}\n", rule);
    }
}

/// `<base>/<domain>_<YYYYmmdd_HHMMSS>`
fn run_dir_name(base: &Path, domain: &str, stamp: &str) -> PathBuf {
    base.join(format!("{}_{}", domain, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_directory_layout() {
        let dir = run_dir_name(Path::new("/srv/results"), "example.test", "20261016_093000");
        assert_eq!(dir, PathBuf::from("/srv/results/example.test_20261016_093000"));
    }

    #[test]
    fn timings_keep_phase_order() {
        let mut t = PhaseTimings::default();
        let now = Instant::now();
        t.record("Subdomain Enumeration", now);
        t.record("Port Scanning", now);
        let names: Vec<_> = t.phases.iter().map(|(p, _)| *p).collect();
        assert_eq!(names, vec!["Subdomain Enumeration", "Port Scanning"]);
    }

    #[test]
    fn results_default_under_home() {
        let dir = base_output_dir(None, Some(OsString::from("/home/analyst"))).unwrap();
        assert_eq!(dir, PathBuf::from("/home/analyst/shadowPulse_Result"));
        let explicit = base_output_dir(Some(PathBuf::from("/data/recon")), None).unwrap();
        assert_eq!(explicit, PathBuf::from("/data/recon"));
        assert!(base_output_dir(None, None).is_err());
    }

    async fn closed_port() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shadow-pulse-bin-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn doctor_reports_tor_and_wordlist() {
        let dir = scratch("doctor");
        let wordlist = dir.join("subdomains.txt");
        std::fs::write(&wordlist, "www\n").unwrap();
        let mut config = Config::default();
        config.tor.socks_addr = closed_port().await;
        config.tor.control_addr = closed_port().await;
        config.gobuster_wordlist = wordlist;

        let report = run_doctor(&config).await;
        assert!(!report.tor_ok);
        assert!(report.wordlist_ok);

        config.gobuster_wordlist = dir.join("absent.txt");
        assert!(!run_doctor(&config).await.wordlist_ok);
    }

    #[tokio::test]
    async fn failed_tor_precheck_lands_in_the_run_log() {
        let base = scratch("tor-precheck");
        let mut config = Config::default();
        config.tor.socks_addr = closed_port().await;
        config.tor.control_addr = closed_port().await;
        let req = ScanRequest {
            domain: "example.test".to_string(),
            out: base.clone(),
            config,
            live: false,
            tor: true,
            stealth: false,
            ports: true,
            vulns: true,
            screenshots: true,
        };

        let err = run_scan(req, "info").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Tor prerequisite check failed"));

        let run_dir = std::fs::read_dir(&base).unwrap().next().unwrap().unwrap().path();
        let log = std::fs::read_to_string(run_dir.join(logging::LOG_FILE)).unwrap();
        assert!(log.contains("is not reachable"), "{log}");
    }
}
