use clap::Parser;
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Automated reconnaissance and vulnerability scanning", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the full recon pipeline against a domain
    Scan {
        /// Target domain (e.g. example.com)
        domain: String,

        /// Base output directory [default: ~/shadowPulse_Result]; each run gets its own timestamped folder inside
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,

        /// JSON settings file (Tor endpoints, rates, concurrency)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Port-scan only hosts that answered over HTTP
        #[arg(long, default_value_t = false)]
        live: bool,

        /// Options passed to nmap for the detailed scan
        #[arg(long)]
        nmap_options: Option<String>,

        /// Route all tool traffic through Tor and rotate identities between steps
        #[arg(long, default_value_t = false)]
        tor: bool,

        /// Passive discovery and evasive nmap options
        #[arg(long, default_value_t = false)]
        stealth: bool,

        /// Skip masscan + nmap
        #[arg(long, default_value_t = false)]
        no_ports_scan: bool,

        /// Skip nikto / wpscan / nuclei
        #[arg(long, default_value_t = false)]
        no_vuln_scan: bool,

        /// Skip cutycapt screenshots
        #[arg(long, default_value_t = false)]
        no_screenshots: bool,
    },

    /// Check external tools, the Tor endpoints and the gobuster wordlist
    Doctor {
        /// JSON settings file whose Tor endpoints and wordlist are checked
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
