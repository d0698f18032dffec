use std::fmt;
use std::path::Path;
use which::which;

/// How a tool's traffic leaves the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// Prefixed with the proxy-chaining helper (proxychains4).
    Proxied,
}

/// A fully-formed external command: program plus explicit argument list.
///
/// Arguments are never joined into a shell string, so hostnames and URLs coming
/// from tool output cannot inject extra commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    route: Route,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), route: Route::Direct }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn proxied(mut self, proxied: bool) -> Self {
        self.route = if proxied { Route::Proxied } else { Route::Direct };
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

// --- Port scanning ---

/// Fast full-range sweep of one address, JSON output.
pub fn masscan(ip: &str, output: &Path, rate: u32) -> ToolInvocation {
    ToolInvocation::new("masscan")
        .arg(ip)
        .arg("-p1-65535")
        .arg(format!("--rate={}", rate))
        .arg("-oJ")
        .path_arg(output)
}

/// Detailed scan restricted to `ports`, XML output.
pub fn nmap(host: &str, ports: &[u16], options: &[String], output: &Path) -> ToolInvocation {
    let port_list = ports.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
    ToolInvocation::new("nmap")
        .arg("-p")
        .arg(port_list)
        .args(options.iter().cloned())
        .arg(host)
        .arg("-oX")
        .path_arg(output)
}

/// Fragmented packets, five random decoys, polite timing.
pub fn stealth_nmap_options() -> Vec<String> {
    ["-sS", "-T2", "-f", "-D", "RND:5"].iter().map(|s| s.to_string()).collect()
}

pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

// --- Subdomain discovery ---

pub fn subfinder(domain: &str, output: &Path, passive: bool) -> ToolInvocation {
    let inv = ToolInvocation::new("subfinder");
    let inv = if passive { inv.arg("-passive") } else { inv };
    inv.args(["-silent", "-d", domain, "-o"]).path_arg(output)
}

pub fn findomain(domain: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("findomain").args(["-q", "-t", domain, "-u"]).path_arg(output)
}

pub fn dnsrecon(domain: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("dnsrecon").args(["-d", domain, "-t", "brt", "-j"]).path_arg(output)
}

pub fn dnsenum(domain: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("dnsenum").args(["--noreverse", "-o"]).path_arg(output).arg(domain)
}

/// Results come back on stdout as `Found: <name>` lines.
pub fn gobuster_dns(domain: &str, wordlist: &Path) -> ToolInvocation {
    ToolInvocation::new("gobuster").args(["dns", "-d", domain, "-w"]).path_arg(wordlist).arg("--quiet")
}

// --- Liveness / screenshots ---

pub fn httpx(input: &Path, threads: u16, output: &Path) -> ToolInvocation {
    ToolInvocation::new("httpx")
        .arg("-l")
        .path_arg(input)
        .args(["-threads".to_string(), threads.to_string()])
        .args(["-follow-redirects", "-silent", "-o"])
        .path_arg(output)
}

pub fn cutycapt(url: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("xvfb-run")
        .arg("cutycapt")
        .arg(format!("--url={}", url))
        .arg(format!("--out={}", output.display()))
}

// --- Vulnerability scanners ---

pub fn nikto(url: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("nikto").args(["-h", url, "-output"]).path_arg(output)
}

pub fn wpscan(url: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("wpscan")
        .args(["--url", url, "--random-user-agent", "--disable-tls-checks", "-o"])
        .path_arg(output)
}

pub fn nuclei(url: &str, output: &Path) -> ToolInvocation {
    ToolInvocation::new("nuclei").args(["-u", url, "-o"]).path_arg(output)
}

// --- Dependency check ---

pub const REQUIRED_TOOLS: &[&str] = &[
    "masscan", "subfinder", "findomain", "httpx", "gobuster", "nmap", "dnsrecon", "dnsenum",
    "proxychains4", "xvfb-run", "cutycapt", "nikto", "wpscan", "nuclei",
];

pub fn install_hint(tool: &str) -> Option<&'static str> {
    let hint = match tool {
        "masscan" => "sudo apt-get install -y masscan",
        "subfinder" => "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest",
        "httpx" => "go install -v github.com/projectdiscovery/httpx/cmd/httpx@latest",
        "findomain" => "cargo install findomain",
        "gobuster" => "go install github.com/OJ/gobuster/v3@latest",
        "nmap" => "sudo apt-get install -y nmap",
        "dnsrecon" => "sudo apt-get install -y dnsrecon",
        "dnsenum" => "sudo apt-get install -y dnsenum",
        "proxychains4" => "sudo apt-get install -y proxychains4",
        "xvfb-run" => "sudo apt-get install -y xvfb",
        "cutycapt" => "sudo apt-get install -y cutycapt",
        "nikto" => "sudo apt-get install -y nikto",
        "wpscan" => "sudo gem install wpscan",
        "nuclei" => "go install -v github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest",
        _ => return None,
    };
    Some(hint)
}

pub fn is_installed(tool: &str) -> bool {
    which(tool).is_ok()
}

/// Names from [`REQUIRED_TOOLS`] that are not on PATH.
pub fn missing_tools() -> Vec<&'static str> {
    REQUIRED_TOOLS.iter().copied().filter(|t| !is_installed(t)).collect()
}

pub fn check_dependencies() -> bool {
    println!("[*] Checking for required tools...");
    let missing = missing_tools();
    for tool in &missing {
        tracing::warn!("Tool not found: {}", tool);
        if let Some(hint) = install_hint(tool) {
            println!("    -> To install {}: {}", tool, hint);
        }
    }
    if missing.is_empty() {
        println!("[+] All required tools are installed.");
    }
    missing.is_empty()
}

/// The gobuster DNS wordlist ships with the `seclists` package.
pub fn check_wordlist(path: &Path) -> bool {
    if path.is_file() {
        println!("[+] Gobuster wordlist found: {}", path.display());
        return true;
    }
    tracing::warn!("Gobuster wordlist not found: {}", path.display());
    println!("    -> To install it: sudo apt-get install -y seclists");
    false
}
