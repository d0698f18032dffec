use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Non-empty, trimmed lines of a text file.
pub fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let data = fs::read_to_string(path)?;
    Ok(data.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

pub fn write_lines<S: AsRef<str>>(path: &Path, lines: &[S]) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    for line in lines {
        f.write_all(line.as_ref().as_bytes())?;
        f.write_all(b"\n")?;
    }
    f.flush()
}

/// Turns a URL or hostname into something safe to use as a file name.
pub fn sanitize_filename(raw: &str) -> String {
    let stripped = raw.strip_prefix("https://").or_else(|| raw.strip_prefix("http://")).unwrap_or(raw);
    stripped
        .chars()
        .map(|c| match c {
            '/' | ':' | '?' | '&' | '=' | '\\' | '*' | '<' | '>' | '|' | '"' => '_',
            c => c,
        })
        .collect()
}

/// Unique hostnames of a list of URLs; bare hosts are accepted too.
pub fn extract_hosts(urls: &[String]) -> Vec<String> {
    let mut hosts = BTreeSet::new();
    for raw in urls {
        let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.clone()
        } else {
            format!("http://{}", raw)
        };
        if let Ok(u) = url::Url::parse(&candidate) {
            if let Some(host) = u.host_str() {
                hosts.insert(host.to_string());
            }
        }
    }
    hosts.into_iter().collect()
}

#[cfg(test)]
pub(crate) fn test_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("shadow-pulse-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_urls() {
        assert_eq!(sanitize_filename("https://wp-admin.example.test:8443/a?b=c"), "wp-admin.example.test_8443_a_b_c");
        assert_eq!(sanitize_filename("plain.example.test"), "plain.example.test");
    }

    #[test]
    fn hosts_from_live_urls() {
        let urls = vec![
            "https://a.example.test".to_string(),
            "http://a.example.test:8080/login".to_string(),
            "b.example.test".to_string(),
        ];
        assert_eq!(extract_hosts(&urls), vec!["a.example.test", "b.example.test"]);
    }

    #[test]
    fn line_files() {
        let dir = test_dir("utils-lines");
        let path = dir.join("hosts.txt");
        write_lines(&path, &["one", "two"]).unwrap();
        fs::write(&path, fs::read_to_string(&path).unwrap() + "\n  \nthree \n").unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["one", "two", "three"]);
    }
}
