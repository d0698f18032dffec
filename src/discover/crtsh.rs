use anyhow::Result;
use reqwest::Client;
use std::collections::BTreeSet;

/// Names from crt.sh certificate transparency entries, wildcards stripped.
pub async fn crtsh_subdomains(client: &Client, domain: &str) -> Result<Vec<String>> {
    let q = format!("%.{}", domain);
    let url = format!("https://crt.sh/?q={}&output=json", urlencoding::encode(&q));
    tracing::debug!("Querying crt.sh for domain: {}", domain);
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        tracing::warn!("crt.sh returned status {}", resp.status());
        return Ok(vec![]);
    }
    let txt = resp.text().await?;
    Ok(names_from_crtsh_json(&txt)?)
}

/// `name_value` can hold several names separated by newlines.
pub fn names_from_crtsh_json(body: &str) -> serde_json::Result<Vec<String>> {
    // crt.sh sometimes returns non-JSON on failure; the caller sees the parse error
    let v: serde_json::Value = serde_json::from_str(body)?;
    let mut out = BTreeSet::new();
    if let Some(arr) = v.as_array() {
        for item in arr {
            if let Some(name) = item.get("name_value").and_then(|n| n.as_str()) {
                for n in name.split('\n') {
                    let s = n.trim();
                    let s = s.strip_prefix("*.").unwrap_or(s);
                    if !s.is_empty() {
                        out.insert(s.to_string());
                    }
                }
            }
        }
    }
    Ok(out.into_iter().collect())
}
