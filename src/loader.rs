//! URL list loading and normalization

use crate::types::UrlItem;
use anyhow::{Context, Result};
use url::Url;

/// Load URLs from one input source.
///
/// An input ending in `.txt` is read as a file with one URL per line; blank
/// lines and `#` comments are skipped. Anything else is treated as a
/// comma-separated list of URLs. Ids are assigned 1-based in input order.
pub fn load_urls(input: &str) -> Result<Vec<UrlItem>> {
    let raw_urls: Vec<String> = if input.ends_with(".txt") {
        let content = std::fs::read_to_string(input)
            .with_context(|| format!("failed to read URL list '{input}'"))?;
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    };

    let items = raw_urls
        .into_iter()
        .enumerate()
        .map(|(i, raw_url)| {
            // Unparseable URLs keep their raw form; the fetcher reports the error.
            let normalized_url = normalize_url(&raw_url).unwrap_or_else(|| raw_url.clone());
            UrlItem {
                id: (i + 1) as u32,
                raw_url,
                normalized_url,
            }
        })
        .collect();

    Ok(items)
}

/// Normalize a raw URL: trim, default the scheme to `http://`, and lowercase
/// the host. Returns `None` when the result is not a parseable URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    Url::parse(&candidate).ok().map(|url| url.to_string())
}
