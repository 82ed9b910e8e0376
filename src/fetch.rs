//! HTTP fetch engine
//!
//! Follows redirects manually so the complete chain is recorded, reads
//! bodies up to a hard cap, classifies responses by media type, and pulls a
//! best-effort `<title>` out of HTML. Fetch failures are per-page data, not
//! errors: every input URL produces a `FetchResult`.

use crate::types::{ContentCategory, FetchResult, UrlItem, MAX_BODY_SIZE};
use futures::StreamExt;
use regex::Regex;
use reqwest::header::LOCATION;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

static TITLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<title[^>]*>\s*(.*?)\s*</title>").expect("title pattern is valid")
});

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// HTML entities decoded when cleaning titles.
const TITLE_ENTITIES: [(&str, &str); 8] = [
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&nbsp;", " "),
    ("&#160;", " "),
    ("&#8203;", ""),
];

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Errors constructing the HTTP client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Concurrent HTTP fetcher with manual redirect tracking.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_redirects: usize,
}

impl Fetcher {
    /// Build a fetcher. TLS verification is intentionally disabled: broken
    /// certificates are a property of the sites being surveyed, not a reason
    /// to drop them from the report.
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Fetcher {
            client,
            max_redirects,
        })
    }

    /// Fetch one URL, following up to `max_redirects` redirects.
    pub async fn fetch(&self, item: UrlItem) -> FetchResult {
        let mut result = FetchResult {
            id: item.id,
            raw_url: item.raw_url.clone(),
            normalized_url: item.normalized_url.clone(),
            redirect_chain: vec![item.normalized_url.clone()],
            ..FetchResult::default()
        };

        let mut current_url = item.normalized_url.clone();
        let mut redirects = 0usize;

        let response = loop {
            let response = match self.client.get(&current_url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    result.error = Some(format!("request failed: {err}"));
                    return result;
                }
            };

            if !response.status().is_redirection() {
                break response;
            }

            let Some(next) = redirect_target(&current_url, &response) else {
                // A 3xx without a usable Location is the final answer.
                break response;
            };

            if redirects >= self.max_redirects {
                result.error = Some(format!("too many redirects (limit {})", self.max_redirects));
                return result;
            }
            redirects += 1;

            current_url = next;
            result.redirect_chain.push(current_url.clone());
        };

        result.status_code = response.status().as_u16();
        result.final_url = current_url;
        result.content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = match read_body_capped(response, MAX_BODY_SIZE).await {
            Ok(body) => body,
            Err(err) => {
                result.error = Some(format!("failed to read response body: {err}"));
                return result;
            }
        };
        result.content_length = body.len() as u64;

        result.category = ContentCategory::from_content_type(&result.content_type);
        match result.category {
            ContentCategory::Html => {
                result.title = extract_title(&body);
                result.raw_html = Some(body);
            }
            ContentCategory::Text | ContentCategory::Image | ContentCategory::Binary => {
                result.raw_body = Some(body);
            }
            ContentCategory::Empty => {}
        }

        result
    }

    /// Fetch a batch concurrently under a semaphore. Results come back in
    /// input order. Cancellation marks the remaining items instead of
    /// dropping them so every input keeps a row in the report.
    pub async fn fetch_batch(
        &self,
        items: &[UrlItem],
        parallel: usize,
        cancel: &CancellationToken,
    ) -> Vec<FetchResult> {
        let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
        let mut handles = Vec::with_capacity(items.len());

        for item in items.iter().cloned() {
            let fetcher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if cancel.is_cancelled() {
                    return FetchResult::failed(&item, "cancelled");
                }
                tokio::select! {
                    _ = cancel.cancelled() => FetchResult::failed(&item, "cancelled"),
                    result = fetcher.fetch(item.clone()) => result,
                }
            }));
        }

        let mut results = Vec::with_capacity(items.len());
        for (handle, item) in handles.into_iter().zip(items) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    debug!("fetch task for {} panicked: {err}", item.normalized_url);
                    results.push(FetchResult::failed(item, "fetch task panicked"));
                }
            }
        }
        results
    }
}

/// Resolve the Location header of a redirect against the current URL.
fn redirect_target(current: &str, response: &reqwest::Response) -> Option<String> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|url| url.to_string())
}

/// Read up to `cap` bytes of the body, truncating anything beyond it.
async fn read_body_capped(response: reqwest::Response, cap: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = cap - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Best-effort `<title>` extraction with entity decoding.
pub fn extract_title(html: &[u8]) -> String {
    let text = String::from_utf8_lossy(html);
    let Some(captures) = TITLE_REGEX.captures(&text) else {
        return String::new();
    };
    let raw_title = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    clean_title(raw_title)
}

fn clean_title(title: &str) -> String {
    let mut title = title.to_string();
    for (entity, replacement) in TITLE_ENTITIES {
        title = title.replace(entity, replacement);
    }
    WHITESPACE_REGEX
        .replace_all(&title, " ")
        .trim()
        .to_string()
}
