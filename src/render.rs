//! Headless browser rendering
//!
//! Drives a shared Chromium instance over CDP. Each page gets its own tab,
//! a stability wait (DOM signature and network both quiet), and then a
//! snapshot: outer HTML, DOM statistics, navigation timings, and a PNG
//! screenshot. Concurrency is bounded by a dedicated render semaphore,
//! separate from the fetch pool.

use crate::features;
use crate::types::PageFeatures;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on the page stability wait.
const STABLE_MAX_WAIT: Duration = Duration::from_secs(10);
/// Interval between stability samples.
const STABLE_CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// Short re-check used when the very first sample is already idle.
const STABLE_FAST_PATH_DELAY: Duration = Duration::from_millis(300);
/// Consecutive matching samples required to call the page stable.
const STABLE_SAMPLES_REQUIRED: u32 = 2;

/// Errors from launching the browser or rendering a page.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to configure browser: {0}")]
    Config(String),
    #[error("browser error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("failed to decode evaluation result: {0}")]
    Evaluate(#[from] serde_json::Error),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("render cancelled")]
    Cancelled,
}

/// Snapshot of one rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub features: PageFeatures,
    pub title: String,
}

/// Shared headless Chromium renderer.
pub struct Renderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
    per_page_timeout: Duration,
    pool: Arc<Semaphore>,
}

impl Renderer {
    /// Launch the browser and spawn its CDP event loop.
    pub async fn launch(per_page_timeout: Duration, max_workers: usize) -> Result<Self, RenderError> {
        let config = BrowserConfig::builder()
            .args([
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--ignore-certificate-errors",
            ])
            .build()
            .map_err(RenderError::Config)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("browser handler stopped: {err}");
                    break;
                }
            }
        });

        Ok(Renderer {
            browser,
            handler_task,
            per_page_timeout,
            pool: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }

    /// Render a page and extract its feature vector plus the rendered title.
    ///
    /// Waits for a render slot first, so callers may spawn one task per page
    /// and let the semaphore pace the browser.
    pub async fn extract_features(
        &self,
        final_url: &str,
        cancel: &CancellationToken,
    ) -> Result<RenderedPage, RenderError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| RenderError::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let page = self.browser.new_page("about:blank").await?;
        let work = tokio::time::timeout(self.per_page_timeout, drive_page(&page, final_url));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(RenderError::Cancelled),
            result = work => match result {
                Ok(inner) => inner,
                Err(_) => Err(RenderError::Timeout(self.per_page_timeout)),
            },
        };

        if let Err(err) = page.close().await {
            debug!("failed to close page for {final_url}: {err}");
        }

        outcome
    }

    /// Shut the browser down and stop its event loop.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            debug!("browser close failed: {err}");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

/// Navigate, wait for stability, and collect the page snapshot.
async fn drive_page(page: &Page, url: &str) -> Result<RenderedPage, RenderError> {
    page.goto(url).await?;
    page.wait_for_navigation().await?;
    wait_for_page_stable(page).await?;

    let title = page.get_title().await?.unwrap_or_default();
    let html = page.content().await?;
    let dom_stats_json: String = page.evaluate(DOM_STATS_JS).await?.into_value()?;
    let perf_timing_json: String = page.evaluate(PERF_TIMING_JS).await?.into_value()?;
    let screenshot = page
        .screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build(),
        )
        .await?;

    let features =
        features::extract_html_features(&html, &dom_stats_json, &perf_timing_json, &screenshot);

    Ok(RenderedPage { features, title })
}

/// Wait until the DOM signature stops changing and the network goes quiet.
///
/// Samples every 500 ms for at most 10 s; a page is stable once two
/// consecutive samples match while no resource finished in the last 500 ms.
/// If the very first sample is already idle, a single 300 ms re-check
/// suffices. Timing out is not an error: the page is used as-is.
async fn wait_for_page_stable(page: &Page) -> Result<(), RenderError> {
    let started = Instant::now();
    let mut last_signature = String::new();
    let mut stable_count = 0u32;
    let mut first_check = true;

    while started.elapsed() <= STABLE_MAX_WAIT {
        let signature: String = page.evaluate(DOM_SIGNATURE_JS).await?.into_value()?;
        let network_idle: bool = page.evaluate(NETWORK_IDLE_JS).await?.into_value()?;

        if first_check && network_idle {
            tokio::time::sleep(STABLE_FAST_PATH_DELAY).await;
            let second: String = page.evaluate(DOM_SIGNATURE_JS).await?.into_value()?;
            if second == signature {
                return Ok(());
            }
            first_check = false;
            last_signature = signature;
            continue;
        }
        first_check = false;

        if signature == last_signature && network_idle {
            stable_count += 1;
            if stable_count >= STABLE_SAMPLES_REQUIRED {
                return Ok(());
            }
        } else {
            stable_count = 0;
            last_signature = signature;
        }

        tokio::time::sleep(STABLE_CHECK_INTERVAL).await;
    }

    Ok(())
}

/// Element count plus body text length: cheap signature of DOM churn.
const DOM_SIGNATURE_JS: &str = r#"
(function() {
  var nodeCount = document.getElementsByTagName('*').length;
  var textLength = document.body ? document.body.innerText.length : 0;
  return nodeCount + '_' + textLength;
})()
"#;

/// True when no resource entry finished within the last 500 ms.
const NETWORK_IDLE_JS: &str = r#"
(function() {
  if (!window.performance || !window.performance.getEntriesByType) {
    return true;
  }
  var entries = window.performance.getEntriesByType('resource');
  var now = Date.now();
  for (var i = entries.length - 1; i >= 0; i--) {
    var entry = entries[i];
    var endTime = entry.responseEnd || entry.startTime;
    if (now - endTime < 500) {
      return false;
    }
  }
  return true;
})()
"#;

/// Walk the DOM once, collecting node counts, per-tag frequencies, a depth
/// histogram, and bottom-up element path counts (capped at 5000 paths).
const DOM_STATS_JS: &str = r#"
(function() {
  function getDepth(el) {
    var d = 0;
    while (el && el.parentElement) {
      d++;
      el = el.parentElement;
    }
    return d;
  }
  function getPath(el) {
    var parts = [];
    while (el && el.nodeType === 1 && el.tagName.toLowerCase() !== 'html') {
      parts.push(el.tagName.toLowerCase());
      el = el.parentElement;
    }
    parts.push('body');
    parts.push('html');
    parts.reverse();
    return parts.join('>');
  }
  var all = document.getElementsByTagName('*');
  var tagCount = {};
  var depthHist = [];
  var textNodeCount = 0;
  var pathCount = {};
  var maxPaths = 5000;
  for (var i = 0; i < all.length; i++) {
    var el = all[i];
    var tag = el.tagName.toLowerCase();
    tagCount[tag] = (tagCount[tag] || 0) + 1;
    var d = getDepth(el);
    depthHist[d] = (depthHist[d] || 0) + 1;
    for (var j = 0; j < el.childNodes.length; j++) {
      var n = el.childNodes[j];
      if (n.nodeType === Node.TEXT_NODE && n.textContent.trim().length > 0) {
        textNodeCount++;
      }
    }
    if (i < maxPaths) {
      var p = getPath(el);
      pathCount[p] = (pathCount[p] || 0) + 1;
    }
  }
  for (var k = 0; k < depthHist.length; k++) {
    if (!depthHist[k]) depthHist[k] = 0;
  }
  return JSON.stringify({
    domNodeCount: all.length,
    textNodeCount: textNodeCount,
    tagCount: tagCount,
    depthHist: depthHist,
    pathCount: pathCount
  });
})()
"#;

/// Navigation timing fields used for the behavior vector.
const PERF_TIMING_JS: &str = r#"
JSON.stringify((function() {
  var res = { navigationStart: 0, responseStart: 0, domContentLoadedEventEnd: 0, loadEventEnd: 0 };
  try {
    if (window.performance && window.performance.timing) {
      var t = window.performance.timing;
      res.navigationStart = t.navigationStart;
      res.responseStart = t.responseStart;
      res.domContentLoadedEventEnd = t.domContentLoadedEventEnd;
      res.loadEventEnd = t.loadEventEnd;
    }
  } catch (e) {}
  return res;
})())
"#;
