//! Batch pipeline orchestration
//!
//! Loads the URL list, then processes it in fixed-size batches: fetch
//! everything under the HTTP pool, extract non-HTML features inline, render
//! eligible HTML under the render pool, and drop raw bodies once the batch
//! joins. Clustering, rule classification, and report assembly run
//! single-threaded at the end, so the result is deterministic given the
//! fetch results.

use crate::cluster;
use crate::config::Options;
use crate::features;
use crate::fetch::Fetcher;
use crate::loader;
use crate::render::Renderer;
use crate::report;
use crate::rules::{self, PageSignals};
use crate::types::{
    ContentCategory, FetchResult, FullReport, PageWithFeatures, UrlItem, MAX_REDIRECTS,
    MIN_BINARY_SIZE, MIN_HTML_SIZE, MIN_IMAGE_SIZE, MIN_TEXT_LENGTH, MIN_TEXT_SIZE,
};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the whole pipeline and return the final report.
pub async fn run(opts: &Options, cancel: CancellationToken) -> Result<FullReport> {
    info!("loading URLs from {} input(s)", opts.urls.len());

    let mut items: Vec<UrlItem> = Vec::new();
    for input in &opts.urls {
        let loaded =
            loader::load_urls(input).with_context(|| format!("failed to load URLs ({input})"))?;
        let base_id = items.len() as u32;
        items.extend(loaded.into_iter().enumerate().map(|(i, mut item)| {
            item.id = base_id + i as u32 + 1;
            item
        }));
    }
    if items.is_empty() {
        bail!("no valid URL inputs");
    }
    info!("loaded {} URLs", items.len());

    let fetcher =
        Fetcher::new(opts.http_timeout(), MAX_REDIRECTS).context("failed to build fetcher")?;
    let renderer = Arc::new(
        Renderer::launch(opts.page_timeout(), opts.render_parallel)
            .await
            .context("failed to start renderer")?,
    );

    let mut fetch_results: Vec<FetchResult> = Vec::with_capacity(items.len());
    let mut pages_with_features: Vec<PageWithFeatures> = Vec::new();
    let mut rule_signals: Vec<PageSignals> = Vec::new();

    let batch_size = if opts.batch_size == 0 {
        items.len()
    } else {
        opts.batch_size
    };
    let total_batches = items.len().div_ceil(batch_size);
    info!("processing {total_batches} batch(es) of up to {batch_size} URLs");

    for (batch_idx, batch) in items.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            bail!("processing cancelled");
        }
        info!("batch {}/{total_batches}: fetching {} URLs", batch_idx + 1, batch.len());

        let mut batch_results = fetcher.fetch_batch(batch, opts.parallel, &cancel).await;

        let eligible_html: Vec<FetchResult> = batch_results
            .iter()
            .filter(|fr| is_eligible_html(fr))
            .cloned()
            .collect();
        let eligible_non_html: Vec<&FetchResult> = batch_results
            .iter()
            .filter(|fr| is_eligible_non_html(fr))
            .collect();
        info!(
            "batch {}/{total_batches}: {} HTML and {} non-HTML pages eligible for features",
            batch_idx + 1,
            eligible_html.len(),
            eligible_non_html.len()
        );

        // Non-HTML feature extraction is cheap; run it inline.
        for fetch_result in &eligible_non_html {
            let body = fetch_result.raw_body.as_deref().unwrap_or_default();
            let Some(page_features) =
                features::extract_non_html_features(fetch_result.category, body)
            else {
                continue;
            };

            let eligible = match fetch_result.category {
                ContentCategory::Text => page_features.text_length >= MIN_TEXT_LENGTH,
                ContentCategory::Image => page_features.phash != 0,
                ContentCategory::Binary => page_features.text_length > 0,
                _ => false,
            };
            if eligible {
                let mut slim = (*fetch_result).clone();
                slim.strip_bodies();
                pages_with_features.push(PageWithFeatures {
                    result: slim,
                    features: page_features,
                });
            }
        }

        // HTML pages render in parallel under the render semaphore; results
        // land in shared accumulators behind mutexes.
        let collected = Arc::new(Mutex::new(Vec::<PageWithFeatures>::new()));
        let title_overrides = Arc::new(Mutex::new(HashMap::<u32, String>::new()));
        let mut render_tasks = JoinSet::new();

        for fetch_result in eligible_html {
            if cancel.is_cancelled() {
                warn!("render cancelled, skipping remaining pages in batch");
                break;
            }

            let renderer = Arc::clone(&renderer);
            let cancel = cancel.clone();
            let collected = Arc::clone(&collected);
            let title_overrides = Arc::clone(&title_overrides);

            render_tasks.spawn(async move {
                let rendered = match renderer
                    .extract_features(&fetch_result.final_url, &cancel)
                    .await
                {
                    Ok(rendered) => rendered,
                    Err(err) => {
                        debug!(
                            "render failed (URL {}, {}): {err}",
                            fetch_result.id, fetch_result.final_url
                        );
                        return;
                    }
                };

                if !rendered.title.is_empty() {
                    title_overrides
                        .lock()
                        .insert(fetch_result.id, rendered.title.clone());
                }

                // Pages whose rendered text stays under the gate carry no
                // judgeable content and are left to the rule classifier.
                if rendered.features.text_length < MIN_TEXT_LENGTH {
                    return;
                }

                let mut slim = fetch_result;
                slim.strip_bodies();
                slim.title = rendered.title;
                collected.lock().push(PageWithFeatures {
                    result: slim,
                    features: rendered.features,
                });
            });
        }

        while let Some(joined) = render_tasks.join_next().await {
            if let Err(err) = joined {
                // A panicking render is just a failed render for that page.
                error!("render task panicked: {err}");
            }
        }

        pages_with_features.append(&mut *collected.lock());

        {
            let title_overrides = title_overrides.lock();
            for fetch_result in batch_results.iter_mut() {
                if let Some(title) = title_overrides.get(&fetch_result.id) {
                    fetch_result.title = title.clone();
                }
            }
        }

        // Capture rule signals while bodies are still in memory, then drop
        // the bodies to bound peak usage across batches.
        for fetch_result in batch_results.iter_mut() {
            if fetch_result.error.is_none() {
                rule_signals.push(PageSignals::from_fetch(fetch_result));
            }
            fetch_result.strip_bodies();
        }
        fetch_results.append(&mut batch_results);

        info!("batch {}/{total_batches} complete", batch_idx + 1);
    }

    match Arc::try_unwrap(renderer) {
        Ok(renderer) => renderer.close().await,
        Err(_) => warn!("renderer still referenced at shutdown"),
    }

    info!("clustering {} pages with features", pages_with_features.len());
    let content_clusters = cluster::cluster_pages(&pages_with_features);
    info!("content clustering produced {} cluster(s)", content_clusters.len());

    let rule_assignments = rules::build_rule_assignments(&rule_signals);
    info!("rule classification assigned {} URL(s)", rule_assignments.len());

    let report = report::build_report(
        &fetch_results,
        &pages_with_features,
        &content_clusters,
        &rule_assignments,
        opts,
    );

    info!(
        "done: {} URLs, {} with features, {} content cluster(s)",
        report.meta.total_urls, report.meta.eligible_html_urls, report.meta.total_clusters
    );

    Ok(report)
}

/// HTML pages are renderable when the fetch succeeded with a 2xx and the raw
/// document is big enough to plausibly carry content.
fn is_eligible_html(result: &FetchResult) -> bool {
    (200..300).contains(&result.status_code)
        && result.category == ContentCategory::Html
        && result.raw_html.as_deref().map_or(0, <[u8]>::len) >= MIN_HTML_SIZE
}

/// Non-HTML pages gate on a per-category minimum body size.
fn is_eligible_non_html(result: &FetchResult) -> bool {
    if !(200..300).contains(&result.status_code) {
        return false;
    }

    let body_len = result.raw_body.as_deref().map_or(0, <[u8]>::len);
    match result.category {
        ContentCategory::Text => body_len >= MIN_TEXT_SIZE,
        ContentCategory::Image => body_len >= MIN_IMAGE_SIZE,
        ContentCategory::Binary => body_len >= MIN_BINARY_SIZE,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html_result(status: u16, body_len: usize) -> FetchResult {
        FetchResult {
            id: 1,
            status_code: status,
            category: ContentCategory::Html,
            raw_html: Some(vec![b'x'; body_len]),
            ..FetchResult::default()
        }
    }

    #[test]
    fn html_eligibility_gates_on_status_and_size() {
        assert!(is_eligible_html(&html_result(200, 2048)));
        assert!(!is_eligible_html(&html_result(404, 2048)));
        assert!(!is_eligible_html(&html_result(200, 512)));

        let mut wrong_category = html_result(200, 2048);
        wrong_category.category = ContentCategory::Text;
        assert!(!is_eligible_html(&wrong_category));
    }

    #[test]
    fn non_html_eligibility_uses_per_category_minimums() {
        let mut result = FetchResult {
            id: 1,
            status_code: 200,
            category: ContentCategory::Text,
            raw_body: Some(vec![b'x'; 150]),
            ..FetchResult::default()
        };
        assert!(is_eligible_non_html(&result));

        result.raw_body = Some(vec![b'x'; 50]);
        assert!(!is_eligible_non_html(&result));

        result.category = ContentCategory::Image;
        result.raw_body = Some(vec![b'x'; 2048]);
        assert!(is_eligible_non_html(&result));
        result.raw_body = Some(vec![b'x'; 512]);
        assert!(!is_eligible_non_html(&result));

        result.category = ContentCategory::Binary;
        result.raw_body = Some(vec![b'x'; 100]);
        assert!(is_eligible_non_html(&result));

        result.status_code = 301;
        assert!(!is_eligible_non_html(&result));
    }
}
