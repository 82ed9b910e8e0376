//! Feature extraction for fetched and rendered pages
//!
//! Turns raw responses (plus the rendered DOM snapshot for HTML) into
//! [`PageFeatures`]. HTML sub-features fail independently: a broken
//! screenshot still leaves text and DOM features usable.

pub mod phash;

use crate::types::{ContentCategory, DomStats, PageFeatures, PerfTiming};
use crate::util::{compute_simhash, md5_prefix64};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Semantic containers tried first when locating main text.
const PRIORITY_SELECTORS: [&str; 5] = [
    "article",
    "main",
    "[role='main']",
    "[class*='content']",
    "[class*='article']",
];

/// Tag names skipped outright during the density walk.
const SKIP_TAGS: [&str; 4] = ["nav", "footer", "header", "aside"];

/// Substrings that disqualify an element by class or id.
const SKIP_NAME_PATTERNS: [&str; 7] =
    ["nav", "footer", "header", "aside", "sidebar", "ad", "copyright"];

/// Minimum trimmed text for a block to be considered at all.
const MIN_BLOCK_CHARS: usize = 50;
/// Minimum chars-per-child ratio for density-walk candidates.
const MIN_TEXT_DENSITY: f64 = 10.0;

/// Extract the full feature vector for a rendered HTML page.
///
/// Each sub-extraction failure is logged at debug level and leaves the
/// remaining features intact.
pub fn extract_html_features(
    html: &str,
    dom_stats_json: &str,
    perf_timing_json: &str,
    screenshot_png: &[u8],
) -> PageFeatures {
    let mut features = PageFeatures {
        category: ContentCategory::Html,
        ..PageFeatures::default()
    };

    extract_text_features(&mut features, html);

    match serde_json::from_str::<DomStats>(dom_stats_json) {
        Ok(stats) => {
            features.dom_node_count = stats.dom_node_count;
            features.text_node_count = stats.text_node_count;
            features.tag_count = stats.tag_count;
            features.depth_hist = stats.depth_hist;
            features.path_count = stats.path_count;
        }
        Err(err) => debug!("DOM stats parse failed: {err}"),
    }

    match serde_json::from_str::<PerfTiming>(perf_timing_json) {
        Ok(timing) => apply_perf_timing(&mut features, &timing),
        Err(err) => debug!("performance timing parse failed: {err}"),
    }

    match image::load_from_memory_with_format(screenshot_png, image::ImageFormat::Png) {
        Ok(img) => {
            features.screenshot_w = img.width();
            features.screenshot_h = img.height();
            features.phash = phash::perception_hash(&img);
        }
        Err(err) => debug!("screenshot decode failed: {err}"),
    }

    features
}

/// Extract features for non-HTML content.
///
/// Text gets the same cleaning and SimHash as HTML main text. Images get a
/// perceptual hash; a decode failure downgrades the page to Binary. Binary
/// content is fingerprinted with an MD5 prefix and matched exactly.
pub fn extract_non_html_features(category: ContentCategory, body: &[u8]) -> Option<PageFeatures> {
    if body.is_empty() {
        return None;
    }

    let mut features = PageFeatures {
        category,
        ..PageFeatures::default()
    };

    match category {
        ContentCategory::Text => {
            let cleaned = clean_text(&String::from_utf8_lossy(body));
            features.text_length = cleaned.chars().count();
            features.text_sim_hash = compute_simhash(&cleaned);
        }
        ContentCategory::Image => match image::load_from_memory(body) {
            Ok(img) => {
                features.screenshot_w = img.width();
                features.screenshot_h = img.height();
                features.phash = phash::perception_hash(&img);
                features.text_length = body.len();
            }
            Err(err) => {
                debug!("image decode failed, downgrading to binary: {err}");
                features.category = ContentCategory::Binary;
                features.text_sim_hash = md5_prefix64(body);
                features.text_length = body.len();
            }
        },
        ContentCategory::Binary => {
            features.text_sim_hash = md5_prefix64(body);
            features.text_length = body.len();
        }
        ContentCategory::Html | ContentCategory::Empty => return None,
    }

    Some(features)
}

fn extract_text_features(features: &mut PageFeatures, html: &str) {
    let document = Html::parse_document(html);
    let body_text = extract_main_text(&document);
    let cleaned = clean_text(&body_text);
    features.text_length = cleaned.chars().count();
    features.text_sim_hash = compute_simhash(&cleaned);
}

/// Pull the main text out of a rendered document.
///
/// Semantic containers win when present: the three longest qualifying
/// priority blocks are joined. Otherwise every element under `body` is
/// scored by `length + density * 10` and the top five blocks are joined,
/// with navigation chrome filtered out by tag, class, and id patterns.
fn extract_main_text(document: &Html) -> String {
    let mut priority_blocks: Vec<String> = Vec::new();
    for selector_str in PRIORITY_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(&element);
            if text.chars().count() >= MIN_BLOCK_CHARS {
                priority_blocks.push(text);
            }
        }
    }

    if !priority_blocks.is_empty() {
        priority_blocks.sort_by_key(|b| std::cmp::Reverse(b.chars().count()));
        priority_blocks.truncate(3);
        return priority_blocks.join(" ");
    }

    let Ok(body_selector) = Selector::parse("body *") else {
        return String::new();
    };

    let mut scored_blocks: Vec<(f64, String)> = Vec::new();
    for element in document.select(&body_selector) {
        if should_skip_element(&element) {
            continue;
        }

        let text = element_text(&element);
        let length = text.chars().count();
        if length < MIN_BLOCK_CHARS {
            continue;
        }

        let child_count = element
            .children()
            .filter_map(ElementRef::wrap)
            .count()
            .max(1);
        let density = length as f64 / child_count as f64;
        if density > MIN_TEXT_DENSITY {
            scored_blocks.push((length as f64 + density * 10.0, text));
        }
    }

    scored_blocks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored_blocks.truncate(5);
    scored_blocks
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join(" ")
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn should_skip_element(element: &ElementRef) -> bool {
    let tag = element.value().name();
    if SKIP_TAGS.contains(&tag) {
        return true;
    }

    for attr in ["class", "id"] {
        if let Some(value) = element.value().attr(attr) {
            let value = value.to_lowercase();
            if SKIP_NAME_PATTERNS.iter().any(|p| value.contains(p)) {
                return true;
            }
        }
    }

    false
}

/// Normalize text before hashing: lowercase, collapse whitespace runs, and
/// drop tokens shorter than two bytes.
pub fn clean_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .filter(|token| token.len() >= 2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn apply_perf_timing(features: &mut PageFeatures, timing: &PerfTiming) {
    if timing.navigation_start == 0 {
        return;
    }

    let base = timing.navigation_start as f64;
    features.ttfb = timing.response_start as f64 - base;
    features.dom_content_loaded = timing.dom_content_loaded_event_end as f64 - base;
    features.load_event = timing.load_event_end as f64 - base;
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILLER: &str = "Deterministic filler text long enough to pass the block threshold.";

    #[test]
    fn clean_text_lowercases_collapses_and_filters() {
        assert_eq!(
            clean_text("  The Quick\n\tBrown  a Fox  "),
            "the quick brown fox"
        );
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("a b c"), "");
    }

    #[test]
    fn priority_container_wins_over_body_walk() {
        let html = format!(
            "<html><body>\
             <nav>Navigation junk that is definitely long enough to qualify as a block</nav>\
             <article>Article body. {FILLER} {FILLER}</article>\
             <div>Loose div content. {FILLER} {FILLER} {FILLER}</div>\
             </body></html>"
        );
        let document = Html::parse_document(&html);
        let text = extract_main_text(&document);
        assert!(text.contains("Article body."));
        assert!(!text.contains("Loose div content."));
    }

    #[test]
    fn density_walk_skips_chrome_regions() {
        let html = format!(
            "<html><body>\
             <div class=\"sidebar\">Sidebar text. {FILLER} {FILLER}</div>\
             <div id=\"main-footer\">Footer text. {FILLER} {FILLER}</div>\
             <div class=\"post\"><p>Real body text. {FILLER} {FILLER}</p></div>\
             </body></html>"
        );
        let document = Html::parse_document(&html);
        let text = extract_main_text(&document);
        assert!(text.contains("Real body text."));
        assert!(!text.contains("Sidebar text."));
        assert!(!text.contains("Footer text."));
    }

    #[test]
    fn short_blocks_are_ignored() {
        let document = Html::parse_document("<html><body><p>tiny</p></body></html>");
        assert_eq!(extract_main_text(&document), "");
    }

    #[test]
    fn html_features_survive_bad_snapshot_inputs() {
        let html = format!("<html><body><article>{FILLER} {FILLER} {FILLER}</article></body></html>");
        let features = extract_html_features(&html, "not json", "also not json", b"not a png");
        assert_eq!(features.category, ContentCategory::Html);
        assert!(features.text_length > 0);
        assert_ne!(features.text_sim_hash, 0);
        assert_eq!(features.dom_node_count, 0);
        assert_eq!(features.phash, 0);
    }

    #[test]
    fn html_features_parse_dom_and_timing() {
        let dom = r#"{"domNodeCount":42,"textNodeCount":7,"tagCount":{"div":5},"depthHist":[1,2,3],"pathCount":{"html>body>div":5}}"#;
        let perf = r#"{"navigationStart":1000,"responseStart":1100,"domContentLoadedEventEnd":1400,"loadEventEnd":1900}"#;
        let features = extract_html_features("<html><body></body></html>", dom, perf, b"");
        assert_eq!(features.dom_node_count, 42);
        assert_eq!(features.text_node_count, 7);
        assert_eq!(features.tag_count.get("div"), Some(&5));
        assert_eq!(features.depth_hist, vec![1, 2, 3]);
        assert!((features.ttfb - 100.0).abs() < 1e-9);
        assert!((features.dom_content_loaded - 400.0).abs() < 1e-9);
        assert!((features.load_event - 900.0).abs() < 1e-9);
    }

    #[test]
    fn zero_navigation_start_leaves_timings_zero() {
        let perf = r#"{"navigationStart":0,"responseStart":50,"domContentLoadedEventEnd":60,"loadEventEnd":70}"#;
        let features = extract_html_features("<html></html>", "{}", perf, b"");
        assert_eq!(features.ttfb, 0.0);
        assert_eq!(features.dom_content_loaded, 0.0);
        assert_eq!(features.load_event, 0.0);
    }

    #[test]
    fn text_features_hash_cleaned_content() {
        let body = b"Some JSON-ish body with enough words to hash reliably";
        let features = extract_non_html_features(ContentCategory::Text, body).unwrap();
        assert_eq!(features.category, ContentCategory::Text);
        assert_eq!(
            features.text_sim_hash,
            compute_simhash(&clean_text(std::str::from_utf8(body).unwrap()))
        );
        assert!(features.text_length > 0);
    }

    #[test]
    fn binary_features_use_md5_prefix_and_byte_length() {
        let body = vec![0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let features = extract_non_html_features(ContentCategory::Binary, &body).unwrap();
        assert_eq!(features.text_sim_hash, md5_prefix64(&body));
        assert_eq!(features.text_length, body.len());
    }

    #[test]
    fn undecodable_image_downgrades_to_binary() {
        let body = b"definitely not an image".to_vec();
        let features = extract_non_html_features(ContentCategory::Image, &body).unwrap();
        assert_eq!(features.category, ContentCategory::Binary);
        assert_eq!(features.text_sim_hash, md5_prefix64(&body));
        assert_eq!(features.phash, 0);
    }

    #[test]
    fn valid_image_gets_dimensions_and_phash() {
        let img = image::GrayImage::from_fn(40, 30, |x, y| image::Luma([(x * 6 + y) as u8]));
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let features = extract_non_html_features(ContentCategory::Image, &png).unwrap();
        assert_eq!(features.category, ContentCategory::Image);
        assert_eq!(features.screenshot_w, 40);
        assert_eq!(features.screenshot_h, 30);
        assert_eq!(features.text_length, png.len());
        assert_ne!(features.phash, 0);
    }

    #[test]
    fn empty_body_yields_no_features() {
        assert!(extract_non_html_features(ContentCategory::Text, b"").is_none());
        assert!(extract_non_html_features(ContentCategory::Empty, b"x").is_none());
    }
}
