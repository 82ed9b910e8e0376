//! Core types shared across the pagefold pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum cleaned text length (code points) for HTML and text content to be
/// considered judgeable by the content similarity engine.
pub const MIN_TEXT_LENGTH: usize = 200;

/// Maximum number of redirects followed per URL.
pub const MAX_REDIRECTS: usize = 5;

/// Maximum response body size read per page (10 MiB); larger bodies are truncated.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Minimum raw body sizes per content category for feature eligibility.
pub const MIN_HTML_SIZE: usize = 1024;
pub const MIN_TEXT_SIZE: usize = 100;
pub const MIN_IMAGE_SIZE: usize = 1024;
pub const MIN_BINARY_SIZE: usize = 100;

/// Maximum number of distinct DOM paths tracked per page.
pub const MAX_TRACKED_PATHS: usize = 5000;

/// A single input URL with its stable 1-based id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlItem {
    pub id: u32,
    pub raw_url: String,
    pub normalized_url: String,
}

/// Coarse content classification derived from the response media type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Html,
    /// JSON, XML, plain text, CSS, JavaScript
    Text,
    Image,
    Binary,
    #[default]
    Empty,
}

impl ContentCategory {
    /// Classify a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.to_lowercase();

        if ct.contains("text/html") {
            return ContentCategory::Html;
        }

        if ct.contains("application/json")
            || ct.contains("application/xml")
            || ct.contains("text/xml")
            || ct.contains("text/plain")
            || ct.contains("text/css")
            || ct.contains("text/javascript")
            || ct.contains("application/javascript")
        {
            return ContentCategory::Text;
        }

        if ct.contains("image/") {
            return ContentCategory::Image;
        }

        if !ct.is_empty() {
            return ContentCategory::Binary;
        }

        ContentCategory::Empty
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Html => "html",
            ContentCategory::Text => "text",
            ContentCategory::Image => "image",
            ContentCategory::Binary => "binary",
            ContentCategory::Empty => "empty",
        }
    }
}

/// Result of fetching a single URL over HTTP.
///
/// Raw bodies are held only until feature extraction and rule signal capture
/// complete for the batch, then dropped to bound memory.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub id: u32,
    pub raw_url: String,
    pub normalized_url: String,
    /// Final URL after following redirects.
    pub final_url: String,
    /// Every hop in order, including the origin and the final URL.
    pub redirect_chain: Vec<String>,
    /// Final HTTP status; 0 when the request itself failed.
    pub status_code: u16,
    pub content_length: u64,
    pub content_type: String,
    pub category: ContentCategory,
    pub error: Option<String>,
    /// Raw response body for HTML responses.
    pub raw_html: Option<Vec<u8>>,
    /// Raw response body for text, image, and binary responses.
    pub raw_body: Option<Vec<u8>>,
    /// Best-effort `<title>` text; may be replaced by the rendered title.
    pub title: String,
}

impl FetchResult {
    /// Build a result carrying only the input item and an error message.
    pub fn failed(item: &UrlItem, error: impl Into<String>) -> Self {
        FetchResult {
            id: item.id,
            raw_url: item.raw_url.clone(),
            normalized_url: item.normalized_url.clone(),
            redirect_chain: vec![item.normalized_url.clone()],
            error: Some(error.into()),
            ..FetchResult::default()
        }
    }

    /// Drop raw bodies once downstream consumers have taken what they need.
    pub fn strip_bodies(&mut self) {
        self.raw_html = None;
        self.raw_body = None;
    }
}

/// Multi-modal feature vector for a page.
///
/// Only the fields relevant to the category are populated: text features for
/// Html/Text, visual features for Html/Image, DOM and timing for Html only,
/// and an MD5-derived fingerprint in `text_sim_hash` for Binary.
#[derive(Debug, Clone, Default)]
pub struct PageFeatures {
    pub category: ContentCategory,

    /// 64-bit SimHash of the cleaned text (Html/Text), or the MD5 prefix for Binary.
    pub text_sim_hash: u64,
    /// Code points of cleaned text for Html/Text; byte length for Image/Binary.
    pub text_length: usize,

    pub dom_node_count: usize,
    pub text_node_count: usize,
    pub tag_count: HashMap<String, usize>,
    pub depth_hist: Vec<usize>,
    pub path_count: HashMap<String, usize>,

    pub screenshot_w: u32,
    pub screenshot_h: u32,
    /// 64-bit DCT perceptual hash of the screenshot or decoded image.
    pub phash: u64,

    /// Navigation timings in milliseconds; all zero when unavailable.
    pub ttfb: f64,
    pub dom_content_loaded: f64,
    pub load_event: f64,
}

/// A fetch result paired with its extracted features, bodies stripped.
#[derive(Debug, Clone)]
pub struct PageWithFeatures {
    pub result: FetchResult,
    pub features: PageFeatures,
}

/// Per-URL row of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlReport {
    pub id: u32,
    pub url: String,
    pub normalized_url: String,
    pub final_url: String,
    pub redirect_chain: Vec<String>,
    pub status_code: u16,
    pub content_length: u64,
    pub content_type: String,
    pub error: String,
    pub title: String,
    pub cluster_id: String,
    pub is_canonical: bool,
    pub similarity_to_canonical: f64,
    pub content_sim: f64,
    pub structure_sim: f64,
    pub visual_sim: f64,
    pub behavior_sim: f64,
}

/// Summary of one content cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub canonical_url: String,
    pub member_ids: Vec<u32>,
}

/// Run-level metadata attached to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaInfo {
    pub total_urls: usize,
    pub eligible_html_urls: usize,
    pub eligible_non_html_urls: usize,
    pub total_clusters: usize,
    pub sim_threshold: f64,
    pub generated_at: String,
}

/// The complete report written to JSON or CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullReport {
    pub urls: Vec<UrlReport>,
    pub clusters: Vec<ClusterInfo>,
    pub meta: MetaInfo,
}

/// DOM statistics as emitted by the renderer's injected script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomStats {
    pub dom_node_count: usize,
    pub text_node_count: usize,
    pub tag_count: HashMap<String, usize>,
    pub depth_hist: Vec<usize>,
    pub path_count: HashMap<String, usize>,
}

/// Navigation timing samples as emitted by the renderer's injected script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerfTiming {
    pub navigation_start: i64,
    pub response_start: i64,
    pub dom_content_loaded_event_end: i64,
    pub load_event_end: i64,
}
