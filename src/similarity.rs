//! Pairwise page similarity scores and the duplicate predicate
//!
//! All scores land in [0, 1]. The composite predicate is deliberately strict:
//! near-identical text plus corroborating structure or visuals, with a
//! visual-only override for pages that carry no usable text.

use crate::types::PageFeatures;
use crate::util::{cosine_similarity, hamming64};

/// Text similarity threshold for the primary duplicate clause.
pub const CONTENT_SIM_THRESHOLD: f64 = 0.97;
/// Structure similarity threshold for the primary duplicate clause.
pub const STRUCTURE_SIM_THRESHOLD: f64 = 0.85;
/// Visual similarity threshold for the primary duplicate clause.
pub const VISUAL_SIM_THRESHOLD: f64 = 0.85;
/// Visual similarity threshold for the visual-only override clause.
pub const VISUAL_HIGH_SIM_THRESHOLD: f64 = 0.99;

/// Tags whose counts feed the DOM statistics vector.
const KEY_TAGS: [&str; 5] = ["div", "a", "img", "input", "script"];

/// Text similarity from SimHash Hamming distance.
///
/// Floors to 0 when either text is empty, when lengths differ by more than
/// 70%, or when the fingerprints are at least 16 bits apart.
pub fn sim_content(a: &PageFeatures, b: &PageFeatures) -> f64 {
    if a.text_length == 0 || b.text_length == 0 {
        return 0.0;
    }

    let ratio =
        a.text_length.min(b.text_length) as f64 / a.text_length.max(b.text_length) as f64;
    if ratio < 0.3 {
        return 0.0;
    }

    let d = hamming64(a.text_sim_hash, b.text_sim_hash);
    if d >= 16 {
        return 0.0;
    }

    1.0 - f64::from(d) / 16.0
}

/// Cosine similarity over node counts and key tag frequencies.
pub fn sim_dom_stats(a: &PageFeatures, b: &PageFeatures) -> f64 {
    let mut vec_a = Vec::with_capacity(2 + KEY_TAGS.len());
    let mut vec_b = Vec::with_capacity(2 + KEY_TAGS.len());

    vec_a.push(a.dom_node_count as f64);
    vec_a.push(a.text_node_count as f64);
    vec_b.push(b.dom_node_count as f64);
    vec_b.push(b.text_node_count as f64);

    for tag in KEY_TAGS {
        vec_a.push(a.tag_count.get(tag).copied().unwrap_or(0) as f64);
        vec_b.push(b.tag_count.get(tag).copied().unwrap_or(0) as f64);
    }

    cosine_similarity(&vec_a, &vec_b)
}

/// Weighted Jaccard similarity over the DOM path count maps.
pub fn sim_path(a: &PageFeatures, b: &PageFeatures) -> f64 {
    if a.path_count.is_empty() || b.path_count.is_empty() {
        return 0.0;
    }

    let keys: std::collections::HashSet<&String> =
        a.path_count.keys().chain(b.path_count.keys()).collect();

    let mut intersection = 0.0;
    let mut union = 0.0;
    for key in keys {
        let va = a.path_count.get(key).copied().unwrap_or(0) as f64;
        let vb = b.path_count.get(key).copied().unwrap_or(0) as f64;
        intersection += va.min(vb);
        union += va.max(vb);
    }

    if union == 0.0 {
        return 0.0;
    }

    intersection / union
}

/// Structural similarity: equal parts DOM statistics and path overlap.
pub fn sim_structure(a: &PageFeatures, b: &PageFeatures) -> f64 {
    0.5 * sim_dom_stats(a, b) + 0.5 * sim_path(a, b)
}

/// Visual similarity from perceptual hash Hamming distance.
///
/// Floors to 0 when either hash is missing or the hashes are at least 20 bits apart.
pub fn sim_visual(a: &PageFeatures, b: &PageFeatures) -> f64 {
    if a.phash == 0 || b.phash == 0 {
        return 0.0;
    }

    let d = hamming64(a.phash, b.phash);
    if d >= 20 {
        return 0.0;
    }

    1.0 - f64::from(d) / 20.0
}

/// Behavioral similarity over the navigation timing vector.
pub fn sim_behavior(a: &PageFeatures, b: &PageFeatures) -> f64 {
    cosine_similarity(
        &[a.ttfb, a.dom_content_loaded, a.load_event],
        &[b.ttfb, b.dom_content_loaded, b.load_event],
    )
}

/// Weighted combination of the four scores, reported for display only.
pub fn total_sim(content: f64, structure: f64, visual: f64, behavior: f64) -> f64 {
    0.40 * content + 0.25 * structure + 0.25 * visual + 0.10 * behavior
}

/// All pairwise scores for one page pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimilarityScores {
    pub content: f64,
    pub structure: f64,
    pub visual: f64,
    pub behavior: f64,
    pub total: f64,
}

/// Compute every similarity dimension plus the display total.
pub fn score_pair(a: &PageFeatures, b: &PageFeatures) -> SimilarityScores {
    let content = sim_content(a, b);
    let structure = sim_structure(a, b);
    let visual = sim_visual(a, b);
    let behavior = sim_behavior(a, b);
    SimilarityScores {
        content,
        structure,
        visual,
        behavior,
        total: total_sim(content, structure, visual, behavior),
    }
}

/// Decide whether two pages are duplicates.
///
/// Clause 1: near-identical text corroborated by structure or visuals.
/// Clause 2: near-identical visuals alone, for pages without usable text.
/// The display total plays no part in this decision.
pub fn is_duplicate(a: &PageFeatures, b: &PageFeatures) -> bool {
    let content = sim_content(a, b);
    let structure = sim_structure(a, b);
    let visual = sim_visual(a, b);

    if content >= CONTENT_SIM_THRESHOLD
        && (structure >= STRUCTURE_SIM_THRESHOLD || visual >= VISUAL_SIM_THRESHOLD)
    {
        return true;
    }

    visual >= VISUAL_HIGH_SIM_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentCategory;
    use std::collections::HashMap;

    fn html_features(sim_hash: u64, text_length: usize) -> PageFeatures {
        let mut tag_count = HashMap::new();
        tag_count.insert("div".to_string(), 40);
        tag_count.insert("a".to_string(), 12);
        tag_count.insert("img".to_string(), 3);
        tag_count.insert("script".to_string(), 5);

        let mut path_count = HashMap::new();
        path_count.insert("html>body>div".to_string(), 20);
        path_count.insert("html>body>div>p".to_string(), 30);

        PageFeatures {
            category: ContentCategory::Html,
            text_sim_hash: sim_hash,
            text_length,
            dom_node_count: 120,
            text_node_count: 60,
            tag_count,
            path_count,
            phash: 0x00FF_00FF_00FF_00FF,
            ttfb: 100.0,
            dom_content_loaded: 400.0,
            load_event: 900.0,
            ..PageFeatures::default()
        }
    }

    #[test]
    fn content_floors_on_empty_length_ratio_and_distance() {
        let a = html_features(0xFFFF, 1000);
        let mut b = a.clone();

        b.text_length = 0;
        assert_eq!(sim_content(&a, &b), 0.0);

        b.text_length = 200; // ratio 0.2 < 0.3
        assert_eq!(sim_content(&a, &b), 0.0);

        b.text_length = 1000;
        b.text_sim_hash = 0xFFFF_FFFF; // 16 bits apart
        assert_eq!(sim_content(&a, &b), 0.0);
    }

    #[test]
    fn content_scales_with_hamming_distance() {
        let a = html_features(0b1111, 1000);
        let b = html_features(0b0111, 1000);
        assert!((sim_content(&a, &b) - (1.0 - 1.0 / 16.0)).abs() < 1e-9);
        assert!((sim_content(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_pages_score_one_on_structural_dimensions() {
        let a = html_features(0xABCD, 1500);
        assert!((sim_dom_stats(&a, &a) - 1.0).abs() < 1e-9);
        assert!((sim_path(&a, &a) - 1.0).abs() < 1e-9);
        assert!((sim_structure(&a, &a) - 1.0).abs() < 1e-9);
        assert!((sim_behavior(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn path_similarity_floors_on_empty_maps() {
        let a = html_features(1, 1000);
        let mut b = a.clone();
        b.path_count.clear();
        assert_eq!(sim_path(&a, &b), 0.0);
    }

    #[test]
    fn visual_floors_on_zero_hash_and_distance() {
        let a = html_features(1, 1000);
        let mut b = a.clone();

        b.phash = 0;
        assert_eq!(sim_visual(&a, &b), 0.0);

        b.phash = a.phash ^ 0xFFFFF; // 20 bits apart
        assert_eq!(sim_visual(&a, &b), 0.0);

        b.phash = a.phash ^ 0b11; // 2 bits apart
        assert!((sim_visual(&a, &b) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn duplicate_requires_corroboration() {
        let a = html_features(0xABCD, 1000);

        // Same text, same structure: clause 1 fires.
        assert!(is_duplicate(&a, &a.clone()));

        // Same text but no structure and weak visuals: neither clause fires.
        let mut bare = a.clone();
        bare.tag_count.clear();
        bare.path_count.clear();
        bare.dom_node_count = 0;
        bare.text_node_count = 0;
        bare.phash = a.phash ^ 0x3FF; // 10 bits -> visual 0.5
        assert!(!is_duplicate(&a, &bare));
    }

    #[test]
    fn visual_override_fires_without_text() {
        let mut a = PageFeatures {
            category: ContentCategory::Image,
            phash: 0x1234_5678_9ABC_DEF0,
            text_length: 5000,
            ..PageFeatures::default()
        };
        a.text_sim_hash = 0;
        let b = a.clone();
        // No text similarity possible, but identical visuals override.
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn total_uses_display_weights() {
        let total = total_sim(1.0, 1.0, 1.0, 1.0);
        assert!((total - 1.0).abs() < 1e-9);
        assert!((total_sim(1.0, 0.0, 0.0, 0.0) - 0.40).abs() < 1e-9);
    }
}
