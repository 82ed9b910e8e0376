//! Bucketed union-find clustering over page features
//!
//! Pages are first partitioned into coarse buckets keyed by host, category,
//! fingerprint high bits, and a size bucket; only within-bucket pairs are
//! ever compared, which keeps the engine sub-quadratic. Inside a bucket a
//! canonical-centered pass compares everything against one representative,
//! and a second pairwise pass over the unmerged tail recovers clusters whose
//! true center the heuristic canonical missed.

use crate::similarity::is_duplicate;
use crate::types::{ContentCategory, PageFeatures, PageWithFeatures};
use crate::util::hamming64;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use url::Url;

/// Maximum SimHash Hamming distance admitted by the pre-filter.
pub const QUICK_SIMHASH_MAX_DIST: u32 = 8;
/// Maximum perceptual hash Hamming distance admitted by the pre-filter.
pub const QUICK_PHASH_MAX_DIST: u32 = 15;

/// One content cluster: a canonical page id and all member ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterGroup {
    pub cluster_id: String,
    pub canonical_id: u32,
    pub member_ids: Vec<u32>,
}

/// Disjoint-set over dense indices with path compression and union by rank.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        UnionFind {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Second pass: point everything on the path at the root.
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }

        match self.rank[root_x].cmp(&self.rank[root_y]) {
            Ordering::Less => self.parent[root_x] = root_y,
            Ordering::Greater => self.parent[root_y] = root_x,
            Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
    }
}

/// Partition pages into content clusters.
///
/// Buckets are processed in sorted key order so cluster numbering is stable
/// for a given input set. Only components with at least two members become
/// clusters; their canonical is re-selected after the merge.
pub fn cluster_pages(pages: &[PageWithFeatures]) -> Vec<ClusterGroup> {
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, page) in pages.iter().enumerate() {
        buckets.entry(bucket_key(page)).or_default().push(idx);
    }

    let mut clusters = Vec::new();
    let mut cluster_counter = 1usize;

    for (_, mut bucket) in buckets {
        if bucket.len() < 2 {
            continue;
        }

        // Put the bucket canonical first; the rest keep a deterministic order.
        bucket.sort_by(|&a, &b| canonical_order(&pages[a], &pages[b]));
        let mut uf = UnionFind::new(bucket.len());

        let canonical = &pages[bucket[0]].features;
        for i in 1..bucket.len() {
            let candidate = &pages[bucket[i]].features;
            if quick_check(canonical, candidate) && is_duplicate(canonical, candidate) {
                uf.union(0, i);
            }
        }

        // Tail pass: pages the canonical rejected may still match each other.
        for i in 1..bucket.len() {
            if uf.find(i) == uf.find(0) {
                continue;
            }
            for j in (i + 1)..bucket.len() {
                if uf.find(j) == uf.find(0) {
                    continue;
                }
                let a = &pages[bucket[i]].features;
                let b = &pages[bucket[j]].features;
                if quick_check(a, b) && is_duplicate(a, b) {
                    uf.union(i, j);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..bucket.len() {
            let root = uf.find(i);
            components.entry(root).or_default().push(i);
        }

        for members in components.into_values() {
            if members.len() < 2 {
                continue;
            }

            let canonical_idx = members
                .iter()
                .copied()
                .min_by(|&a, &b| canonical_order(&pages[bucket[a]], &pages[bucket[b]]))
                .map(|local| bucket[local])
                .unwrap_or(bucket[members[0]]);

            let mut member_ids: Vec<u32> =
                members.iter().map(|&local| pages[bucket[local]].result.id).collect();
            member_ids.sort_unstable();

            clusters.push(ClusterGroup {
                cluster_id: format!("cluster-{cluster_counter:05}"),
                canonical_id: pages[canonical_idx].result.id,
                member_ids,
            });
            cluster_counter += 1;
        }
    }

    clusters
}

/// Cheap pre-filter run before the full duplicate predicate.
pub fn quick_check(a: &PageFeatures, b: &PageFeatures) -> bool {
    if a.category != b.category {
        return false;
    }

    match a.category {
        ContentCategory::Html | ContentCategory::Text => {
            if hamming64(a.text_sim_hash, b.text_sim_hash) > QUICK_SIMHASH_MAX_DIST {
                return false;
            }
            if a.text_length == 0 || b.text_length == 0 {
                return false;
            }
            let ratio =
                a.text_length.min(b.text_length) as f64 / a.text_length.max(b.text_length) as f64;
            ratio >= 0.5
        }
        ContentCategory::Image => {
            a.phash != 0 && b.phash != 0 && hamming64(a.phash, b.phash) <= QUICK_PHASH_MAX_DIST
        }
        ContentCategory::Binary => a.text_length == b.text_length,
        ContentCategory::Empty => false,
    }
}

/// Coarse bucket key: MD5 hex of a category-specific partition string.
pub fn bucket_key(page: &PageWithFeatures) -> String {
    let host = page_host(page);
    let features = &page.features;

    let key = match features.category {
        ContentCategory::Html | ContentCategory::Text => {
            let top_bits = (features.text_sim_hash >> 48) & 0xFFFF;
            let length_bucket = features.text_length / 1000;
            format!(
                "{host}|{}|{top_bits}|{length_bucket}",
                features.category.as_str()
            )
        }
        ContentCategory::Image => {
            let top_bits = (features.phash >> 48) & 0xFFFF;
            let length_bucket =
                (features.screenshot_w / 100) as u64 * (features.screenshot_h / 100) as u64;
            format!("{host}|image|{top_bits}|{length_bucket}")
        }
        _ => format!("{host}|binary|{}", features.text_length),
    };

    format!("{:x}", md5::compute(key.as_bytes()))
}

fn page_host(page: &PageWithFeatures) -> String {
    Url::parse(&page.result.final_url)
        .or_else(|_| Url::parse(&page.result.normalized_url))
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Canonical preference: status 200 first, then longer text, then smaller id.
fn canonical_order(a: &PageWithFeatures, b: &PageWithFeatures) -> Ordering {
    let a_ok = a.result.status_code == 200;
    let b_ok = b.result.status_code == 200;
    b_ok.cmp(&a_ok)
        .then_with(|| b.features.text_length.cmp(&a.features.text_length))
        .then_with(|| a.result.id.cmp(&b.result.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchResult;
    use std::collections::HashMap;

    fn page(id: u32, url: &str, status: u16, features: PageFeatures) -> PageWithFeatures {
        PageWithFeatures {
            result: FetchResult {
                id,
                raw_url: url.to_string(),
                normalized_url: url.to_string(),
                final_url: url.to_string(),
                status_code: status,
                ..FetchResult::default()
            },
            features,
        }
    }

    fn html_features(sim_hash: u64, text_length: usize) -> PageFeatures {
        let mut tag_count = HashMap::new();
        tag_count.insert("div".to_string(), 30);
        tag_count.insert("a".to_string(), 10);
        let mut path_count = HashMap::new();
        path_count.insert("html>body>div".to_string(), 25);

        PageFeatures {
            category: ContentCategory::Html,
            text_sim_hash: sim_hash,
            text_length,
            dom_node_count: 80,
            text_node_count: 40,
            tag_count,
            path_count,
            ..PageFeatures::default()
        }
    }

    #[test]
    fn union_find_merges_and_compresses() {
        let mut uf = UnionFind::new(6);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(4, 5);
        assert_eq!(uf.find(0), uf.find(2));
        assert_eq!(uf.find(4), uf.find(5));
        assert_ne!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(2), uf.find(4));
    }

    #[test]
    fn quick_check_rejects_cross_category_pairs() {
        let html = html_features(1, 1000);
        let mut text = html.clone();
        text.category = ContentCategory::Text;
        assert!(!quick_check(&html, &text));
    }

    #[test]
    fn quick_check_text_rules() {
        let a = html_features(0b1111, 1000);

        let close = html_features(0b1110, 900);
        assert!(quick_check(&a, &close));

        let far_hash = html_features(0b1_1111_1111, 1000); // 5 bits... still close
        assert!(quick_check(&a, &far_hash));

        let very_far = html_features(0xFFFF_FFFF, 1000); // way past 8 bits
        assert!(!quick_check(&a, &very_far));

        let short = html_features(0b1111, 400); // ratio 0.4 < 0.5
        assert!(!quick_check(&a, &short));
    }

    #[test]
    fn quick_check_image_and_binary_rules() {
        let mut a = PageFeatures {
            category: ContentCategory::Image,
            phash: 0xAAAA,
            text_length: 4000,
            ..PageFeatures::default()
        };
        let mut b = a.clone();
        assert!(quick_check(&a, &b));

        b.phash = 0;
        assert!(!quick_check(&a, &b));

        a.category = ContentCategory::Binary;
        a.phash = 0;
        let mut c = a.clone();
        assert!(quick_check(&a, &c));
        c.text_length = 4001;
        assert!(!quick_check(&a, &c));
    }

    #[test]
    fn categories_never_share_buckets() {
        let html = page(1, "https://example.com/a", 200, html_features(42, 500));
        let mut text_features = html_features(42, 500);
        text_features.category = ContentCategory::Text;
        let text = page(2, "https://example.com/b", 200, text_features);
        assert_ne!(bucket_key(&html), bucket_key(&text));
    }

    #[test]
    fn bucket_key_partitions_on_host_and_length() {
        let a = page(1, "https://example.com/a", 200, html_features(42, 500));
        let b = page(2, "https://example.com/b", 200, html_features(42, 900));
        let c = page(3, "https://other.com/a", 200, html_features(42, 500));
        assert_eq!(bucket_key(&a), bucket_key(&b)); // same 0..1000 length bucket
        assert_ne!(bucket_key(&a), bucket_key(&c)); // different host
    }

    #[test]
    fn near_identical_html_pages_cluster() {
        let a = page(1, "https://example.com/a", 200, html_features(0xABCD, 1100));
        let b = page(2, "https://example.com/b", 200, html_features(0xABCD, 1150));
        let c = page(
            3,
            "https://example.com/c",
            200,
            html_features(0xFFFF_FFFF_FFFF, 1100),
        );

        let clusters = cluster_pages(&[a, b, c]);
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.cluster_id, "cluster-00001");
        assert_eq!(cluster.member_ids, vec![1, 2]);
        // Longer text wins the canonical slot.
        assert_eq!(cluster.canonical_id, 2);
    }

    #[test]
    fn singletons_are_not_clustered() {
        let a = page(1, "https://example.com/a", 200, html_features(1, 1000));
        let clusters = cluster_pages(&[a]);
        assert!(clusters.is_empty());
    }

    #[test]
    fn clustering_is_idempotent() {
        let pages: Vec<_> = (0..6)
            .map(|i| {
                page(
                    i + 1,
                    &format!("https://example.com/p{i}"),
                    200,
                    html_features(0xABC0 | u64::from(i % 2), 1000 + i as usize),
                )
            })
            .collect();

        let first = cluster_pages(&pages);
        let second = cluster_pages(&pages);
        assert_eq!(first, second);
    }

    #[test]
    fn tail_pass_recovers_cluster_missed_by_canonical() {
        // The canonical (longest text, id 1) matches nobody, but two tail
        // pages match each other.
        let canonical = page(
            1,
            "https://example.com/big",
            200,
            html_features(0xF0F0_F0F0, 1900),
        );
        let t1 = page(2, "https://example.com/t1", 200, html_features(0x0F0F, 1000));
        let t2 = page(3, "https://example.com/t2", 200, html_features(0x0F0F, 1010));

        let clusters = cluster_pages(&[canonical, t1, t2]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec![2, 3]);
    }

    #[test]
    fn non_200_pages_lose_canonical_selection() {
        let a = page(1, "https://example.com/a", 404, html_features(0xABCD, 1500));
        let b = page(2, "https://example.com/b", 200, html_features(0xABCD, 1100));
        let clusters = cluster_pages(&[a, b]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].canonical_id, 2);
    }
}
