//! Report assembly and serialization
//!
//! Merges content clusters (which always win) with rule assignments into one
//! row per input URL, then writes the result as pretty JSON or CSV.

use crate::cluster::ClusterGroup;
use crate::config::Options;
use crate::rules::RuleAssignment;
use crate::similarity::score_pair;
use crate::types::{
    ClusterInfo, ContentCategory, FetchResult, FullReport, MetaInfo, PageWithFeatures, UrlReport,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Build the full report in input order.
///
/// Assignment precedence per page: content cluster first, then rule cluster,
/// then singleton. Similarity fields are only populated for content-cluster
/// members, measured against the cluster canonical.
pub fn build_report(
    fetch_results: &[FetchResult],
    pages: &[PageWithFeatures],
    clusters: &[ClusterGroup],
    rule_assignments: &HashMap<u32, RuleAssignment>,
    opts: &Options,
) -> FullReport {
    let page_by_id: HashMap<u32, &PageWithFeatures> =
        pages.iter().map(|p| (p.result.id, p)).collect();

    let mut cluster_by_page: HashMap<u32, &ClusterGroup> = HashMap::new();
    let mut cluster_infos = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        for &member in &cluster.member_ids {
            cluster_by_page.insert(member, cluster);
        }
        let canonical_url = page_by_id
            .get(&cluster.canonical_id)
            .map(|p| p.result.final_url.clone())
            .unwrap_or_default();
        cluster_infos.push(ClusterInfo {
            cluster_id: cluster.cluster_id.clone(),
            canonical_url,
            member_ids: cluster.member_ids.clone(),
        });
    }

    let mut eligible_count = 0usize;
    let mut eligible_non_html_count = 0usize;
    let mut url_reports = Vec::with_capacity(fetch_results.len());

    for fetch_result in fetch_results {
        let mut row = UrlReport {
            id: fetch_result.id,
            url: fetch_result.raw_url.clone(),
            normalized_url: fetch_result.normalized_url.clone(),
            final_url: fetch_result.final_url.clone(),
            redirect_chain: fetch_result.redirect_chain.clone(),
            status_code: fetch_result.status_code,
            content_length: fetch_result.content_length,
            content_type: fetch_result.content_type.clone(),
            error: fetch_result.error.clone().unwrap_or_default(),
            title: fetch_result.title.clone(),
            cluster_id: String::new(),
            is_canonical: false,
            similarity_to_canonical: 0.0,
            content_sim: 0.0,
            structure_sim: 0.0,
            visual_sim: 0.0,
            behavior_sim: 0.0,
        };

        let mut assigned = false;

        if let Some(page) = page_by_id.get(&fetch_result.id) {
            // The eligible counter tallies every page that produced features,
            // whatever its category; non-HTML pages are also broken out.
            eligible_count += 1;
            if page.features.category != ContentCategory::Html {
                eligible_non_html_count += 1;
            }

            if let Some(cluster) = cluster_by_page.get(&fetch_result.id) {
                row.cluster_id = cluster.cluster_id.clone();
                row.is_canonical = fetch_result.id == cluster.canonical_id;

                if let Some(canonical) = page_by_id.get(&cluster.canonical_id) {
                    let scores = score_pair(&page.features, &canonical.features);
                    row.content_sim = scores.content;
                    row.structure_sim = scores.structure;
                    row.visual_sim = scores.visual;
                    row.behavior_sim = scores.behavior;
                    row.similarity_to_canonical = scores.total;
                }
                assigned = true;
            }
        }

        if !assigned {
            if let Some(rule) = rule_assignments.get(&fetch_result.id) {
                row.cluster_id = rule.cluster_id.clone();
                row.is_canonical = rule.is_canonical;
            } else {
                row.is_canonical = true;
            }
        }

        url_reports.push(row);
    }

    FullReport {
        urls: url_reports,
        clusters: cluster_infos,
        meta: MetaInfo {
            total_urls: fetch_results.len(),
            eligible_html_urls: eligible_count,
            eligible_non_html_urls: eligible_non_html_count,
            total_clusters: clusters.len(),
            sim_threshold: opts.sim_threshold,
            generated_at: chrono::Utc::now().to_rfc3339(),
        },
    }
}

/// Write the report as pretty-printed JSON (2-space indent).
pub fn write_json(report: &FullReport, path: &Path) -> Result<()> {
    let data = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write report to '{}'", path.display()))?;
    Ok(())
}

/// Write the per-URL rows as CSV. The clusters array is JSON-only.
pub fn write_csv(report: &FullReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create report at '{}'", path.display()))?;

    writer.write_record([
        "id",
        "url",
        "normalized_url",
        "final_url",
        "status_code",
        "content_length",
        "content_type",
        "error",
        "title",
        "cluster_id",
        "is_canonical",
        "similarity_to_canonical",
        "content_sim",
        "structure_sim",
        "visual_sim",
        "behavior_sim",
    ])?;

    for row in &report.urls {
        writer.write_record([
            row.id.to_string(),
            row.url.clone(),
            row.normalized_url.clone(),
            row.final_url.clone(),
            row.status_code.to_string(),
            row.content_length.to_string(),
            row.content_type.clone(),
            row.error.clone(),
            row.title.clone(),
            row.cluster_id.clone(),
            row.is_canonical.to_string(),
            format!("{:.4}", row.similarity_to_canonical),
            format!("{:.4}", row.content_sim),
            format!("{:.4}", row.structure_sim),
            format!("{:.4}", row.visual_sim),
            format!("{:.4}", row.behavior_sim),
        ])?;
    }

    writer.flush().context("failed to flush CSV report")?;
    Ok(())
}
