//! Rule-based clustering for pages the content engine cannot judge
//!
//! Error pages, login walls, WAF blocks, maintenance banners, thin shells,
//! redirect targets, and URL-shape variants carry no usable content, but
//! within one origin they still collapse into obvious groups. Eight rules
//! run in a fixed order over per-origin candidate sets; the first rule to
//! claim a page wins.

use crate::types::FetchResult;
use crate::util::md5_prefix64;
use std::collections::HashMap;
use url::Url;

/// Keyword seeds for the template rules, matched as substrings over the
/// lowercased raw HTML. The CJK literals are part of the matching contract
/// and must round-trip byte-for-byte.
pub const ERROR_KEYWORDS: &[&str] = &[
    "404",
    "page not found",
    "页面不存在",
    "not found",
    "error",
    "错误",
    "无法找到",
    "找不到",
];

pub const LOGIN_KEYWORDS: &[&str] = &[
    "登录",
    "登陆",
    "login",
    "sign in",
    "signin",
    "password",
    "密码",
    "username",
    "用户名",
    "type=\"password\"",
    "type='password'",
];

pub const WAF_KEYWORDS: &[&str] = &[
    "access denied",
    "防火墙",
    "安全验证",
    "滑动验证",
    "checking your browser",
    "cloudflare",
    "waf",
    "security check",
    "安全检查",
    "验证码",
];

pub const MAINTENANCE_KEYWORDS: &[&str] = &[
    "维护中",
    "升级中",
    "maintenance",
    "under maintenance",
    "service unavailable",
    "系统维护",
    "网站维护",
    "upgrading",
    "升级",
    "维护",
];

/// Minimum cleaned-fingerprint length below which an HTML page counts as thin.
const THIN_TEXT_LENGTH: usize = crate::types::MIN_TEXT_LENGTH;
/// Raw HTML byte size below which a page counts as thin outright.
const THIN_BODY_BYTES: usize = 1024;
/// Minimum min/max ratio for a fingerprint group to count as length-similar.
const LENGTH_SIMILAR_RATIO: f64 = 0.8;

/// Cluster assignment produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAssignment {
    pub cluster_id: String,
    pub is_canonical: bool,
    /// Lower values are stronger; recorded for diagnostics.
    pub priority: u8,
}

/// Fingerprint of stripped, lowercased, whitespace-collapsed HTML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HtmlFingerprint {
    pub length: usize,
    pub hash: u64,
}

/// Everything the rule pipeline needs from one page, captured while the raw
/// body is still in memory. Bodies are dropped right after this snapshot.
#[derive(Debug, Clone)]
pub struct PageSignals {
    pub id: u32,
    pub status_code: u16,
    pub final_url: String,
    pub normalized_url: String,
    pub is_html: bool,
    /// Raw HTML byte length; 0 for non-HTML pages.
    pub body_len: usize,
    pub fingerprint: HtmlFingerprint,
    pub error_kw: bool,
    pub login_kw: bool,
    pub waf_kw: bool,
    pub maintenance_kw: bool,
}

impl PageSignals {
    /// Snapshot the rule-relevant view of a fetch result.
    pub fn from_fetch(result: &FetchResult) -> Self {
        let is_html = result.content_type.to_lowercase().contains("text/html");
        let mut signals = PageSignals {
            id: result.id,
            status_code: result.status_code,
            final_url: result.final_url.clone(),
            normalized_url: result.normalized_url.clone(),
            is_html,
            body_len: 0,
            fingerprint: HtmlFingerprint::default(),
            error_kw: false,
            login_kw: false,
            waf_kw: false,
            maintenance_kw: false,
        };

        if is_html {
            if let Some(html) = result.raw_html.as_deref() {
                signals.body_len = html.len();
                if !html.is_empty() {
                    signals.fingerprint = fingerprint_html(html);
                    let lowered = String::from_utf8_lossy(html).to_lowercase();
                    signals.error_kw = contains_any(&lowered, ERROR_KEYWORDS);
                    signals.login_kw = contains_any(&lowered, LOGIN_KEYWORDS);
                    signals.waf_kw = contains_any(&lowered, WAF_KEYWORDS);
                    signals.maintenance_kw = contains_any(&lowered, MAINTENANCE_KEYWORDS);
                }
            }
        }

        signals
    }
}

/// Run all eight rules over the fetched pages.
///
/// Callers pass signals only for pages that produced a response; a failed
/// fetch has nothing to group on and surfaces as a singleton in the report.
/// Pages without a resolvable origin are dropped here for the same reason.
pub fn build_rule_assignments(pages: &[PageSignals]) -> HashMap<u32, RuleAssignment> {
    let mut assignments = HashMap::new();

    let mut origin_map: HashMap<String, Vec<&PageSignals>> = HashMap::new();
    let mut final_url_map: HashMap<String, Vec<&PageSignals>> = HashMap::new();

    for page in pages {
        let mut origin = origin_key(&page.final_url);
        if origin.is_empty() {
            origin = origin_key(&page.normalized_url);
        }
        if origin.is_empty() {
            continue;
        }

        origin_map.entry(origin).or_default().push(page);
        final_url_map
            .entry(page.final_url.clone())
            .or_default()
            .push(page);
    }

    apply_server_errors(&origin_map, &mut assignments);
    apply_error_templates(&origin_map, &mut assignments);
    apply_login_walls(&origin_map, &mut assignments);
    apply_waf_blocks(&origin_map, &mut assignments);
    apply_maintenance_pages(&origin_map, &mut assignments);
    apply_thin_pages(&origin_map, &mut assignments);
    apply_redirect_merge(&final_url_map, &mut assignments);
    apply_url_canonical(&origin_map, &mut assignments);

    assignments
}

/// E1: every 5xx response on one origin shares a cluster.
fn apply_server_errors(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let group: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| (500..600).contains(&p.status_code))
            .collect();
        if group.len() < 2 {
            continue;
        }

        let cluster_id = format!("err5xx-{}", sanitize_cluster_id(origin));
        let canonical_id = select_canonical_by_path(&group);
        for page in group {
            assignments.entry(page.id).or_insert_with(|| RuleAssignment {
                cluster_id: cluster_id.clone(),
                is_canonical: page.id == canonical_id,
                priority: 1,
            });
        }
    }
}

/// E3: uniform error templates, grouped by fingerprint.
fn apply_error_templates(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let candidates: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| {
                matches!(p.status_code, 404 | 401 | 403)
                    || (p.status_code == 200 && p.is_html && p.body_len > 0 && p.error_kw)
            })
            .collect();
        assign_fingerprint_groups("errtpl", 3, origin, &candidates, assignments);
    }
}

/// L1: login walls, grouped by fingerprint.
fn apply_login_walls(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let candidates: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| p.is_html && p.body_len > 0 && p.login_kw)
            .collect();
        assign_fingerprint_groups("loginwall", 4, origin, &candidates, assignments);
    }
}

/// W1: WAF interstitials, grouped by fingerprint.
fn apply_waf_blocks(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let candidates: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| p.is_html && p.body_len > 0 && p.waf_kw)
            .collect();
        assign_fingerprint_groups("waf", 5, origin, &candidates, assignments);
    }
}

/// M1: maintenance and upgrade banners, grouped by fingerprint.
fn apply_maintenance_pages(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let candidates: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| p.is_html && p.body_len > 0 && p.maintenance_kw)
            .collect();
        assign_fingerprint_groups("maint", 6, origin, &candidates, assignments);
    }
}

/// T1: near-empty HTML shells on 2xx, 401, or 403 responses.
fn apply_thin_pages(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let candidates: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| {
                let status_ok = (200..300).contains(&p.status_code)
                    || p.status_code == 401
                    || p.status_code == 403;
                if !status_ok || !p.is_html {
                    return false;
                }
                p.body_len < THIN_BODY_BYTES
                    || (p.fingerprint.length > 0 && p.fingerprint.length < THIN_TEXT_LENGTH)
            })
            .collect();
        assign_fingerprint_groups("thin", 7, origin, &candidates, assignments);
    }
}

/// R1: distinct input URLs that landed on the same final URL.
fn apply_redirect_merge(
    final_url_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (final_url, pages) in final_url_map {
        if pages.len() < 2 {
            continue;
        }

        let unassigned: Vec<&PageSignals> = pages
            .iter()
            .copied()
            .filter(|p| !assignments.contains_key(&p.id))
            .collect();
        if unassigned.len() < 2 {
            continue;
        }

        let cluster_id = format!("redir-{:016x}", md5_prefix64(final_url.as_bytes()));
        let canonical_id = select_canonical_for_redirect(&unassigned);
        for page in unassigned {
            assignments.insert(
                page.id,
                RuleAssignment {
                    cluster_id: cluster_id.clone(),
                    is_canonical: page.id == canonical_id,
                    priority: 8,
                },
            );
        }
    }
}

/// U1: URL-shape variants that normalize to the same path within an origin.
fn apply_url_canonical(
    origin_map: &HashMap<String, Vec<&PageSignals>>,
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    for (origin, pages) in origin_map {
        let mut path_groups: HashMap<String, Vec<&PageSignals>> = HashMap::new();
        for page in pages {
            let mut path = normalize_path(&page.final_url);
            if path.is_empty() {
                path = normalize_path(&page.normalized_url);
            }
            path_groups.entry(path).or_default().push(page);
        }

        for (path, group) in path_groups {
            if group.len() < 2 {
                continue;
            }

            let unassigned: Vec<&PageSignals> = group
                .iter()
                .copied()
                .filter(|p| !assignments.contains_key(&p.id))
                .collect();
            if unassigned.len() < 2 {
                continue;
            }

            let cluster_id = format!(
                "urlcanon-{}-{}",
                sanitize_cluster_id(origin),
                sanitize_cluster_id(&path)
            );
            let canonical_id = select_canonical_by_path(&unassigned);
            for page in unassigned {
                assignments.insert(
                    page.id,
                    RuleAssignment {
                        cluster_id: cluster_id.clone(),
                        is_canonical: page.id == canonical_id,
                        priority: 9,
                    },
                );
            }
        }
    }
}

/// Shared grouping for the fingerprint-keyed rules (E3, L1, W1, M1, T1):
/// bucket candidates by fingerprint hash (non-HTML candidates under 0),
/// require at least two length-similar members, then assign first-writer-wins.
fn assign_fingerprint_groups(
    prefix: &str,
    priority: u8,
    origin: &str,
    candidates: &[&PageSignals],
    assignments: &mut HashMap<u32, RuleAssignment>,
) {
    if candidates.len() < 2 {
        return;
    }

    let mut groups: HashMap<u64, Vec<&PageSignals>> = HashMap::new();
    for page in candidates {
        let key = if page.is_html { page.fingerprint.hash } else { 0 };
        groups.entry(key).or_default().push(page);
    }

    let origin_part = sanitize_cluster_id(origin);
    for (hash, group) in groups {
        if group.len() < 2 || !is_length_similar(&group) {
            continue;
        }

        let cluster_id = format!("{prefix}-{origin_part}-{:x}", hash & 0xFFFF);
        let canonical_id = select_canonical_by_path(&group);
        for page in group {
            assignments.entry(page.id).or_insert_with(|| RuleAssignment {
                cluster_id: cluster_id.clone(),
                is_canonical: page.id == canonical_id,
                priority,
            });
        }
    }
}

/// Length-similar test over a fingerprint group.
///
/// Only lengths above zero participate: none at all means the pages are
/// uniformly empty (similar), exactly one means there is nothing to compare
/// against (not similar), otherwise min/max must reach 0.8.
fn is_length_similar(group: &[&PageSignals]) -> bool {
    if group.len() < 2 {
        return false;
    }

    let lengths: Vec<usize> = group
        .iter()
        .filter(|p| p.fingerprint.length > 0)
        .map(|p| p.fingerprint.length)
        .collect();

    if lengths.is_empty() {
        return true;
    }
    if lengths.len() < 2 {
        return false;
    }

    let min = *lengths.iter().min().expect("non-empty");
    let max = *lengths.iter().max().expect("non-empty");
    if max == 0 {
        return true;
    }

    min as f64 / max as f64 >= LENGTH_SIMILAR_RATIO
}

/// Canonical scope for the per-origin rules: `scheme://host:port` with
/// defaulted ports. Empty when the URL has no usable scheme or host.
pub fn origin_key(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return String::new();
    };

    let scheme = parsed.scheme().to_lowercase();
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    if scheme.is_empty() || host.is_empty() {
        return String::new();
    }

    let port = parsed
        .port()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });

    format!("{scheme}://{}:{port}", host.to_lowercase())
}

/// Fingerprint HTML by stripping tags, lowercasing, and collapsing whitespace.
pub fn fingerprint_html(html: &[u8]) -> HtmlFingerprint {
    if html.is_empty() {
        return HtmlFingerprint::default();
    }

    let text = strip_tags(&String::from_utf8_lossy(html));
    let cleaned = collapse_whitespace(&text.to_lowercase());

    HtmlFingerprint {
        length: cleaned.len(),
        hash: md5_prefix64(cleaned.as_bytes()),
    }
}

/// Greedy angle-bracket removal; each `<...>` span becomes a single space.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a URL (or bare path) to its canonical path shape: directory
/// index files stripped, empty paths mapped to `/`, and every non-root path
/// given a trailing slash.
pub fn normalize_path(raw: &str) -> String {
    let path = match Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
        Err(_) => return String::new(),
    };

    let mut path = path.as_str();
    for suffix in ["/index.html", "/index.htm", "/index.php", "/index"] {
        if let Some(stripped) = path.strip_suffix(suffix) {
            path = stripped;
            break;
        }
    }

    if path.is_empty() {
        "/".to_string()
    } else if path != "/" && !path.ends_with('/') {
        format!("{path}/")
    } else {
        path.to_string()
    }
}

/// Keep only cluster-id-safe characters; `:` and `/` become underscores.
fn sanitize_cluster_id(value: &str) -> String {
    value
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => Some(c),
            ':' | '/' => Some('_'),
            _ => None,
        })
        .collect()
}

/// Canonical for a rule group: shortest URL path, ties broken by smallest id.
fn select_canonical_by_path(group: &[&PageSignals]) -> u32 {
    group
        .iter()
        .min_by(|a, b| {
            url_path(&a.final_url)
                .len()
                .cmp(&url_path(&b.final_url).len())
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|p| p.id)
        .unwrap_or(0)
}

/// Canonical for a redirect group: 2xx beats non-2xx, then shortest path,
/// then smallest id.
fn select_canonical_for_redirect(group: &[&PageSignals]) -> u32 {
    group
        .iter()
        .min_by(|a, b| {
            let a_2xx = (200..300).contains(&a.status_code);
            let b_2xx = (200..300).contains(&b.status_code);
            b_2xx
                .cmp(&a_2xx)
                .then_with(|| {
                    url_path(&a.final_url)
                        .len()
                        .cmp(&url_path(&b.final_url).len())
                })
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|p| p.id)
        .unwrap_or(0)
}

fn url_path(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.to_string(),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
