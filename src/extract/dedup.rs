//! Canonical-key deduplication with deterministic output ordering.
//!
//! Corruption variants of the same identifier arrive as separate links;
//! grouping them by [`canonical_key`] collapses each group to its best
//! member. The operation is total and pure: every canonical key appears
//! exactly once in the output, no URL appears twice, and the final sort
//! makes repeated runs byte-identical.

use std::collections::BTreeMap;

use tracing::debug;

use super::ExtractedLink;
use super::normalize::{canonical_key, quality_score};

/// Collapses duplicate links and sorts the survivors deterministically.
///
/// For each canonical-key group the member with the highest quality score
/// survives; ties break toward the shorter URL, then lexicographic URL
/// order. Output is sorted by (canonical key, kind, page, confidence
/// descending).
#[must_use]
#[tracing::instrument(skip(links), fields(input = links.len()))]
pub fn dedup_links(links: Vec<ExtractedLink>) -> Vec<ExtractedLink> {
    // BTreeMap keeps group iteration order stable across runs.
    let mut groups: BTreeMap<String, Vec<ExtractedLink>> = BTreeMap::new();
    for link in links {
        let key = canonical_key(&link.url, link.kind);
        groups.entry(key).or_default().push(link);
    }

    // Exact-URL dedup across groups: distinct keys can still reduce to the
    // same printable URL when patterns disagree on classification. The
    // higher-quality classification wins.
    let mut by_url: BTreeMap<String, ExtractedLink> = BTreeMap::new();
    for (key, mut group) in groups {
        let winner = if group.len() == 1 {
            group.remove(0)
        } else {
            debug!(key = %key, variants = group.len(), "collapsing duplicate group");
            pick_best(group)
        };
        match by_url.get(&winner.url) {
            Some(existing)
                if quality_score(&existing.url, existing.kind, existing.confidence)
                    >= quality_score(&winner.url, winner.kind, winner.confidence) => {}
            _ => {
                by_url.insert(winner.url.clone(), winner);
            }
        }
    }
    let mut result: Vec<ExtractedLink> = by_url.into_values().collect();

    sort_links(&mut result);
    result
}

/// Sorts links by (canonical key, kind, page, confidence descending).
///
/// Applied after deduplication and again after validation rewrites
/// confidences, so the final sequence is deterministic.
pub fn sort_links(links: &mut [ExtractedLink]) {
    links.sort_by(|a, b| {
        canonical_key(&a.url, a.kind)
            .cmp(&canonical_key(&b.url, b.kind))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.page.cmp(&b.page))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}

/// Picks the best member of a duplicate group.
fn pick_best(group: Vec<ExtractedLink>) -> ExtractedLink {
    let mut best: Option<(f64, ExtractedLink)> = None;

    for link in group {
        let score = quality_score(&link.url, link.kind, link.confidence);
        let replace = match &best {
            None => true,
            Some((best_score, best_link)) => {
                score > *best_score
                    || (score == *best_score
                        && (link.url.len() < best_link.url.len()
                            || (link.url.len() == best_link.url.len()
                                && link.url < best_link.url)))
            }
        };
        if replace {
            best = Some((score, link));
        }
    }

    // Groups are never empty by construction.
    #[allow(clippy::unwrap_used)]
    best.unwrap().1
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extract::LinkKind;
    use crate::extract::normalize::adjust_for_corruption;

    fn link(url: &str, kind: LinkKind, confidence: f64) -> ExtractedLink {
        ExtractedLink {
            url: url.to_string(),
            kind,
            context: None,
            page: 1,
            section: None,
            confidence,
            validation: None,
            dataset: None,
        }
    }

    // ==================== Grouping Tests ====================

    #[test]
    fn test_dedup_corruption_variants_collapse_to_one() {
        let urls = [
            "https://doi.org/10.1038/s41467-021-23778-6",
            "https://doi.org/10.1038/s41467-021-23778-6|www.nature.com/",
            "https://doi.org/10.1038/s41467-021-23778-62",
            "https://doi.org/10.1038/s41467-021-23778-6ARTICLE",
            "https://doi.org/10.1038/s41467-021-23778-64",
        ];
        let links: Vec<_> = urls
            .iter()
            .map(|u| {
                let c = adjust_for_corruption(u, LinkKind::Doi, 0.95);
                link(u, LinkKind::Doi, c)
            })
            .collect();

        let deduped = dedup_links(links);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].url, "https://doi.org/10.1038/s41467-021-23778-6");
        assert!(deduped[0].confidence >= 0.9);
    }

    #[test]
    fn test_dedup_distinct_keys_all_survive() {
        let links = vec![
            link("https://doi.org/10.1234/first", LinkKind::Doi, 0.95),
            link("https://doi.org/10.1234/second", LinkKind::Doi, 0.95),
            link("https://example.com/data.csv", LinkKind::Url, 0.78),
        ];
        assert_eq!(dedup_links(links).len(), 3);
    }

    #[test]
    fn test_dedup_no_url_appears_twice() {
        let links = vec![
            link("https://example.com/data", LinkKind::Url, 0.4),
            link("https://example.com/data", LinkKind::Generic, 0.4),
        ];
        let deduped = dedup_links(links);
        let mut urls: Vec<_> = deduped.iter().map(|l| l.url.clone()).collect();
        urls.dedup();
        assert_eq!(urls.len(), deduped.len());
    }

    #[test]
    fn test_dedup_key_count_bound() {
        let links = vec![
            link("https://doi.org/10.1234/x", LinkKind::Doi, 0.95),
            link("doi:10.1234/x", LinkKind::Doi, 0.85),
            link("10.1234/x", LinkKind::Doi, 0.85),
            link("https://doi.org/10.9999/y", LinkKind::Doi, 0.95),
        ];
        let key_count = 2;
        assert_eq!(dedup_links(links).len(), key_count);
    }

    #[test]
    fn test_dedup_same_url_different_kinds_keeps_better_classification() {
        // The catch-all URL pattern also matches Zenodo record URLs; the
        // specific classification must survive.
        let links = vec![
            link("https://zenodo.org/record/55555", LinkKind::Url, 0.40),
            link("https://zenodo.org/record/55555", LinkKind::Zenodo, 0.95),
        ];
        let deduped = dedup_links(links);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].kind, LinkKind::Zenodo);
        assert!((deduped[0].confidence - 0.95).abs() < f64::EPSILON);
    }

    // ==================== Tie-break Tests ====================

    #[test]
    fn test_dedup_tie_prefers_shorter_url() {
        // dx.doi.org and doi.org forms share a key and score identically;
        // the shorter URL wins.
        let links = vec![
            link("https://dx.doi.org/10.1234/x", LinkKind::Doi, 0.95),
            link("https://doi.org/10.1234/x", LinkKind::Doi, 0.95),
        ];
        let deduped = dedup_links(links);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].url, "https://doi.org/10.1234/x");
    }

    #[test]
    fn test_dedup_tie_same_length_lexicographic() {
        let links = vec![
            link("https://doi.org/10.1038/s41467-021-23778-64", LinkKind::Doi, 0.10),
            link("https://doi.org/10.1038/s41467-021-23778-62", LinkKind::Doi, 0.10),
        ];
        let deduped = dedup_links(links);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].url, "https://doi.org/10.1038/s41467-021-23778-62");
    }

    // ==================== Determinism Tests ====================

    #[test]
    fn test_dedup_output_order_stable_under_input_permutation() {
        let a = vec![
            link("https://doi.org/10.1234/b", LinkKind::Doi, 0.95),
            link("https://doi.org/10.1234/a", LinkKind::Doi, 0.95),
            link("https://example.com/z.csv", LinkKind::Url, 0.78),
        ];
        let mut b = a.clone();
        b.reverse();

        let first: Vec<_> = dedup_links(a).into_iter().map(|l| l.url).collect();
        let second: Vec<_> = dedup_links(b).into_iter().map(|l| l.url).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dedup_empty_input() {
        assert!(dedup_links(Vec::new()).is_empty());
    }
}
