//! Hybrid fusion reranking
//!
//! Interleaves candidates from the three channels according to the route's
//! mixing ratios: per-source quotas (floor, then remainder by relevance),
//! descending-relevance interleave with an anti-collapse rule in hybrid
//! mode, and a novelty boost that surfaces candidates covering query terms
//! the selection has not seen yet.

use crate::config::RouteRatios;
use crate::types::{CandidateSection, CandidateSource, Route};
use std::collections::HashSet;

const SOURCES: [CandidateSource; 3] = [
    CandidateSource::Rag,
    CandidateSource::Kag,
    CandidateSource::Graphrag,
];

/// In hybrid mode, never emit more than this many consecutive same-source
/// candidates while another source still has quota
const MAX_CONSECUTIVE_SAME_SOURCE: usize = 2;

fn ratio_for(ratios: &RouteRatios, source: CandidateSource) -> f32 {
    match source {
        CandidateSource::Rag => ratios.rag,
        CandidateSource::Kag => ratios.kag,
        CandidateSource::Graphrag => ratios.graphrag,
    }
}

/// Compute per-source quotas: floor of the proportional share, capped at
/// availability, with the remainder distributed one slot at a time to the
/// source whose next unclaimed candidate ranks highest
fn quotas(per_source: &[Vec<(usize, CandidateSection)>; 3], ratios: &RouteRatios) -> [usize; 3] {
    let total: usize = per_source.iter().map(|s| s.len()).sum();
    let ratio_sum: f32 = SOURCES.iter().map(|s| ratio_for(ratios, *s)).sum();
    let mut quota = [0usize; 3];

    if total == 0 {
        return quota;
    }

    if ratio_sum > 0.0 {
        for (i, source) in SOURCES.iter().enumerate() {
            let share = ratio_for(ratios, *source) / ratio_sum;
            quota[i] = ((share * total as f32).floor() as usize).min(per_source[i].len());
        }
    }

    let mut assigned: usize = quota.iter().sum();
    while assigned < total {
        // Next unclaimed candidate with the highest relevance wins the slot.
        let mut best: Option<(usize, f32)> = None;
        for i in 0..3 {
            if quota[i] >= per_source[i].len() {
                continue;
            }
            let relevance = per_source[i][quota[i]].1.relevance;
            let better = match best {
                None => true,
                Some((_, best_relevance)) => relevance > best_relevance,
            };
            if better {
                best = Some((i, relevance));
            }
        }
        match best {
            Some((i, _)) => quota[i] += 1,
            None => break,
        }
        assigned = quota.iter().sum();
    }
    quota
}

fn novelty_bonus(
    candidate: &CandidateSection,
    covered: &HashSet<String>,
    novelty_weight: f32,
) -> f32 {
    let introduces_new = candidate
        .query_terms
        .iter()
        .any(|term| !covered.contains(term));
    if introduces_new {
        novelty_weight * candidate.relevance
    } else {
        0.0
    }
}

/// Rerank a flat candidate list under the route's mixing ratios
pub fn rerank(
    candidates: Vec<CandidateSection>,
    ratios: &RouteRatios,
    route: Route,
    novelty_weight: f32,
) -> Vec<CandidateSection> {
    if candidates.len() <= 1 {
        return candidates;
    }

    // Per-source candidate lists in descending relevance, remembering each
    // candidate's original index for stable tie-breaks.
    let mut per_source: [Vec<(usize, CandidateSection)>; 3] = Default::default();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let slot = SOURCES
            .iter()
            .position(|s| *s == candidate.source)
            .unwrap_or(0);
        per_source[slot].push((index, candidate));
    }
    for source in per_source.iter_mut() {
        source.sort_by(|a, b| {
            b.1.relevance
                .partial_cmp(&a.1.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
    }

    let quota = quotas(&per_source, ratios);
    let total: usize = quota.iter().sum();

    let mut taken = [0usize; 3];
    let mut covered: HashSet<String> = HashSet::new();
    let mut consecutive: (Option<usize>, usize) = (None, 0);
    let mut ordered: Vec<CandidateSection> = Vec::with_capacity(total);

    while ordered.len() < total {
        let mut eligible: Vec<usize> = (0..3).filter(|&i| taken[i] < quota[i]).collect();

        // Anti-collapse: in hybrid mode a source that has just produced two
        // consecutive picks yields to any other eligible source.
        if route == Route::Hybrid {
            if let (Some(last), count) = consecutive {
                if count >= MAX_CONSECUTIVE_SAME_SOURCE
                    && eligible.len() > 1
                    && eligible.contains(&last)
                {
                    eligible.retain(|&i| i != last);
                }
            }
        }

        let Some(&pick) = eligible.iter().max_by(|&&a, &&b| {
            let ca = &per_source[a][taken[a]].1;
            let cb = &per_source[b][taken[b]].1;
            let ea = ca.relevance + novelty_bonus(ca, &covered, novelty_weight);
            let eb = cb.relevance + novelty_bonus(cb, &covered, novelty_weight);
            ea.partial_cmp(&eb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (quota[a] - taken[a]).cmp(&(quota[b] - taken[b])))
                .then_with(|| {
                    // Stable: earlier original index wins the max
                    per_source[b][taken[b]].0.cmp(&per_source[a][taken[a]].0)
                })
        }) else {
            break;
        };

        let (_, candidate) = &per_source[pick][taken[pick]];
        covered.extend(candidate.query_terms.iter().cloned());
        ordered.push(candidate.clone());
        taken[pick] += 1;

        consecutive = match consecutive {
            (Some(last), count) if last == pick => (Some(pick), count + 1),
            _ => (Some(pick), 1),
        };
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        source: CandidateSource,
        id: &str,
        relevance: f32,
        terms: &[&str],
    ) -> CandidateSection {
        CandidateSection {
            id: id.to_string(),
            source,
            title: id.to_string(),
            body: String::new(),
            relevance,
            query_terms: terms.iter().map(|t| t.to_string()).collect(),
            memory_id: None,
            entity_id: None,
            source_memory_ids: Vec::new(),
            tags: Vec::new(),
            importance: None,
        }
    }

    fn hybrid_ratios(rag: f32, kag: f32, graphrag: f32) -> RouteRatios {
        RouteRatios { rag, kag, graphrag }
    }

    #[test]
    fn test_hybrid_anti_collapse() {
        // S4: rag-1..3 (0.95, 0.93, 0.91), kag-1..2 (0.86, 0.84),
        // hybrid with rag=0.7 / kag=0.3: at least one of the top three is kag.
        let candidates = vec![
            candidate(CandidateSource::Rag, "rag-1", 0.95, &[]),
            candidate(CandidateSource::Rag, "rag-2", 0.93, &[]),
            candidate(CandidateSource::Rag, "rag-3", 0.91, &[]),
            candidate(CandidateSource::Kag, "kag-1", 0.86, &[]),
            candidate(CandidateSource::Kag, "kag-2", 0.84, &[]),
        ];
        let ordered = rerank(
            candidates,
            &hybrid_ratios(0.7, 0.3, 0.0),
            Route::Hybrid,
            0.0,
        );
        assert_eq!(ordered.len(), 5);
        let top_three: Vec<_> = ordered[..3].iter().map(|c| c.source).collect();
        assert!(
            top_three.contains(&CandidateSource::Kag),
            "top three were {:?}",
            top_three
        );
    }

    #[test]
    fn test_never_three_consecutive_in_hybrid() {
        let mut candidates = Vec::new();
        for i in 0..6 {
            candidates.push(candidate(
                CandidateSource::Rag,
                &format!("rag-{}", i),
                0.9 - i as f32 * 0.01,
                &[],
            ));
        }
        for i in 0..3 {
            candidates.push(candidate(
                CandidateSource::Kag,
                &format!("kag-{}", i),
                0.5 - i as f32 * 0.01,
                &[],
            ));
        }
        let ordered = rerank(
            candidates,
            &hybrid_ratios(0.6, 0.4, 0.0),
            Route::Hybrid,
            0.0,
        );

        let mut run = 0usize;
        let mut last: Option<CandidateSource> = None;
        for section in &ordered {
            if Some(section.source) == last {
                run += 1;
            } else {
                run = 1;
                last = Some(section.source);
            }
            // With kag quota unexhausted a run of three must never happen;
            // by construction quotas interleave before kag drains.
            assert!(run <= 3, "source collapse in {:?}", ordered.iter().map(|c| &c.id).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_all_candidates_survive_reranking() {
        let candidates = vec![
            candidate(CandidateSource::Rag, "r1", 0.9, &[]),
            candidate(CandidateSource::Kag, "k1", 0.8, &[]),
            candidate(CandidateSource::Graphrag, "g1", 0.7, &[]),
        ];
        let ordered = rerank(
            candidates,
            &hybrid_ratios(0.5, 0.3, 0.2),
            Route::Hybrid,
            0.1,
        );
        let ids: HashSet<_> = ordered.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_memory_route_leads_with_rag() {
        let candidates = vec![
            candidate(CandidateSource::Kag, "k1", 0.99, &[]),
            candidate(CandidateSource::Rag, "r1", 0.9, &[]),
            candidate(CandidateSource::Rag, "r2", 0.85, &[]),
            candidate(CandidateSource::Rag, "r3", 0.8, &[]),
        ];
        let ordered = rerank(
            candidates,
            &hybrid_ratios(0.9, 0.1, 0.0),
            Route::Memory,
            0.0,
        );
        // No anti-collapse outside hybrid; rag dominates by relevance once
        // the kag quota (floor(0.1*4)=0, remainder goes to the higher
        // relevance source first) is spent.
        assert_eq!(ordered.len(), 4);
        assert_eq!(ordered[0].id, "k1");
    }

    #[test]
    fn test_novelty_boost_reorders_near_ties() {
        // Both rag candidates cover "auth"; the kag candidate introduces
        // "token". With novelty, the kag candidate overtakes the second,
        // nearly-tied rag candidate.
        let candidates = vec![
            candidate(CandidateSource::Rag, "r1", 0.90, &["auth"]),
            candidate(CandidateSource::Rag, "r2", 0.89, &["auth"]),
            candidate(CandidateSource::Kag, "k1", 0.88, &["token"]),
        ];
        let ordered = rerank(
            candidates,
            &hybrid_ratios(0.5, 0.5, 0.0),
            Route::Hybrid,
            0.15,
        );
        assert_eq!(ordered[0].id, "r1");
        assert_eq!(ordered[1].id, "k1", "novel candidate should surface");
        assert_eq!(ordered[2].id, "r2");
    }

    #[test]
    fn test_single_candidate_passthrough() {
        let candidates = vec![candidate(CandidateSource::Rag, "only", 0.5, &[])];
        let ordered = rerank(
            candidates,
            &hybrid_ratios(1.0, 0.0, 0.0),
            Route::Memory,
            0.1,
        );
        assert_eq!(ordered.len(), 1);
    }
}
