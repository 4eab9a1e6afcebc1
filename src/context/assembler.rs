//! Token-budgeted context assembly
//!
//! Admits reranked sections greedily against a hard token ceiling, reorders
//! the admitted set into stable per-channel groups (RAG, KAG, GraphRAG),
//! renders the document, and emits evidence records mirroring the admitted
//! order. Running out of budget is not an error; the result is marked
//! truncated.

use crate::context::template::{render_document, render_section};
use crate::context::tokens::estimate_tokens;
use crate::types::{
    CandidateSection, CandidateSource, Evidence, GraphEvidence, Route, Template,
};
use tracing::debug;

/// Tokens reserved for the header, group headings, and joins
pub const FORMAT_OVERHEAD_TOKENS: usize = 200;

/// One assembled context document before cache/metadata wrapping
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub document: String,
    pub total_tokens: usize,
    pub rag_sections: usize,
    pub kag_sections: usize,
    pub graphrag_sections: usize,
    pub truncated: bool,

    /// Admitted sections in output order
    pub sections: Vec<CandidateSection>,

    /// Evidence records, present when requested
    pub evidence: Option<Vec<Evidence>>,
}

impl AssembledContext {
    pub fn sections_included(&self) -> usize {
        self.sections.len()
    }
}

fn evidence_for(section: &CandidateSection) -> Evidence {
    let graph = section.entity_id.as_ref().map(|entity_id| GraphEvidence {
        entity_id: entity_id.clone(),
        source_memory_ids: section.source_memory_ids.clone(),
    });
    Evidence {
        source: section.source,
        memory_id: section.memory_id.clone(),
        graph,
        score: section.relevance,
    }
}

/// One evidence record per admitted section, in admitted order
pub fn evidence_records(sections: &[CandidateSection]) -> Vec<Evidence> {
    sections.iter().map(evidence_for).collect()
}

/// Greedily admit sections against the budget and reorder them into the
/// stable per-channel output order (RAG, KAG, GraphRAG; fusion order is
/// preserved within each group)
///
/// Returns the ordered admitted sections and the truncation flag.
pub fn select_sections(
    ranked: &[CandidateSection],
    token_budget: usize,
    template: Template,
) -> (Vec<CandidateSection>, bool) {
    let available = token_budget.saturating_sub(FORMAT_OVERHEAD_TOKENS);

    let mut admitted: Vec<CandidateSection> = Vec::new();
    let mut used_tokens = 0usize;

    if available > 0 {
        for section in ranked {
            let section_tokens = estimate_tokens(&render_section(section, template));
            if used_tokens + section_tokens <= available {
                used_tokens += section_tokens;
                admitted.push(section.clone());
            }
        }
    }

    let mut ordered: Vec<CandidateSection> = Vec::with_capacity(admitted.len());
    for source in [
        CandidateSource::Rag,
        CandidateSource::Kag,
        CandidateSource::Graphrag,
    ] {
        ordered.extend(admitted.iter().filter(|s| s.source == source).cloned());
    }

    let truncated = ranked.len() > ordered.len();
    (ordered, truncated)
}

/// Assemble a context document from reranked candidates
///
/// `ranked` must already be in fusion order; admission is greedy and whole
/// sections only. The output document never exceeds `token_budget`.
pub fn assemble(
    query: &str,
    route: Route,
    ranked: &[CandidateSection],
    token_budget: usize,
    template: Template,
    include_evidence: bool,
) -> AssembledContext {
    let (ordered, truncated) = select_sections(ranked, token_budget, template);

    let document = render_document(query, route, &ordered, template);
    let total_tokens = estimate_tokens(&document);
    debug_assert!(total_tokens <= token_budget || ordered.is_empty());

    let rag_sections = ordered
        .iter()
        .filter(|s| s.source == CandidateSource::Rag)
        .count();
    let kag_sections = ordered
        .iter()
        .filter(|s| s.source == CandidateSource::Kag)
        .count();
    let graphrag_sections = ordered.len() - rag_sections - kag_sections;

    if truncated {
        debug!(
            considered = ranked.len(),
            admitted = ordered.len(),
            budget = token_budget,
            "context truncated to fit token budget"
        );
    }

    let evidence = include_evidence.then(|| evidence_records(&ordered));

    AssembledContext {
        document,
        total_tokens,
        rag_sections,
        kag_sections,
        graphrag_sections,
        truncated,
        sections: ordered,
        evidence,
    }
}
