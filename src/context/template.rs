//! Context document templates
//!
//! Template variants are data, not subclasses: each variant selects a set
//! of render functions keyed by the [`Template`] enum. Rendering is pure
//! and never fails; malformed sections degrade to their raw text.

use crate::types::{CandidateSection, CandidateSource, Route, Template};

/// Queries longer than this are elided in the document header
const HEADER_QUERY_MAX_CHARS: usize = 120;

/// Group heading shown above each channel's sections
pub fn group_heading(source: CandidateSource) -> &'static str {
    match source {
        CandidateSource::Rag => "## Memories",
        CandidateSource::Kag => "## Code Structure",
        CandidateSource::Graphrag => "## Knowledge Graph",
    }
}

fn header(query: &str, route: Route) -> String {
    let mut shown: String = query.chars().take(HEADER_QUERY_MAX_CHARS).collect();
    if query.chars().count() > HEADER_QUERY_MAX_CHARS {
        shown.push('…');
    }
    format!("# Context: {}\n_Route: {}_", shown, route)
}

/// Render one section under the given template
///
/// The assembler measures exactly this text when packing the budget.
pub fn render_section(section: &CandidateSection, template: Template) -> String {
    match template {
        Template::Compact => {
            let first_line = section.body.lines().next().unwrap_or("").trim();
            format!("- **{}** — {}", section.title, first_line)
        }
        Template::Default => {
            format!("### {}\n\n{}", section.title, section.body.trim_end())
        }
        Template::Detailed => {
            let mut rendered = format!("### {}\n\n{}", section.title, section.body.trim_end());
            let mut meta = Vec::new();
            if !section.tags.is_empty() {
                meta.push(format!("tags: {}", section.tags.join(", ")));
            }
            if let Some(importance) = section.importance {
                meta.push(format!("importance: {:.2}", importance));
            }
            if let Some(memory_id) = &section.memory_id {
                meta.push(format!("memory: {}", memory_id));
            }
            if !meta.is_empty() {
                rendered.push_str(&format!("\n\n_{}_", meta.join(" · ")));
            }
            rendered
        }
    }
}

/// Render the full document from admitted sections already in output order
/// (RAG group, then KAG, then GraphRAG)
pub fn render_document(
    query: &str,
    route: Route,
    sections: &[CandidateSection],
    template: Template,
) -> String {
    let mut document = header(query, route);

    if sections.is_empty() {
        document.push_str("\n\nNo relevant context found for this query.");
        return document;
    }

    let mut current_group: Option<CandidateSource> = None;
    for section in sections {
        if current_group != Some(section.source) {
            document.push_str("\n\n");
            document.push_str(group_heading(section.source));
            current_group = Some(section.source);
        }
        document.push_str("\n\n");
        document.push_str(&render_section(section, template));
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(source: CandidateSource, title: &str, body: &str) -> CandidateSection {
        CandidateSection {
            id: format!("{}-{}", source, title),
            source,
            title: title.to_string(),
            body: body.to_string(),
            relevance: 0.9,
            query_terms: Vec::new(),
            memory_id: None,
            entity_id: None,
            source_memory_ids: Vec::new(),
            tags: Vec::new(),
            importance: None,
        }
    }

    #[test]
    fn test_empty_document_is_stub_naming_query() {
        let document = render_document("auth flow", Route::Memory, &[], Template::Default);
        assert!(document.contains("auth flow"));
        assert!(document.contains("No relevant context"));
    }

    #[test]
    fn test_compact_renders_first_line_only() {
        let section = section(CandidateSource::Rag, "Title", "first line\nsecond line");
        let rendered = render_section(&section, Template::Compact);
        assert!(rendered.contains("first line"));
        assert!(!rendered.contains("second line"));
    }

    #[test]
    fn test_detailed_inlines_metadata() {
        let mut s = section(CandidateSource::Rag, "Title", "body");
        s.tags = vec!["auth".to_string()];
        s.importance = Some(0.8);
        let rendered = render_section(&s, Template::Detailed);
        assert!(rendered.contains("tags: auth"));
        assert!(rendered.contains("importance: 0.80"));
    }

    #[test]
    fn test_group_headings_emitted_once_per_group() {
        let sections = vec![
            section(CandidateSource::Rag, "A", "a"),
            section(CandidateSource::Rag, "B", "b"),
            section(CandidateSource::Kag, "C", "c"),
        ];
        let document = render_document("q", Route::Hybrid, &sections, Template::Default);
        assert_eq!(document.matches("## Memories").count(), 1);
        assert_eq!(document.matches("## Code Structure").count(), 1);
        assert!(!document.contains("## Knowledge Graph"));
    }

    #[test]
    fn test_long_query_elided_in_header() {
        let query = "x".repeat(500);
        let document = render_document(&query, Route::Memory, &[], Template::Default);
        let first_line = document.lines().next().unwrap();
        assert!(first_line.chars().count() < 140);
    }
}
