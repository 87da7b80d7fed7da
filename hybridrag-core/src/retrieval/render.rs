//! Rendering of context lines, sections and citations

use std::path::Path;

use indexmap::IndexMap;

use crate::retrieval::context::{ContextChunk, ContextEntity, ContextRelationship, Reference};

/// Header of the relationship section
pub const RELATIONSHIPS_HEADER: &str = "-----Relationships-----";
/// Header of the entity section
pub const ENTITIES_HEADER: &str = "-----Entities-----";
/// Header of the chunk section
pub const SOURCES_HEADER: &str = "-----Sources-----";

const UNKNOWN_SOURCE: &str = "unknown_source";

/// `Name (Type): Description`
pub fn render_entity(entity: &ContextEntity) -> String {
    format!(
        "{} ({}): {}",
        entity.name, entity.entity_type, entity.description
    )
}

/// `Source -> Target: Keywords - Description`
pub fn render_relationship(relationship: &ContextRelationship) -> String {
    format!(
        "{} -> {}: {} - {}",
        relationship.source, relationship.target, relationship.keywords, relationship.description
    )
}

/// `[FileName] Content`
pub fn render_chunk(chunk: &ContextChunk) -> String {
    format!("[{}] {}", file_name(&chunk.file_path), chunk.content)
}

/// Final path component of `path`
pub fn file_name(path: &str) -> &str {
    if path.is_empty() {
        return UNKNOWN_SOURCE;
    }
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Join non-empty sections in relationship, entity, source order
pub fn assemble(relationships: &[String], entities: &[String], chunks: &[String]) -> String {
    [
        (RELATIONSHIPS_HEADER, relationships),
        (ENTITIES_HEADER, entities),
        (SOURCES_HEADER, chunks),
    ]
    .into_iter()
    .filter(|(_, lines)| !lines.is_empty())
    .map(|(header, lines)| format!("{header}\n{}", lines.join("\n")))
    .collect::<Vec<_>>()
    .join("\n\n")
}

/// One citation per distinct file path, numbered in first-use order
pub fn build_references(chunks: &[ContextChunk]) -> Vec<Reference> {
    let mut by_path: IndexMap<&str, &str> = IndexMap::new();
    for chunk in chunks {
        let path = if chunk.file_path.is_empty() {
            UNKNOWN_SOURCE
        } else {
            chunk.file_path.as_str()
        };
        by_path.entry(path).or_insert(chunk.full_doc_id.as_str());
    }
    by_path
        .into_iter()
        .enumerate()
        .map(|(i, (file_path, document_id))| Reference {
            reference_id: (i + 1).to_string(),
            file_path: file_path.to_string(),
            document_id: document_id.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc: &str, path: &str) -> ContextChunk {
        ContextChunk {
            id: id.to_string(),
            content: format!("content of {id}"),
            full_doc_id: doc.to_string(),
            file_path: path.to_string(),
            score: 0.5,
            rerank_score: None,
        }
    }

    #[test]
    fn chunk_lines_use_base_name() {
        let line = render_chunk(&chunk("c1", "d1", "/data/notes/sea.txt"));
        assert_eq!(line, "[sea.txt] content of c1");
    }

    #[test]
    fn empty_sections_are_omitted() {
        let text = assemble(&[], &["Zephyr (person): sailor".to_string()], &["[a] b".to_string()]);
        assert_eq!(
            text,
            "-----Entities-----\nZephyr (person): sailor\n\n-----Sources-----\n[a] b"
        );
    }

    #[test]
    fn references_dedupe_by_path_in_order() {
        let refs = build_references(&[
            chunk("c1", "d1", "b.txt"),
            chunk("c2", "d2", "a.txt"),
            chunk("c3", "d1", "b.txt"),
        ]);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].reference_id, "1");
        assert_eq!(refs[0].file_path, "b.txt");
        assert_eq!(refs[1].document_id, "d2");
    }
}
