//! Parser for the delimited extraction record format
//!
//! ```text
//! entity<#>name<#>type<#>description
//! relation<#>source<#>target<#>keywords<#>description[<#>weight]
//! <|COMPLETE|>
//! ```
//!
//! A response without the completion sentinel is treated as truncated and
//! rejected. Lines that are not well-formed records are skipped.

use crate::core::{ExtractedEntity, ExtractedRelationship, ExtractionResult, RagError, Result};
use crate::extraction::prompts::{COMPLETION_DELIMITER, TUPLE_DELIMITER};
use crate::text::normalize::{clean_text, normalize_entity_name};

/// Characters of a response kept in diagnostic logs
pub const LOG_PREVIEW_CHARS: usize = 200;

/// Caps applied while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseLimits {
    /// Keep at most this many entities
    pub max_entities: Option<usize>,
    /// Keep at most this many relationships
    pub max_relationships: Option<usize>,
}

/// First [`LOG_PREVIEW_CHARS`] characters of `text`
pub fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

/// Parse a complete extraction response
pub fn parse_extraction(response: &str, limits: ParseLimits) -> Result<ExtractionResult> {
    let Some(end) = response.find(COMPLETION_DELIMITER) else {
        tracing::warn!(
            response_preview = %preview(response),
            "Extraction response is missing the completion sentinel"
        );
        return Err(RagError::Parse {
            message: "extraction response was not terminated by the completion sentinel"
                .to_string(),
        });
    };

    let mut result = ExtractionResult::default();
    for line in response[..end].lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_record(line) {
            Some(Record::Entity(entity)) => result.entities.push(entity),
            Some(Record::Relation(relation)) => result.relationships.push(relation),
            None => tracing::debug!(line = %preview(line), "Skipping malformed extraction line"),
        }
    }

    if let Some(max) = limits.max_entities {
        result.entities.truncate(max);
    }
    if let Some(max) = limits.max_relationships {
        result.relationships.truncate(max);
    }
    Ok(result)
}

enum Record {
    Entity(ExtractedEntity),
    Relation(ExtractedRelationship),
}

fn parse_record(line: &str) -> Option<Record> {
    let line = line.trim_start_matches('(').trim_end_matches(')');
    let fields: Vec<String> = line.split(TUPLE_DELIMITER).map(clean_text).collect();
    let kind = fields.first()?.to_lowercase();

    match kind.as_str() {
        "entity" if fields.len() >= 4 => {
            let name = fields[1].clone();
            if normalize_entity_name(&name).is_empty() {
                return None;
            }
            Some(Record::Entity(ExtractedEntity {
                name,
                entity_type: fields[2].clone(),
                description: fields[3..].join(" "),
            }))
        },
        "relation" | "relationship" if fields.len() >= 5 => {
            let source = fields[1].clone();
            let target = fields[2].clone();
            let source_key = normalize_entity_name(&source);
            let target_key = normalize_entity_name(&target);
            if source_key.is_empty() || target_key.is_empty() || source_key == target_key {
                return None;
            }
            let keywords = fields[3]
                .split(',')
                .map(clean_text)
                .filter(|k| !k.is_empty())
                .collect();
            Some(Record::Relation(ExtractedRelationship {
                source,
                target,
                keywords,
                description: fields[4].clone(),
                weight: fields.get(5).map_or(1.0, |raw| parse_weight(raw)),
            }))
        },
        _ => None,
    }
}

fn parse_weight(raw: &str) -> f64 {
    match raw.parse::<f64>() {
        Ok(weight) if weight.is_finite() && weight >= 0.0 => weight,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(lines: &[&str]) -> String {
        let mut text = lines.join("\n");
        text.push('\n');
        text.push_str(COMPLETION_DELIMITER);
        text
    }

    #[test]
    fn parses_entities_and_relations() {
        let text = response(&[
            "entity<#>Alice<#>person<#>A mathematician",
            "entity<#>Bob<#>person<#>A physicist",
            "relation<#>Alice<#>Bob<#>colleagues, research<#>They work together<#>2.5",
        ]);
        let result = parse_extraction(&text, ParseLimits::default()).unwrap();

        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].name, "Alice");
        assert_eq!(result.relationships.len(), 1);
        let relation = &result.relationships[0];
        assert_eq!(relation.keywords, vec!["colleagues", "research"]);
        assert_eq!(relation.weight, 2.5);
    }

    #[test]
    fn missing_sentinel_is_a_parse_error() {
        let err = parse_extraction("entity<#>Alice<#>person<#>x", ParseLimits::default());
        assert!(matches!(err, Err(RagError::Parse { .. })));
    }

    #[test]
    fn weight_falls_back_to_one() {
        let text = response(&[
            "relation<#>A<#>B<#>k<#>no weight",
            "relation<#>A<#>C<#>k<#>bad weight<#>strong",
            "relation<#>A<#>D<#>k<#>negative<#>-3",
        ]);
        let result = parse_extraction(&text, ParseLimits::default()).unwrap();
        assert!(result.relationships.iter().all(|r| r.weight == 1.0));
    }

    #[test]
    fn malformed_and_self_loop_lines_are_skipped() {
        let text = response(&[
            "some chatter from the model",
            "entity<#>only-two-fields",
            "relation<#>Alice<#>ALICE<#>self<#>loop",
            "(\"Entity\"<#>\"Carol\"<#>person<#>quoted)",
        ]);
        let result = parse_extraction(&text, ParseLimits::default()).unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "Carol");
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn limits_truncate_records() {
        let text = response(&[
            "entity<#>A<#>t<#>a",
            "entity<#>B<#>t<#>b",
            "entity<#>C<#>t<#>c",
            "relation<#>A<#>B<#>k<#>ab",
            "relation<#>B<#>C<#>k<#>bc",
        ]);
        let limits = ParseLimits {
            max_entities: Some(2),
            max_relationships: Some(1),
        };
        let result = parse_extraction(&text, limits).unwrap();
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.relationships.len(), 1);
    }

    #[test]
    fn preview_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(preview(&long).len(), LOG_PREVIEW_CHARS);
    }
}
