//! Text normalization for identity keys.
//!
//! Extracted names are compared only after passing through
//! [`normalize_entity_name`]; raw model output is never used as a key.

/// Characters stripped from both ends of extracted names and types
const WRAPPING_CHARS: &[char] = &['"', '\'', '`', '<', '>', '(', ')', '[', ']', '*'];

/// Trim, strip wrapping quotes and brackets, and collapse inner whitespace
pub fn clean_text(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| WRAPPING_CHARS.contains(&c) || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity key for an entity name: cleaned and lowercased
pub fn normalize_entity_name(raw: &str) -> String {
    clean_text(raw).to_lowercase()
}

/// Canonical entity type: cleaned, lowercased, inner spaces as underscores
pub fn normalize_entity_type(raw: &str) -> String {
    let cleaned = clean_text(raw).to_lowercase();
    if cleaned.is_empty() {
        crate::core::UNKNOWN_ENTITY_TYPE.to_string()
    } else {
        cleaned.replace(' ', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_normalize_case_and_whitespace() {
        assert_eq!(normalize_entity_name("  Ada   Lovelace "), "ada lovelace");
        assert_eq!(normalize_entity_name("\"ADA LOVELACE\""), "ada lovelace");
        assert_eq!(normalize_entity_name("Ada\tLovelace"), "ada lovelace");
    }

    #[test]
    fn clean_text_keeps_case() {
        assert_eq!(clean_text("  `Analytical  Engine` "), "Analytical Engine");
    }

    #[test]
    fn empty_type_becomes_unknown() {
        assert_eq!(normalize_entity_type("  "), "unknown");
        assert_eq!(normalize_entity_type("Geo Location"), "geo_location");
    }
}
