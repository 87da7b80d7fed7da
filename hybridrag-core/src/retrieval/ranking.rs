//! Ranking and token budgeting of context sections

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::retrieval::context::{ContextEntity, ContextRelationship};
use crate::text::Tokenizer;

/// Something ranked by graph degree, then relevance, then recency
pub trait Rankable {
    /// Graph degree
    fn degree(&self) -> usize;
    /// Retrieval relevance
    fn score(&self) -> f32;
    /// Last modification
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Rankable for ContextEntity {
    fn degree(&self) -> usize {
        self.degree
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Rankable for ContextRelationship {
    fn degree(&self) -> usize {
        self.degree
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Order two items: higher degree first, then higher score, then newer
pub fn compare_rank<T: Rankable>(a: &T, b: &T) -> Ordering {
    b.degree()
        .cmp(&a.degree())
        .then_with(|| b.score().total_cmp(&a.score()))
        .then_with(|| b.timestamp().cmp(&a.timestamp()))
}

/// Sort `items` into rank order; equal items keep their relative order
pub fn rank<T: Rankable>(items: &mut [T]) {
    items.sort_by(compare_rank);
}

/// Result of walking a ranked list against a budget
#[derive(Debug, Clone, PartialEq)]
pub struct Budgeted<T> {
    /// Items that fit, in order
    pub items: Vec<T>,
    /// Rendered line of each kept item
    pub lines: Vec<String>,
    /// Tokens used by the kept lines
    pub tokens: usize,
    /// Whether an item did not fit
    pub truncated: bool,
}

/// Keep items in order until the next rendered line would exceed `budget`
///
/// The walk stops at the first item that does not fit, even if a later,
/// shorter item would.
pub fn take_within_budget<T, F>(
    items: Vec<T>,
    budget: usize,
    tokenizer: &dyn Tokenizer,
    render: F,
) -> Budgeted<T>
where
    F: Fn(&T) -> String,
{
    let mut kept = Budgeted {
        items: Vec::with_capacity(items.len()),
        lines: Vec::with_capacity(items.len()),
        tokens: 0,
        truncated: false,
    };
    for item in items {
        let line = render(&item);
        let tokens = tokenizer.count_tokens(&line);
        if kept.tokens + tokens > budget {
            kept.truncated = true;
            break;
        }
        kept.tokens += tokens;
        kept.lines.push(line);
        kept.items.push(item);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::WordTokenizer;
    use chrono::TimeZone;

    fn entity(name: &str, degree: usize, score: f32, second: u32) -> ContextEntity {
        ContextEntity {
            key: name.to_lowercase(),
            name: name.to_string(),
            entity_type: "person".to_string(),
            description: String::new(),
            degree,
            score,
            file_paths: Vec::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
        }
    }

    #[test]
    fn degree_beats_score_and_recency_breaks_ties() {
        let mut items = vec![
            entity("Low", 1, 0.99, 0),
            entity("Old", 3, 0.5, 0),
            entity("New", 3, 0.5, 30),
            entity("Best", 3, 0.9, 0),
        ];
        rank(&mut items);
        let names: Vec<&str> = items.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Best", "New", "Old", "Low"]);
    }

    #[test]
    fn walk_stops_at_first_item_over_budget() {
        let tokenizer = WordTokenizer::new().unwrap();
        let items = vec!["one two", "three four five", "six"];
        let kept = take_within_budget(items, 4, &tokenizer, |s| s.to_string());
        assert_eq!(kept.items, vec!["one two"]);
        assert_eq!(kept.tokens, 2);
        assert!(kept.truncated);
    }

    #[test]
    fn walk_within_budget_is_not_truncated() {
        let tokenizer = WordTokenizer::new().unwrap();
        let kept = take_within_budget(vec!["a", "b"], 10, &tokenizer, |s| s.to_string());
        assert_eq!(kept.lines, vec!["a", "b"]);
        assert!(!kept.truncated);
    }
}
