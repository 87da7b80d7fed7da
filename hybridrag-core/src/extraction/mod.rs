//! Language model driven extraction
//!
//! - [`EntityExtractor`]: chunk text to entity and relationship records
//! - [`KeywordExtractor`]: query to high-level and low-level keywords
//! - [`DescriptionSummarizer`]: many description fragments to one

pub mod entity;
pub mod keywords;
pub mod parser;
pub mod prompts;
pub mod summarize;

pub use entity::EntityExtractor;
pub use keywords::{parse_keywords, KeywordExtractor, QueryKeywords};
pub use parser::{parse_extraction, ParseLimits};
pub use summarize::{DescriptionKind, DescriptionSummarizer};
