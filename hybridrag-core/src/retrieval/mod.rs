//! Retrieval context building.
//!
//! A query is answered from a [`QueryContext`]: ranked entities,
//! relationships and source chunks rendered into sections that fit the
//! token budgets in [`QueryParam`].

/// Candidate retrieval, ranking and budgeting
pub mod builder;
/// Context types
pub mod context;
/// Query parameters and modes
pub mod param;
/// Rank ordering and budget walks
pub mod ranking;
/// Line and section rendering
pub mod render;

pub use builder::ContextBuilder;
pub use context::{
    ContextChunk, ContextEntity, ContextRelationship, QueryContext, Reference, TokenUsage,
    Truncation,
};
pub use param::{QueryMode, QueryParam};
pub use ranking::{compare_rank, rank, take_within_budget, Budgeted, Rankable};
