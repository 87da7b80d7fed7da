//! Knowledge graph construction
//!
//! The [`MergeEngine`] is the only writer of entity and relationship records.
//! Writers to one identity key are serialized through [`KeyedLocks`].

pub mod key_lock;
pub mod merge;

pub use key_lock::{KeyGuard, KeyedLocks};
pub use merge::{
    backlink_chunk_ids, reduce_chunk_results, Contribution, EntityCandidate, MergeEngine,
    MergeOutcome, MergeReport, ReducedBatch, RelationCandidate, RemovalReport,
};
