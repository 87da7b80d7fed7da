//! Knowledge graph merge engine
//!
//! Folds one document's per-chunk extractions into the stored graph.
//!
//! 1. **Local reduction**: extractions are grouped by identity key into one
//!    candidate per entity and per relationship. A candidate keeps each
//!    chunk's contribution separately.
//! 2. **Global merge**: each candidate is merged into its stored record under
//!    a per-key lock. Only contributions from chunks not yet in the stored
//!    provenance are applied, so re-merging the same chunks changes nothing.
//! 3. **Description bounding**: a record with too many fragments, or too many
//!    tokens, has its descriptions replaced by one summary.
//! 4. **Index maintenance**: vectors and chunk backlinks are written in batch
//!    for every record the merge touched.
//!
//! Relationship endpoints missing from the batch become placeholder entities
//! of type [`UNKNOWN_ENTITY_TYPE`] so every stored edge has stored endpoints.
//! All entities are merged before any relationship.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::async_processing::{ensure_active, EmbeddingGate, PipelineStage, ProgressReporter};
use crate::config::MergeConfig;
use crate::core::{
    Chunk, ChunkResult, EntityKey, EntityRecord, KvRecord, KvStore, RagError, RelationKey,
    RelationRecord, Result, VectorDocument, VectorStore, UNKNOWN_ENTITY_TYPE,
};
use crate::extraction::{DescriptionKind, DescriptionSummarizer};
use crate::graph::key_lock::KeyedLocks;
use crate::storage::StorageSet;
use crate::text::{entity_vector_id, relation_vector_id, Tokenizer};

/// What one chunk contributed to a candidate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contribution {
    /// Description fragments, deduplicated
    pub descriptions: Vec<String>,
    /// Summed relationship weight
    pub weight: f64,
    /// Relationship keywords, deduplicated
    pub keywords: Vec<String>,
    /// Source file of the chunk
    pub file_path: String,
}

impl Contribution {
    fn add_description(&mut self, description: &str) {
        push_unique(&mut self.descriptions, description.trim());
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// One distinct entity of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    /// Identity key
    pub key: EntityKey,
    /// First extracted spelling
    pub name: String,
    /// First extracted type
    pub entity_type: String,
    /// Other types proposed within the batch
    pub alternate_types: BTreeSet<String>,
    /// Only known as a relationship endpoint
    pub placeholder: bool,
    /// Contributions by chunk id
    pub contributions: IndexMap<String, Contribution>,
}

/// One distinct relationship of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct RelationCandidate {
    /// Identity key
    pub key: RelationKey,
    /// Source spelling of the first extraction
    pub source: String,
    /// Target spelling of the first extraction
    pub target: String,
    /// Contributions by chunk id
    pub contributions: IndexMap<String, Contribution>,
}

/// Candidates of one batch in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedBatch {
    /// Entity candidates
    pub entities: IndexMap<EntityKey, EntityCandidate>,
    /// Relationship candidates
    pub relations: IndexMap<RelationKey, RelationCandidate>,
}

/// Group a batch's extractions by identity key
pub fn reduce_chunk_results(chunk_results: &[ChunkResult]) -> ReducedBatch {
    let mut batch = ReducedBatch::default();

    for result in chunk_results {
        for entity in &result.entities {
            let key = entity.key();
            if key.as_str().is_empty() {
                continue;
            }
            let entity_type = entity.normalized_type();
            let candidate = batch
                .entities
                .entry(key.clone())
                .or_insert_with(|| EntityCandidate {
                    key,
                    name: entity.name.trim().to_string(),
                    entity_type: entity_type.clone(),
                    alternate_types: BTreeSet::new(),
                    placeholder: false,
                    contributions: IndexMap::new(),
                });
            if candidate.entity_type == UNKNOWN_ENTITY_TYPE {
                candidate.entity_type = entity_type;
            } else if entity_type != UNKNOWN_ENTITY_TYPE && entity_type != candidate.entity_type {
                candidate.alternate_types.insert(entity_type);
            }
            let contribution = candidate
                .contributions
                .entry(result.chunk_id.clone())
                .or_insert_with(|| Contribution {
                    file_path: result.file_path.clone(),
                    ..Default::default()
                });
            contribution.add_description(&entity.description);
        }

        for relation in &result.relationships {
            let key = relation.key();
            let (low, high) = key.endpoints();
            if low.as_str().is_empty() || low == high {
                continue;
            }
            let candidate = batch
                .relations
                .entry(key.clone())
                .or_insert_with(|| RelationCandidate {
                    key,
                    source: relation.source.trim().to_string(),
                    target: relation.target.trim().to_string(),
                    contributions: IndexMap::new(),
                });
            let contribution = candidate
                .contributions
                .entry(result.chunk_id.clone())
                .or_insert_with(|| Contribution {
                    file_path: result.file_path.clone(),
                    ..Default::default()
                });
            contribution.weight += relation.weight.max(0.0);
            contribution.add_description(&relation.description);
            for keyword in &relation.keywords {
                push_unique(&mut contribution.keywords, keyword.trim());
            }
        }
    }

    add_placeholder_endpoints(&mut batch);
    batch
}

fn add_placeholder_endpoints(batch: &mut ReducedBatch) {
    for relation in batch.relations.values() {
        for name in [&relation.source, &relation.target] {
            let key = EntityKey::from_name(name);
            if batch.entities.get(&key).is_some_and(|c| !c.placeholder) {
                continue;
            }
            let candidate = batch
                .entities
                .entry(key.clone())
                .or_insert_with(|| EntityCandidate {
                    key,
                    name: name.clone(),
                    entity_type: UNKNOWN_ENTITY_TYPE.to_string(),
                    alternate_types: BTreeSet::new(),
                    placeholder: true,
                    contributions: IndexMap::new(),
                });
            for (chunk_id, source) in &relation.contributions {
                let contribution = candidate
                    .contributions
                    .entry(chunk_id.clone())
                    .or_insert_with(|| Contribution {
                        file_path: source.file_path.clone(),
                        ..Default::default()
                    });
                for description in &source.descriptions {
                    contribution.add_description(description);
                }
            }
        }
    }
}

/// Effect of merging one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No stored record existed
    Created,
    /// The stored record gained new contributions
    Updated,
    /// Every contribution was already stored
    Unchanged,
}

/// Counts and keys of one document merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities inserted
    pub entities_created: usize,
    /// Entities extended
    pub entities_updated: usize,
    /// Entities already containing every contribution
    pub entities_unchanged: usize,
    /// Placeholder entities inserted for dangling endpoints
    pub placeholders_created: usize,
    /// Relationships inserted
    pub relations_created: usize,
    /// Relationships extended
    pub relations_updated: usize,
    /// Relationships already containing every contribution
    pub relations_unchanged: usize,
    /// Summarization calls made
    pub summaries: usize,
    /// Every entity key the document contributed
    pub entity_keys: Vec<EntityKey>,
    /// Every relationship key the document contributed
    pub relation_keys: Vec<RelationKey>,
}

/// Counts of one document removal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Entities whose provenance became empty
    pub entities_deleted: usize,
    /// Entities that kept other provenance
    pub entities_updated: usize,
    /// Relationships whose provenance became empty
    pub relations_deleted: usize,
    /// Relationships that kept other provenance
    pub relations_updated: usize,
}

struct Merged<R> {
    record: R,
    outcome: MergeOutcome,
    summarized: bool,
}

/// Merges per-chunk extractions into the graph, vector and backlink stores
pub struct MergeEngine {
    storage: StorageSet,
    embeddings: Arc<EmbeddingGate>,
    summarizer: Arc<DescriptionSummarizer>,
    tokenizer: Arc<dyn Tokenizer>,
    config: MergeConfig,
    locks: KeyedLocks,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .field("active_locks", &self.locks.active())
            .finish_non_exhaustive()
    }
}

impl MergeEngine {
    /// Create an engine writing into `storage`
    pub fn new(
        storage: StorageSet,
        embeddings: Arc<EmbeddingGate>,
        summarizer: Arc<DescriptionSummarizer>,
        tokenizer: Arc<dyn Tokenizer>,
        config: MergeConfig,
    ) -> Self {
        Self {
            storage,
            embeddings,
            summarizer,
            tokenizer,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Merge one document's chunk results
    ///
    /// Every candidate is attempted. If any failed, the error lists the failed
    /// keys; merges that succeeded stay committed and a rerun is safe.
    pub async fn merge(
        &self,
        document_id: &str,
        chunk_results: &[ChunkResult],
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<MergeReport> {
        ensure_active(cancel, "merge")?;
        let batch = reduce_chunk_results(chunk_results);
        let mut report = MergeReport {
            entity_keys: batch.entities.keys().cloned().collect(),
            relation_keys: batch.relations.keys().cloned().collect(),
            ..Default::default()
        };
        tracing::info!(
            document_id,
            entities = batch.entities.len(),
            relations = batch.relations.len(),
            "Merging extractions"
        );
        let total = batch.entities.len() + batch.relations.len();
        let mut failures: Vec<(String, RagError)> = Vec::new();

        // Entities first so every edge finds both endpoints
        let placeholders: HashSet<EntityKey> = batch
            .entities
            .values()
            .filter(|c| c.placeholder)
            .map(|c| c.key.clone())
            .collect();
        let entity_results: Vec<(EntityKey, Result<Merged<EntityRecord>>)> =
            stream::iter(batch.entities.into_values())
                .map(|candidate| async move {
                    let key = candidate.key.clone();
                    (key, self.merge_entity(candidate, cancel).await)
                })
                .buffer_unordered(self.config.max_parallel_merges.max(1))
                .collect()
                .await;

        let mut touched_entities = Vec::new();
        let mut unchanged_entities = Vec::new();
        for (key, result) in entity_results {
            match result {
                Ok(merged) => {
                    match merged.outcome {
                        MergeOutcome::Created => {
                            report.entities_created += 1;
                            if placeholders.contains(&key) {
                                report.placeholders_created += 1;
                            }
                        },
                        MergeOutcome::Updated => report.entities_updated += 1,
                        MergeOutcome::Unchanged => report.entities_unchanged += 1,
                    }
                    report.summaries += usize::from(merged.summarized);
                    if merged.outcome == MergeOutcome::Unchanged {
                        unchanged_entities.push((key, merged.record));
                    } else {
                        touched_entities.push((key, merged.record));
                    }
                },
                Err(e) => {
                    tracing::warn!(document_id, entity = %key, error = %e, "Entity merge failed");
                    failures.push((format!("entity:{key}"), e));
                },
            }
        }
        if let Some(progress) = progress {
            progress.report(
                PipelineStage::Merging,
                report.entity_keys.len(),
                total,
                format!(
                    "Merged entities: {} new, {} updated",
                    report.entities_created, report.entities_updated
                ),
                Some(document_id),
            );
        }

        ensure_active(cancel, "merge")?;
        let relation_results: Vec<(RelationKey, Result<Merged<RelationRecord>>)> =
            stream::iter(batch.relations.into_values())
                .map(|candidate| async move {
                    let key = candidate.key.clone();
                    (key, self.merge_relation(candidate, cancel).await)
                })
                .buffer_unordered(self.config.max_parallel_merges.max(1))
                .collect()
                .await;

        let mut touched_relations = Vec::new();
        let mut unchanged_relations = Vec::new();
        for (key, result) in relation_results {
            match result {
                Ok(merged) => {
                    match merged.outcome {
                        MergeOutcome::Created => report.relations_created += 1,
                        MergeOutcome::Updated => report.relations_updated += 1,
                        MergeOutcome::Unchanged => report.relations_unchanged += 1,
                    }
                    report.summaries += usize::from(merged.summarized);
                    if merged.outcome == MergeOutcome::Unchanged {
                        unchanged_relations.push((key, merged.record));
                    } else {
                        touched_relations.push((key, merged.record));
                    }
                },
                Err(e) => {
                    tracing::warn!(document_id, relation = %key, error = %e, "Relation merge failed");
                    failures.push((format!("relation:{key}"), e));
                },
            }
        }
        if let Some(progress) = progress {
            progress.report(
                PipelineStage::Merging,
                total,
                total,
                format!(
                    "Merged relations: {} new, {} updated",
                    report.relations_created, report.relations_updated
                ),
                Some(document_id),
            );
        }

        ensure_active(cancel, "merge")?;
        touched_entities.extend(self.stale_entity_indices(unchanged_entities).await?);
        touched_relations.extend(self.stale_relation_indices(unchanged_relations).await?);
        self.index_entities(&touched_entities).await?;
        self.index_relations(&touched_relations).await?;

        if !failures.is_empty() {
            let message = failures
                .first()
                .map(|(_, e)| e.to_string())
                .unwrap_or_default();
            return Err(RagError::Merge {
                document_id: document_id.to_string(),
                failed_keys: failures.into_iter().map(|(key, _)| key).collect(),
                message,
            });
        }

        tracing::info!(
            document_id,
            entities_created = report.entities_created,
            entities_updated = report.entities_updated,
            relations_created = report.relations_created,
            relations_updated = report.relations_updated,
            summaries = report.summaries,
            "Merge complete"
        );
        Ok(report)
    }

    async fn merge_entity(
        &self,
        candidate: EntityCandidate,
        cancel: &CancellationToken,
    ) -> Result<Merged<EntityRecord>> {
        ensure_active(cancel, "merge")?;
        let _guard = self.locks.lock(&format!("e:{}", candidate.key)).await;
        let stored = self.storage.graph.get_node(&candidate.key).await?;

        let fresh: Vec<(&String, &Contribution)> = candidate
            .contributions
            .iter()
            .filter(|(chunk_id, _)| {
                stored
                    .as_ref()
                    .map_or(true, |r| !r.source_chunk_ids.contains(*chunk_id))
            })
            .collect();

        let (mut record, outcome) = match stored {
            Some(record) if fresh.is_empty() => {
                return Ok(Merged {
                    record,
                    outcome: MergeOutcome::Unchanged,
                    summarized: false,
                })
            },
            Some(mut record) => {
                if !candidate.placeholder {
                    if record.is_placeholder() {
                        record.entity_type = candidate.entity_type.clone();
                    } else if candidate.entity_type != record.entity_type {
                        record.alternate_types.insert(candidate.entity_type.clone());
                    }
                    record
                        .alternate_types
                        .extend(candidate.alternate_types.iter().cloned());
                    for (_, contribution) in &fresh {
                        for description in &contribution.descriptions {
                            push_unique(&mut record.descriptions, description);
                        }
                    }
                }
                record.alternate_types.remove(&record.entity_type);
                (record, MergeOutcome::Updated)
            },
            None => {
                let mut descriptions = Vec::new();
                for (_, contribution) in &fresh {
                    for description in &contribution.descriptions {
                        push_unique(&mut descriptions, description);
                    }
                }
                let record = EntityRecord {
                    name: candidate.name.clone(),
                    entity_type: candidate.entity_type.clone(),
                    alternate_types: candidate.alternate_types.clone(),
                    descriptions,
                    source_chunk_ids: BTreeSet::new(),
                    file_paths: BTreeSet::new(),
                    timestamp: Utc::now(),
                };
                (record, MergeOutcome::Created)
            },
        };

        for (chunk_id, contribution) in &fresh {
            record.source_chunk_ids.insert((*chunk_id).clone());
            if !contribution.file_path.is_empty() {
                record.file_paths.insert(contribution.file_path.clone());
            }
        }
        record.timestamp = Utc::now();

        let summarized = self
            .bound_descriptions(DescriptionKind::Entity, &record.name, &mut record.descriptions)
            .await?;
        self.storage
            .graph
            .upsert_node(&candidate.key, record.clone())
            .await?;
        tracing::debug!(entity = %candidate.key, ?outcome, summarized, "Merged entity");
        Ok(Merged {
            record,
            outcome,
            summarized,
        })
    }

    async fn merge_relation(
        &self,
        candidate: RelationCandidate,
        cancel: &CancellationToken,
    ) -> Result<Merged<RelationRecord>> {
        ensure_active(cancel, "merge")?;
        let _guard = self.locks.lock(&format!("r:{}", candidate.key)).await;
        let stored = self.storage.graph.get_edge(&candidate.key).await?;

        let fresh: Vec<(&String, &Contribution)> = candidate
            .contributions
            .iter()
            .filter(|(chunk_id, _)| {
                stored
                    .as_ref()
                    .map_or(true, |r| !r.source_chunk_ids.contains(*chunk_id))
            })
            .collect();

        let (mut record, outcome) = match stored {
            Some(record) if fresh.is_empty() => {
                return Ok(Merged {
                    record,
                    outcome: MergeOutcome::Unchanged,
                    summarized: false,
                })
            },
            Some(record) => (record, MergeOutcome::Updated),
            None => (
                RelationRecord {
                    source: candidate.source.clone(),
                    target: candidate.target.clone(),
                    keywords: Vec::new(),
                    descriptions: Vec::new(),
                    weight: 0.0,
                    source_chunk_ids: BTreeSet::new(),
                    file_paths: BTreeSet::new(),
                    timestamp: Utc::now(),
                },
                MergeOutcome::Created,
            ),
        };

        for (chunk_id, contribution) in &fresh {
            record.weight += contribution.weight;
            for keyword in &contribution.keywords {
                push_unique(&mut record.keywords, keyword);
            }
            for description in &contribution.descriptions {
                push_unique(&mut record.descriptions, description);
            }
            record.source_chunk_ids.insert((*chunk_id).clone());
            if !contribution.file_path.is_empty() {
                record.file_paths.insert(contribution.file_path.clone());
            }
        }
        record.timestamp = Utc::now();

        let name = candidate.key.to_string();
        let summarized = self
            .bound_descriptions(DescriptionKind::Relationship, &name, &mut record.descriptions)
            .await?;
        self.storage
            .graph
            .upsert_edge(&candidate.key, record.clone())
            .await?;
        tracing::debug!(relation = %candidate.key, weight = record.weight, ?outcome, "Merged relation");
        Ok(Merged {
            record,
            outcome,
            summarized,
        })
    }

    /// Replace `descriptions` with one summary when over either bound
    async fn bound_descriptions(
        &self,
        kind: DescriptionKind,
        name: &str,
        descriptions: &mut Vec<String>,
    ) -> Result<bool> {
        if descriptions.is_empty() {
            return Ok(false);
        }
        let tokens = self.tokenizer.count_tokens(&descriptions.join("\n"));
        if descriptions.len() <= self.config.summary_fragment_threshold
            && tokens <= self.config.summary_max_tokens
        {
            return Ok(false);
        }
        let summary = self.summarizer.summarize(kind, name, descriptions).await?;
        *descriptions = vec![summary];
        Ok(true)
    }

    /// Unchanged entities whose vector or backlink lags the graph record
    ///
    /// A run interrupted between the graph write and indexing leaves the
    /// record complete but its indices stale, so a rerun sees it as unchanged.
    async fn stale_entity_indices(
        &self,
        unchanged: Vec<(EntityKey, EntityRecord)>,
    ) -> Result<Vec<(EntityKey, EntityRecord)>> {
        if unchanged.is_empty() {
            return Ok(unchanged);
        }
        let ids: Vec<String> = unchanged.iter().map(|(k, _)| entity_vector_id(k)).collect();
        let expected: Vec<(String, &BTreeSet<String>)> = unchanged
            .iter()
            .map(|(_, r)| (r.embedding_text(), &r.source_chunk_ids))
            .collect();
        let stale = self
            .stale_flags(
                &ids,
                &expected,
                self.storage.entity_vectors.as_ref(),
                self.storage.entity_chunks.as_ref(),
            )
            .await?;
        Ok(unchanged
            .into_iter()
            .zip(stale)
            .filter_map(|(entry, stale)| stale.then_some(entry))
            .collect())
    }

    async fn stale_relation_indices(
        &self,
        unchanged: Vec<(RelationKey, RelationRecord)>,
    ) -> Result<Vec<(RelationKey, RelationRecord)>> {
        if unchanged.is_empty() {
            return Ok(unchanged);
        }
        let ids: Vec<String> = unchanged
            .iter()
            .map(|(k, _)| relation_vector_id(k))
            .collect();
        let expected: Vec<(String, &BTreeSet<String>)> = unchanged
            .iter()
            .map(|(_, r)| (r.embedding_text(), &r.source_chunk_ids))
            .collect();
        let stale = self
            .stale_flags(
                &ids,
                &expected,
                self.storage.relation_vectors.as_ref(),
                self.storage.relation_chunks.as_ref(),
            )
            .await?;
        Ok(unchanged
            .into_iter()
            .zip(stale)
            .filter_map(|(entry, stale)| stale.then_some(entry))
            .collect())
    }

    /// One flag per id: vector missing, vector text differs, or backlink
    /// chunk ids differ from the record's provenance
    async fn stale_flags(
        &self,
        ids: &[String],
        expected: &[(String, &BTreeSet<String>)],
        vectors: &dyn VectorStore,
        backlinks: &dyn KvStore,
    ) -> Result<Vec<bool>> {
        let (documents, links) =
            tokio::try_join!(vectors.get_by_ids(ids), backlinks.get_by_ids(ids))?;
        let indexed: HashMap<String, String> = documents
            .into_iter()
            .map(|d| (d.id, d.content))
            .collect();

        Ok(ids
            .iter()
            .zip(expected)
            .zip(links)
            .map(|((id, (text, chunk_ids)), link)| {
                let vector_current = indexed.get(id).is_some_and(|content| content == text);
                let backlink_current = link.is_some_and(|record| {
                    backlink_chunk_ids(&record).into_iter().collect::<BTreeSet<_>>() == **chunk_ids
                });
                !(vector_current && backlink_current)
            })
            .collect())
    }

    async fn index_entities(&self, merged: &[(EntityKey, EntityRecord)]) -> Result<()> {
        if merged.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = merged.iter().map(|(_, r)| r.embedding_text()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let mut documents = Vec::with_capacity(merged.len());
        let mut backlinks = Vec::with_capacity(merged.len());
        for (((key, record), vector), content) in merged.iter().zip(vectors).zip(texts) {
            let id = entity_vector_id(key);
            documents.push(VectorDocument {
                id: id.clone(),
                vector,
                content,
                metadata: object(json!({
                    "entity_key": key.as_str(),
                    "entity_name": record.name,
                    "entity_type": record.entity_type,
                    "file_paths": record.file_paths,
                })),
            });
            backlinks.push((id, backlink_record("entity_key", key.as_str(), &record.source_chunk_ids)));
        }
        self.storage.entity_vectors.upsert(documents).await?;
        self.storage.entity_chunks.upsert(backlinks).await?;
        tracing::debug!(count = merged.len(), "Indexed entities");
        Ok(())
    }

    async fn index_relations(&self, merged: &[(RelationKey, RelationRecord)]) -> Result<()> {
        if merged.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = merged.iter().map(|(_, r)| r.embedding_text()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let mut documents = Vec::with_capacity(merged.len());
        let mut backlinks = Vec::with_capacity(merged.len());
        for (((key, record), vector), content) in merged.iter().zip(vectors).zip(texts) {
            let id = relation_vector_id(key);
            let (low, high) = key.endpoints();
            documents.push(VectorDocument {
                id: id.clone(),
                vector,
                content,
                metadata: object(json!({
                    "source_key": low.as_str(),
                    "target_key": high.as_str(),
                    "source": record.source,
                    "target": record.target,
                    "keywords": record.keywords,
                })),
            });
            backlinks.push((id, backlink_record("relation_key", &key.to_string(), &record.source_chunk_ids)));
        }
        self.storage.relation_vectors.upsert(documents).await?;
        self.storage.relation_chunks.upsert(backlinks).await?;
        tracing::debug!(count = merged.len(), "Indexed relations");
        Ok(())
    }

    /// Strip `chunk_ids` from the provenance of the given records
    ///
    /// Records left without provenance are deleted with their vectors and
    /// backlinks. Others keep their descriptions and weight, and get their
    /// backlinks and file paths rewritten.
    pub async fn remove_document(
        &self,
        document_id: &str,
        chunk_ids: &BTreeSet<String>,
        entity_keys: &[EntityKey],
        relation_keys: &[RelationKey],
        cancel: &CancellationToken,
    ) -> Result<RemovalReport> {
        ensure_active(cancel, "delete")?;
        let mut report = RemovalReport::default();

        for key in relation_keys {
            ensure_active(cancel, "delete")?;
            let _guard = self.locks.lock(&format!("r:{key}")).await;
            let Some(mut record) = self.storage.graph.get_edge(key).await? else {
                continue;
            };
            let before = record.source_chunk_ids.len();
            record.source_chunk_ids.retain(|id| !chunk_ids.contains(id));
            if record.source_chunk_ids.len() == before {
                continue;
            }
            if record.source_chunk_ids.is_empty() {
                self.drop_relation(key).await?;
                report.relations_deleted += 1;
            } else {
                record.file_paths = self
                    .remaining_file_paths(&record.source_chunk_ids, &record.file_paths)
                    .await?;
                let id = relation_vector_id(key);
                self.storage
                    .relation_chunks
                    .upsert(vec![(
                        id,
                        backlink_record("relation_key", &key.to_string(), &record.source_chunk_ids),
                    )])
                    .await?;
                self.storage.graph.upsert_edge(key, record).await?;
                report.relations_updated += 1;
            }
        }

        for key in entity_keys {
            ensure_active(cancel, "delete")?;
            let _guard = self.locks.lock(&format!("e:{key}")).await;
            let Some(mut record) = self.storage.graph.get_node(key).await? else {
                continue;
            };
            let before = record.source_chunk_ids.len();
            record.source_chunk_ids.retain(|id| !chunk_ids.contains(id));
            if record.source_chunk_ids.len() == before {
                continue;
            }
            if record.source_chunk_ids.is_empty() {
                for edge in self.storage.graph.get_node_edges(key).await? {
                    self.drop_relation(&edge).await?;
                }
                self.storage.graph.delete_node(key).await?;
                let id = entity_vector_id(key);
                self.storage.entity_vectors.delete(&[id.clone()]).await?;
                self.storage.entity_chunks.delete(&[id]).await?;
                report.entities_deleted += 1;
            } else {
                record.file_paths = self
                    .remaining_file_paths(&record.source_chunk_ids, &record.file_paths)
                    .await?;
                self.storage
                    .entity_chunks
                    .upsert(vec![(
                        entity_vector_id(key),
                        backlink_record("entity_key", key.as_str(), &record.source_chunk_ids),
                    )])
                    .await?;
                self.storage.graph.upsert_node(key, record).await?;
                report.entities_updated += 1;
            }
        }

        tracing::info!(
            document_id,
            entities_deleted = report.entities_deleted,
            relations_deleted = report.relations_deleted,
            "Removed document from graph"
        );
        Ok(report)
    }

    async fn drop_relation(&self, key: &RelationKey) -> Result<()> {
        self.storage.graph.delete_edge(key).await?;
        let id = relation_vector_id(key);
        self.storage.relation_vectors.delete(&[id.clone()]).await?;
        self.storage.relation_chunks.delete(&[id]).await
    }

    /// File paths of the chunks still backing a record
    ///
    /// Falls back to `current` when none of the chunk records can be found.
    async fn remaining_file_paths(
        &self,
        chunk_ids: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let ids: Vec<String> = chunk_ids.iter().cloned().collect();
        let mut paths = BTreeSet::new();
        for record in self.storage.text_chunks.get_by_ids(&ids).await?.into_iter().flatten() {
            let chunk = Chunk::from_record(record)?;
            if !chunk.file_path.is_empty() {
                paths.insert(chunk.file_path);
            }
        }
        Ok(if paths.is_empty() { current.clone() } else { paths })
    }
}

fn object(value: serde_json::Value) -> KvRecord {
    match value {
        serde_json::Value::Object(map) => map,
        _ => KvRecord::new(),
    }
}

fn backlink_record(key_field: &str, key: &str, chunk_ids: &BTreeSet<String>) -> KvRecord {
    object(json!({
        key_field: key,
        "chunk_ids": chunk_ids,
        "count": chunk_ids.len(),
    }))
}

/// Chunk ids listed in a backlink record
pub fn backlink_chunk_ids(record: &KvRecord) -> Vec<String> {
    record
        .get("chunk_ids")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
