//! Retrieval context builder
//!
//! Builds a bounded [`QueryContext`] for one query:
//!
//! 1. Candidate retrieval per mode. Local search matches entities and expands
//!    one hop; global search matches relationships and pulls their endpoints;
//!    mix (and hybrid) runs both plus a direct chunk search concurrently.
//! 2. Candidates from different paths are merged by identity key, keeping
//!    the higher score. Chunks from backlinks and direct search are merged
//!    the same way.
//! 3. Entities and relationships are ranked by degree, score and recency.
//! 4. Relationships, entities and chunks are filled in that order, each
//!    against its own budget, then the total budget is enforced on the
//!    rendered text.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::async_processing::{ensure_active, EmbeddingGate};
use crate::core::{Chunk, EntityKey, EntityRecord, RelationKey, RelationRecord, Reranker, Result};
use crate::extraction::QueryKeywords;
use crate::graph::backlink_chunk_ids;
use crate::reranking::rerank_items;
use crate::retrieval::context::{
    ContextChunk, ContextEntity, ContextRelationship, QueryContext, TokenUsage, Truncation,
};
use crate::retrieval::ranking::{rank, take_within_budget};
use crate::retrieval::render::{
    assemble, build_references, render_chunk, render_entity, render_relationship,
    SOURCES_HEADER,
};
use crate::retrieval::QueryParam;
use crate::storage::StorageSet;
use crate::text::{entity_vector_id, relation_vector_id, Tokenizer};

#[derive(Debug, Clone)]
struct ScoredEntity {
    record: EntityRecord,
    score: f32,
}

#[derive(Debug, Clone)]
struct ScoredRelation {
    record: RelationRecord,
    score: f32,
}

/// Candidates gathered by one or more retrieval paths
#[derive(Debug, Default)]
struct Candidates {
    entities: IndexMap<EntityKey, ScoredEntity>,
    relations: IndexMap<RelationKey, ScoredRelation>,
    chunks: IndexMap<String, f32>,
}

impl Candidates {
    fn add_entity(&mut self, key: EntityKey, record: EntityRecord, score: f32) {
        match self.entities.get_mut(&key) {
            Some(existing) => existing.score = existing.score.max(score),
            None => {
                self.entities.insert(key, ScoredEntity { record, score });
            },
        }
    }

    fn add_relation(&mut self, key: RelationKey, record: RelationRecord, score: f32) {
        match self.relations.get_mut(&key) {
            Some(existing) => existing.score = existing.score.max(score),
            None => {
                self.relations.insert(key, ScoredRelation { record, score });
            },
        }
    }

    fn add_chunk(&mut self, id: String, score: f32) {
        let slot = self.chunks.entry(id).or_insert(score);
        *slot = slot.max(score);
    }

    fn absorb(&mut self, other: Candidates) {
        for (key, entity) in other.entities {
            self.add_entity(key, entity.record, entity.score);
        }
        for (key, relation) in other.relations {
            self.add_relation(key, relation.record, relation.score);
        }
        for (id, score) in other.chunks {
            self.add_chunk(id, score);
        }
    }

    fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.chunks.is_empty()
    }
}

/// Builds query contexts from the shared stores
pub struct ContextBuilder {
    storage: StorageSet,
    embeddings: Arc<EmbeddingGate>,
    reranker: Option<Arc<dyn Reranker>>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("storage", &self.storage)
            .field("reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    /// Create a builder; without a reranker, chunks keep similarity order
    pub fn new(
        storage: StorageSet,
        embeddings: Arc<EmbeddingGate>,
        reranker: Option<Arc<dyn Reranker>>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            storage,
            embeddings,
            reranker,
            tokenizer,
        }
    }

    /// Build the context for `query`
    ///
    /// Returns `Ok(None)` when no entity, relationship or chunk matches.
    pub async fn build(
        &self,
        query: &str,
        keywords: &QueryKeywords,
        param: &QueryParam,
        cancel: &CancellationToken,
    ) -> Result<Option<QueryContext>> {
        param.validate()?;
        ensure_active(cancel, "retrieval")?;
        let mode = param.mode;

        let local = async {
            if mode.uses_local() {
                self.local_candidates(query, keywords, param).await
            } else {
                Ok(Candidates::default())
            }
        };
        let global = async {
            if mode.uses_global() {
                self.global_candidates(query, keywords, param).await
            } else {
                Ok(Candidates::default())
            }
        };
        let direct = async {
            if mode.uses_chunk_search() {
                self.chunk_candidates(query, param).await
            } else {
                Ok(Candidates::default())
            }
        };
        let (local, global, direct) = tokio::try_join!(local, global, direct)?;

        let mut candidates = local;
        candidates.absorb(global);
        candidates.absorb(direct);
        tracing::debug!(
            %mode,
            entities = candidates.entities.len(),
            relations = candidates.relations.len(),
            chunks = candidates.chunks.len(),
            "Retrieved candidates"
        );
        if candidates.is_empty() {
            tracing::info!(%mode, "No context matched the query");
            return Ok(None);
        }
        ensure_active(cancel, "retrieval")?;

        let (entities, relationships) = self.ranked_graph_items(&candidates).await?;
        let chunks = self.final_chunks(query, &candidates, param, cancel).await?;
        if entities.is_empty() && relationships.is_empty() && chunks.is_empty() {
            tracing::info!(%mode, "Matched records had no retrievable content");
            return Ok(None);
        }

        let tokenizer = self.tokenizer.as_ref();
        let relationships = take_within_budget(
            relationships,
            param.max_relation_tokens,
            tokenizer,
            render_relationship,
        );
        let entities = take_within_budget(entities, param.max_entity_tokens, tokenizer, render_entity);

        let graph_text = assemble(&relationships.lines, &entities.lines, &[]);
        let separator = if graph_text.is_empty() { 0 } else { 1 };
        let used = tokenizer.count_tokens(&graph_text)
            + tokenizer.count_tokens(SOURCES_HEADER)
            + separator;
        let chunks = take_within_budget(
            chunks,
            param.max_total_tokens.saturating_sub(used),
            tokenizer,
            render_chunk,
        );

        let mut truncation = Truncation {
            entities: entities.truncated,
            relationships: relationships.truncated,
            chunks: chunks.truncated,
        };
        let (mut relationships, mut entities, mut chunks) = (relationships, entities, chunks);

        let mut context_text = assemble(&relationships.lines, &entities.lines, &chunks.lines);
        while tokenizer.count_tokens(&context_text) > param.max_total_tokens {
            if chunks.items.pop().is_some() {
                chunks.lines.pop();
                truncation.chunks = true;
            } else if entities.items.pop().is_some() {
                entities.lines.pop();
                truncation.entities = true;
            } else if relationships.items.pop().is_some() {
                relationships.lines.pop();
                truncation.relationships = true;
            } else {
                break;
            }
            context_text = assemble(&relationships.lines, &entities.lines, &chunks.lines);
        }

        let token_usage = TokenUsage {
            relationships: count_lines(tokenizer, &relationships.lines),
            entities: count_lines(tokenizer, &entities.lines),
            chunks: count_lines(tokenizer, &chunks.lines),
            total: tokenizer.count_tokens(&context_text),
        };
        let references = build_references(&chunks.items);

        tracing::info!(
            %mode,
            entities = entities.items.len(),
            relationships = relationships.items.len(),
            chunks = chunks.items.len(),
            tokens = token_usage.total,
            truncated = truncation.any(),
            "Built query context"
        );
        Ok(Some(QueryContext {
            context_text,
            mode,
            entities: entities.items,
            relationships: relationships.items,
            chunks: chunks.items,
            truncation,
            references,
            token_usage,
        }))
    }

    /// Entities matching the low-level keywords, expanded one hop
    async fn local_candidates(
        &self,
        query: &str,
        keywords: &QueryKeywords,
        param: &QueryParam,
    ) -> Result<Candidates> {
        let search_text = search_text(&keywords.low_level, query);
        let vector = self.embeddings.embed(&search_text).await?;
        let matches = self
            .storage
            .entity_vectors
            .query(&vector, param.top_k, param.cosine_threshold)
            .await?;

        let mut scores: IndexMap<EntityKey, f32> = IndexMap::new();
        for hit in matches {
            if let Some(key) = hit.metadata.get("entity_key").and_then(|v| v.as_str()) {
                let slot = scores.entry(EntityKey(key.to_string())).or_insert(hit.score);
                *slot = slot.max(hit.score);
            }
        }
        let mut candidates = Candidates::default();
        if scores.is_empty() {
            return Ok(candidates);
        }

        let keys: Vec<EntityKey> = scores.keys().cloned().collect();
        let mut nodes = self.storage.graph.get_nodes_batch(&keys).await?;
        let mut edge_scores: IndexMap<RelationKey, f32> = IndexMap::new();
        for key in &keys {
            let Some(record) = nodes.remove(key) else {
                tracing::debug!(entity = %key, "Entity vector without graph node");
                continue;
            };
            let score = scores[key];
            for edge in self.storage.graph.get_node_edges(key).await? {
                let slot = edge_scores.entry(edge).or_insert(score);
                *slot = slot.max(score);
            }
            candidates.add_entity(key.clone(), record, score);
        }

        self.add_relations_with_endpoints(&mut candidates, edge_scores)
            .await?;
        self.add_backlinked_chunks(&mut candidates).await?;
        Ok(candidates)
    }

    /// Relationships matching the high-level keywords, with their endpoints
    async fn global_candidates(
        &self,
        query: &str,
        keywords: &QueryKeywords,
        param: &QueryParam,
    ) -> Result<Candidates> {
        let search_text = search_text(&keywords.high_level, query);
        let vector = self.embeddings.embed(&search_text).await?;
        let matches = self
            .storage
            .relation_vectors
            .query(&vector, param.top_k, param.cosine_threshold)
            .await?;

        let mut edge_scores: IndexMap<RelationKey, f32> = IndexMap::new();
        for hit in matches {
            let source = hit.metadata.get("source_key").and_then(|v| v.as_str());
            let target = hit.metadata.get("target_key").and_then(|v| v.as_str());
            if let (Some(source), Some(target)) = (source, target) {
                let key = RelationKey::new(EntityKey(source.to_string()), EntityKey(target.to_string()));
                let slot = edge_scores.entry(key).or_insert(hit.score);
                *slot = slot.max(hit.score);
            }
        }

        let mut candidates = Candidates::default();
        self.add_relations_with_endpoints(&mut candidates, edge_scores)
            .await?;
        self.add_backlinked_chunks(&mut candidates).await?;
        Ok(candidates)
    }

    /// Direct similarity search over chunk vectors
    async fn chunk_candidates(&self, query: &str, param: &QueryParam) -> Result<Candidates> {
        let vector = self.embeddings.embed(query).await?;
        let matches = self
            .storage
            .chunk_vectors
            .query(&vector, param.pre_rerank_limit(), param.cosine_threshold)
            .await?;
        let mut candidates = Candidates::default();
        for hit in matches {
            candidates.add_chunk(hit.id, hit.score);
        }
        Ok(candidates)
    }

    /// Fetch the scored edges and their endpoint nodes; endpoints inherit the edge score
    async fn add_relations_with_endpoints(
        &self,
        candidates: &mut Candidates,
        edge_scores: IndexMap<RelationKey, f32>,
    ) -> Result<()> {
        if edge_scores.is_empty() {
            return Ok(());
        }
        let keys: Vec<RelationKey> = edge_scores.keys().cloned().collect();
        let mut edges = self.storage.graph.get_edges_batch(&keys).await?;

        let mut endpoint_scores: IndexMap<EntityKey, f32> = IndexMap::new();
        for (key, score) in edge_scores {
            let Some(record) = edges.remove(&key) else {
                tracing::debug!(relation = %key, "Relation vector without graph edge");
                continue;
            };
            let (low, high) = key.endpoints();
            for endpoint in [low, high] {
                let slot = endpoint_scores.entry(endpoint.clone()).or_insert(score);
                *slot = slot.max(score);
            }
            candidates.add_relation(key, record, score);
        }

        let missing: Vec<EntityKey> = endpoint_scores
            .keys()
            .filter(|k| !candidates.entities.contains_key(*k))
            .cloned()
            .collect();
        let mut nodes = self.storage.graph.get_nodes_batch(&missing).await?;
        for (key, score) in endpoint_scores {
            if let Some(record) = nodes.remove(&key) {
                candidates.add_entity(key, record, score);
            } else if let Some(existing) = candidates.entities.get_mut(&key) {
                existing.score = existing.score.max(score);
            }
        }
        Ok(())
    }

    /// Pull chunk ids from the backlinks of every entity and relationship candidate
    async fn add_backlinked_chunks(&self, candidates: &mut Candidates) -> Result<()> {
        let entity_ids: Vec<String> = candidates.entities.keys().map(entity_vector_id).collect();
        let entity_scores: Vec<f32> = candidates.entities.values().map(|e| e.score).collect();
        let relation_ids: Vec<String> = candidates.relations.keys().map(relation_vector_id).collect();
        let relation_scores: Vec<f32> = candidates.relations.values().map(|r| r.score).collect();

        let (entity_links, relation_links) = tokio::try_join!(
            self.storage.entity_chunks.get_by_ids(&entity_ids),
            self.storage.relation_chunks.get_by_ids(&relation_ids),
        )?;

        for (record, score) in entity_links
            .into_iter()
            .zip(entity_scores)
            .chain(relation_links.into_iter().zip(relation_scores))
        {
            if let Some(record) = record {
                for chunk_id in backlink_chunk_ids(&record) {
                    candidates.add_chunk(chunk_id, score);
                }
            }
        }
        Ok(())
    }

    /// Ranked context views of the entity and relationship candidates
    async fn ranked_graph_items(
        &self,
        candidates: &Candidates,
    ) -> Result<(Vec<ContextEntity>, Vec<ContextRelationship>)> {
        let entity_keys: Vec<EntityKey> = candidates.entities.keys().cloned().collect();
        let relation_keys: Vec<RelationKey> = candidates.relations.keys().cloned().collect();
        let (node_degrees, edge_degrees) = tokio::try_join!(
            self.storage.graph.node_degrees_batch(&entity_keys),
            self.storage.graph.edge_degrees_batch(&relation_keys),
        )?;

        let mut entities: Vec<ContextEntity> = candidates
            .entities
            .iter()
            .map(|(key, scored)| ContextEntity {
                key: key.to_string(),
                name: scored.record.name.clone(),
                entity_type: scored.record.entity_type.clone(),
                description: scored.record.description(),
                degree: node_degrees.get(key).copied().unwrap_or(0),
                score: scored.score,
                file_paths: scored.record.file_paths.iter().cloned().collect(),
                timestamp: scored.record.timestamp,
            })
            .collect();
        let mut relationships: Vec<ContextRelationship> = candidates
            .relations
            .iter()
            .map(|(key, scored)| ContextRelationship {
                key: key.to_string(),
                source: scored.record.source.clone(),
                target: scored.record.target.clone(),
                keywords: scored.record.keyword_text(),
                description: scored.record.description(),
                weight: scored.record.weight,
                degree: edge_degrees.get(key).copied().unwrap_or(0),
                score: scored.score,
                file_paths: scored.record.file_paths.iter().cloned().collect(),
                timestamp: scored.record.timestamp,
            })
            .collect();

        rank(&mut entities);
        rank(&mut relationships);
        Ok((entities, relationships))
    }

    /// Deduplicated, materialized and optionally reranked chunks
    async fn final_chunks(
        &self,
        query: &str,
        candidates: &Candidates,
        param: &QueryParam,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContextChunk>> {
        let mut scored: Vec<(&String, f32)> = candidates.chunks.iter().map(|(id, s)| (id, *s)).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(param.pre_rerank_limit());
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = scored.iter().map(|(id, _)| (*id).clone()).collect();
        let scores: HashMap<&str, f32> = scored.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let records = self.storage.text_chunks.get_by_ids(&ids).await?;

        let mut chunks = Vec::with_capacity(ids.len());
        for (id, record) in ids.iter().zip(records) {
            let Some(record) = record else {
                tracing::debug!(chunk_id = %id, "Chunk record missing");
                continue;
            };
            let chunk = Chunk::from_record(record)?;
            if chunk.content.trim().is_empty() {
                continue;
            }
            chunks.push(ContextChunk {
                score: scores.get(id.as_str()).copied().unwrap_or(0.0),
                id: chunk.id,
                content: chunk.content,
                full_doc_id: chunk.full_doc_id,
                file_path: chunk.file_path,
                rerank_score: None,
            });
        }

        ensure_active(cancel, "rerank")?;
        match (&self.reranker, param.enable_rerank) {
            (Some(reranker), true) if !chunks.is_empty() => {
                let fallback = chunks.clone();
                match rerank_items(
                    reranker.as_ref(),
                    query,
                    chunks,
                    param.chunk_top_k,
                    |c| c.content.clone(),
                    |c| c.score,
                )
                .await
                {
                    Ok(ranked) => Ok(ranked
                        .into_iter()
                        .map(|r| ContextChunk {
                            rerank_score: Some(r.relevance_score),
                            ..r.item
                        })
                        .collect()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Rerank failed, keeping similarity order");
                        let mut chunks = fallback;
                        chunks.truncate(param.chunk_top_k);
                        Ok(chunks)
                    },
                }
            },
            _ => {
                chunks.truncate(param.chunk_top_k);
                Ok(chunks)
            },
        }
    }
}

/// Keywords joined for embedding, or the raw query when there are none
fn search_text(keywords: &[String], query: &str) -> String {
    if keywords.is_empty() {
        query.to_string()
    } else {
        keywords.join(", ")
    }
}

fn count_lines(tokenizer: &dyn Tokenizer, lines: &[String]) -> usize {
    lines.iter().map(|line| tokenizer.count_tokens(line)).sum()
}
