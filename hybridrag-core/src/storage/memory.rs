//! In-memory store implementations.
//!
//! The graph store keeps an undirected `petgraph` stable graph behind a
//! `parking_lot` lock; key-value namespaces use `DashMap`; vector
//! collections keep insertion order in an `IndexMap` and score by cosine
//! similarity. Each store counts its persistence callbacks so callers can
//! observe flushes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use crate::core::{
    to_kv_record, EntityKey, EntityRecord, GraphEdge, GraphNode, GraphStore, KnowledgeGraph,
    KvRecord, KvStore, RelationKey, RelationRecord, Result, VectorDocument, VectorMatch,
    VectorStore,
};
use crate::storage_error;

// ============================================================================
// Graph store
// ============================================================================

#[derive(Default)]
struct GraphState {
    graph: StableUnGraph<EntityRecord, RelationRecord>,
    index: HashMap<EntityKey, NodeIndex>,
}

impl GraphState {
    fn degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges(idx).count()
    }

    fn edge_index(&self, key: &RelationKey) -> Option<petgraph::stable_graph::EdgeIndex> {
        let (a, b) = key.endpoints();
        let a = *self.index.get(a)?;
        let b = *self.index.get(b)?;
        self.graph.find_edge(a, b)
    }

    fn node_view(&self, idx: NodeIndex) -> Result<GraphNode> {
        let record = &self.graph[idx];
        Ok(GraphNode {
            id: record.key().0,
            labels: vec![record.name.clone(), record.entity_type.clone()],
            properties: to_kv_record(record)?,
        })
    }

    fn edge_view(&self, record: &RelationRecord) -> Result<GraphEdge> {
        let key = record.key();
        let (source, target) = key.endpoints();
        Ok(GraphEdge {
            id: key.to_string(),
            edge_type: "related_to".to_string(),
            source: source.0.clone(),
            target: target.0.clone(),
            properties: to_kv_record(record)?,
        })
    }

    fn subgraph(&self, nodes: &[NodeIndex], is_truncated: bool) -> Result<KnowledgeGraph> {
        let included: HashSet<NodeIndex> = nodes.iter().copied().collect();
        let mut view = KnowledgeGraph {
            nodes: Vec::with_capacity(nodes.len()),
            edges: Vec::new(),
            is_truncated,
        };
        for &idx in nodes {
            view.nodes.push(self.node_view(idx)?);
        }
        for edge in self.graph.edge_references() {
            if included.contains(&edge.source()) && included.contains(&edge.target()) {
                view.edges.push(self.edge_view(edge.weight())?);
            }
        }
        Ok(view)
    }

    fn by_degree(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        nodes.sort_by(|a, b| {
            self.degree(*b)
                .cmp(&self.degree(*a))
                .then_with(|| self.graph[*a].name.cmp(&self.graph[*b].name))
        });
        nodes
    }
}

/// Undirected property graph in memory
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
    flushes: AtomicUsize,
}

impl MemoryGraphStore {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.state.read().graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.state.read().graph.edge_count()
    }

    /// Number of persistence callbacks received
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn has_node(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.state.read().index.contains_key(key))
    }

    async fn has_edge(&self, key: &RelationKey) -> Result<bool> {
        Ok(self.state.read().edge_index(key).is_some())
    }

    async fn get_node(&self, key: &EntityKey) -> Result<Option<EntityRecord>> {
        let state = self.state.read();
        Ok(state.index.get(key).map(|idx| state.graph[*idx].clone()))
    }

    async fn upsert_node(&self, key: &EntityKey, record: EntityRecord) -> Result<()> {
        let mut state = self.state.write();
        match state.index.get(key).copied() {
            Some(idx) => state.graph[idx] = record,
            None => {
                let idx = state.graph.add_node(record);
                state.index.insert(key.clone(), idx);
            },
        }
        Ok(())
    }

    async fn delete_node(&self, key: &EntityKey) -> Result<()> {
        let mut state = self.state.write();
        if let Some(idx) = state.index.remove(key) {
            state.graph.remove_node(idx);
        }
        Ok(())
    }

    async fn get_edge(&self, key: &RelationKey) -> Result<Option<RelationRecord>> {
        let state = self.state.read();
        Ok(state.edge_index(key).map(|edge| state.graph[edge].clone()))
    }

    async fn upsert_edge(&self, key: &RelationKey, record: RelationRecord) -> Result<()> {
        let mut state = self.state.write();
        if let Some(edge) = state.edge_index(key) {
            state.graph[edge] = record;
            return Ok(());
        }
        let (a, b) = key.endpoints();
        let (Some(a_idx), Some(b_idx)) = (state.index.get(a).copied(), state.index.get(b).copied())
        else {
            return Err(storage_error!("cannot add edge {key}: endpoint node missing"));
        };
        state.graph.add_edge(a_idx, b_idx, record);
        Ok(())
    }

    async fn delete_edge(&self, key: &RelationKey) -> Result<()> {
        let mut state = self.state.write();
        if let Some(edge) = state.edge_index(key) {
            state.graph.remove_edge(edge);
        }
        Ok(())
    }

    async fn node_degree(&self, key: &EntityKey) -> Result<usize> {
        let state = self.state.read();
        Ok(state.index.get(key).map_or(0, |idx| state.degree(*idx)))
    }

    async fn get_node_edges(&self, key: &EntityKey) -> Result<Vec<RelationKey>> {
        let state = self.state.read();
        let Some(idx) = state.index.get(key) else {
            return Ok(Vec::new());
        };
        Ok(state
            .graph
            .edges(*idx)
            .map(|edge| edge.weight().key())
            .collect())
    }

    async fn get_knowledge_graph(
        &self,
        label: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<KnowledgeGraph> {
        let state = self.state.read();

        if label == "*" {
            let ranked = state.by_degree();
            let is_truncated = ranked.len() > max_nodes;
            let selected: Vec<NodeIndex> = ranked.into_iter().take(max_nodes).collect();
            return state.subgraph(&selected, is_truncated);
        }

        let Some(&start) = state.index.get(&EntityKey::from_name(label)) else {
            return Ok(KnowledgeGraph::default());
        };

        let mut visited = HashSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut is_truncated = false;

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for neighbor in state.graph.neighbors(node) {
                if visited.contains(&neighbor) {
                    continue;
                }
                if order.len() >= max_nodes {
                    is_truncated = true;
                    break;
                }
                visited.insert(neighbor);
                order.push(neighbor);
                queue.push_back((neighbor, depth + 1));
            }
        }

        state.subgraph(&order, is_truncated)
    }

    async fn all_labels(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut labels: Vec<String> = state
            .graph
            .node_indices()
            .map(|idx| state.graph[idx].name.clone())
            .collect();
        labels.sort();
        Ok(labels)
    }

    async fn popular_labels(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .by_degree()
            .into_iter()
            .take(limit)
            .map(|idx| state.graph[idx].name.clone())
            .collect())
    }

    async fn index_done(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        let mut state = self.state.write();
        state.graph.clear();
        state.index.clear();
        Ok(())
    }
}

// ============================================================================
// Vector store
// ============================================================================

/// Cosine similarity of two equal-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// One named vector collection in memory
pub struct MemoryVectorStore {
    namespace: String,
    records: RwLock<IndexMap<String, VectorDocument>>,
    flushes: AtomicUsize,
}

impl MemoryVectorStore {
    /// Create an empty collection
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: RwLock::new(IndexMap::new()),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of persistence callbacks received
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn upsert(&self, documents: Vec<VectorDocument>) -> Result<()> {
        let mut records = self.records.write();
        for document in documents {
            records.insert(document.id.clone(), document);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let records = self.records.read();
        let mut matches = Vec::new();
        for record in records.values() {
            if record.vector.len() != vector.len() {
                return Err(storage_error!(
                    "{}: vector dimension {} does not match query dimension {}",
                    self.namespace,
                    record.vector.len(),
                    vector.len()
                ));
            }
            let score = cosine_similarity(&record.vector, vector);
            if score >= threshold {
                matches.push(VectorMatch {
                    id: record.id.clone(),
                    score,
                    content: record.content.clone(),
                    metadata: record.metadata.clone(),
                });
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<VectorDocument>> {
        let records = self.records.read();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut records = self.records.write();
        for id in ids {
            records.shift_remove(id);
        }
        Ok(())
    }

    async fn index_done(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}

// ============================================================================
// Key-value store
// ============================================================================

/// One key-value namespace in memory
pub struct MemoryKvStore {
    namespace: String,
    records: DashMap<String, KvRecord>,
    flushes: AtomicUsize,
}

impl MemoryKvStore {
    /// Create an empty namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            records: DashMap::new(),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of persistence callbacks received
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<KvRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn filter_keys(&self, keys: &[String]) -> Result<Vec<String>> {
        Ok(keys
            .iter()
            .filter(|key| !self.records.contains_key(key.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert(&self, records: Vec<(String, KvRecord)>) -> Result<()> {
        for (id, record) in records {
            self.records.insert(id, record);
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.records.remove(id);
        }
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.records.is_empty())
    }

    async fn index_done(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}
