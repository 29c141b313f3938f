//! In-memory Graph Store
//!
//! Keyed maps behind `tokio::sync::RwLock`. Adjacency lists keep edges in
//! insertion order so traversals are deterministic. Used when no
//! `DATABASE_URL` is configured, and as the store in tests.

use crate::discovery::DiscoveryRule;
use crate::error::{not_found_error, LineageError, LineageResult};
use crate::models::{
    CandidateStatus, DiscoveredEdge, Edge, EdgeKey, ImpactAnalysis, NewCandidate, NewEdge,
    NewNode, NewTransformation, Node, NodeKey, Transformation, TransformationSide,
};
use crate::store::{AnalysisLog, DiscoveryStore, GraphStore, TransformationLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct GraphState {
    nodes: HashMap<Uuid, Node>,
    node_index: HashMap<NodeKey, Uuid>,
    node_order: Vec<Uuid>,
    edges: HashMap<Uuid, Edge>,
    edge_index: HashMap<EdgeKey, Uuid>,
    edge_order: Vec<Uuid>,
    /// Node ID -> outgoing edge IDs
    outgoing: HashMap<Uuid, Vec<Uuid>>,
    /// Node ID -> incoming edge IDs
    incoming: HashMap<Uuid, Vec<Uuid>>,
}

impl GraphState {
    fn insert_node(&mut self, node: NewNode) -> Node {
        let now = Utc::now();
        let stored = Node {
            id: Uuid::new_v4(),
            key: node.key,
            node_type: node.node_type,
            display_name: node.display_name,
            metadata: node.metadata,
            created_at: now,
            updated_at: now,
        };
        self.node_index.insert(stored.key.clone(), stored.id);
        self.node_order.push(stored.id);
        self.nodes.insert(stored.id, stored.clone());
        debug!("Created node {} ({})", stored.key, stored.id);
        stored
    }

    fn collect_edges(&self, ids: Option<&Vec<Uuid>>) -> Vec<Edge> {
        ids.map(|ids| ids.iter().filter_map(|id| self.edges.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct DiscoveryState {
    rules: HashMap<Uuid, DiscoveryRule>,
    rule_order: Vec<Uuid>,
    candidates: HashMap<Uuid, DiscoveredEdge>,
    /// (rule, edge key) -> candidate ID
    candidate_index: HashMap<(Uuid, EdgeKey), Uuid>,
    candidate_order: Vec<Uuid>,
}

/// Thread-safe in-memory lineage store
pub struct MemoryStore {
    graph: RwLock<GraphState>,
    discovery: RwLock<DiscoveryState>,
    analyses: RwLock<Vec<ImpactAnalysis>>,
    transformations: RwLock<Vec<Transformation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(GraphState::default()),
            discovery: RwLock::new(DiscoveryState::default()),
            analyses: RwLock::new(Vec::new()),
            transformations: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored nodes and canonical edges
    pub async fn counts(&self) -> (usize, usize) {
        let graph = self.graph.read().await;
        (graph.nodes.len(), graph.edges.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn upsert_node(&self, node: NewNode) -> LineageResult<Node> {
        let mut graph = self.graph.write().await;
        let now = Utc::now();

        if let Some(id) = graph.node_index.get(&node.key).copied() {
            let existing = graph
                .nodes
                .get_mut(&id)
                .ok_or_else(|| LineageError::Internal(format!("node index points at missing node {}", id)))?;
            existing.node_type = node.node_type;
            existing.display_name = node.display_name;
            existing.metadata = node.metadata;
            existing.updated_at = now;
            debug!("Updated node {} ({})", existing.key, id);
            return Ok(existing.clone());
        }

        Ok(graph.insert_node(node))
    }

    async fn ensure_node(&self, node: NewNode) -> LineageResult<Node> {
        let mut graph = self.graph.write().await;
        if let Some(existing) = graph.node_index.get(&node.key).and_then(|id| graph.nodes.get(id)) {
            return Ok(existing.clone());
        }
        Ok(graph.insert_node(node))
    }

    async fn upsert_edge(&self, edge: NewEdge) -> LineageResult<Edge> {
        let mut graph = self.graph.write().await;
        for endpoint in [edge.source_node_id, edge.target_node_id] {
            if !graph.nodes.contains_key(&endpoint) {
                return Err(LineageError::NodeNotFound(endpoint.to_string()));
            }
        }

        let key = edge.key();
        let now = Utc::now();

        if let Some(id) = graph.edge_index.get(&key).copied() {
            let existing = graph
                .edges
                .get_mut(&id)
                .ok_or_else(|| LineageError::Internal(format!("edge index points at missing edge {}", id)))?;
            existing.transformation = edge.transformation;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let stored = Edge {
            id: Uuid::new_v4(),
            source_node_id: edge.source_node_id,
            target_node_id: edge.target_node_id,
            edge_type: edge.edge_type,
            transformation: edge.transformation,
            created_at: now,
            updated_at: now,
        };
        graph.edge_index.insert(key, stored.id);
        graph.edge_order.push(stored.id);
        graph.outgoing.entry(stored.source_node_id).or_default().push(stored.id);
        graph.incoming.entry(stored.target_node_id).or_default().push(stored.id);
        graph.edges.insert(stored.id, stored.clone());
        debug!(
            "Created edge {} -[{}]-> {}",
            stored.source_node_id, stored.edge_type, stored.target_node_id
        );
        Ok(stored)
    }

    async fn get_node(&self, key: &NodeKey) -> LineageResult<Option<Node>> {
        let graph = self.graph.read().await;
        Ok(graph
            .node_index
            .get(key)
            .and_then(|id| graph.nodes.get(id))
            .cloned())
    }

    async fn get_node_by_id(&self, id: Uuid) -> LineageResult<Option<Node>> {
        let graph = self.graph.read().await;
        Ok(graph.nodes.get(&id).cloned())
    }

    async fn edges_from(&self, node_id: Uuid) -> LineageResult<Vec<Edge>> {
        let graph = self.graph.read().await;
        Ok(graph.collect_edges(graph.outgoing.get(&node_id)))
    }

    async fn edges_to(&self, node_id: Uuid) -> LineageResult<Vec<Edge>> {
        let graph = self.graph.read().await;
        Ok(graph.collect_edges(graph.incoming.get(&node_id)))
    }

    async fn all_nodes(&self) -> LineageResult<Vec<Node>> {
        let graph = self.graph.read().await;
        Ok(graph
            .node_order
            .iter()
            .filter_map(|id| graph.nodes.get(id).cloned())
            .collect())
    }

    async fn all_edges(&self) -> LineageResult<Vec<Edge>> {
        let graph = self.graph.read().await;
        Ok(graph.collect_edges(Some(&graph.edge_order)))
    }

    async fn cross_system_edges(&self, system: &str) -> LineageResult<Vec<Edge>> {
        let graph = self.graph.read().await;
        let system_of = |id: &Uuid| graph.nodes.get(id).map(|n| n.key.system.as_str());
        Ok(graph
            .edge_order
            .iter()
            .rev()
            .filter_map(|id| graph.edges.get(id))
            .filter(|edge| {
                match (system_of(&edge.source_node_id), system_of(&edge.target_node_id)) {
                    (Some(source), Some(target)) => {
                        source != target && (source == system || target == system)
                    }
                    _ => false,
                }
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DiscoveryStore for MemoryStore {
    async fn save_rule(&self, rule: DiscoveryRule) -> LineageResult<DiscoveryRule> {
        let mut discovery = self.discovery.write().await;
        if !discovery.rules.contains_key(&rule.id) {
            discovery.rule_order.push(rule.id);
        }
        discovery.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, id: Uuid) -> LineageResult<Option<DiscoveryRule>> {
        let discovery = self.discovery.read().await;
        Ok(discovery.rules.get(&id).cloned())
    }

    async fn list_rules(&self) -> LineageResult<Vec<DiscoveryRule>> {
        let discovery = self.discovery.read().await;
        Ok(discovery
            .rule_order
            .iter()
            .filter_map(|id| discovery.rules.get(id).cloned())
            .collect())
    }

    async fn mark_rule_run(&self, id: Uuid, at: DateTime<Utc>) -> LineageResult<()> {
        let mut discovery = self.discovery.write().await;
        let rule = discovery
            .rules
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Discovery rule {} not found", id)))?;
        rule.last_run_at = Some(at);
        rule.updated_at = at;
        Ok(())
    }

    async fn upsert_candidate(&self, candidate: NewCandidate) -> LineageResult<DiscoveredEdge> {
        let (source_key, target_key) = {
            let graph = self.graph.read().await;
            let lookup = |id: Uuid| {
                graph
                    .nodes
                    .get(&id)
                    .map(|n| n.key.clone())
                    .ok_or_else(|| LineageError::NodeNotFound(id.to_string()))
            };
            (lookup(candidate.source_node_id)?, lookup(candidate.target_node_id)?)
        };

        let mut discovery = self.discovery.write().await;
        let index_key = (
            candidate.rule_id,
            EdgeKey {
                source_node_id: candidate.source_node_id,
                target_node_id: candidate.target_node_id,
                edge_type: candidate.edge_type.clone(),
            },
        );
        let now = Utc::now();

        if let Some(id) = discovery.candidate_index.get(&index_key).copied() {
            let existing = discovery
                .candidates
                .get_mut(&id)
                .ok_or_else(|| LineageError::Internal(format!("candidate index points at missing candidate {}", id)))?;
            existing.confidence = candidate.confidence;
            existing.evidence = candidate.evidence;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let stored = DiscoveredEdge {
            id: Uuid::new_v4(),
            rule_id: candidate.rule_id,
            source_node_id: candidate.source_node_id,
            target_node_id: candidate.target_node_id,
            source_key,
            target_key,
            edge_type: candidate.edge_type,
            confidence: candidate.confidence,
            evidence: candidate.evidence,
            status: CandidateStatus::Candidate,
            created_at: now,
            updated_at: now,
            verified_at: None,
        };
        discovery.candidate_index.insert(index_key, stored.id);
        discovery.candidate_order.push(stored.id);
        discovery.candidates.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_candidate(&self, id: Uuid) -> LineageResult<Option<DiscoveredEdge>> {
        let discovery = self.discovery.read().await;
        Ok(discovery.candidates.get(&id).cloned())
    }

    async fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> LineageResult<Vec<DiscoveredEdge>> {
        let discovery = self.discovery.read().await;
        Ok(discovery
            .candidate_order
            .iter()
            .filter_map(|id| discovery.candidates.get(id))
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn mark_candidate_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> LineageResult<DiscoveredEdge> {
        let mut discovery = self.discovery.write().await;
        let candidate = discovery
            .candidates
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Discovered edge {} not found", id)))?;
        if candidate.status != CandidateStatus::Verified {
            candidate.status = CandidateStatus::Verified;
            candidate.verified_at = Some(at);
            candidate.updated_at = at;
        }
        Ok(candidate.clone())
    }
}

#[async_trait]
impl AnalysisLog for MemoryStore {
    async fn record_analysis(&self, analysis: &ImpactAnalysis) -> LineageResult<()> {
        let mut analyses = self.analyses.write().await;
        analyses.push(analysis.clone());
        Ok(())
    }

    async fn impact_history(
        &self,
        key: &NodeKey,
        limit: usize,
    ) -> LineageResult<Vec<ImpactAnalysis>> {
        let analyses = self.analyses.read().await;
        Ok(analyses
            .iter()
            .rev()
            .filter(|a| &a.resource_key == key)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransformationLog for MemoryStore {
    async fn capture_transformation(
        &self,
        transformation: NewTransformation,
    ) -> LineageResult<Transformation> {
        let stored = Transformation {
            id: Uuid::new_v4(),
            source_node_id: transformation.source_node_id,
            target_node_id: transformation.target_node_id,
            transformation_type: transformation.transformation_type,
            logic: transformation.logic,
            language: transformation.language,
            source_system: transformation.source_system,
            metadata: transformation.metadata,
            captured_at: Utc::now(),
        };
        self.transformations.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn latest_transformation(
        &self,
        source_node_id: Uuid,
        target_node_id: Uuid,
    ) -> LineageResult<Option<Transformation>> {
        let transformations = self.transformations.read().await;
        Ok(transformations
            .iter()
            .rev()
            .find(|t| t.source_node_id == source_node_id && t.target_node_id == target_node_id)
            .cloned())
    }

    async fn list_transformations(
        &self,
        node_id: Uuid,
        side: TransformationSide,
    ) -> LineageResult<Vec<Transformation>> {
        let transformations = self.transformations.read().await;
        Ok(transformations
            .iter()
            .rev()
            .filter(|t| match side {
                TransformationSide::Source => t.source_node_id == node_id,
                TransformationSide::Target => t.target_node_id == node_id,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(system: &str, name: &str) -> NewNode {
        NewNode::from_key(NodeKey::table(system, name).unwrap())
    }

    #[tokio::test]
    async fn test_node_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.upsert_node(table("warehouse", "orders")).await.unwrap();

        let mut again = table("warehouse", "orders");
        again.display_name = "Orders".to_string();
        let second = store.upsert_node(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name, "Orders");
        assert_eq!(store.counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_ensure_node_keeps_existing_attributes() {
        let store = MemoryStore::new();
        let mut curated = table("warehouse", "orders");
        curated.display_name = "Orders".to_string();
        let first = store.upsert_node(curated).await.unwrap();

        let ensured = store.ensure_node(table("warehouse", "orders")).await.unwrap();
        assert_eq!(ensured.id, first.id);
        assert_eq!(ensured.display_name, "Orders");

        let created = store.ensure_node(table("warehouse", "refunds")).await.unwrap();
        assert_eq!(created.display_name, "refunds");
        assert_eq!(store.counts().await, (2, 0));
    }

    #[tokio::test]
    async fn test_edge_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.upsert_node(table("warehouse", "a")).await.unwrap();
        let b = store.upsert_node(table("warehouse", "b")).await.unwrap();

        let edge = |payload| NewEdge {
            source_node_id: a.id,
            target_node_id: b.id,
            edge_type: "transform".to_string(),
            transformation: payload,
        };
        let first = store.upsert_edge(edge(json!({"sql": "v1"}))).await.unwrap();
        let second = store.upsert_edge(edge(json!({"sql": "v2"}))).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.transformation, json!({"sql": "v2"}));
        assert_eq!(store.edges_from(a.id).await.unwrap().len(), 1);
        assert_eq!(store.edges_to(b.id).await.unwrap().len(), 1);
        assert_eq!(store.counts().await, (2, 1));
    }

    #[tokio::test]
    async fn test_edge_requires_existing_endpoints() {
        let store = MemoryStore::new();
        let a = store.upsert_node(table("warehouse", "a")).await.unwrap();
        let result = store
            .upsert_edge(NewEdge {
                source_node_id: a.id,
                target_node_id: Uuid::new_v4(),
                edge_type: "sync".to_string(),
                transformation: json!(null),
            })
            .await;
        assert!(matches!(result, Err(LineageError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_verified_candidate_survives_refresh() {
        let store = MemoryStore::new();
        let a = store.upsert_node(table("warehouse", "a")).await.unwrap();
        let b = store.upsert_node(table("warehouse", "b")).await.unwrap();
        let rule_id = Uuid::new_v4();
        let candidate = |confidence| NewCandidate {
            rule_id,
            source_node_id: a.id,
            target_node_id: b.id,
            edge_type: "insert_select".to_string(),
            confidence,
            evidence: json!({}),
        };

        let first = store.upsert_candidate(candidate(0.8)).await.unwrap();
        store.mark_candidate_verified(first.id, Utc::now()).await.unwrap();
        let refreshed = store.upsert_candidate(candidate(0.7)).await.unwrap();

        assert_eq!(first.id, refreshed.id);
        assert!(refreshed.verified());
        assert_eq!(refreshed.confidence, 0.7);
        assert!(store
            .list_candidates(Some(CandidateStatus::Candidate))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cross_system_edges_touch_the_system() {
        let store = MemoryStore::new();
        let crm = store.upsert_node(table("crm", "accounts")).await.unwrap();
        let raw = store.upsert_node(table("warehouse", "raw_accounts")).await.unwrap();
        let dim = store.upsert_node(table("warehouse", "dim_accounts")).await.unwrap();
        let report = store.upsert_node(table("bi", "accounts_report")).await.unwrap();
        for (from, to) in [(&crm, &raw), (&raw, &dim), (&dim, &report)] {
            store
                .upsert_edge(NewEdge {
                    source_node_id: from.id,
                    target_node_id: to.id,
                    edge_type: "sync".to_string(),
                    transformation: json!(null),
                })
                .await
                .unwrap();
        }

        let edges = store.cross_system_edges("warehouse").await.unwrap();
        let pairs: Vec<(Uuid, Uuid)> = edges
            .iter()
            .map(|e| (e.source_node_id, e.target_node_id))
            .collect();
        // Newest first; the warehouse-internal edge is left out
        assert_eq!(pairs, vec![(dim.id, report.id), (crm.id, raw.id)]);
        assert_eq!(store.cross_system_edges("crm").await.unwrap().len(), 1);
        assert!(store.cross_system_edges("lake").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_candidate_is_not_found() {
        let store = MemoryStore::new();
        let result = store.mark_candidate_verified(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(LineageError::NotFound(_))));
    }
}
