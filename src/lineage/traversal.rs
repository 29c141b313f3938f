//! Traversal Engine
//!
//! "What feeds this table, and what does it feed?"
//! Bounded-depth breadth-first search over the graph store, iterative with an
//! explicit queue. A visited set makes it safe on cyclic graphs; self-loops
//! are skipped.

use crate::config::HARD_MAX_DEPTH;
use crate::error::{LineageError, LineageResult};
use crate::models::{Edge, Node, TraversalDirection};
use crate::store::GraphStore;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// A node reached by a traversal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachedNode {
    pub node: Node,
    /// Shortest number of edges from the start node (at least 1)
    pub hop_distance: u32,
    /// Edge through which the node was first reached
    pub via_edge_id: Uuid,
}

/// Reachable set of one traversal, excluding the start node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalResult {
    pub start: Node,
    pub direction: TraversalDirection,
    pub max_depth: u32,
    /// In breadth-first order, so hop distances never decrease
    pub nodes: Vec<ReachedNode>,
    /// Every edge walked while expanding, once each
    pub edges: Vec<Edge>,
    /// The caller cancelled; `nodes` holds what was reached so far
    pub cancelled: bool,
}

/// The traversal engine
#[derive(Debug, Clone)]
pub struct TraversalEngine {
    default_depth: u32,
}

impl TraversalEngine {
    pub fn new(default_depth: u32) -> Self {
        Self {
            default_depth: default_depth.clamp(1, HARD_MAX_DEPTH),
        }
    }

    /// Resolve a requested depth: zero is invalid, anything above the hard
    /// cap is truncated to it, `None` takes the configured default
    pub fn effective_depth(&self, requested: Option<u32>) -> LineageResult<u32> {
        match requested {
            Some(0) => Err(LineageError::InvalidDepth(0)),
            Some(depth) if depth > HARD_MAX_DEPTH => {
                debug!("Requested depth {} truncated to {}", depth, HARD_MAX_DEPTH);
                Ok(HARD_MAX_DEPTH)
            }
            Some(depth) => Ok(depth),
            None => Ok(self.default_depth),
        }
    }

    /// Walk the graph from `start_id`. Returns `Ok(None)` when the start node
    /// does not exist.
    pub async fn traverse<S>(
        &self,
        store: &S,
        start_id: Uuid,
        direction: TraversalDirection,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<Option<TraversalResult>>
    where
        S: GraphStore + ?Sized,
    {
        self.traverse_within(store, start_id, direction, max_depth, cancel, |_| true)
            .await
    }

    /// Like `traverse`, but only walks through nodes accepted by `keep`.
    /// Edges into rejected nodes are not reported.
    pub async fn traverse_within<S, F>(
        &self,
        store: &S,
        start_id: Uuid,
        direction: TraversalDirection,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
        keep: F,
    ) -> LineageResult<Option<TraversalResult>>
    where
        S: GraphStore + ?Sized,
        F: Fn(&Node) -> bool + Send + Sync,
    {
        let max_depth = self.effective_depth(max_depth)?;
        let Some(start) = store.get_node_by_id(start_id).await? else {
            debug!("Traversal start node {} not found", start_id);
            return Ok(None);
        };

        let mut visited: HashSet<Uuid> = HashSet::from([start.id]);
        let mut rejected: HashSet<Uuid> = HashSet::new();
        let mut walked: HashSet<Uuid> = HashSet::new();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut cancelled = false;

        let mut queue: VecDeque<(Uuid, u32)> = VecDeque::from([(start.id, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let neighbours = match direction {
                TraversalDirection::Downstream => store.edges_from(current).await?,
                TraversalDirection::Upstream => store.edges_to(current).await?,
            };

            for edge in neighbours {
                if edge.is_self_loop() {
                    debug!("Skipping self-loop edge {} on {}", edge.id, current);
                    continue;
                }
                let next = match direction {
                    TraversalDirection::Downstream => edge.target_node_id,
                    TraversalDirection::Upstream => edge.source_node_id,
                };
                if rejected.contains(&next) {
                    continue;
                }
                let edge_id = edge.id;
                if visited.contains(&next) {
                    if walked.insert(edge_id) {
                        edges.push(edge);
                    }
                    continue;
                }

                let Some(node) = store.get_node_by_id(next).await? else {
                    warn!("Edge {} points at missing node {}", edge_id, next);
                    rejected.insert(next);
                    continue;
                };
                if !keep(&node) {
                    rejected.insert(next);
                    continue;
                }
                visited.insert(next);
                if walked.insert(edge_id) {
                    edges.push(edge);
                }
                let hop_distance = depth + 1;
                nodes.push(ReachedNode {
                    node,
                    hop_distance,
                    via_edge_id: edge_id,
                });
                if hop_distance < max_depth {
                    queue.push_back((next, hop_distance));
                }
            }
        }

        if cancelled {
            warn!(
                "Traversal from {} cancelled after reaching {} nodes",
                start.key,
                nodes.len()
            );
        } else {
            debug!(
                "Traversal {:?} from {} reached {} nodes via {} edges (max depth {})",
                direction,
                start.key,
                nodes.len(),
                edges.len(),
                max_depth
            );
        }

        Ok(Some(TraversalResult {
            start,
            direction,
            max_depth,
            nodes,
            edges,
            cancelled,
        }))
    }
}

impl Default for TraversalEngine {
    fn default() -> Self {
        Self::new(HARD_MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEdge, NewNode, NodeKey};
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    async fn node(store: &MemoryStore, name: &str) -> Node {
        store
            .upsert_node(NewNode::from_key(NodeKey::table("warehouse", name).unwrap()))
            .await
            .unwrap()
    }

    async fn link(store: &MemoryStore, from: &Node, to: &Node) {
        store
            .upsert_edge(NewEdge {
                source_node_id: from.id,
                target_node_id: to.id,
                edge_type: "transform".to_string(),
                transformation: serde_json::Value::Null,
            })
            .await
            .unwrap();
    }

    fn hops(result: &TraversalResult) -> HashMap<String, u32> {
        result
            .nodes
            .iter()
            .map(|r| (r.node.key.resource_id.clone(), r.hop_distance))
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_terminates_and_visits_once() {
        let store = MemoryStore::new();
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let c = node(&store, "c").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;
        link(&store, &c, &a).await;

        let engine = TraversalEngine::default();
        let result = engine
            .traverse(&store, a.id, TraversalDirection::Downstream, None, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hops(&result), HashMap::from([("b".to_string(), 1), ("c".to_string(), 2)]));
        assert_eq!(result.edges.len(), 3);
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_reports_shortest_hop_distance() {
        let store = MemoryStore::new();
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let c = node(&store, "c").await;
        let d = node(&store, "d").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;
        link(&store, &c, &d).await;
        link(&store, &a, &d).await;

        let result = TraversalEngine::default()
            .traverse(&store, a.id, TraversalDirection::Downstream, None, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        let hops = hops(&result);
        assert_eq!(hops.len(), 3);
        assert_eq!(hops["d"], 1);
        assert_eq!(hops["c"], 2);
    }

    #[tokio::test]
    async fn test_depth_bound_is_respected() {
        let store = MemoryStore::new();
        let mut chain = Vec::new();
        for i in 0..6 {
            chain.push(node(&store, &format!("n{}", i)).await);
        }
        for pair in chain.windows(2) {
            link(&store, &pair[0], &pair[1]).await;
        }

        let result = TraversalEngine::default()
            .traverse(&store, chain[0].id, TraversalDirection::Downstream, Some(2), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.nodes.len(), 2);
        assert!(result.nodes.iter().all(|r| r.hop_distance <= 2));
    }

    #[tokio::test]
    async fn test_upstream_and_self_loops() {
        let store = MemoryStore::new();
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        link(&store, &a, &b).await;
        link(&store, &b, &b).await;

        let result = TraversalEngine::default()
            .traverse(&store, b.id, TraversalDirection::Upstream, None, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hops(&result), HashMap::from([("a".to_string(), 1)]));
        assert_eq!(result.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_start_and_invalid_depth() {
        let store = MemoryStore::new();
        let engine = TraversalEngine::default();
        let cancel = CancellationToken::new();

        let missing = engine
            .traverse(&store, Uuid::new_v4(), TraversalDirection::Downstream, None, &cancel)
            .await
            .unwrap();
        assert!(missing.is_none());

        let invalid = engine
            .traverse(&store, Uuid::new_v4(), TraversalDirection::Downstream, Some(0), &cancel)
            .await;
        assert!(matches!(invalid, Err(LineageError::InvalidDepth(0))));

        assert_eq!(engine.effective_depth(Some(50)).unwrap(), HARD_MAX_DEPTH);
    }

    #[tokio::test]
    async fn test_cancelled_traversal_returns_flagged_result() {
        let store = MemoryStore::new();
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        link(&store, &a, &b).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = TraversalEngine::default()
            .traverse(&store, a.id, TraversalDirection::Downstream, None, &cancel)
            .await
            .unwrap()
            .unwrap();

        assert!(result.cancelled);
        assert!(result.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_filtered_traversal_stops_at_rejected_nodes() {
        let store = MemoryStore::new();
        let a = node(&store, "a").await;
        let b = node(&store, "b").await;
        let view = store
            .upsert_node(NewNode::from_key(NodeKey::new("bi", "dashboard", "sales").unwrap()))
            .await
            .unwrap();
        let after_view = node(&store, "after_view").await;
        link(&store, &a, &b).await;
        link(&store, &a, &view).await;
        link(&store, &view, &after_view).await;

        let result = TraversalEngine::default()
            .traverse_within(
                &store,
                a.id,
                TraversalDirection::Downstream,
                None,
                &CancellationToken::new(),
                |n| n.key.resource_type == "table",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hops(&result), HashMap::from([("b".to_string(), 1)]));
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].target_node_id, b.id);
    }
}
