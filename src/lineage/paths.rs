//! Path Finder
//!
//! Cross-system lineage: "how does data get from here to there?"
//!
//! Every search carries the chain of nodes it has walked, and a node already
//! on a chain is never appended to it again. The same node may still appear
//! on a different chain. Searches are iterative and stop early on
//! cancellation.

use crate::config::{TraversalConfig, HARD_MAX_DEPTH};
use crate::error::{LineageError, LineageResult};
use crate::lineage::scoring::ScoringPolicy;
use crate::models::{Edge, LineagePath, Node, TraversalDirection};
use crate::store::GraphStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound on chain expansions per search. Keeps high fan-out graphs
/// from running away even inside the depth bound.
const MAX_EXPANSIONS: usize = 100_000;

/// Outcome of a single-target search
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "path", rename_all = "snake_case")]
pub enum PathLookup {
    Found(LineagePath),
    /// Nothing in the target system is reachable within the depth bound
    NoPath,
    Cancelled,
}

/// Every simple path between two nodes, shortest first
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSet {
    pub paths: Vec<LineagePath>,
    /// The result cap or expansion budget cut the search short
    pub truncated: bool,
    pub cancelled: bool,
}

/// Memoizes node and adjacency lookups for one search
struct GraphCursor<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    direction: TraversalDirection,
    nodes: HashMap<Uuid, Node>,
    adjacency: HashMap<Uuid, Vec<Uuid>>,
}

impl<'a, S: GraphStore + ?Sized> GraphCursor<'a, S> {
    fn new(store: &'a S, direction: TraversalDirection, root: &Node) -> Self {
        Self {
            store,
            direction,
            nodes: HashMap::from([(root.id, root.clone())]),
            adjacency: HashMap::new(),
        }
    }

    /// Distinct neighbour ids in the search direction, self-loops dropped
    async fn neighbours(&mut self, id: Uuid) -> LineageResult<Vec<Uuid>> {
        if let Some(cached) = self.adjacency.get(&id) {
            return Ok(cached.clone());
        }
        let edges: Vec<Edge> = match self.direction {
            TraversalDirection::Downstream => self.store.edges_from(id).await?,
            TraversalDirection::Upstream => self.store.edges_to(id).await?,
        };
        let mut seen = HashSet::new();
        let next: Vec<Uuid> = edges
            .iter()
            .filter(|e| !e.is_self_loop())
            .map(|e| match self.direction {
                TraversalDirection::Downstream => e.target_node_id,
                TraversalDirection::Upstream => e.source_node_id,
            })
            .filter(|id| seen.insert(*id))
            .collect();
        self.adjacency.insert(id, next.clone());
        Ok(next)
    }

    async fn node(&mut self, id: Uuid) -> LineageResult<Option<&Node>> {
        if !self.nodes.contains_key(&id) {
            match self.store.get_node_by_id(id).await? {
                Some(node) => {
                    self.nodes.insert(id, node);
                }
                None => {
                    warn!("Edge references missing node {}", id);
                    return Ok(None);
                }
            }
        }
        Ok(self.nodes.get(&id))
    }

    fn path(&self, chain: &[Uuid], confidence: f64) -> LineagePath {
        let nodes: Vec<&Node> = chain.iter().filter_map(|id| self.nodes.get(id)).collect();
        LineagePath::from_nodes(&nodes, confidence)
    }
}

/// The path finder
#[derive(Debug, Clone)]
pub struct PathFinder {
    config: TraversalConfig,
    policy: ScoringPolicy,
}

impl PathFinder {
    pub fn new(config: TraversalConfig, policy: ScoringPolicy) -> Self {
        Self { config, policy }
    }

    fn bound(requested: Option<u32>, default: u32) -> LineageResult<u32> {
        match requested {
            Some(0) => Err(LineageError::InvalidDepth(0)),
            Some(depth) => Ok(depth.min(HARD_MAX_DEPTH)),
            None => Ok(default.min(HARD_MAX_DEPTH)),
        }
    }

    /// Shortest downstream chain from `source` to any node in
    /// `target_system`. The source itself never counts as a match.
    pub async fn find_path<S>(
        &self,
        store: &S,
        source: &Node,
        target_system: &str,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<PathLookup>
    where
        S: GraphStore + ?Sized,
    {
        let max_depth = Self::bound(max_depth, self.config.path_max_depth)?;
        let mut cursor = GraphCursor::new(store, TraversalDirection::Downstream, source);

        // Breadth-first over chains: the first chain that reaches a node is
        // the shortest one, so later arrivals need not be expanded again.
        let mut expanded: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Vec<Uuid>> = VecDeque::from([vec![source.id]]);

        while let Some(chain) = queue.pop_front() {
            if cancel.is_cancelled() {
                warn!("Path search from {} cancelled", source.key);
                return Ok(PathLookup::Cancelled);
            }

            let Some(&current) = chain.last() else { continue };
            let hops = (chain.len() - 1) as u32;

            if hops > 0 {
                let Some(node) = cursor.node(current).await? else { continue };
                if node.system() == target_system {
                    let path = cursor.path(&chain, self.policy.path_confidence(hops));
                    debug!(
                        "Found path {} -> {} in {} hops",
                        source.key, target_system, hops
                    );
                    return Ok(PathLookup::Found(path));
                }
            }

            if hops >= max_depth || !expanded.insert(current) {
                continue;
            }

            for next in cursor.neighbours(current).await? {
                if chain.contains(&next) {
                    continue;
                }
                let mut extended = chain.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }

        debug!(
            "No path from {} to system {} within {} hops",
            source.key, target_system, max_depth
        );
        Ok(PathLookup::NoPath)
    }

    /// All simple downstream paths from `source` to `target` with at most
    /// `max_depth` edges, sorted by length
    pub async fn find_all_paths<S>(
        &self,
        store: &S,
        source: &Node,
        target: &Node,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<PathSet>
    where
        S: GraphStore + ?Sized,
    {
        let max_depth = Self::bound(max_depth, self.config.all_paths_max_depth)?;
        let mut result = PathSet::default();
        if source.id == target.id {
            return Ok(result);
        }

        let mut cursor = GraphCursor::new(store, TraversalDirection::Downstream, source);
        let mut stack: Vec<Vec<Uuid>> = vec![vec![source.id]];
        let mut expansions = 0usize;

        while let Some(chain) = stack.pop() {
            if cancel.is_cancelled() {
                warn!("All-paths search from {} cancelled", source.key);
                result.cancelled = true;
                break;
            }
            if expansions >= MAX_EXPANSIONS {
                result.truncated = true;
                break;
            }

            let Some(&current) = chain.last() else { continue };
            let hops = (chain.len() - 1) as u32;

            if current == target.id {
                if cursor.node(current).await?.is_some() {
                    // Past the cap, keep searching only to learn whether a path was dropped
                    if result.paths.len() >= self.config.max_paths {
                        result.truncated = true;
                        break;
                    }
                    let path = cursor.path(&chain, self.policy.path_confidence(hops));
                    result.paths.push(path);
                }
                continue;
            }
            if hops >= max_depth {
                continue;
            }

            expansions += 1;
            let neighbours = cursor.neighbours(current).await?;
            for next in neighbours.into_iter().rev() {
                if chain.contains(&next) {
                    continue;
                }
                if cursor.node(next).await?.is_none() {
                    continue;
                }
                let mut extended = chain.clone();
                extended.push(next);
                stack.push(extended);
            }
        }

        result.paths.sort_by_key(|p| p.total_hops);
        debug!(
            "Found {} paths {} -> {} within {} hops",
            result.paths.len(),
            source.key,
            target.key,
            max_depth
        );
        Ok(result)
    }

    /// Shortest chains leading away from `source` in `direction`, one per
    /// distinct `(length, end system)` pair, shortest first. Confidence
    /// decays with length and is floored for critical paths.
    pub async fn critical_paths<S>(
        &self,
        store: &S,
        source: &Node,
        direction: TraversalDirection,
        cancel: &CancellationToken,
    ) -> LineageResult<(Vec<LineagePath>, bool)>
    where
        S: GraphStore + ?Sized,
    {
        let limit = self.policy.critical_path_limit;
        let max_depth = self.policy.critical_path_max_depth.min(HARD_MAX_DEPTH);
        let mut cursor = GraphCursor::new(store, direction, source);

        let mut seen_ends: HashSet<(u32, String)> = HashSet::new();
        let mut paths = Vec::new();
        let mut queue: VecDeque<Vec<Uuid>> = VecDeque::from([vec![source.id]]);
        let mut expansions = 0usize;

        while let Some(chain) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Ok((paths, true));
            }
            if paths.len() >= limit || expansions >= MAX_EXPANSIONS {
                break;
            }

            let Some(&current) = chain.last() else { continue };
            let hops = (chain.len() - 1) as u32;

            if hops > 0 {
                let Some(node) = cursor.node(current).await? else { continue };
                let end = (hops, node.system().to_string());
                if seen_ends.insert(end) {
                    // Upstream chains are walked against the edges; present
                    // them in data-flow order
                    let mut ordered = chain.clone();
                    if direction == TraversalDirection::Upstream {
                        ordered.reverse();
                    }
                    paths.push(cursor.path(&ordered, self.policy.critical_path_confidence(hops)));
                }
            }
            if hops >= max_depth {
                continue;
            }

            expansions += 1;
            for next in cursor.neighbours(current).await? {
                if chain.contains(&next) {
                    continue;
                }
                let mut extended = chain.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }

        Ok((paths, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEdge, NewNode, NodeKey};
    use crate::store::MemoryStore;

    async fn node(store: &MemoryStore, system: &str, name: &str) -> Node {
        store
            .upsert_node(NewNode::from_key(NodeKey::table(system, name).unwrap()))
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

    fn finder() -> PathFinder {
        PathFinder::new(TraversalConfig::default(), ScoringPolicy::default())
    }

    fn names(path: &LineagePath) -> Vec<String> {
        path.steps.iter().map(|s| s.resource_name.clone()).collect()
    }

    #[tokio::test]
    async fn test_find_path_to_system() {
        let store = MemoryStore::new();
        let orders = node(&store, "warehouse", "orders").await;
        let summary = node(&store, "warehouse", "orders_summary").await;
        let dashboard = node(&store, "bi", "sales_dashboard").await;
        link(&store, &orders, &summary).await;
        link(&store, &summary, &dashboard).await;

        let lookup = finder()
            .find_path(&store, &orders, "bi", None, &CancellationToken::new())
            .await
            .unwrap();

        let PathLookup::Found(path) = lookup else {
            panic!("expected a path");
        };
        assert_eq!(names(&path), vec!["orders", "orders_summary", "sales_dashboard"]);
        assert_eq!(path.total_hops, 2);
        assert_eq!(path.source_system, "warehouse");
        assert_eq!(path.target_system, "bi");
        assert!((path.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_find_path_skips_source_and_terminates_on_cycle() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "warehouse", "c").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;
        link(&store, &c, &a).await;

        let cancel = CancellationToken::new();
        let lookup = finder().find_path(&store, &a, "bi", None, &cancel).await.unwrap();
        assert!(matches!(lookup, PathLookup::NoPath));

        // Same-system target resolves to the nearest other node
        let lookup = finder().find_path(&store, &a, "warehouse", None, &cancel).await.unwrap();
        let PathLookup::Found(path) = lookup else {
            panic!("expected a path");
        };
        assert_eq!(names(&path), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_find_path_depth_bound() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "bi", "c").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;

        let lookup = finder()
            .find_path(&store, &a, "bi", Some(1), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(lookup, PathLookup::NoPath));
    }

    #[tokio::test]
    async fn test_all_paths_respects_depth() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "warehouse", "c").await;
        let d = node(&store, "bi", "d").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;
        link(&store, &c, &d).await;

        let cancel = CancellationToken::new();
        let set = finder().find_all_paths(&store, &a, &d, Some(2), &cancel).await.unwrap();
        assert!(set.paths.is_empty());

        let set = finder().find_all_paths(&store, &a, &d, Some(3), &cancel).await.unwrap();
        assert_eq!(set.paths.len(), 1);
        assert_eq!(set.paths[0].total_hops, 3);
    }

    #[tokio::test]
    async fn test_all_paths_enumerates_branches_shortest_first() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "warehouse", "c").await;
        let d = node(&store, "bi", "d").await;
        link(&store, &a, &b).await;
        link(&store, &b, &c).await;
        link(&store, &c, &d).await;
        link(&store, &a, &d).await;
        link(&store, &c, &a).await;

        let set = finder()
            .find_all_paths(&store, &a, &d, None, &CancellationToken::new())
            .await
            .unwrap();

        let hops: Vec<u32> = set.paths.iter().map(|p| p.total_hops).collect();
        assert_eq!(hops, vec![1, 3]);
        assert!(!set.truncated);
    }

    fn capped_finder(max_paths: usize) -> PathFinder {
        let config = TraversalConfig {
            max_paths,
            ..TraversalConfig::default()
        };
        PathFinder::new(config, ScoringPolicy::default())
    }

    #[tokio::test]
    async fn test_all_paths_at_cap_with_dead_ends_is_not_truncated() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "warehouse", "c").await;
        link(&store, &a, &b).await;
        link(&store, &a, &c).await;

        let set = capped_finder(1)
            .find_all_paths(&store, &a, &b, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(set.paths.len(), 1);
        assert!(!set.truncated);
    }

    #[tokio::test]
    async fn test_all_paths_beyond_cap_is_truncated() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let b = node(&store, "warehouse", "b").await;
        let c = node(&store, "warehouse", "c").await;
        let d = node(&store, "bi", "d").await;
        link(&store, &a, &b).await;
        link(&store, &a, &c).await;
        link(&store, &b, &d).await;
        link(&store, &c, &d).await;

        let set = capped_finder(1)
            .find_all_paths(&store, &a, &d, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(set.paths.len(), 1);
        assert!(set.truncated);
    }

    #[tokio::test]
    async fn test_critical_paths_distinct_by_length_and_system() {
        let store = MemoryStore::new();
        let root = node(&store, "warehouse", "root").await;
        let x = node(&store, "warehouse", "x").await;
        let y = node(&store, "warehouse", "y").await;
        let z = node(&store, "bi", "z").await;
        link(&store, &root, &x).await;
        link(&store, &root, &y).await;
        link(&store, &x, &z).await;

        let (paths, cancelled) = finder()
            .critical_paths(&store, &root, TraversalDirection::Downstream, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!cancelled);
        // (1, warehouse) once for x and y, then (2, bi)
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].total_hops, 1);
        assert_eq!(paths[1].target_system, "bi");
        assert!((paths[1].confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_depth_is_rejected() {
        let store = MemoryStore::new();
        let a = node(&store, "warehouse", "a").await;
        let result = finder()
            .find_path(&store, &a, "bi", Some(0), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LineageError::InvalidDepth(0))));
    }
}
