//! Lineage service
//!
//! The public operations of the engine: tracking lineage, reading it back,
//! impact analysis, path finding, discovery and candidate verification. One
//! service wraps one store; callers (CLI, an HTTP layer) stay thin.

use crate::config::Settings;
use crate::discovery::{
    CreateDiscoveryRuleRequest, DiscoveryEngine, DiscoveryReport, DiscoveryRule, SignalSource,
};
use crate::error::{not_found_error, validation_error, LineageError, LineageResult};
use crate::lineage::{ImpactAnalyzer, PathFinder, PathLookup, PathSet, TraversalEngine};
use crate::models::{
    CandidateStatus, CaptureTransformationRequest, ColumnLineage, ColumnRef, ColumnView,
    CreateNodeRequest, CrossSystemEdge, DiscoveredEdge, Edge, ImpactAnalysis, ImpactDirection,
    LineageGraph, NewEdge, NewNode, Node, NodeKey, TrackColumnLineageRequest, TrackLineageRequest,
    Transformation, TransformationSide, TraversalDirection, COLUMN_RESOURCE_TYPE,
};
use crate::store::LineageStore;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Default number of analyses returned by `impact_history`
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Facade over the store and the analysis engines
pub struct LineageService {
    store: Arc<dyn LineageStore>,
    traversal: TraversalEngine,
    paths: PathFinder,
    impact: ImpactAnalyzer,
    discovery: DiscoveryEngine,
}

impl LineageService {
    pub fn new(
        store: Arc<dyn LineageStore>,
        signals: Arc<dyn SignalSource>,
        settings: &Settings,
    ) -> Self {
        let traversal = TraversalEngine::new(settings.traversal.max_depth);
        let paths = PathFinder::new(settings.traversal.clone(), settings.scoring.clone());
        let impact = ImpactAnalyzer::new(traversal.clone(), paths.clone(), settings.scoring.clone());
        let discovery = DiscoveryEngine::new(&settings.discovery, signals);

        Self {
            store,
            traversal,
            paths,
            impact,
            discovery,
        }
    }

    async fn resolve(&self, key: &NodeKey) -> LineageResult<Node> {
        self.store
            .get_node(key)
            .await?
            .ok_or_else(|| LineageError::NodeNotFound(key.to_string()))
    }

    async fn key_of(&self, id: Uuid, cache: &mut HashMap<Uuid, NodeKey>) -> LineageResult<NodeKey> {
        if let Some(key) = cache.get(&id) {
            return Ok(key.clone());
        }
        let node = self
            .store
            .get_node_by_id(id)
            .await?
            .ok_or_else(|| not_found_error(format!("Node {} not found", id)))?;
        cache.insert(id, node.key.clone());
        Ok(node.key)
    }

    /// Register (or update) a node and return it with its key
    pub async fn create_node(&self, req: CreateNodeRequest) -> LineageResult<Node> {
        req.validate().map_err(|e| validation_error(e.to_string()))?;
        let node = self.store.upsert_node(req.into_new_node()?).await?;
        info!("Registered node {}", node.key);
        Ok(node)
    }

    /// Record that `target` is derived from `source`. Both nodes must exist.
    pub async fn track_lineage(&self, req: TrackLineageRequest) -> LineageResult<Edge> {
        req.validate().map_err(|e| validation_error(e.to_string()))?;
        let source = self.resolve(&req.source).await?;
        let target = self.resolve(&req.target).await?;

        let edge = self
            .store
            .upsert_edge(NewEdge {
                source_node_id: source.id,
                target_node_id: target.id,
                edge_type: req.edge_type,
                transformation: req.transformation.unwrap_or(serde_json::Value::Null),
            })
            .await?;
        info!("Tracked {} lineage {} -> {}", edge.edge_type, source.key, target.key);
        Ok(edge)
    }

    /// The resource plus everything up- and downstream of it, each node and
    /// edge once
    pub async fn get_lineage(
        &self,
        key: &NodeKey,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<LineageGraph> {
        let root = self.resolve(key).await?;

        let mut graph = LineageGraph::default();
        let mut node_ids: HashSet<Uuid> = HashSet::from([root.id]);
        let mut edge_ids: HashSet<Uuid> = HashSet::new();
        graph.nodes.push(root.clone());

        for direction in [TraversalDirection::Upstream, TraversalDirection::Downstream] {
            let Some(result) = self
                .traversal
                .traverse(self.store.as_ref(), root.id, direction, max_depth, cancel)
                .await?
            else {
                return Err(LineageError::NodeNotFound(key.to_string()));
            };

            for reached in result.nodes {
                if node_ids.insert(reached.node.id) {
                    graph.nodes.push(reached.node);
                }
            }
            for edge in result.edges {
                if edge_ids.insert(edge.id) {
                    graph.edges.push(edge);
                }
            }
            if result.cancelled {
                graph.cancelled = true;
                break;
            }
        }

        debug!(
            "Lineage of {}: {} nodes, {} edges",
            key,
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    /// Blast radius of a change to `key`. Completed analyses are appended to
    /// the history.
    pub async fn analyze_impact(
        &self,
        key: &NodeKey,
        direction: ImpactDirection,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<ImpactAnalysis> {
        let analysis = self
            .impact
            .analyze(self.store.as_ref(), key, direction, max_depth, cancel)
            .await?;
        if !analysis.cancelled {
            self.store.record_analysis(&analysis).await?;
        }
        Ok(analysis)
    }

    /// Shortest downstream path from `key` into `target_system`
    pub async fn find_path(
        &self,
        key: &NodeKey,
        target_system: &str,
        cancel: &CancellationToken,
    ) -> LineageResult<PathLookup> {
        if target_system.trim().is_empty() {
            return Err(validation_error("Target system is required"));
        }
        let source = self.resolve(key).await?;
        self.paths
            .find_path(self.store.as_ref(), &source, target_system, None, cancel)
            .await
    }

    /// Every simple path from `source` to `target` within `max_depth` hops
    pub async fn find_paths(
        &self,
        source: &NodeKey,
        target: &NodeKey,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<PathSet> {
        let source = self.resolve(source).await?;
        let target = self.resolve(target).await?;
        self.paths
            .find_all_paths(self.store.as_ref(), &source, &target, max_depth, cancel)
            .await
    }

    pub async fn create_discovery_rule(
        &self,
        req: CreateDiscoveryRuleRequest,
    ) -> LineageResult<DiscoveryRule> {
        req.validate().map_err(|e| validation_error(e.to_string()))?;
        let rule = DiscoveryRule::from(req);
        if !self.discovery.supports(&rule.source_type) {
            warn!(
                "Discovery rule '{}' uses source type '{}' which no matcher handles",
                rule.name, rule.source_type
            );
        }
        let rule = self.store.save_rule(rule).await?;
        info!("Created discovery rule '{}' ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub async fn list_discovery_rules(&self) -> LineageResult<Vec<DiscoveryRule>> {
        self.store.list_rules().await
    }

    /// Run one rule, or every enabled rule when `rule_id` is `None`
    pub async fn run_discovery(
        &self,
        rule_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> LineageResult<DiscoveryReport> {
        let rules = match rule_id {
            Some(id) => {
                let rule = self
                    .store
                    .get_rule(id)
                    .await?
                    .filter(|r| r.enabled)
                    .ok_or_else(|| not_found_error(format!("Enabled discovery rule {} not found", id)))?;
                vec![rule]
            }
            None => self
                .store
                .list_rules()
                .await?
                .into_iter()
                .filter(|r| r.enabled)
                .collect(),
        };

        Ok(self.discovery.run(self.store.as_ref(), rules, cancel).await)
    }

    /// Candidates for operator review; `None` lists every status
    pub async fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> LineageResult<Vec<DiscoveredEdge>> {
        self.store.list_candidates(status).await
    }

    /// Promote a candidate to a canonical, traversal-visible edge
    pub async fn verify_discovered_edge(&self, candidate_id: Uuid) -> LineageResult<Edge> {
        let candidate = self
            .store
            .get_candidate(candidate_id)
            .await?
            .ok_or_else(|| not_found_error(format!("Discovered edge {} not found", candidate_id)))?;

        let edge = self
            .store
            .upsert_edge(NewEdge {
                source_node_id: candidate.source_node_id,
                target_node_id: candidate.target_node_id,
                edge_type: candidate.edge_type.clone(),
                transformation: serde_json::json!({
                    "discovered": true,
                    "candidateId": candidate.id,
                    "ruleId": candidate.rule_id,
                    "confidence": candidate.confidence,
                    "evidence": candidate.evidence,
                }),
            })
            .await?;
        self.store
            .mark_candidate_verified(candidate.id, Utc::now())
            .await?;

        info!(
            "Verified discovered edge {}: {} -> {} ({})",
            candidate.id, candidate.source_key, candidate.target_key, candidate.edge_type
        );
        Ok(edge)
    }

    /// Past analyses of `key`, newest first
    pub async fn impact_history(
        &self,
        key: &NodeKey,
        limit: Option<usize>,
    ) -> LineageResult<Vec<ImpactAnalysis>> {
        self.store
            .impact_history(key, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// Record that column `target` is derived from column `source`. Column
    /// nodes are created on first use.
    pub async fn track_column_lineage(&self, req: TrackColumnLineageRequest) -> LineageResult<Edge> {
        req.validate().map_err(|e| validation_error(e.to_string()))?;
        let source = self.store.ensure_node(NewNode::from_key(req.source.key()?)).await?;
        let target = self.store.ensure_node(NewNode::from_key(req.target.key()?)).await?;

        let edge = self
            .store
            .upsert_edge(NewEdge {
                source_node_id: source.id,
                target_node_id: target.id,
                edge_type: req.edge_type,
                transformation: req.transformation.unwrap_or(serde_json::Value::Null),
            })
            .await?;
        info!("Tracked column lineage {} -> {}", req.source, req.target);
        Ok(edge)
    }

    /// Columns up- and downstream of `column`. Only column nodes are walked,
    /// so table-level edges never leak into the view.
    pub async fn column_lineage(
        &self,
        column: &ColumnRef,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<ColumnLineage> {
        let key = column.key()?;
        let root = self.resolve(&key).await?;
        let root_view = ColumnView::from_node(&root, 0)
            .ok_or_else(|| LineageError::InvalidNodeKey(key.to_string()))?;

        let mut lineage = ColumnLineage {
            column: root_view,
            upstream: Vec::new(),
            downstream: Vec::new(),
            edges: Vec::new(),
            cancelled: false,
        };
        let mut edge_ids: HashSet<Uuid> = HashSet::new();

        for direction in [TraversalDirection::Upstream, TraversalDirection::Downstream] {
            let Some(result) = self
                .traversal
                .traverse_within(self.store.as_ref(), root.id, direction, max_depth, cancel, |n| {
                    n.key.resource_type == COLUMN_RESOURCE_TYPE
                })
                .await?
            else {
                return Err(LineageError::NodeNotFound(key.to_string()));
            };

            let views = result
                .nodes
                .iter()
                .filter_map(|r| ColumnView::from_node(&r.node, r.hop_distance));
            match direction {
                TraversalDirection::Upstream => lineage.upstream.extend(views),
                TraversalDirection::Downstream => lineage.downstream.extend(views),
            }
            for edge in result.edges {
                if edge_ids.insert(edge.id) {
                    lineage.edges.push(edge);
                }
            }
            if result.cancelled {
                lineage.cancelled = true;
                break;
            }
        }

        debug!(
            "Column lineage of {}: {} upstream, {} downstream",
            column,
            lineage.upstream.len(),
            lineage.downstream.len()
        );
        Ok(lineage)
    }

    /// Canonical edges that enter or leave `system`, newest first
    pub async fn cross_system_lineage(&self, system: &str) -> LineageResult<Vec<CrossSystemEdge>> {
        let system = system.trim();
        if system.is_empty() {
            return Err(validation_error("System is required"));
        }

        let edges = self.store.cross_system_edges(system).await?;
        let mut keys: HashMap<Uuid, NodeKey> = HashMap::new();
        let mut crossings = Vec::with_capacity(edges.len());
        for edge in edges {
            let source_key = self.key_of(edge.source_node_id, &mut keys).await?;
            let target_key = self.key_of(edge.target_node_id, &mut keys).await?;
            crossings.push(CrossSystemEdge {
                edge,
                source_key,
                target_key,
            });
        }

        debug!("{} cross-system edges touch {}", crossings.len(), system);
        Ok(crossings)
    }

    /// Store the logic deriving `target` from `source`. Both nodes must exist.
    pub async fn capture_transformation(
        &self,
        req: CaptureTransformationRequest,
    ) -> LineageResult<Transformation> {
        req.validate().map_err(|e| validation_error(e.to_string()))?;
        let source = self.resolve(&req.source).await?;
        let target = self.resolve(&req.target).await?;

        let transformation = self
            .store
            .capture_transformation(req.into_new_transformation(source.id, target.id))
            .await?;
        info!(
            "Captured {} transformation {} -> {}",
            transformation.transformation_type.as_str(),
            source.key,
            target.key
        );
        Ok(transformation)
    }

    /// Latest captured logic for the pair
    pub async fn get_transformation(
        &self,
        source: &NodeKey,
        target: &NodeKey,
    ) -> LineageResult<Transformation> {
        let source_node = self.resolve(source).await?;
        let target_node = self.resolve(target).await?;
        self.store
            .latest_transformation(source_node.id, target_node.id)
            .await?
            .ok_or_else(|| {
                not_found_error(format!("No transformation captured for {} -> {}", source, target))
            })
    }

    /// Captures with `key` on the given side, newest first
    pub async fn list_transformations(
        &self,
        key: &NodeKey,
        side: TransformationSide,
    ) -> LineageResult<Vec<Transformation>> {
        let node = self.resolve(key).await?;
        self.store.list_transformations(node.id, side).await
    }

    /// Every node and canonical edge
    pub async fn full_graph(&self) -> LineageResult<LineageGraph> {
        Ok(LineageGraph {
            nodes: self.store.all_nodes().await?,
            edges: self.store.all_edges().await?,
            cancelled: false,
        })
    }
}
