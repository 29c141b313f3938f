//! Graph Store
//!
//! Durable keyed storage for lineage nodes, edges, discovery candidates and
//! impact-analysis history. The traversal and analysis code only ever talks
//! to these traits, so it runs unchanged against PostgreSQL or memory.
//!
//! Every write is an idempotent upsert on its natural key:
//! - nodes on `(system, resource_type, resource_id)`
//! - edges on `(source, target, edge_type)`
//! - candidates on `(rule, source, target, edge_type)`
//!
//! Impact analyses and transformation captures are append-only logs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::discovery::DiscoveryRule;
use crate::error::LineageResult;
use crate::models::{
    CandidateStatus, DiscoveredEdge, Edge, ImpactAnalysis, NewCandidate, NewEdge, NewNode,
    NewTransformation, Node, NodeKey, Transformation, TransformationSide,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Node/edge primitives the lineage engine reads and writes through
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update attributes of the node with this key
    async fn upsert_node(&self, node: NewNode) -> LineageResult<Node>;

    /// Insert the node unless its key exists; an existing node is returned
    /// untouched
    async fn ensure_node(&self, node: NewNode) -> LineageResult<Node>;

    /// Insert or update the transformation payload of the edge with this key.
    /// Both endpoints must exist.
    async fn upsert_edge(&self, edge: NewEdge) -> LineageResult<Edge>;

    async fn get_node(&self, key: &NodeKey) -> LineageResult<Option<Node>>;

    async fn get_node_by_id(&self, id: Uuid) -> LineageResult<Option<Node>>;

    /// Outgoing canonical edges (downstream direction)
    async fn edges_from(&self, node_id: Uuid) -> LineageResult<Vec<Edge>>;

    /// Incoming canonical edges (upstream direction)
    async fn edges_to(&self, node_id: Uuid) -> LineageResult<Vec<Edge>>;

    async fn all_nodes(&self) -> LineageResult<Vec<Node>>;

    async fn all_edges(&self) -> LineageResult<Vec<Edge>>;

    /// Canonical edges crossing a system boundary with one end in `system`,
    /// newest first
    async fn cross_system_edges(&self, system: &str) -> LineageResult<Vec<Edge>>;
}

/// Discovery rules and the candidate edges they produce
#[async_trait]
pub trait DiscoveryStore: Send + Sync {
    async fn save_rule(&self, rule: DiscoveryRule) -> LineageResult<DiscoveryRule>;

    async fn get_rule(&self, id: Uuid) -> LineageResult<Option<DiscoveryRule>>;

    async fn list_rules(&self) -> LineageResult<Vec<DiscoveryRule>>;

    async fn mark_rule_run(&self, id: Uuid, at: DateTime<Utc>) -> LineageResult<()>;

    /// Insert or refresh a candidate. A verified candidate keeps its status.
    async fn upsert_candidate(&self, candidate: NewCandidate) -> LineageResult<DiscoveredEdge>;

    async fn get_candidate(&self, id: Uuid) -> LineageResult<Option<DiscoveredEdge>>;

    async fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> LineageResult<Vec<DiscoveredEdge>>;

    async fn mark_candidate_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> LineageResult<DiscoveredEdge>;
}

/// Append-only history of impact analyses
#[async_trait]
pub trait AnalysisLog: Send + Sync {
    async fn record_analysis(&self, analysis: &ImpactAnalysis) -> LineageResult<()>;

    /// Newest first
    async fn impact_history(
        &self,
        key: &NodeKey,
        limit: usize,
    ) -> LineageResult<Vec<ImpactAnalysis>>;
}

/// Append-only log of captured transformation logic
#[async_trait]
pub trait TransformationLog: Send + Sync {
    async fn capture_transformation(
        &self,
        transformation: NewTransformation,
    ) -> LineageResult<Transformation>;

    /// Most recent capture for the pair
    async fn latest_transformation(
        &self,
        source_node_id: Uuid,
        target_node_id: Uuid,
    ) -> LineageResult<Option<Transformation>>;

    /// Captures with the node on `side`, newest first
    async fn list_transformations(
        &self,
        node_id: Uuid,
        side: TransformationSide,
    ) -> LineageResult<Vec<Transformation>>;
}

/// Everything the lineage service needs from storage
pub trait LineageStore: GraphStore + DiscoveryStore + AnalysisLog + TransformationLog {}

impl<T> LineageStore for T where T: GraphStore + DiscoveryStore + AnalysisLog + TransformationLog {}
