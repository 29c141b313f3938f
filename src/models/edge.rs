//! Lineage edge and discovered-candidate models

use crate::models::node::NodeKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Unique identity of an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeKey {
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub edge_type: String,
}

/// A canonical, traversal-visible lineage edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    /// Relationship kind: create_table_as, sync, transform, ...
    pub edge_type: String,
    /// Opaque transformation payload
    pub transformation: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn is_self_loop(&self) -> bool {
        self.source_node_id == self.target_node_id
    }
}

/// Edge attributes handed to the store for an upsert
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub edge_type: String,
    pub transformation: serde_json::Value,
}

impl NewEdge {
    /// Natural key the edge is upserted on
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_node_id: self.source_node_id,
            target_node_id: self.target_node_id,
            edge_type: self.edge_type.clone(),
        }
    }
}

/// Request to record a derivation between two existing nodes
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackLineageRequest {
    pub source: NodeKey,
    pub target: NodeKey,

    #[validate(length(min = 1, max = 64, message = "Edge type must be between 1 and 64 characters"))]
    pub edge_type: String,

    #[serde(default)]
    pub transformation: Option<serde_json::Value>,
}

/// A canonical edge whose endpoints live in different systems
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSystemEdge {
    #[serde(flatten)]
    pub edge: Edge,
    pub source_key: NodeKey,
    pub target_key: NodeKey,
}

impl CrossSystemEdge {
    pub fn source_system(&self) -> &str {
        &self.source_key.system
    }

    pub fn target_system(&self) -> &str {
        &self.target_key.system
    }
}

/// Lifecycle of an automatically discovered edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Produced by discovery; invisible to traversal
    Candidate,
    /// Promoted by an operator; a canonical edge exists
    Verified,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Candidate => "candidate",
            CandidateStatus::Verified => "verified",
        }
    }
}

/// An automatically discovered relationship awaiting verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredEdge {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub source_key: NodeKey,
    pub target_key: NodeKey,
    pub edge_type: String,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Matched-pattern description, stored opaquely
    pub evidence: serde_json::Value,
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl DiscoveredEdge {
    pub fn verified(&self) -> bool {
        self.status == CandidateStatus::Verified
    }
}

/// Candidate attributes handed to the store
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub rule_id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub edge_type: String,
    pub confidence: f64,
    pub evidence: serde_json::Value,
}
