//! Derived analysis results: affected resources, impact analyses, paths

use crate::error::LineageError;
use crate::models::edge::Edge;
use crate::models::node::{Node, NodeKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Which way a single traversal walks the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    /// Follow edges backwards: what this resource is derived from
    Upstream,
    /// Follow edges forwards: what is derived from this resource
    Downstream,
}

/// Direction requested for an impact analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactDirection {
    Upstream,
    Downstream,
    Both,
}

impl ImpactDirection {
    /// Traversals this direction expands into, upstream first
    pub fn traversals(&self) -> &'static [TraversalDirection] {
        match self {
            ImpactDirection::Upstream => &[TraversalDirection::Upstream],
            ImpactDirection::Downstream => &[TraversalDirection::Downstream],
            ImpactDirection::Both => &[TraversalDirection::Upstream, TraversalDirection::Downstream],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactDirection::Upstream => "upstream",
            ImpactDirection::Downstream => "downstream",
            ImpactDirection::Both => "both",
        }
    }
}

impl FromStr for ImpactDirection {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upstream" => Ok(ImpactDirection::Upstream),
            "downstream" => Ok(ImpactDirection::Downstream),
            "both" => Ok(ImpactDirection::Both),
            other => Err(LineageError::Validation(format!(
                "unknown impact direction '{}' (expected upstream, downstream or both)",
                other
            ))),
        }
    }
}

/// How directly a resource is affected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Direct,
    Indirect,
    Transitive,
}

impl ImpactLevel {
    /// 1 hop is direct, 2-3 indirect, anything further transitive
    pub fn from_hops(hops: u32) -> Self {
        match hops {
            0 | 1 => ImpactLevel::Direct,
            2 | 3 => ImpactLevel::Indirect,
            _ => ImpactLevel::Transitive,
        }
    }
}

/// Criticality of an affected resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
}

impl Criticality {
    /// 1 hop critical, 2 high, 3-4 medium, further low
    pub fn from_hops(hops: u32) -> Self {
        match hops {
            0 | 1 => Criticality::Critical,
            2 => Criticality::High,
            3 | 4 => Criticality::Medium,
            _ => Criticality::Low,
        }
    }
}

/// Categorical risk bucket, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// A resource reached by a traversal, classified for impact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedResource {
    pub node_id: Uuid,
    pub resource_key: NodeKey,
    pub resource_name: String,
    pub system: String,
    pub direction: TraversalDirection,
    pub hop_distance: u32,
    pub impact_level: ImpactLevel,
    pub criticality: Criticality,
}

/// One step of a lineage path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageStep {
    pub node_id: Uuid,
    pub node_key: NodeKey,
    pub system: String,
    pub resource_name: String,
    /// 1-based position along the path
    pub step_order: u32,
}

/// An ordered chain of nodes connected by edges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineagePath {
    pub id: Uuid,
    pub steps: Vec<LineageStep>,
    pub source_system: String,
    pub target_system: String,
    /// Number of edges along the path
    pub total_hops: u32,
    pub confidence: f64,
}

impl LineagePath {
    /// Build a path from its nodes (source first) with the given confidence
    pub fn from_nodes(nodes: &[&Node], confidence: f64) -> Self {
        let steps: Vec<LineageStep> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| LineageStep {
                node_id: node.id,
                node_key: node.key.clone(),
                system: node.key.system.clone(),
                resource_name: node.display_name.clone(),
                step_order: i as u32 + 1,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            source_system: steps.first().map(|s| s.system.clone()).unwrap_or_default(),
            target_system: steps.last().map(|s| s.system.clone()).unwrap_or_default(),
            total_hops: steps.len().saturating_sub(1) as u32,
            steps,
            confidence,
        }
    }
}

/// Complete impact analysis for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub id: Uuid,
    pub node_id: Uuid,
    pub resource_key: NodeKey,
    pub direction: ImpactDirection,
    pub affected_resources: Vec<AffectedResource>,
    /// In `[0, 1]`
    pub impact_score: f64,
    pub critical_paths: Vec<LineagePath>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    /// Set when the caller cancelled mid-analysis; results are partial
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

/// Nodes and edges around a resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub cancelled: bool,
}
