//! Graph seed files
//!
//! A JSON document of nodes, edges, column lineage, captured transformations,
//! discovery rules and signal records that the command-line caller loads
//! before running an operation:
//!
//! ```json
//! {
//!   "nodes": [{"system": "warehouse", "resourceType": "table", "resourceId": "orders"}],
//!   "edges": [{"source": {...}, "target": {...}, "edgeType": "transform"}],
//!   "columns": [{"source": {"system": "warehouse", "table": "orders", "column": "amount"}, "target": {...}}],
//!   "transformations": [{"source": {...}, "target": {...}, "transformationType": "sql", "logic": "..."}],
//!   "rules": [{"name": "queries", "sourceType": "query_log"}],
//!   "signals": {"query_log": [{"id": "q1", "system": "warehouse", "payload": "..."}]}
//! }
//! ```

use crate::discovery::{CreateDiscoveryRuleRequest, SignalRecord, StaticSignalSource};
use crate::error::{LineageError, LineageResult};
use crate::models::{
    CaptureTransformationRequest, CreateNodeRequest, TrackColumnLineageRequest, TrackLineageRequest,
};
use crate::service::LineageService;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSeed {
    #[serde(default)]
    pub nodes: Vec<CreateNodeRequest>,
    #[serde(default)]
    pub edges: Vec<TrackLineageRequest>,
    #[serde(default)]
    pub columns: Vec<TrackColumnLineageRequest>,
    #[serde(default)]
    pub transformations: Vec<CaptureTransformationRequest>,
    #[serde(default)]
    pub rules: Vec<CreateDiscoveryRuleRequest>,
    /// Signal records keyed by rule source type
    #[serde(default)]
    pub signals: HashMap<String, Vec<SignalRecord>>,
}

/// What a seed added
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub nodes: usize,
    pub edges: usize,
    pub columns: usize,
    pub transformations: usize,
    pub rules: usize,
    pub signals: usize,
}

impl GraphSeed {
    pub fn from_json(text: &str) -> LineageResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LineageError::Validation(format!("Invalid graph seed: {}", e)))
    }

    pub async fn load(path: &Path) -> LineageResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            LineageError::Config(format!("Cannot read graph seed {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Nodes first, then edges and column lineage, then captured
    /// transformations, then rules and signals.
    /// Stops at the first invalid entry.
    pub async fn apply(
        self,
        service: &LineageService,
        signals: &StaticSignalSource,
    ) -> LineageResult<SeedSummary> {
        let mut summary = SeedSummary::default();

        for node in self.nodes {
            service.create_node(node).await?;
            summary.nodes += 1;
        }
        for edge in self.edges {
            service.track_lineage(edge).await?;
            summary.edges += 1;
        }
        for column in self.columns {
            service.track_column_lineage(column).await?;
            summary.columns += 1;
        }
        for transformation in self.transformations {
            service.capture_transformation(transformation).await?;
            summary.transformations += 1;
        }
        for rule in self.rules {
            service.create_discovery_rule(rule).await?;
            summary.rules += 1;
        }
        for (source_type, records) in self.signals {
            summary.signals += records.len();
            signals.extend(&source_type, records).await;
        }

        info!(
            "Seeded {} nodes, {} edges, {} column edges, {} transformations, {} rules, {} signals",
            summary.nodes,
            summary.edges,
            summary.columns,
            summary.transformations,
            summary.rules,
            summary.signals
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const SEED: &str = r#"{
        "nodes": [
            {"system": "warehouse", "resourceType": "table", "resourceId": "orders"},
            {"system": "bi", "resourceType": "dashboard", "resourceId": "sales", "displayName": "Sales"}
        ],
        "edges": [
            {
                "source": {"system": "warehouse", "resourceType": "table", "resourceId": "orders"},
                "target": {"system": "bi", "resourceType": "dashboard", "resourceId": "sales"},
                "edgeType": "sync"
            }
        ],
        "columns": [
            {
                "source": {"system": "warehouse", "table": "orders", "column": "amount"},
                "target": {"system": "bi", "table": "sales", "column": "revenue"}
            }
        ],
        "transformations": [
            {
                "source": {"system": "warehouse", "resourceType": "table", "resourceId": "orders"},
                "target": {"system": "bi", "resourceType": "dashboard", "resourceId": "sales"},
                "transformationType": "sql",
                "logic": "SELECT sum(amount) AS revenue FROM orders"
            }
        ],
        "rules": [{"name": "queries", "sourceType": "query_log"}],
        "signals": {
            "query_log": [
                {"id": "q1", "system": "warehouse", "payload": "CREATE TABLE daily AS SELECT * FROM orders"}
            ]
        }
    }"#;

    #[tokio::test]
    async fn test_seed_populates_store_and_signals() {
        let signals = Arc::new(StaticSignalSource::new());
        let service = LineageService::new(
            Arc::new(MemoryStore::new()),
            signals.clone(),
            &Settings::default(),
        );

        let summary = GraphSeed::from_json(SEED)
            .unwrap()
            .apply(&service, &signals)
            .await
            .unwrap();

        assert_eq!(
            summary,
            SeedSummary {
                nodes: 2,
                edges: 1,
                columns: 1,
                transformations: 1,
                rules: 1,
                signals: 1
            }
        );
        assert_eq!(service.full_graph().await.unwrap().edges.len(), 2);
        assert_eq!(signals.len().await, 1);
    }

    #[test]
    fn test_malformed_seed_is_rejected() {
        let err = GraphSeed::from_json("{\"nodes\": 3}").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
