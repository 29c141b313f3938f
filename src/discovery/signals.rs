//! Signal sources
//!
//! Discovery never talks to query logs or orchestrators directly. A signal
//! source hands the engine materialized records (SQL text or structured job
//! documents) tagged with the system they came from.

use crate::discovery::rules::DiscoveryRule;
use crate::error::LineageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Raw payload of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalPayload {
    /// Free text, e.g. an executed SQL statement
    Text(String),
    /// A structured document, e.g. an ETL job definition
    Structured(serde_json::Value),
}

/// One observed signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub id: String,
    /// System the signal was observed in (warehouse name, schema, ...)
    pub system: String,
    pub payload: SignalPayload,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn text(id: impl Into<String>, system: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system: system.into(),
            payload: SignalPayload::Text(text.into()),
            observed_at: Utc::now(),
        }
    }

    pub fn structured(id: impl Into<String>, system: impl Into<String>, doc: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            system: system.into(),
            payload: SignalPayload::Structured(doc),
            observed_at: Utc::now(),
        }
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Supplies the records a discovery rule scans
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn fetch(&self, rule: &DiscoveryRule) -> LineageResult<Vec<SignalRecord>>;
}

/// Records held in memory, keyed by source type
#[derive(Debug, Default)]
pub struct StaticSignalSource {
    records: RwLock<HashMap<String, Vec<SignalRecord>>>,
}

impl StaticSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, source_type: &str, record: SignalRecord) {
        self.records
            .write()
            .await
            .entry(source_type.to_ascii_lowercase())
            .or_default()
            .push(record);
    }

    pub async fn extend(&self, source_type: &str, records: impl IntoIterator<Item = SignalRecord>) {
        self.records
            .write()
            .await
            .entry(source_type.to_ascii_lowercase())
            .or_default()
            .extend(records);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SignalSource for StaticSignalSource {
    async fn fetch(&self, rule: &DiscoveryRule) -> LineageResult<Vec<SignalRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&rule.source_type.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shapes_deserialize() {
        let text: SignalRecord = serde_json::from_value(json!({
            "id": "q1",
            "system": "warehouse",
            "payload": "select 1"
        }))
        .unwrap();
        assert_eq!(text.payload, SignalPayload::Text("select 1".to_string()));

        let doc: SignalRecord = serde_json::from_value(json!({
            "id": "job-1",
            "system": "warehouse",
            "payload": {"connector_type": "dbt"}
        }))
        .unwrap();
        assert!(matches!(doc.payload, SignalPayload::Structured(_)));
    }

    #[tokio::test]
    async fn test_static_source_fetches_by_source_type() {
        let source = StaticSignalSource::new();
        source.push("QUERY_LOG", SignalRecord::text("q1", "warehouse", "select 1")).await;
        source
            .push("etl_job", SignalRecord::structured("j1", "warehouse", json!({})))
            .await;

        let rule = DiscoveryRule::new("q", "query_log", json!({}));
        let records = source.fetch(&rule).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "q1");
        assert_eq!(source.len().await, 2);
    }
}
