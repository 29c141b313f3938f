//! ETL-job matcher
//!
//! Reads job definitions exported from orchestration and ingestion tools
//! (dbt, Airflow, Fivetran) and links every declared input to every declared
//! output.

use crate::discovery::rules::DiscoveryRule;
use crate::discovery::signals::{SignalPayload, SignalRecord};
use crate::discovery::{rule_confidence, MatchedEdge, PatternMatcher};
use crate::error::LineageResult;
use crate::models::NodeKey;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const DEFAULT_CONNECTORS: &[&str] = &["dbt", "airflow", "fivetran"];

/// A job input or output: a bare resource id in the record's system, or a
/// fully spelled-out resource
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ResourceRef {
    Id(String),
    Full {
        #[serde(default)]
        system: Option<String>,
        #[serde(default, alias = "resourceType")]
        resource_type: Option<String>,
        #[serde(alias = "resourceId")]
        resource_id: String,
    },
}

impl ResourceRef {
    fn to_key(&self, default_system: &str) -> LineageResult<NodeKey> {
        match self {
            ResourceRef::Id(id) => NodeKey::table(default_system, id),
            ResourceRef::Full {
                system,
                resource_type,
                resource_id,
            } => NodeKey::new(
                system.as_deref().unwrap_or(default_system),
                resource_type.as_deref().unwrap_or("table"),
                resource_id,
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JobDocument {
    #[serde(alias = "connectorType")]
    connector_type: String,
    #[serde(default, alias = "jobName")]
    job_name: Option<String>,
    #[serde(default, alias = "inputs")]
    sources: Vec<ResourceRef>,
    #[serde(default, alias = "outputs")]
    targets: Vec<ResourceRef>,
}

/// Matcher for `etl_job` rules
#[derive(Debug, Clone)]
pub struct EtlJobMatcher {
    default_confidence: f64,
}

impl EtlJobMatcher {
    pub fn new(default_confidence: f64) -> Self {
        Self { default_confidence }
    }

    fn edge_type_for(connector: &str) -> &'static str {
        match connector {
            "fivetran" => "sync",
            _ => "transform",
        }
    }
}

impl PatternMatcher for EtlJobMatcher {
    fn source_types(&self) -> &'static [&'static str] {
        &["etl_job"]
    }

    fn match_signals(
        &self,
        rule: &DiscoveryRule,
        records: &[SignalRecord],
    ) -> LineageResult<Vec<MatchedEdge>> {
        let confidence = rule_confidence(rule, self.default_confidence)?;
        let connectors = rule
            .pattern_strings("connector_types")
            .unwrap_or_else(|| DEFAULT_CONNECTORS.iter().map(|c| c.to_string()).collect());
        let edge_type_override = rule.pattern_str("edge_type").map(str::to_string);

        let mut matched = Vec::new();
        for record in records {
            let SignalPayload::Structured(doc) = &record.payload else {
                debug!("Signal {} is not a job document", record.id);
                continue;
            };
            let job: JobDocument = match serde_json::from_value(doc.clone()) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Skipping malformed job document {}: {}", record.id, e);
                    continue;
                }
            };

            let connector = job.connector_type.to_ascii_lowercase();
            if !connectors.contains(&connector) {
                debug!("Skipping {} job {}", connector, record.id);
                continue;
            }

            let resolve = |refs: &[ResourceRef]| -> Vec<NodeKey> {
                refs.iter()
                    .filter_map(|r| match r.to_key(&record.system) {
                        Ok(key) => Some(key),
                        Err(e) => {
                            warn!("Skipping resource in job {}: {}", record.id, e);
                            None
                        }
                    })
                    .collect()
            };
            let sources = resolve(&job.sources);
            let targets = resolve(&job.targets);

            let edge_type = edge_type_override
                .clone()
                .unwrap_or_else(|| Self::edge_type_for(&connector).to_string());

            for source in &sources {
                for target in targets.iter().filter(|t| *t != source) {
                    matched.push(MatchedEdge {
                        source: source.clone(),
                        target: target.clone(),
                        edge_type: edge_type.clone(),
                        confidence,
                        evidence: json!({
                            "connector_type": connector,
                            "job_name": job.job_name,
                            "signal_id": record.id,
                        }),
                    });
                }
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rule(pattern: serde_json::Value) -> DiscoveryRule {
        DiscoveryRule::new("jobs", "etl_job", pattern)
    }

    #[test]
    fn test_dbt_job_links_inputs_to_outputs() {
        let records = vec![SignalRecord::structured(
            "run-1",
            "warehouse",
            json!({
                "connector_type": "dbt",
                "job_name": "orders_model",
                "inputs": ["raw_orders", {"system": "lake", "resource_id": "events"}],
                "outputs": ["orders"]
            }),
        )];

        let matched = EtlJobMatcher::new(0.9).match_signals(&rule(json!({})), &records).unwrap();

        let pairs: Vec<(String, String)> = matched
            .iter()
            .map(|m| (m.source.to_string(), m.target.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("warehouse:table:raw_orders".to_string(), "warehouse:table:orders".to_string()),
                ("lake:table:events".to_string(), "warehouse:table:orders".to_string()),
            ]
        );
        assert!(matched.iter().all(|m| m.edge_type == "transform" && m.confidence == 0.9));
        assert_eq!(matched[0].evidence["job_name"], json!("orders_model"));
    }

    #[test]
    fn test_fivetran_syncs_and_unknown_connectors_are_skipped() {
        let records = vec![
            SignalRecord::structured(
                "sync-1",
                "salesforce",
                json!({"connector_type": "Fivetran", "sources": ["account"], "targets": [{"system": "warehouse", "resource_id": "sf_account"}]}),
            ),
            SignalRecord::structured(
                "x-1",
                "warehouse",
                json!({"connector_type": "cron", "sources": ["a"], "targets": ["b"]}),
            ),
            SignalRecord::text("q", "warehouse", "select 1"),
        ];

        let matched = EtlJobMatcher::new(0.9).match_signals(&rule(json!({})), &records).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].edge_type, "sync");
        assert_eq!(matched[0].target.to_string(), "warehouse:table:sf_account");
    }

    #[test]
    fn test_pattern_overrides() {
        let records = vec![SignalRecord::structured(
            "x-1",
            "warehouse",
            json!({"connector_type": "cron", "sources": ["a"], "targets": ["b"]}),
        )];
        let matched = EtlJobMatcher::new(0.9)
            .match_signals(
                &rule(json!({"connector_types": ["cron"], "edge_type": "copy", "confidence": 0.5})),
                &records,
            )
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].edge_type, "copy");
        assert_eq!(matched[0].confidence, 0.5);
    }
}
