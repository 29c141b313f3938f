//! Discovery Engine
//!
//! Turns raw signals (query logs, ETL job definitions) into candidate
//! lineage edges. Candidates are stored apart from canonical edges and stay
//! invisible to traversal until an operator verifies them.
//!
//! Rules run concurrently. Each rule's candidate set is independent, so the
//! only shared state is the store, where writes are idempotent upserts. A
//! failing rule is recorded in the report and never aborts its siblings.

pub mod etl;
pub mod query_log;
pub mod rules;
pub mod signals;

pub use etl::EtlJobMatcher;
pub use query_log::QueryLogMatcher;
pub use rules::{CreateDiscoveryRuleRequest, DiscoveryRule};
pub use signals::{SignalPayload, SignalRecord, SignalSource, StaticSignalSource};

use crate::config::DiscoveryConfig;
use crate::error::{ErrorSummary, LineageError, LineageResult};
use crate::models::{DiscoveredEdge, NewCandidate, NewNode, NodeKey};
use crate::store::{DiscoveryStore, GraphStore};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A relationship proposed by a matcher
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEdge {
    pub source: NodeKey,
    pub target: NodeKey,
    pub edge_type: String,
    pub confidence: f64,
    pub evidence: serde_json::Value,
}

/// Source-type specific recognizer. Pure: reads records, proposes edges.
pub trait PatternMatcher: Send + Sync {
    /// Rule source types this matcher handles
    fn source_types(&self) -> &'static [&'static str];

    fn match_signals(
        &self,
        rule: &DiscoveryRule,
        records: &[SignalRecord],
    ) -> LineageResult<Vec<MatchedEdge>>;
}

/// Confidence for a rule: the `confidence` pattern option or the default
pub(crate) fn rule_confidence(rule: &DiscoveryRule, default: f64) -> LineageResult<f64> {
    let confidence = rule.pattern_f64("confidence").unwrap_or(default);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(LineageError::Validation(format!(
            "rule '{}' confidence must be within [0, 1], got {}",
            rule.name, confidence
        )));
    }
    Ok(confidence)
}

/// A rule that failed during a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFailure {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub error: ErrorSummary,
}

/// Outcome of a discovery run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    /// Candidates written by this run, once each
    pub discovered: Vec<DiscoveredEdge>,
    pub failures: Vec<RuleFailure>,
    pub cancelled: bool,
}

struct RuleOutcome {
    candidates: Vec<DiscoveredEdge>,
    cancelled: bool,
}

/// The discovery engine
pub struct DiscoveryEngine {
    matchers: HashMap<&'static str, Arc<dyn PatternMatcher>>,
    signals: Arc<dyn SignalSource>,
}

impl DiscoveryEngine {
    /// Engine with the built-in query-log and ETL matchers
    pub fn new(config: &DiscoveryConfig, signals: Arc<dyn SignalSource>) -> Self {
        Self {
            matchers: HashMap::new(),
            signals,
        }
        .with_matcher(Arc::new(QueryLogMatcher::new(config.query_log_confidence)))
        .with_matcher(Arc::new(EtlJobMatcher::new(config.etl_confidence)))
    }

    /// Register a matcher for every source type it claims
    pub fn with_matcher(mut self, matcher: Arc<dyn PatternMatcher>) -> Self {
        for &source_type in matcher.source_types() {
            self.matchers.insert(source_type, matcher.clone());
        }
        self
    }

    pub fn supports(&self, source_type: &str) -> bool {
        self.matchers.contains_key(source_type.to_ascii_lowercase().as_str())
    }

    /// Run `rules` concurrently and write their candidates
    pub async fn run<S>(
        &self,
        store: &S,
        rules: Vec<DiscoveryRule>,
        cancel: &CancellationToken,
    ) -> DiscoveryReport
    where
        S: GraphStore + DiscoveryStore + ?Sized,
    {
        info!("Running {} discovery rules", rules.len());

        let outcomes = join_all(rules.iter().map(|rule| self.run_rule(store, rule, cancel))).await;

        let mut report = DiscoveryReport::default();
        let mut seen: HashSet<Uuid> = HashSet::new();
        for (rule, outcome) in rules.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => {
                    report.cancelled |= outcome.cancelled;
                    for candidate in outcome.candidates {
                        if seen.insert(candidate.id) {
                            report.discovered.push(candidate);
                        }
                    }
                }
                Err(e) => {
                    warn!("Discovery rule '{}' ({}) failed: {}", rule.name, rule.id, e);
                    report.failures.push(RuleFailure {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        error: e.summarize(),
                    });
                }
            }
        }

        info!(
            "Discovery finished: {} candidates, {} failed rules{}",
            report.discovered.len(),
            report.failures.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    async fn run_rule<S>(
        &self,
        store: &S,
        rule: &DiscoveryRule,
        cancel: &CancellationToken,
    ) -> LineageResult<RuleOutcome>
    where
        S: GraphStore + DiscoveryStore + ?Sized,
    {
        let source_type = rule.source_type.to_ascii_lowercase();
        let matcher = self
            .matchers
            .get(source_type.as_str())
            .ok_or_else(|| LineageError::UnsupportedDiscoverySource(rule.source_type.clone()))?;

        if cancel.is_cancelled() {
            return Ok(RuleOutcome {
                candidates: Vec::new(),
                cancelled: true,
            });
        }

        let records = self.signals.fetch(rule).await?;
        let matched = matcher.match_signals(rule, &records)?;
        debug!(
            "Rule '{}' matched {} edges from {} signals",
            rule.name,
            matched.len(),
            records.len()
        );

        // Merge duplicates proposed within one rule; the last proposal wins
        let mut merged: Vec<MatchedEdge> = Vec::with_capacity(matched.len());
        let mut index: HashMap<(NodeKey, NodeKey, String), usize> = HashMap::new();
        for edge in matched {
            let key = (edge.source.clone(), edge.target.clone(), edge.edge_type.clone());
            match index.get(&key) {
                Some(&i) => merged[i] = edge,
                None => {
                    index.insert(key, merged.len());
                    merged.push(edge);
                }
            }
        }

        let mut candidates = Vec::with_capacity(merged.len());
        let mut cancelled = false;
        for edge in merged {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            // Discovery never overwrites curated node attributes
            let source = store.ensure_node(NewNode::from_key(edge.source)).await?;
            let target = store.ensure_node(NewNode::from_key(edge.target)).await?;
            let candidate = store
                .upsert_candidate(NewCandidate {
                    rule_id: rule.id,
                    source_node_id: source.id,
                    target_node_id: target.id,
                    edge_type: edge.edge_type,
                    confidence: edge.confidence,
                    evidence: edge.evidence,
                })
                .await?;
            candidates.push(candidate);
        }

        if !cancelled {
            store.mark_rule_run(rule.id, Utc::now()).await?;
        }

        Ok(RuleOutcome {
            candidates,
            cancelled,
        })
    }
}
