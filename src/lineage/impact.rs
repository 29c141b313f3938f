//! Impact Analyzer
//!
//! Answers "what breaks if this resource changes?" by combining traversal
//! results with the scoring policy. Affected resources are classified by hop
//! distance, weighted into a single score, bucketed into a risk level and
//! turned into operator guidance.

use crate::error::{LineageError, LineageResult};
use crate::lineage::paths::PathFinder;
use crate::lineage::scoring::ScoringPolicy;
use crate::lineage::traversal::{TraversalEngine, TraversalResult};
use crate::models::{
    AffectedResource, Criticality, ImpactAnalysis, ImpactDirection, ImpactLevel, NodeKey,
    RiskLevel,
};
use crate::store::GraphStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// The impact analyzer
#[derive(Debug, Clone)]
pub struct ImpactAnalyzer {
    traversal: TraversalEngine,
    paths: PathFinder,
    policy: ScoringPolicy,
}

impl ImpactAnalyzer {
    pub fn new(traversal: TraversalEngine, paths: PathFinder, policy: ScoringPolicy) -> Self {
        Self {
            traversal,
            paths,
            policy,
        }
    }

    /// Analyze the blast radius of a change to `key`.
    ///
    /// With `Both`, upstream resources are listed before downstream ones and
    /// a node reachable both ways appears once per direction.
    pub async fn analyze<S>(
        &self,
        store: &S,
        key: &NodeKey,
        direction: ImpactDirection,
        max_depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> LineageResult<ImpactAnalysis>
    where
        S: GraphStore + ?Sized,
    {
        let node = store
            .get_node(key)
            .await?
            .ok_or_else(|| LineageError::NodeNotFound(key.to_string()))?;

        let mut affected = Vec::new();
        let mut critical_paths = Vec::new();
        let mut cancelled = false;

        for &traversal in direction.traversals() {
            let Some(result) = self
                .traversal
                .traverse(store, node.id, traversal, max_depth, cancel)
                .await?
            else {
                return Err(LineageError::NodeNotFound(key.to_string()));
            };
            cancelled |= result.cancelled;
            affected.extend(classify(&result));

            if cancelled {
                break;
            }

            let (paths, paths_cancelled) = self
                .paths
                .critical_paths(store, &node, traversal, cancel)
                .await?;
            critical_paths.extend(paths);
            cancelled |= paths_cancelled;
            if cancelled {
                break;
            }
        }

        // Merge per-direction chains shortest first, keeping the cap
        critical_paths.sort_by_key(|p| p.total_hops);
        critical_paths.truncate(self.policy.critical_path_limit);

        let impact_score = self.policy.impact_score(&affected);
        let risk_level = self.policy.risk_level(impact_score, affected.len());
        let recommendations =
            self.recommendations(node.system(), &affected, critical_paths.len(), impact_score, risk_level);

        if cancelled {
            warn!("Impact analysis for {} cancelled; results are partial", key);
        } else {
            info!(
                "Impact analysis for {} ({}): {} affected, score {:.2}, risk {}",
                key,
                direction.as_str(),
                affected.len(),
                impact_score,
                risk_level.as_str()
            );
        }

        Ok(ImpactAnalysis {
            id: Uuid::new_v4(),
            node_id: node.id,
            resource_key: node.key.clone(),
            direction,
            affected_resources: affected,
            impact_score,
            critical_paths,
            risk_level,
            recommendations,
            cancelled,
            created_at: Utc::now(),
        })
    }

    /// Ordered, cumulative guidance rules with a fallback
    fn recommendations(
        &self,
        source_system: &str,
        affected: &[AffectedResource],
        critical_path_count: usize,
        score: f64,
        risk: RiskLevel,
    ) -> Vec<String> {
        let mut out = Vec::new();

        if risk >= RiskLevel::High {
            out.push("High impact detected. Consider implementing change management process.".to_string());
            out.push("Notify all affected downstream systems before making changes.".to_string());
            out.push("Run comprehensive tests on affected resources.".to_string());
        }

        if critical_path_count > self.policy.critical_path_alert_count {
            out.push("Multiple critical paths detected. Consider breaking dependencies.".to_string());
        }

        if score > self.policy.staged_rollout_score {
            out.push("Consider implementing feature flags or gradual rollout.".to_string());
            out.push("Document all dependencies for future reference.".to_string());
        }

        let cross_system = affected
            .iter()
            .any(|r| !r.system.is_empty() && r.system != source_system);
        if cross_system {
            out.push("Cross-system dependencies detected. Coordinate with other teams.".to_string());
        }

        if out.is_empty() {
            out.push("Impact is manageable. Proceed with standard change process.".to_string());
        }
        out
    }
}

fn classify(result: &TraversalResult) -> Vec<AffectedResource> {
    result
        .nodes
        .iter()
        .map(|reached| AffectedResource {
            node_id: reached.node.id,
            resource_key: reached.node.key.clone(),
            resource_name: reached.node.display_name.clone(),
            system: reached.node.key.system.clone(),
            direction: result.direction,
            hop_distance: reached.hop_distance,
            impact_level: ImpactLevel::from_hops(reached.hop_distance),
            criticality: Criticality::from_hops(reached.hop_distance),
        })
        .collect()
}
