//! Scoring policy
//!
//! The numeric constants behind impact scores, risk buckets and path
//! confidence. Defaults reproduce the long-standing values; every field can
//! be overridden per deployment through `Settings`.

use crate::models::{AffectedResource, Criticality, RiskLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringPolicy {
    pub weight_critical: f64,
    pub weight_high: f64,
    pub weight_medium: f64,
    pub weight_low: f64,

    pub risk_critical_score: f64,
    pub risk_high_score: f64,
    pub risk_medium_score: f64,
    pub risk_critical_count: usize,
    pub risk_high_count: usize,
    pub risk_medium_count: usize,

    /// Confidence lost per hop along a path
    pub confidence_decay: f64,
    /// Floor for path-finder confidence
    pub path_confidence_floor: f64,
    /// Floor for critical-path confidence
    pub critical_path_confidence_floor: f64,
    pub critical_path_limit: usize,
    pub critical_path_max_depth: u32,

    /// Critical paths above this count trigger dependency-reduction guidance
    pub critical_path_alert_count: usize,
    /// Scores above this trigger staged-rollout guidance
    pub staged_rollout_score: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weight_critical: 1.0,
            weight_high: 0.75,
            weight_medium: 0.5,
            weight_low: 0.25,
            risk_critical_score: 0.8,
            risk_high_score: 0.6,
            risk_medium_score: 0.4,
            risk_critical_count: 50,
            risk_high_count: 20,
            risk_medium_count: 10,
            confidence_decay: 0.1,
            path_confidence_floor: 0.3,
            critical_path_confidence_floor: 0.5,
            critical_path_limit: 10,
            critical_path_max_depth: 5,
            critical_path_alert_count: 5,
            staged_rollout_score: 0.7,
        }
    }
}

impl ScoringPolicy {
    /// Check weights and thresholds are within `[0, 1]` and the
    /// thresholds are ordered
    pub fn validate(&self) -> Result<(), String> {
        let unit = [
            ("weight_critical", self.weight_critical),
            ("weight_high", self.weight_high),
            ("weight_medium", self.weight_medium),
            ("weight_low", self.weight_low),
            ("risk_critical_score", self.risk_critical_score),
            ("risk_high_score", self.risk_high_score),
            ("risk_medium_score", self.risk_medium_score),
            ("confidence_decay", self.confidence_decay),
            ("path_confidence_floor", self.path_confidence_floor),
            ("critical_path_confidence_floor", self.critical_path_confidence_floor),
            ("staged_rollout_score", self.staged_rollout_score),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if !(self.risk_critical_score >= self.risk_high_score
            && self.risk_high_score >= self.risk_medium_score)
        {
            return Err("risk score thresholds must be ordered critical >= high >= medium".to_string());
        }
        if !(self.risk_critical_count >= self.risk_high_count
            && self.risk_high_count >= self.risk_medium_count)
        {
            return Err("risk count thresholds must be ordered critical >= high >= medium".to_string());
        }
        if self.critical_path_max_depth == 0 {
            return Err("critical_path_max_depth must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn criticality_weight(&self, criticality: Criticality) -> f64 {
        match criticality {
            Criticality::Critical => self.weight_critical,
            Criticality::High => self.weight_high,
            Criticality::Medium => self.weight_medium,
            Criticality::Low => self.weight_low,
        }
    }

    /// `Σ(w·cw) / Σw` with `w = 1/hops`, clamped to `[0, 1]`;
    /// an empty set scores zero
    pub fn impact_score(&self, affected: &[AffectedResource]) -> f64 {
        if affected.is_empty() {
            return 0.0;
        }

        let mut score = 0.0;
        let mut total_weight = 0.0;
        for resource in affected {
            let weight = 1.0 / f64::from(resource.hop_distance.max(1));
            total_weight += weight;
            score += weight * self.criticality_weight(resource.criticality);
        }

        if total_weight > 0.0 {
            score /= total_weight;
        }
        score.clamp(0.0, 1.0)
    }

    pub fn risk_level(&self, score: f64, affected_count: usize) -> RiskLevel {
        if score >= self.risk_critical_score || affected_count >= self.risk_critical_count {
            RiskLevel::Critical
        } else if score >= self.risk_high_score || affected_count >= self.risk_high_count {
            RiskLevel::High
        } else if score >= self.risk_medium_score || affected_count >= self.risk_medium_count {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Path-finder confidence for a path with `hops` edges
    pub fn path_confidence(&self, hops: u32) -> f64 {
        self.decayed(hops, self.path_confidence_floor)
    }

    /// Critical-path confidence for a chain of `hops` edges
    pub fn critical_path_confidence(&self, hops: u32) -> f64 {
        self.decayed(hops, self.critical_path_confidence_floor)
    }

    fn decayed(&self, hops: u32, floor: f64) -> f64 {
        (1.0 - self.confidence_decay * f64::from(hops)).max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImpactLevel, NodeKey, TraversalDirection};
    use uuid::Uuid;

    fn affected(hops: u32) -> AffectedResource {
        AffectedResource {
            node_id: Uuid::new_v4(),
            resource_key: NodeKey::table("warehouse", format!("t{}", hops)).unwrap(),
            resource_name: format!("t{}", hops),
            system: "warehouse".to_string(),
            direction: TraversalDirection::Downstream,
            hop_distance: hops,
            impact_level: ImpactLevel::from_hops(hops),
            criticality: Criticality::from_hops(hops),
        }
    }

    #[test]
    fn test_empty_set_scores_zero() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.impact_score(&[]), 0.0);
        assert_eq!(policy.risk_level(0.0, 0), RiskLevel::Low);
    }

    #[test]
    fn test_weighted_score() {
        let policy = ScoringPolicy::default();
        // (1.0 * 1.0 + 0.5 * 0.75) / 1.5
        let score = policy.impact_score(&[affected(1), affected(2)]);
        assert!((score - 1.375 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_risk_thresholds() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.risk_level(0.8, 0), RiskLevel::Critical);
        assert_eq!(policy.risk_level(0.1, 50), RiskLevel::Critical);
        assert_eq!(policy.risk_level(0.6, 0), RiskLevel::High);
        assert_eq!(policy.risk_level(0.1, 20), RiskLevel::High);
        assert_eq!(policy.risk_level(0.4, 0), RiskLevel::Medium);
        assert_eq!(policy.risk_level(0.1, 10), RiskLevel::Medium);
        assert_eq!(policy.risk_level(0.39, 9), RiskLevel::Low);
    }

    #[test]
    fn test_confidence_is_monotonic_and_floored() {
        let policy = ScoringPolicy::default();
        for hops in 0..20 {
            assert!(policy.path_confidence(hops + 1) <= policy.path_confidence(hops));
            assert!(policy.critical_path_confidence(hops + 1) <= policy.critical_path_confidence(hops));
        }
        assert!((policy.path_confidence(1) - 0.9).abs() < 1e-9);
        assert_eq!(policy.path_confidence(15), 0.3);
        assert_eq!(policy.critical_path_confidence(6), 0.5);
    }

    #[test]
    fn test_validate_rejects_out_of_range_weight() {
        let policy = ScoringPolicy {
            weight_low: 1.5,
            ..ScoringPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(ScoringPolicy::default().validate().is_ok());
    }
}
