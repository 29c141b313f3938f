//! Discovery rules
//!
//! A rule binds a signal source type (`query_log`, `etl_job`, ...) to a
//! pattern configuration. Rules are stored, enabled or disabled, and stamped
//! with the time of their last run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A discovery rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Tag selecting the signal feed and matcher
    pub source_type: String,
    /// Matcher options, opaque to the engine
    pub pattern: serde_json::Value,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscoveryRule {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, pattern: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            source_type: source_type.into(),
            pattern,
            enabled: true,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// String list option, e.g. `pattern_types`
    pub fn pattern_strings(&self, key: &str) -> Option<Vec<String>> {
        self.pattern.get(key)?.as_array().map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_ascii_lowercase()))
                .collect()
        })
    }

    pub fn pattern_f64(&self, key: &str) -> Option<f64> {
        self.pattern.get(key)?.as_f64()
    }

    pub fn pattern_u64(&self, key: &str) -> Option<u64> {
        self.pattern.get(key)?.as_u64()
    }

    pub fn pattern_str(&self, key: &str) -> Option<&str> {
        self.pattern.get(key)?.as_str()
    }
}

/// Request to register a discovery rule
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiscoveryRuleRequest {
    /// Fixed id, so re-seeding the same rule updates it in place
    #[serde(default)]
    pub id: Option<Uuid>,

    #[validate(length(min = 1, max = 255, message = "Rule name must be between 1 and 255 characters"))]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[validate(length(min = 1, max = 64, message = "Source type is required"))]
    pub source_type: String,

    #[serde(default)]
    pub pattern: Option<serde_json::Value>,

    #[serde(default)]
    pub enabled: Option<bool>,
}

impl From<CreateDiscoveryRuleRequest> for DiscoveryRule {
    fn from(req: CreateDiscoveryRuleRequest) -> Self {
        let mut rule = DiscoveryRule::new(
            req.name,
            req.source_type.to_ascii_lowercase(),
            req.pattern
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        );
        if let Some(id) = req.id {
            rule.id = id;
        }
        rule.description = req.description.unwrap_or_default();
        rule.enabled = req.enabled.unwrap_or(true);
        rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pattern_accessors() {
        let rule = DiscoveryRule::new(
            "ctas",
            "query_log",
            json!({"pattern_types": ["CREATE_TABLE_AS"], "confidence": 0.6, "min_frequency": 2}),
        );
        assert_eq!(rule.pattern_strings("pattern_types"), Some(vec!["create_table_as".to_string()]));
        assert_eq!(rule.pattern_f64("confidence"), Some(0.6));
        assert_eq!(rule.pattern_u64("min_frequency"), Some(2));
        assert_eq!(rule.pattern_str("missing"), None);
    }

    #[test]
    fn test_request_defaults() {
        let req = CreateDiscoveryRuleRequest {
            id: None,
            name: "jobs".to_string(),
            description: None,
            source_type: "ETL_JOB".to_string(),
            pattern: None,
            enabled: None,
        };
        assert!(req.validate().is_ok());
        let rule = DiscoveryRule::from(req);
        assert_eq!(rule.source_type, "etl_job");
        assert!(rule.enabled);
        assert!(rule.last_run_at.is_none());
    }
}
