//! Captured transformation logic
//!
//! The code that turns one resource into another (a SQL statement, a dbt
//! model, an Airflow task), kept as an append-only log per node pair so the
//! latest capture is always at hand next to the lineage edge.

use crate::error::LineageError;
use crate::models::node::NodeKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Where a piece of transformation logic came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationType {
    Sql,
    Dbt,
    Airflow,
    Python,
    Custom,
}

impl TransformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Sql => "sql",
            TransformationType::Dbt => "dbt",
            TransformationType::Airflow => "airflow",
            TransformationType::Python => "python",
            TransformationType::Custom => "custom",
        }
    }

    /// Language assumed when the caller gives none
    pub fn default_language(&self) -> &'static str {
        match self {
            TransformationType::Sql | TransformationType::Dbt => "sql",
            TransformationType::Airflow | TransformationType::Python => "python",
            TransformationType::Custom => "text",
        }
    }

    /// Producing system assumed when the caller gives none
    pub fn default_source_system(&self) -> &'static str {
        match self {
            TransformationType::Sql => "warehouse",
            TransformationType::Dbt => "dbt",
            TransformationType::Airflow => "airflow",
            TransformationType::Python | TransformationType::Custom => "custom",
        }
    }

    /// Orchestration framework recorded in metadata, if any
    fn framework(&self) -> Option<&'static str> {
        match self {
            TransformationType::Dbt => Some("dbt"),
            TransformationType::Airflow => Some("airflow"),
            _ => None,
        }
    }
}

impl FromStr for TransformationType {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" => Ok(TransformationType::Sql),
            "dbt" => Ok(TransformationType::Dbt),
            "airflow" => Ok(TransformationType::Airflow),
            "python" => Ok(TransformationType::Python),
            "custom" => Ok(TransformationType::Custom),
            other => Err(LineageError::Validation(format!(
                "unknown transformation type '{}'",
                other
            ))),
        }
    }
}

/// Which end of the captured derivation a node is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationSide {
    /// Logic that reads from the node
    #[default]
    Source,
    /// Logic that produces the node
    Target,
}

impl FromStr for TransformationSide {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(TransformationSide::Source),
            "target" => Ok(TransformationSide::Target),
            other => Err(LineageError::Validation(format!(
                "unknown transformation side '{}' (expected source or target)",
                other
            ))),
        }
    }
}

/// A stored capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformation {
    pub id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub transformation_type: TransformationType,
    /// The code itself
    pub logic: String,
    pub language: String,
    pub source_system: String,
    pub metadata: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Capture attributes handed to the store
#[derive(Debug, Clone)]
pub struct NewTransformation {
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub transformation_type: TransformationType,
    pub logic: String,
    pub language: String,
    pub source_system: String,
    pub metadata: serde_json::Value,
}

/// Request to capture the logic deriving `target` from `source`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTransformationRequest {
    pub source: NodeKey,
    pub target: NodeKey,
    pub transformation_type: TransformationType,

    #[validate(length(min = 1, message = "Transformation logic is required"))]
    pub logic: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 32, message = "Language must be between 1 and 32 characters"))]
    pub language: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "Source system must be between 1 and 64 characters"))]
    pub source_system: Option<String>,

    /// Free-form details: dbt model name, Airflow dag and task ids, ...
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl CaptureTransformationRequest {
    /// Fill defaults from the transformation type. dbt and Airflow captures
    /// record their framework in metadata.
    pub fn into_new_transformation(self, source_node_id: Uuid, target_node_id: Uuid) -> NewTransformation {
        let kind = self.transformation_type;
        let mut metadata = match self.metadata {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        if let Some(framework) = kind.framework() {
            metadata
                .entry("framework")
                .or_insert_with(|| serde_json::Value::from(framework));
        }

        NewTransformation {
            source_node_id,
            target_node_id,
            transformation_type: kind,
            logic: self.logic,
            language: self.language.unwrap_or_else(|| kind.default_language().to_string()),
            source_system: self
                .source_system
                .unwrap_or_else(|| kind.default_source_system().to_string()),
            metadata: serde_json::Value::Object(metadata),
        }
    }
}
