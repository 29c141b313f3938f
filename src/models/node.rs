//! Lineage node models and DTOs

use crate::error::{LineageError, LineageResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Key segments (system, resource type) must look like identifiers
static KEY_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid key-part regex"));

/// Composite identity of a data asset: `(system, resourceType, resourceId)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKey {
    pub system: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl NodeKey {
    /// Build a key, rejecting empty or malformed segments
    pub fn new(
        system: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> LineageResult<Self> {
        let key = Self {
            system: system.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        };
        key.check()?;
        Ok(key)
    }

    /// Shorthand for table assets, the most common node kind
    pub fn table(system: impl Into<String>, table: impl Into<String>) -> LineageResult<Self> {
        Self::new(system, "table", table)
    }

    fn check(&self) -> LineageResult<()> {
        if !KEY_PART.is_match(&self.system) || !KEY_PART.is_match(&self.resource_type) {
            return Err(LineageError::InvalidNodeKey(self.to_string()));
        }
        if self.resource_id.trim().is_empty() {
            return Err(LineageError::InvalidNodeKey(self.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.system, self.resource_type, self.resource_id)
    }
}

impl FromStr for NodeKey {
    type Err = LineageError;

    /// Parses `system:resource_type:resource_id`; the id may contain `:`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(system), Some(resource_type), Some(resource_id)) => {
                Self::new(system, resource_type, resource_id)
                    .map_err(|_| LineageError::InvalidNodeKey(s.to_string()))
            }
            _ => Err(LineageError::InvalidNodeKey(s.to_string())),
        }
    }
}

/// A stored lineage node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,
    pub key: NodeKey,
    /// Kind of asset: table, column, report, job, ...
    pub node_type: String,
    pub display_name: String,
    /// Free-form metadata bag, stored opaquely
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn system(&self) -> &str {
        &self.key.system
    }
}

/// Node attributes handed to the store for an upsert
#[derive(Debug, Clone)]
pub struct NewNode {
    pub key: NodeKey,
    pub node_type: String,
    pub display_name: String,
    pub metadata: serde_json::Value,
}

impl NewNode {
    /// A bare node whose display name is its resource id
    pub fn from_key(key: NodeKey) -> Self {
        Self {
            node_type: key.resource_type.clone(),
            display_name: key.resource_id.clone(),
            metadata: serde_json::Value::Object(Default::default()),
            key,
        }
    }
}

/// Request to create (or update) a lineage node
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    #[validate(length(min = 1, max = 128, message = "System must be between 1 and 128 characters"))]
    #[validate(custom(function = "validate_key_part"))]
    pub system: String,

    #[validate(length(min = 1, max = 64, message = "Resource type must be between 1 and 64 characters"))]
    #[validate(custom(function = "validate_key_part"))]
    pub resource_type: String,

    #[validate(length(min = 1, max = 512, message = "Resource id must be between 1 and 512 characters"))]
    pub resource_id: String,

    #[serde(default)]
    pub node_type: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl CreateNodeRequest {
    pub fn into_new_node(self) -> LineageResult<NewNode> {
        let key = NodeKey::new(self.system, self.resource_type, self.resource_id)?;
        Ok(NewNode {
            node_type: self.node_type.unwrap_or_else(|| key.resource_type.clone()),
            display_name: self.display_name.unwrap_or_else(|| key.resource_id.clone()),
            metadata: self
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            key,
        })
    }
}

fn validate_key_part(value: &str) -> Result<(), validator::ValidationError> {
    if !KEY_PART.is_match(value) {
        let mut err = validator::ValidationError::new("invalid_key_part");
        err.message = Some(
            "Must start with a letter, digit or underscore and contain only letters, digits, '_', '.', '-'"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}
