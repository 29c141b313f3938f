//! Column-level lineage models
//!
//! Columns are ordinary lineage nodes with resource type `column` and a
//! resource id of `table.column`, where the table may be schema-qualified.
//! Column edges live in the same graph as table edges; the column view
//! filters traversal to column nodes.

use crate::error::{LineageError, LineageResult};
use crate::models::edge::Edge;
use crate::models::node::{Node, NodeKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Resource type carried by every column node
pub const COLUMN_RESOURCE_TYPE: &str = "column";

/// Default edge type for column derivations
fn default_column_edge_type() -> String {
    "derive".to_string()
}

/// A column addressed by system, table and column name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub system: String,
    /// Table name, optionally schema-qualified (`analytics.orders`)
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(
        system: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    /// The node key this column is stored under
    pub fn key(&self) -> LineageResult<NodeKey> {
        let table = self.table.trim();
        let column = self.column.trim();
        if table.is_empty() || column.is_empty() || column.contains('.') {
            return Err(LineageError::InvalidNodeKey(self.to_string()));
        }
        NodeKey::new(
            self.system.trim(),
            COLUMN_RESOURCE_TYPE,
            format!("{}.{}", table, column),
        )
    }

    /// Read a column back out of a node key; `None` for non-column keys
    pub fn from_key(key: &NodeKey) -> Option<Self> {
        if key.resource_type != COLUMN_RESOURCE_TYPE {
            return None;
        }
        let (table, column) = key.resource_id.rsplit_once('.')?;
        Some(Self::new(key.system.clone(), table, column))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.system, self.table, self.column)
    }
}

impl FromStr for ColumnRef {
    type Err = LineageError;

    /// Parses `system:table.column`; the table may itself contain dots
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = s.split_once(':').and_then(|(system, rest)| {
            let (table, column) = rest.rsplit_once('.')?;
            Some(Self::new(system, table, column))
        });
        let column = parsed.ok_or_else(|| LineageError::InvalidNodeKey(s.to_string()))?;
        column.key()?;
        Ok(column)
    }
}

/// One column in a column-lineage view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub node_id: Uuid,
    #[serde(flatten)]
    pub column: ColumnRef,
    /// Edges from the viewed column; zero for the column itself
    pub hop_distance: u32,
}

impl ColumnView {
    pub fn from_node(node: &Node, hop_distance: u32) -> Option<Self> {
        Some(Self {
            node_id: node.id,
            column: ColumnRef::from_key(&node.key)?,
            hop_distance,
        })
    }
}

/// Columns a column is derived from and columns derived from it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnLineage {
    pub column: ColumnView,
    pub upstream: Vec<ColumnView>,
    pub downstream: Vec<ColumnView>,
    pub edges: Vec<Edge>,
    pub cancelled: bool,
}

/// Request to record that one column is derived from another. Missing
/// column nodes are created.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackColumnLineageRequest {
    pub source: ColumnRef,
    pub target: ColumnRef,

    #[serde(default = "default_column_edge_type")]
    #[validate(length(min = 1, max = 64, message = "Edge type must be between 1 and 64 characters"))]
    pub edge_type: String,

    #[serde(default)]
    pub transformation: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_key_round_trips_schema_qualified_tables() {
        let column = ColumnRef::new("warehouse", "analytics.orders", "amount");
        let key = column.key().unwrap();
        assert_eq!(key.to_string(), "warehouse:column:analytics.orders.amount");
        assert_eq!(ColumnRef::from_key(&key), Some(column));
    }

    #[test]
    fn test_table_keys_are_not_columns() {
        let key = NodeKey::table("warehouse", "orders").unwrap();
        assert!(ColumnRef::from_key(&key).is_none());
    }

    #[test]
    fn test_parse_column_reference() {
        let column: ColumnRef = "warehouse:raw.orders.amount".parse().unwrap();
        assert_eq!(column.table, "raw.orders");
        assert_eq!(column.column, "amount");
        assert!("warehouse:orders".parse::<ColumnRef>().is_err());
        assert!("orders.amount".parse::<ColumnRef>().is_err());
    }
}
