//! PostgreSQL Graph Store
//!
//! Pooled `tokio-postgres` connections via deadpool. Every write is an
//! `INSERT ... ON CONFLICT DO UPDATE` on the natural key, so concurrent
//! discovery rules and tracking calls can race on the same key safely.
//! Traversal stays in Rust; the store only answers adjacency queries.

use crate::config::DatabaseConfig;
use crate::discovery::DiscoveryRule;
use crate::error::{not_found_error, LineageError, LineageResult};
use crate::models::{
    CandidateStatus, DiscoveredEdge, Edge, ImpactAnalysis, NewCandidate, NewEdge, NewNode,
    NewTransformation, Node, NodeKey, Transformation, TransformationSide,
};
use crate::store::{AnalysisLog, DiscoveryStore, GraphStore, TransformationLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use postgres_types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

const NODE_COLUMNS: &str =
    "id, system, resource_type, resource_id, node_type, display_name, metadata, created_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, source_node_id, target_node_id, edge_type, transformation, created_at, updated_at";

const TRANSFORMATION_COLUMNS: &str =
    "id, source_node_id, target_node_id, transformation_type, logic, language, source_system, metadata, captured_at";

const RULE_COLUMNS: &str =
    "id, name, description, source_type, pattern, enabled, last_run_at, created_at, updated_at";

/// Candidate rows joined with both endpoint keys; `c` is the candidate relation
const CANDIDATE_SELECT: &str = "SELECT c.id, c.rule_id, c.source_node_id, c.target_node_id,
        s.system AS source_system, s.resource_type AS source_type, s.resource_id AS source_id,
        t.system AS target_system, t.resource_type AS target_type, t.resource_id AS target_id,
        c.edge_type, c.confidence, c.evidence, c.status, c.created_at, c.updated_at, c.verified_at
     FROM c
     JOIN lineage_nodes s ON s.id = c.source_node_id
     JOIN lineage_nodes t ON t.id = c.target_node_id";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lineage_nodes (
        id UUID PRIMARY KEY,
        system TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        display_name TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (system, resource_type, resource_id)
    )",
    "CREATE TABLE IF NOT EXISTS lineage_edges (
        id UUID PRIMARY KEY,
        source_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        target_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        edge_type TEXT NOT NULL,
        transformation JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (source_node_id, target_node_id, edge_type)
    )",
    "CREATE TABLE IF NOT EXISTS discovery_rules (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        source_type TEXT NOT NULL,
        pattern JSONB NOT NULL DEFAULT '{}',
        enabled BOOLEAN NOT NULL DEFAULT true,
        last_run_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS discovered_lineage (
        id UUID PRIMARY KEY,
        rule_id UUID NOT NULL,
        source_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        target_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        edge_type TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        evidence JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'candidate',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        verified_at TIMESTAMPTZ,
        UNIQUE (rule_id, source_node_id, target_node_id, edge_type)
    )",
    "CREATE TABLE IF NOT EXISTS impact_analysis (
        id UUID PRIMARY KEY,
        node_id UUID NOT NULL,
        system TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        direction TEXT NOT NULL,
        impact_score DOUBLE PRECISION NOT NULL,
        risk_level TEXT NOT NULL,
        analysis JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transformation_logic (
        id UUID PRIMARY KEY,
        source_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        target_node_id UUID NOT NULL REFERENCES lineage_nodes(id) ON DELETE CASCADE,
        transformation_type TEXT NOT NULL,
        logic TEXT NOT NULL,
        language TEXT NOT NULL,
        source_system TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}',
        captured_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_lineage_edges_source ON lineage_edges(source_node_id)",
    "CREATE INDEX IF NOT EXISTS idx_lineage_edges_target ON lineage_edges(target_node_id)",
    "CREATE INDEX IF NOT EXISTS idx_discovered_lineage_status ON discovered_lineage(status)",
    "CREATE INDEX IF NOT EXISTS idx_transformation_logic_pair
        ON transformation_logic(source_node_id, target_node_id, captured_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_transformation_logic_target
        ON transformation_logic(target_node_id, captured_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_impact_analysis_key
        ON impact_analysis(system, resource_type, resource_id, created_at DESC)",
];

/// PostgreSQL-backed lineage store
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build a pool (TLS when required) and check it can serve a query
    pub async fn connect(config: &DatabaseConfig) -> LineageResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));

        let pool = if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
        }
        .map_err(|e| LineageError::Config(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;

        info!(
            "Connected to PostgreSQL at {}:{}/{} (TLS: {})",
            config.host, config.port, config.database, config.require_tls
        );
        Ok(Self { pool })
    }

    /// Create tables and indexes if missing
    pub async fn migrate(&self) -> LineageResult<()> {
        let client = self.pool.get().await?;
        for statement in SCHEMA {
            client.execute(*statement, &[]).await?;
        }
        debug!("Lineage schema is up to date");
        Ok(())
    }

    async fn candidate_query(
        &self,
        relation: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> LineageResult<Vec<DiscoveredEdge>> {
        let client = self.pool.get().await?;
        let sql = format!("WITH c AS ({}) {} ORDER BY c.created_at, c.id", relation, CANDIDATE_SELECT);
        let rows = client.query(sql.as_str(), params).await?;
        Ok(rows.iter().map(row_to_candidate).collect())
    }
}

fn row_to_node(row: &Row) -> Node {
    Node {
        id: row.get("id"),
        key: NodeKey {
            system: row.get("system"),
            resource_type: row.get("resource_type"),
            resource_id: row.get("resource_id"),
        },
        node_type: row.get("node_type"),
        display_name: row.get("display_name"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_transformation(row: &Row) -> LineageResult<Transformation> {
    let kind: String = row.get("transformation_type");
    Ok(Transformation {
        id: row.get("id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        transformation_type: kind.parse().map_err(|_| {
            LineageError::Internal(format!("Corrupt transformation type '{}'", kind))
        })?,
        logic: row.get("logic"),
        language: row.get("language"),
        source_system: row.get("source_system"),
        metadata: row.get("metadata"),
        captured_at: row.get("captured_at"),
    })
}

fn row_to_edge(row: &Row) -> Edge {
    Edge {
        id: row.get("id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        edge_type: row.get("edge_type"),
        transformation: row.get("transformation"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_rule(row: &Row) -> DiscoveryRule {
    DiscoveryRule {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        source_type: row.get("source_type"),
        pattern: row.get("pattern"),
        enabled: row.get("enabled"),
        last_run_at: row.get("last_run_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_candidate(row: &Row) -> DiscoveredEdge {
    let status: String = row.get("status");
    DiscoveredEdge {
        id: row.get("id"),
        rule_id: row.get("rule_id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        source_key: NodeKey {
            system: row.get("source_system"),
            resource_type: row.get("source_type"),
            resource_id: row.get("source_id"),
        },
        target_key: NodeKey {
            system: row.get("target_system"),
            resource_type: row.get("target_type"),
            resource_id: row.get("target_id"),
        },
        edge_type: row.get("edge_type"),
        confidence: row.get("confidence"),
        evidence: row.get("evidence"),
        status: if status == CandidateStatus::Verified.as_str() {
            CandidateStatus::Verified
        } else {
            CandidateStatus::Candidate
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        verified_at: row.get("verified_at"),
    }
}

#[async_trait]
impl GraphStore for PgStore {
    async fn upsert_node(&self, node: NewNode) -> LineageResult<Node> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO lineage_nodes
                (id, system, resource_type, resource_id, node_type, display_name, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
             ON CONFLICT (system, resource_type, resource_id) DO UPDATE SET
                node_type = EXCLUDED.node_type,
                display_name = EXCLUDED.display_name,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
             RETURNING {}",
            NODE_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &node.key.system,
                    &node.key.resource_type,
                    &node.key.resource_id,
                    &node.node_type,
                    &node.display_name,
                    &node.metadata,
                    &now,
                ],
            )
            .await?;
        debug!("Upserted node {}", node.key);
        Ok(row_to_node(&row))
    }

    async fn ensure_node(&self, node: NewNode) -> LineageResult<Node> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                "INSERT INTO lineage_nodes
                    (id, system, resource_type, resource_id, node_type, display_name, metadata, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                 ON CONFLICT (system, resource_type, resource_id) DO NOTHING",
                &[
                    &Uuid::new_v4(),
                    &node.key.system,
                    &node.key.resource_type,
                    &node.key.resource_id,
                    &node.node_type,
                    &node.display_name,
                    &node.metadata,
                    &Utc::now(),
                ],
            )
            .await?;

        let sql = format!(
            "SELECT {} FROM lineage_nodes WHERE system = $1 AND resource_type = $2 AND resource_id = $3",
            NODE_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[&node.key.system, &node.key.resource_type, &node.key.resource_id],
            )
            .await?;
        if inserted > 0 {
            debug!("Created node {}", node.key);
        }
        Ok(row_to_node(&row))
    }

    async fn upsert_edge(&self, edge: NewEdge) -> LineageResult<Edge> {
        let client = self.pool.get().await?;

        let existing: Vec<Uuid> = client
            .query(
                "SELECT id FROM lineage_nodes WHERE id = $1 OR id = $2",
                &[&edge.source_node_id, &edge.target_node_id],
            )
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();
        for endpoint in [edge.source_node_id, edge.target_node_id] {
            if !existing.contains(&endpoint) {
                return Err(LineageError::NodeNotFound(endpoint.to_string()));
            }
        }

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO lineage_edges
                (id, source_node_id, target_node_id, edge_type, transformation, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (source_node_id, target_node_id, edge_type) DO UPDATE SET
                transformation = EXCLUDED.transformation,
                updated_at = EXCLUDED.updated_at
             RETURNING {}",
            EDGE_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &edge.source_node_id,
                    &edge.target_node_id,
                    &edge.edge_type,
                    &edge.transformation,
                    &now,
                ],
            )
            .await?;
        debug!(
            "Upserted {} edge {} -> {}",
            edge.edge_type, edge.source_node_id, edge.target_node_id
        );
        Ok(row_to_edge(&row))
    }

    async fn get_node(&self, key: &NodeKey) -> LineageResult<Option<Node>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM lineage_nodes WHERE system = $1 AND resource_type = $2 AND resource_id = $3",
            NODE_COLUMNS
        );
        let row = client
            .query_opt(sql.as_str(), &[&key.system, &key.resource_type, &key.resource_id])
            .await?;
        Ok(row.as_ref().map(row_to_node))
    }

    async fn get_node_by_id(&self, id: Uuid) -> LineageResult<Option<Node>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM lineage_nodes WHERE id = $1", NODE_COLUMNS);
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(row_to_node))
    }

    async fn edges_from(&self, node_id: Uuid) -> LineageResult<Vec<Edge>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM lineage_edges WHERE source_node_id = $1 ORDER BY created_at, id",
            EDGE_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&node_id]).await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }

    async fn edges_to(&self, node_id: Uuid) -> LineageResult<Vec<Edge>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM lineage_edges WHERE target_node_id = $1 ORDER BY created_at, id",
            EDGE_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&node_id]).await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }

    async fn all_nodes(&self) -> LineageResult<Vec<Node>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM lineage_nodes ORDER BY created_at, id", NODE_COLUMNS);
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn all_edges(&self) -> LineageResult<Vec<Edge>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM lineage_edges ORDER BY created_at, id", EDGE_COLUMNS);
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }

    async fn cross_system_edges(&self, system: &str) -> LineageResult<Vec<Edge>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM lineage_edges WHERE id IN (
                SELECT e.id FROM lineage_edges e
                JOIN lineage_nodes s ON s.id = e.source_node_id
                JOIN lineage_nodes t ON t.id = e.target_node_id
                WHERE s.system <> t.system AND (s.system = $1 OR t.system = $1)
             )
             ORDER BY created_at DESC, id",
            EDGE_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[&system]).await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }
}

#[async_trait]
impl DiscoveryStore for PgStore {
    async fn save_rule(&self, rule: DiscoveryRule) -> LineageResult<DiscoveryRule> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO discovery_rules
                (id, name, description, source_type, pattern, enabled, last_run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                source_type = EXCLUDED.source_type,
                pattern = EXCLUDED.pattern,
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at
             RETURNING {}",
            RULE_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &rule.id,
                    &rule.name,
                    &rule.description,
                    &rule.source_type,
                    &rule.pattern,
                    &rule.enabled,
                    &rule.last_run_at,
                    &rule.created_at,
                    &rule.updated_at,
                ],
            )
            .await?;
        Ok(row_to_rule(&row))
    }

    async fn get_rule(&self, id: Uuid) -> LineageResult<Option<DiscoveryRule>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM discovery_rules WHERE id = $1", RULE_COLUMNS);
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(row_to_rule))
    }

    async fn list_rules(&self) -> LineageResult<Vec<DiscoveryRule>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM discovery_rules ORDER BY created_at, id", RULE_COLUMNS);
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(row_to_rule).collect())
    }

    async fn mark_rule_run(&self, id: Uuid, at: DateTime<Utc>) -> LineageResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE discovery_rules SET last_run_at = $2, updated_at = $2 WHERE id = $1",
                &[&id, &at],
            )
            .await?;
        if updated == 0 {
            return Err(not_found_error(format!("Discovery rule {} not found", id)));
        }
        Ok(())
    }

    async fn upsert_candidate(&self, candidate: NewCandidate) -> LineageResult<DiscoveredEdge> {
        let now = Utc::now();
        let mut rows = self
            .candidate_query(
                "INSERT INTO discovered_lineage
                    (id, rule_id, source_node_id, target_node_id, edge_type, confidence, evidence,
                     status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'candidate', $8, $8)
                 ON CONFLICT (rule_id, source_node_id, target_node_id, edge_type) DO UPDATE SET
                    confidence = EXCLUDED.confidence,
                    evidence = EXCLUDED.evidence,
                    updated_at = EXCLUDED.updated_at
                 RETURNING *",
                &[
                    &Uuid::new_v4(),
                    &candidate.rule_id,
                    &candidate.source_node_id,
                    &candidate.target_node_id,
                    &candidate.edge_type,
                    &candidate.confidence,
                    &candidate.evidence,
                    &now,
                ],
            )
            .await?;
        rows.pop().ok_or_else(|| {
            LineageError::NodeNotFound(format!(
                "{} or {}",
                candidate.source_node_id, candidate.target_node_id
            ))
        })
    }

    async fn get_candidate(&self, id: Uuid) -> LineageResult<Option<DiscoveredEdge>> {
        let mut rows = self
            .candidate_query("SELECT * FROM discovered_lineage WHERE id = $1", &[&id])
            .await?;
        Ok(rows.pop())
    }

    async fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> LineageResult<Vec<DiscoveredEdge>> {
        match status {
            Some(status) => {
                self.candidate_query(
                    "SELECT * FROM discovered_lineage WHERE status = $1",
                    &[&status.as_str()],
                )
                .await
            }
            None => self.candidate_query("SELECT * FROM discovered_lineage", &[]).await,
        }
    }

    async fn mark_candidate_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> LineageResult<DiscoveredEdge> {
        let mut rows = self
            .candidate_query(
                "UPDATE discovered_lineage
                 SET status = 'verified', verified_at = COALESCE(verified_at, $2), updated_at = $2
                 WHERE id = $1
                 RETURNING *",
                &[&id, &at],
            )
            .await?;
        rows.pop()
            .ok_or_else(|| not_found_error(format!("Discovered edge {} not found", id)))
    }
}

#[async_trait]
impl AnalysisLog for PgStore {
    async fn record_analysis(&self, analysis: &ImpactAnalysis) -> LineageResult<()> {
        let client = self.pool.get().await?;
        let document = serde_json::to_value(analysis)
            .map_err(|e| LineageError::Internal(format!("Failed to serialize analysis: {}", e)))?;
        client
            .execute(
                "INSERT INTO impact_analysis
                    (id, node_id, system, resource_type, resource_id, direction, impact_score,
                     risk_level, analysis, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &analysis.id,
                    &analysis.node_id,
                    &analysis.resource_key.system,
                    &analysis.resource_key.resource_type,
                    &analysis.resource_key.resource_id,
                    &analysis.direction.as_str(),
                    &analysis.impact_score,
                    &analysis.risk_level.as_str(),
                    &document,
                    &analysis.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn impact_history(
        &self,
        key: &NodeKey,
        limit: usize,
    ) -> LineageResult<Vec<ImpactAnalysis>> {
        let client = self.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                "SELECT analysis FROM impact_analysis
                 WHERE system = $1 AND resource_type = $2 AND resource_id = $3
                 ORDER BY created_at DESC
                 LIMIT $4",
                &[&key.system, &key.resource_type, &key.resource_id, &limit],
            )
            .await?;

        rows.iter()
            .map(|row| {
                serde_json::from_value::<ImpactAnalysis>(row.get("analysis")).map_err(|e| {
                    LineageError::Internal(format!("Corrupt impact analysis record: {}", e))
                })
            })
            .collect()
    }
}

#[async_trait]
impl TransformationLog for PgStore {
    async fn capture_transformation(
        &self,
        transformation: NewTransformation,
    ) -> LineageResult<Transformation> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO transformation_logic
                (id, source_node_id, target_node_id, transformation_type, logic, language,
                 source_system, metadata, captured_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {}",
            TRANSFORMATION_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &transformation.source_node_id,
                    &transformation.target_node_id,
                    &transformation.transformation_type.as_str(),
                    &transformation.logic,
                    &transformation.language,
                    &transformation.source_system,
                    &transformation.metadata,
                    &Utc::now(),
                ],
            )
            .await?;
        row_to_transformation(&row)
    }

    async fn latest_transformation(
        &self,
        source_node_id: Uuid,
        target_node_id: Uuid,
    ) -> LineageResult<Option<Transformation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM transformation_logic
             WHERE source_node_id = $1 AND target_node_id = $2
             ORDER BY captured_at DESC, id
             LIMIT 1",
            TRANSFORMATION_COLUMNS
        );
        let row = client
            .query_opt(sql.as_str(), &[&source_node_id, &target_node_id])
            .await?;
        row.as_ref().map(row_to_transformation).transpose()
    }

    async fn list_transformations(
        &self,
        node_id: Uuid,
        side: TransformationSide,
    ) -> LineageResult<Vec<Transformation>> {
        let client = self.pool.get().await?;
        let column = match side {
            TransformationSide::Source => "source_node_id",
            TransformationSide::Target => "target_node_id",
        };
        let sql = format!(
            "SELECT {} FROM transformation_logic WHERE {} = $1 ORDER BY captured_at DESC, id",
            TRANSFORMATION_COLUMNS, column
        );
        let rows = client.query(sql.as_str(), &[&node_id]).await?;
        rows.iter().map(row_to_transformation).collect()
    }
}
