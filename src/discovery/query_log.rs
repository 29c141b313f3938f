//! Query-log matcher
//!
//! Mines executed SQL for statements that materialize one table from others:
//! - `CREATE TABLE t AS SELECT ... FROM s`
//! - `INSERT INTO t SELECT ... FROM s`
//! - `SELECT ... INTO t FROM s`
//!
//! Identical statements (after normalization) are aggregated by SHA-256 hash
//! so a query that runs every hour yields one candidate per table pair, with
//! its frequency and first/last sighting as evidence.

use crate::discovery::rules::DiscoveryRule;
use crate::discovery::signals::{SignalPayload, SignalRecord};
use crate::discovery::{rule_confidence, MatchedEdge, PatternMatcher};
use crate::error::LineageResult;
use crate::models::NodeKey;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_$]*(?:\.[A-Za-z_][A-Za-z0-9_$]*){0,2}";

static CREATE_TABLE_AS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\bcreate\s+(?:or\s+replace\s+)?(?:(?:temp|temporary|transient)\s+)?table\s+(?:if\s+not\s+exists\s+)?({IDENT})\b.*?\bas\s*\(?\s*(?:with|select)\b"
    ))
    .expect("valid create-table-as regex")
});

static INSERT_SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\binsert\s+(?:overwrite\s+)?(?:into\s+)?(?:table\s+)?({IDENT})\b.*?\bselect\b"
    ))
    .expect("valid insert-select regex")
});

static SELECT_INTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bselect\b.+?\binto\s+({IDENT})\s+from\b"))
        .expect("valid select-into regex")
});

static SOURCE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(?:from|join)\s+({IDENT})"))
        .expect("valid source-table regex")
});

/// Names bound by a WITH clause: `WITH name AS (` and `, name AS (`
static CTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)(?:\bwith\s+(?:recursive\s+)?|,\s*)({IDENT})\s+as\s*\("))
        .expect("valid cte-name regex")
});

/// Words that can follow FROM/JOIN without naming a table
const NOT_TABLES: &[&str] = &["lateral", "unnest", "select", "values", "table"];

/// Statement shapes that imply a derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPatternType {
    CreateTableAs,
    InsertSelect,
    SelectInto,
}

impl QueryPatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPatternType::CreateTableAs => "create_table_as",
            QueryPatternType::InsertSelect => "insert_select",
            QueryPatternType::SelectInto => "select_into",
        }
    }

    /// Checked in this order; the first shape that matches wins
    const ALL: [QueryPatternType; 3] = [
        QueryPatternType::CreateTableAs,
        QueryPatternType::InsertSelect,
        QueryPatternType::SelectInto,
    ];

    fn regex(&self) -> &'static Regex {
        match self {
            QueryPatternType::CreateTableAs => &CREATE_TABLE_AS,
            QueryPatternType::InsertSelect => &INSERT_SELECT,
            QueryPatternType::SelectInto => &SELECT_INTO,
        }
    }
}

/// A derivation statement extracted from one query
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedStatement {
    pub pattern_type: QueryPatternType,
    pub target: String,
    pub sources: Vec<String>,
}

/// All sightings of one normalized statement
#[derive(Debug, Clone)]
pub struct QueryPattern {
    pub query_hash: String,
    pub system: String,
    pub statement: ExtractedStatement,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Lowercase, collapse whitespace, drop trailing semicolons
pub fn normalize_query(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    collapsed.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

pub fn hash_query(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(sql).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.get(..word.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(word))
        && !text[word.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
}

fn ends_with_word(text: &str, word: &str) -> bool {
    let Some(start) = text.len().checked_sub(word.len()) else {
        return false;
    };
    text.get(start..)
        .is_some_and(|tail| tail.eq_ignore_ascii_case(word))
        && !text[..start].ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `pos` sits inside a parenthesised expression such as
/// `EXTRACT(year FROM ts)`, where FROM does not introduce a table.
/// Subqueries and parenthesised FROM/JOIN operands are relational scopes.
fn inside_expression(text: &str, pos: usize) -> bool {
    let mut scopes: Vec<bool> = Vec::new();
    for (i, c) in text[..pos].char_indices() {
        match c {
            '(' => {
                let before = text[..i].trim_end();
                let after = text[i + 1..].trim_start();
                let relational = starts_with_word(after, "select")
                    || starts_with_word(after, "with")
                    || ends_with_word(before, "from")
                    || ends_with_word(before, "join");
                scopes.push(!relational);
            }
            ')' => {
                scopes.pop();
            }
            _ => {}
        }
    }
    scopes.last().copied().unwrap_or(false)
}

/// Classify a statement and pull out its target and source tables
pub fn extract_statement(sql: &str) -> Option<ExtractedStatement> {
    for pattern_type in QueryPatternType::ALL {
        let Some(caps) = pattern_type.regex().captures(sql) else {
            continue;
        };
        let Some(target) = caps.get(1) else { continue };
        let target_name = target.as_str().to_lowercase();

        let body = &sql[target.end()..];
        let ctes: Vec<String> = CTE_NAME
            .captures_iter(body)
            .map(|c| c[1].to_lowercase())
            .collect();

        let mut sources: Vec<String> = Vec::new();
        for found in SOURCE_TABLE.captures_iter(body) {
            let Some(whole) = found.get(0) else { continue };
            if inside_expression(body, whole.start()) {
                continue;
            }
            let name = found[1].to_lowercase();
            if name == target_name
                || NOT_TABLES.contains(&name.as_str())
                || ctes.contains(&name)
                || sources.contains(&name)
            {
                continue;
            }
            sources.push(name);
        }
        if sources.is_empty() {
            continue;
        }

        return Some(ExtractedStatement {
            pattern_type,
            target: target_name,
            sources,
        });
    }
    None
}

fn query_text(record: &SignalRecord) -> Option<&str> {
    match &record.payload {
        SignalPayload::Text(text) => Some(text.as_str()),
        SignalPayload::Structured(doc) => doc
            .get("query")
            .or_else(|| doc.get("query_text"))
            .and_then(|v| v.as_str()),
    }
}

/// Aggregate records into patterns, in order of first appearance
pub fn aggregate_patterns(records: &[SignalRecord]) -> Vec<QueryPattern> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut patterns: Vec<QueryPattern> = Vec::new();

    for record in records {
        let Some(sql) = query_text(record) else {
            debug!("Signal {} carries no query text", record.id);
            continue;
        };
        let Some(statement) = extract_statement(sql) else {
            continue;
        };

        let query_hash = hash_query(sql);
        let key = (record.system.clone(), query_hash.clone());
        match index.get(&key) {
            Some(&i) => {
                let pattern = &mut patterns[i];
                pattern.frequency += 1;
                pattern.first_seen = pattern.first_seen.min(record.observed_at);
                pattern.last_seen = pattern.last_seen.max(record.observed_at);
            }
            None => {
                index.insert(key, patterns.len());
                patterns.push(QueryPattern {
                    query_hash,
                    system: record.system.clone(),
                    statement,
                    frequency: 1,
                    first_seen: record.observed_at,
                    last_seen: record.observed_at,
                });
            }
        }
    }
    patterns
}

/// Matcher for `query_log` (alias `sql_parser`) rules
#[derive(Debug, Clone)]
pub struct QueryLogMatcher {
    default_confidence: f64,
}

impl QueryLogMatcher {
    pub fn new(default_confidence: f64) -> Self {
        Self { default_confidence }
    }
}

impl PatternMatcher for QueryLogMatcher {
    fn source_types(&self) -> &'static [&'static str] {
        &["query_log", "sql_parser"]
    }

    fn match_signals(
        &self,
        rule: &DiscoveryRule,
        records: &[SignalRecord],
    ) -> LineageResult<Vec<MatchedEdge>> {
        let confidence = rule_confidence(rule, self.default_confidence)?;
        let allowed = rule.pattern_strings("pattern_types");
        let min_frequency = rule.pattern_u64("min_frequency").unwrap_or(1);

        let mut matched = Vec::new();
        for pattern in aggregate_patterns(records) {
            let pattern_type = pattern.statement.pattern_type.as_str();
            if let Some(allowed) = &allowed {
                if !allowed.iter().any(|a| a == pattern_type) {
                    continue;
                }
            }
            if pattern.frequency < min_frequency {
                continue;
            }

            let target = match NodeKey::table(&pattern.system, &pattern.statement.target) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping query pattern {}: {}", pattern.query_hash, e);
                    continue;
                }
            };
            for source in &pattern.statement.sources {
                let Ok(source) = NodeKey::table(&pattern.system, source) else {
                    warn!("Skipping source table '{}' in pattern {}", source, pattern.query_hash);
                    continue;
                };
                matched.push(MatchedEdge {
                    source,
                    target: target.clone(),
                    edge_type: pattern_type.to_string(),
                    confidence,
                    evidence: json!({
                        "pattern_type": pattern_type,
                        "query_hash": pattern.query_hash,
                        "frequency": pattern.frequency,
                        "first_seen": pattern.first_seen,
                        "last_seen": pattern.last_seen,
                        "system": pattern.system,
                    }),
                });
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_table_as() {
        let stmt = extract_statement(
            "CREATE TABLE IF NOT EXISTS analytics.orders_summary AS SELECT o.id FROM raw.orders o JOIN raw.customers c ON o.cid = c.id",
        )
        .unwrap();
        assert_eq!(stmt.pattern_type, QueryPatternType::CreateTableAs);
        assert_eq!(stmt.target, "analytics.orders_summary");
        assert_eq!(stmt.sources, vec!["raw.orders".to_string(), "raw.customers".to_string()]);
    }

    #[test]
    fn test_insert_select_wins_over_select_into() {
        let stmt = extract_statement("insert into daily_totals select day, sum(x) from events group by day").unwrap();
        assert_eq!(stmt.pattern_type, QueryPatternType::InsertSelect);
        assert_eq!(stmt.target, "daily_totals");
        assert_eq!(stmt.sources, vec!["events".to_string()]);
    }

    #[test]
    fn test_select_into() {
        let stmt = extract_statement("SELECT * INTO backup_orders FROM orders WHERE ts > now()").unwrap();
        assert_eq!(stmt.pattern_type, QueryPatternType::SelectInto);
        assert_eq!(stmt.target, "backup_orders");
        assert_eq!(stmt.sources, vec!["orders".to_string()]);
    }

    #[test]
    fn test_cte_names_are_not_sources() {
        let stmt = extract_statement(
            "CREATE TABLE daily AS WITH recent AS (SELECT * FROM orders), totals AS (SELECT * FROM recent JOIN refunds r ON true) SELECT * FROM totals",
        )
        .unwrap();
        assert_eq!(stmt.target, "daily");
        assert_eq!(stmt.sources, vec!["orders".to_string(), "refunds".to_string()]);
    }

    #[test]
    fn test_from_inside_function_call_is_not_a_source() {
        let stmt = extract_statement(
            "INSERT INTO yearly SELECT EXTRACT(year FROM created_at), TRIM(BOTH ' ' FROM name) FROM orders",
        )
        .unwrap();
        assert_eq!(stmt.sources, vec!["orders".to_string()]);

        // A subquery inside an expression still names its table
        let stmt = extract_statement(
            "INSERT INTO flagged SELECT id FROM orders WHERE cid IN (SELECT id FROM blocked)",
        )
        .unwrap();
        assert_eq!(stmt.sources, vec!["orders".to_string(), "blocked".to_string()]);
    }

    #[test]
    fn test_hash_is_lowercase_hex_sha256() {
        let hash = hash_query("SELECT 1");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_plain_reads_are_ignored() {
        assert!(extract_statement("SELECT * FROM orders").is_none());
        assert!(extract_statement("INSERT INTO t VALUES (1, 2)").is_none());
    }

    #[test]
    fn test_normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_query("  SELECT *\n  FROM Orders ;; "),
            "select * from orders"
        );
        assert_eq!(hash_query("select 1;"), hash_query("SELECT   1"));
    }

    #[test]
    fn test_matcher_aggregates_and_filters() {
        let t0 = Utc::now() - Duration::hours(2);
        let t1 = Utc::now();
        let records = vec![
            SignalRecord::text("q1", "warehouse", "CREATE TABLE summary AS SELECT * FROM orders").observed_at(t0),
            SignalRecord::text("q2", "warehouse", "create table summary as select * from orders;").observed_at(t1),
            SignalRecord::text("q3", "warehouse", "INSERT INTO audit SELECT * FROM orders").observed_at(t1),
        ];

        let rule = DiscoveryRule::new(
            "ctas only",
            "query_log",
            json!({"pattern_types": ["create_table_as"], "min_frequency": 2}),
        );
        let matched = QueryLogMatcher::new(0.8).match_signals(&rule, &records).unwrap();

        assert_eq!(matched.len(), 1);
        let edge = &matched[0];
        assert_eq!(edge.source.to_string(), "warehouse:table:orders");
        assert_eq!(edge.target.to_string(), "warehouse:table:summary");
        assert_eq!(edge.edge_type, "create_table_as");
        assert_eq!(edge.confidence, 0.8);
        assert_eq!(edge.evidence["frequency"], json!(2));
        assert_eq!(edge.evidence["first_seen"], json!(t0));
        assert_eq!(edge.evidence["last_seen"], json!(t1));
    }

    #[test]
    fn test_confidence_override_is_validated() {
        let records = vec![SignalRecord::text("q1", "warehouse", "INSERT INTO a SELECT * FROM b")];
        let rule = DiscoveryRule::new("r", "query_log", json!({"confidence": 0.55}));
        let matched = QueryLogMatcher::new(0.8).match_signals(&rule, &records).unwrap();
        assert_eq!(matched[0].confidence, 0.55);

        let rule = DiscoveryRule::new("r", "query_log", json!({"confidence": 3.0}));
        assert!(QueryLogMatcher::new(0.8).match_signals(&rule, &records).is_err());
    }
}
