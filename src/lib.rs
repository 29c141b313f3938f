//! LineageFlow - Data Lineage & Impact Analysis
//!
//! Tracks which data assets are derived from which, and answers the
//! questions that matter before a change ships:
//! - Lineage: what feeds this table, and what does it feed?
//! - Impact: what breaks if it changes, and how badly?
//! - Paths: how does data get from this system to that one?
//! - Columns: which columns is this one computed from?
//! - Discovery: which relationships do query logs and ETL jobs imply?
//!
//! Traversal is plain breadth-first search in Rust over a narrow store
//! interface, so the same engine runs against PostgreSQL or memory.

pub mod config;
pub mod discovery;
pub mod error;
pub mod lineage;
pub mod models;
pub mod seed;
pub mod service;
pub mod store;

pub use config::Settings;
pub use error::{LineageError, LineageResult};
pub use service::LineageService;
