//! Lineage analysis: traversal, path finding, impact scoring

pub mod impact;
pub mod paths;
pub mod scoring;
pub mod traversal;

pub use impact::ImpactAnalyzer;
pub use paths::{PathFinder, PathLookup, PathSet};
pub use scoring::ScoringPolicy;
pub use traversal::{ReachedNode, TraversalEngine, TraversalResult};
