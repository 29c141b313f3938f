//! Data models and DTOs (Data Transfer Objects)
//!
//! Graph entities, discovered candidates, analysis results and the request
//! structures callers hand to the service.

pub mod analysis;
pub mod column;
pub mod edge;
pub mod node;
pub mod transformation;

// Re-export commonly used types
pub use analysis::*;
pub use column::*;
pub use edge::*;
pub use node::*;
pub use transformation::*;
