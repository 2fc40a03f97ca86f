//! Module-level passes driving the compile cache.

mod driver;
pub mod lower_te;
pub mod scope;

pub use driver::{lower_te, per_target_modules, LowerTeConfig};
pub use lower_te::{LowerTensorExprRewriter, ProcessedFunction, ProcessedSource, ReachedArtifacts};
pub use scope::ScopeStack;
