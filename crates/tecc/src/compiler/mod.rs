//! Compiled-artifact cache, lowering engine and external dispatch.

pub mod artifact;
mod cache;
mod external;
mod key;
pub mod names;
mod schedule;

pub use artifact::{CompiledArtifact, Schedule, Stage, TensorDesc};
pub use cache::{CacheEntrySnapshot, TeCompiler};
pub use external::{
    external_codegen_name, ExternalCodegenFn, ExternalCodegenRegistry, EXTERNAL_CODEGEN_PREFIX,
};
pub(crate) use external::add_extern_stubs;
pub use key::CacheKey;
pub use names::{mangle, NameSupply};
