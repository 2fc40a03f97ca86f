pub mod compiler;
pub mod error;
pub mod function_info;
pub mod hashing;
pub mod ir;
pub mod op;
pub mod passes;
pub mod runtime;
pub mod target;
pub mod tir;
mod env;

pub use compiler::{CacheKey, CompiledArtifact, ExternalCodegenRegistry, TeCompiler};
pub use error::{LowerError, LowerResult};
pub use function_info::{
    update_function_metadata, update_main_workspace_size, FunctionInfo, StorageInfo,
    StorageInfoMap,
};
pub use passes::{lower_te, per_target_modules, LowerTeConfig, ProcessedFunction};
pub use target::{get_target_from_device_type, DeviceType, Target, TargetMap, VirtualDevice};
