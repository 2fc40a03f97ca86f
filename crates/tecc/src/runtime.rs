//! Opaque runtime units produced by code generators and external toolchains.

use std::fmt;
use std::sync::Arc;

use crate::error::LowerResult;
use crate::target::Target;
use crate::tir::LoweredModule;

pub trait RuntimeModule: Send + Sync + fmt::Debug {
    fn type_key(&self) -> &str;

    /// Whether `symbol` is exported, optionally searching imported units.
    fn has_function(&self, symbol: &str, query_imports: bool) -> bool;
}

/// Turns a lowered module into an invocable runtime unit.
pub trait CodegenBackend: Send + Sync {
    fn build(&self, module: &LoweredModule, target: &Target) -> LowerResult<Arc<dyn RuntimeModule>>;
}

/// An exported symbol resolved inside a built runtime unit.
#[derive(Debug, Clone)]
pub struct PackedFunc {
    pub module: Arc<dyn RuntimeModule>,
    pub symbol: String,
}

impl PackedFunc {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}
