use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ir::expr::{Function, GlobalVar};
use crate::runtime::RuntimeModule;
use crate::tir::PrimFunc;

/// A module-level definition: either a graph function or a low-level one.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseFunc {
    Relay(Function),
    Prim(PrimFunc),
}

impl BaseFunc {
    pub fn as_relay(&self) -> Option<&Function> {
        match self {
            BaseFunc::Relay(func) => Some(func),
            BaseFunc::Prim(_) => None,
        }
    }

    pub fn as_prim(&self) -> Option<&PrimFunc> {
        match self {
            BaseFunc::Prim(func) => Some(func),
            BaseFunc::Relay(_) => None,
        }
    }
}

/// Module-wide products of lowering.
#[derive(Debug, Clone, Default)]
pub struct ModuleAttrs {
    /// Runtime units produced by external toolchains, to be linked by the driver.
    pub external_mods: Vec<Arc<dyn RuntimeModule>>,
    /// Toolchain name for every externally compiled global.
    pub device_contexts: BTreeMap<GlobalVar, String>,
    /// Lowered name to number of call sites, when captured.
    pub op_weights: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct IrModule {
    functions: BTreeMap<GlobalVar, BaseFunc>,
    pub attrs: ModuleAttrs,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the definition bound to `global`.
    pub fn add(&mut self, global: GlobalVar, func: BaseFunc) {
        self.functions.insert(global, func);
    }

    pub fn add_relay(&mut self, name: &str, func: Function) -> GlobalVar {
        let global = GlobalVar::new(name);
        self.add(global.clone(), BaseFunc::Relay(func));
        global
    }

    pub fn remove(&mut self, global: &GlobalVar) -> Option<BaseFunc> {
        self.functions.remove(global)
    }

    pub fn lookup(&self, global: &GlobalVar) -> Option<&BaseFunc> {
        self.functions.get(global)
    }

    pub fn lookup_name(&self, name: &str) -> Option<&BaseFunc> {
        self.functions.get(&GlobalVar::new(name))
    }

    pub fn contains(&self, global: &GlobalVar) -> bool {
        self.functions.contains_key(global)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&GlobalVar, &BaseFunc)> {
        self.functions.iter()
    }

    pub fn global_vars(&self) -> impl Iterator<Item = &GlobalVar> {
        self.functions.keys()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Compares definitions and the structured attributes; runtime units by count.
impl PartialEq for IrModule {
    fn eq(&self, other: &Self) -> bool {
        self.functions == other.functions
            && self.attrs.device_contexts == other.attrs.device_contexts
            && self.attrs.op_weights == other.attrs.op_weights
            && self.attrs.external_mods.len() == other.attrs.external_mods.len()
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (global, func) in &self.functions {
            match func {
                BaseFunc::Relay(func) => writeln!(f, "def {global}{func}")?,
                BaseFunc::Prim(func) => writeln!(f, "prim {global}{func}")?,
            }
        }
        Ok(())
    }
}
