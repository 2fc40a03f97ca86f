//! Operator registry consulted by the lowering engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::ir::Function;
use crate::target::Target;
use crate::tir::PrimFunc;

pub const DEBUG_OP: &str = "debug";
pub const DEVICE_COPY_OP: &str = "device_copy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpPattern {
    ElemWise,
    Broadcast,
    Injective,
    CommReduce,
    OutEWiseFusable,
    Opaque,
}

/// Builds a complete low-level function for a single-operator primitive,
/// bypassing the schedule pipeline. Returning `None` falls back to it.
pub type DirectLowering = Arc<dyn Fn(&Function, &Target) -> Option<PrimFunc> + Send + Sync>;

#[derive(Clone)]
pub struct OpDef {
    pub name: String,
    pub pattern: OpPattern,
    /// The shape function needs the input values, not just their shapes.
    pub shape_data_dependent: bool,
    /// Lowers into its own helper function invoked from the fused kernel.
    pub emits_helper: bool,
    pub direct: Option<DirectLowering>,
}

impl OpDef {
    pub fn new(name: impl Into<String>, pattern: OpPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            shape_data_dependent: false,
            emits_helper: false,
            direct: None,
        }
    }

    pub fn data_dependent(mut self) -> Self {
        self.shape_data_dependent = true;
        self
    }

    pub fn helper(mut self) -> Self {
        self.emits_helper = true;
        self
    }

    pub fn with_direct_lowering(mut self, direct: DirectLowering) -> Self {
        self.direct = Some(direct);
        self
    }
}

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("shape_data_dependent", &self.shape_data_dependent)
            .field("emits_helper", &self.emits_helper)
            .field("direct", &self.direct.is_some())
            .finish()
    }
}

pub struct OpRegistry {
    ops: RwLock<HashMap<String, Arc<OpDef>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self {
            ops: RwLock::new(HashMap::new()),
        }
    }

    pub fn builtin() -> Self {
        let registry = Self::new();
        for name in ["add", "subtract", "multiply", "divide"] {
            registry.register(OpDef::new(name, OpPattern::Broadcast));
        }
        registry.register(OpDef::new("nn.relu", OpPattern::ElemWise));
        registry.register(OpDef::new("nn.conv2d", OpPattern::OutEWiseFusable));
        registry.register(OpDef::new("nn.dense", OpPattern::OutEWiseFusable));
        registry.register(OpDef::new("sum", OpPattern::CommReduce));
        registry.register(OpDef::new("reshape", OpPattern::Injective));
        registry.register(OpDef::new("dyn.reshape", OpPattern::Injective).data_dependent());
        registry.register(OpDef::new("concatenate", OpPattern::Injective));
        registry.register(OpDef::new(DEBUG_OP, OpPattern::Opaque));
        registry.register(OpDef::new(DEVICE_COPY_OP, OpPattern::Opaque));
        registry.register(OpDef::new("nn.contrib_extern", OpPattern::Opaque).helper());
        registry
    }

    pub fn register(&self, def: OpDef) {
        self.ops
            .write()
            .expect("op registry poisoned")
            .insert(def.name.clone(), Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<Arc<OpDef>> {
        self.ops
            .read()
            .expect("op registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ops
            .read()
            .expect("op registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
