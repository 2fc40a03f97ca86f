use crate::ir::{GlobalVar, ShapeFuncParamState, TensorType};
use crate::target::Target;
use crate::tir::{LoweredFunc, LoweredModule, PrimFunc};

/// A lowered input or output tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub name: String,
    pub ty: TensorType,
}

/// One operator evaluation in a fused schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub stages: Vec<Stage>,
}

impl Schedule {
    pub fn op_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.op.as_str())
    }
}

/// Result of lowering one cache key.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub target: Target,
    /// Global identifier of the primary low-level function.
    pub prim_fn_var: GlobalVar,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    /// Absent for external placeholders and directly lowered functions.
    pub schedule: Option<Schedule>,
    /// Set when an operator supplied a finished low-level function.
    pub prim_func: Option<PrimFunc>,
    /// One entry per primitive parameter; only populated for shape functions.
    pub shape_func_param_states: Vec<ShapeFuncParamState>,
    /// The primary function plus every helper it calls.
    pub funcs: LoweredModule,
}

impl CompiledArtifact {
    pub fn is_external(&self) -> bool {
        self.funcs
            .get(&self.prim_fn_var)
            .is_some_and(|func| func.as_prim().is_none())
    }

    pub fn all_prim_fn_vars(&self) -> Vec<GlobalVar> {
        self.funcs.global_vars().cloned().collect()
    }

    /// Compiled low-level functions annotated with the artifact's target.
    pub fn targeted_funcs(&self) -> LoweredModule {
        let mut module = LoweredModule::new();
        for (global, func) in self.funcs.prim_funcs() {
            module.add(
                global.clone(),
                LoweredFunc::Prim(func.clone().with_target(self.target.clone())),
            );
        }
        module
    }
}
