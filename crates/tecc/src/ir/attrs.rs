//! Structured attribute records carried by graph functions and calls.

use crate::ir::expr::GlobalVar;
use crate::target::{Target, VirtualDevice};

/// Attributes attached to a graph function by upstream passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FuncAttrs {
    /// Set by operator fusion on kernel bodies that must be lowered.
    pub primitive: bool,
    /// Name of the external toolchain this function is delegated to.
    pub compiler: Option<String>,
    pub global_symbol: Option<String>,
    /// Symbol a non-primitive function was already lowered to elsewhere.
    pub external_symbol: Option<String>,
    pub reshape_only: bool,
    pub result_device: Option<VirtualDevice>,
}

impl FuncAttrs {
    pub fn primitive() -> Self {
        Self {
            primitive: true,
            ..Self::default()
        }
    }

    pub fn external(compiler: impl Into<String>, global_symbol: impl Into<String>) -> Self {
        Self {
            primitive: true,
            compiler: Some(compiler.into()),
            global_symbol: Some(global_symbol.into()),
            ..Self::default()
        }
    }

    pub fn with_result_device(mut self, device: VirtualDevice) -> Self {
        self.result_device = Some(device);
        self
    }
}

/// Operator-specific call attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum OpAttrs {
    #[default]
    None,
    DeviceCopy {
        src: VirtualDevice,
        dst: VirtualDevice,
    },
    Shape(Vec<i64>),
    Axes(Vec<i64>),
}

/// How a shape function consumes one parameter of its primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeFuncParamState {
    NoNeed,
    NeedInputData,
    NeedInputShape,
    NeedBoth,
}

impl ShapeFuncParamState {
    pub fn needs_data(self) -> bool {
        matches!(self, Self::NeedInputData | Self::NeedBoth)
    }

    pub fn needs_shape(self) -> bool {
        matches!(self, Self::NeedInputShape | Self::NeedBoth)
    }

    pub fn merge(self, other: Self) -> Self {
        let data = self.needs_data() || other.needs_data();
        let shape = self.needs_shape() || other.needs_shape();
        match (data, shape) {
            (true, true) => Self::NeedBoth,
            (true, false) => Self::NeedInputData,
            (false, true) => Self::NeedInputShape,
            (false, false) => Self::NoNeed,
        }
    }
}

/// Calling-convention record for a dynamically shaped lowered call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeFuncCallInfo {
    pub prim_shape_fn_var: GlobalVar,
    pub param_states: Vec<ShapeFuncParamState>,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub all_prim_shape_fn_vars: Vec<GlobalVar>,
}

/// Metadata attached to every uniform low-level invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallLoweredAttrs {
    /// Attributes of the source function the call was lowered from.
    pub relay_attrs: FuncAttrs,
    pub all_prim_fn_vars: Vec<GlobalVar>,
    pub reshape_only: bool,
    pub shape_func: Option<ShapeFuncCallInfo>,
    /// Target the callee was lowered for, when known.
    pub target: Option<Target>,
}
