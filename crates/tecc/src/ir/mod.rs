//! Dataflow-graph IR consumed and produced by the lowering pipeline.

pub mod attrs;
pub mod expr;
pub mod module;
mod printer;
pub mod structural;
pub mod ty;

pub use attrs::{CallLoweredAttrs, FuncAttrs, OpAttrs, ShapeFuncCallInfo, ShapeFuncParamState};
pub use expr::{CallLowered, Constant, Expr, ExprId, ExprKind, Function, GlobalVar, Op, Var, VarId};
pub use module::{BaseFunc, IrModule, ModuleAttrs};
pub use ty::{extents_bytes, DType, DimSymbol, Dimension, FuncType, Shape, TensorType, Type};
