//! Lowers a primitive graph function into low-level functions.
//!
//! The body is walked in evaluation order; every operator call becomes a
//! stage writing fresh output buffers. Parameters and the result become the
//! low-level function's parameters, everything else becomes a scratch
//! allocation wrapped around the kernel sequence.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::compiler::artifact::{CompiledArtifact, Schedule, Stage, TensorDesc};
use crate::compiler::names::{sanitize_symbol, truncate_name, NameSupply};
use crate::error::{LowerError, LowerResult};
use crate::ir::{
    DType, Expr, ExprId, ExprKind, Function, GlobalVar, ShapeFuncParamState, TensorType, Type,
    VarId,
};
use crate::op::OpRegistry;
use crate::target::Target;
use crate::tir::{Buffer, LoweredFunc, LoweredModule, PrimFunc, StorageScope, Stmt};

/// Produces a unique, mangled global name from a candidate.
pub(crate) type FreshName<'a> = dyn FnMut(&str) -> String + 'a;

struct StageInfo {
    op: String,
    is_op: bool,
    emits_helper: bool,
    data_dependent: bool,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

struct Walk {
    params: Vec<Vec<TensorDesc>>,
    stages: Vec<StageInfo>,
    types: HashMap<String, TensorType>,
    outputs: Vec<String>,
}

impl Walk {
    fn param_index(&self, buffer: &str) -> Option<usize> {
        self.params
            .iter()
            .position(|descs| descs.iter().any(|desc| desc.name == buffer))
    }

    fn inputs(&self) -> Vec<TensorDesc> {
        self.params.iter().flatten().cloned().collect()
    }

    fn outputs(&self) -> Vec<TensorDesc> {
        self.outputs
            .iter()
            .filter_map(|name| {
                self.types.get(name).map(|ty| TensorDesc {
                    name: name.clone(),
                    ty: ty.clone(),
                })
            })
            .collect()
    }

    fn intermediates(&self) -> Vec<String> {
        let params = self
            .params
            .iter()
            .flatten()
            .map(|desc| desc.name.as_str())
            .collect::<HashSet<_>>();
        let outputs = self.outputs.iter().map(String::as_str).collect::<HashSet<_>>();
        self.stages
            .iter()
            .flat_map(|stage| stage.outputs.iter())
            .filter(|name| !params.contains(name.as_str()) && !outputs.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// `fused_` followed by the operators in evaluation order.
    fn fused_name(&self) -> String {
        let mut name = String::from("fused");
        for stage in self.stages.iter().filter(|stage| stage.is_op) {
            name.push('_');
            name.push_str(&stage.op);
        }
        truncate_name(&sanitize_symbol(&name))
    }
}

struct Walker<'a> {
    ops: &'a OpRegistry,
    names: NameSupply,
    vars: HashMap<VarId, Vec<String>>,
    memo: HashMap<ExprId, Vec<String>>,
    stages: Vec<StageInfo>,
    types: HashMap<String, TensorType>,
}

impl<'a> Walker<'a> {
    fn new(ops: &'a OpRegistry) -> Self {
        Self {
            ops,
            names: NameSupply::new(),
            vars: HashMap::new(),
            memo: HashMap::new(),
            stages: Vec::new(),
            types: HashMap::new(),
        }
    }

    fn fresh_buffers(&mut self, base: &str, ty: &Type) -> Vec<String> {
        ty.tensors()
            .into_iter()
            .map(|tensor| {
                let name = self.names.fresh(&sanitize_symbol(base));
                self.types.insert(name.clone(), tensor.clone());
                name
            })
            .collect()
    }

    fn run(mut self, func: &Function) -> LowerResult<Walk> {
        let mut params = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let ty = param.ty().ok_or_else(|| {
                LowerError::malformed(format!("parameter %{} has no type", param.name()))
            })?;
            let names = self.fresh_buffers(param.name(), ty);
            let descs = names
                .iter()
                .map(|name| TensorDesc {
                    name: name.clone(),
                    ty: self.types[name].clone(),
                })
                .collect();
            self.vars.insert(param.id(), names);
            params.push(descs);
        }
        let outputs = self.visit(&func.body)?;
        Ok(Walk {
            params,
            stages: self.stages,
            types: self.types,
            outputs,
        })
    }

    fn visit(&mut self, expr: &Expr) -> LowerResult<Vec<String>> {
        if let Some(found) = self.memo.get(&expr.id()) {
            return Ok(found.clone());
        }
        let buffers = match expr.kind() {
            ExprKind::Var(var) => self.vars.get(&var.id()).cloned().ok_or_else(|| {
                LowerError::malformed(format!("free variable %{} in primitive body", var.name()))
            })?,
            ExprKind::Constant(constant) => {
                let outputs = self.fresh_buffers("constant", &Type::Tensor(constant.ty.clone()));
                self.stages.push(StageInfo {
                    op: "constant".to_string(),
                    is_op: false,
                    emits_helper: false,
                    data_dependent: false,
                    inputs: Vec::new(),
                    outputs: outputs.clone(),
                });
                outputs
            }
            ExprKind::Tuple(fields) => {
                let mut out = Vec::new();
                for field in fields {
                    out.extend(self.visit(field)?);
                }
                out
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let fields = self.visit(tuple)?;
                let field = fields.get(*index).cloned().ok_or_else(|| {
                    LowerError::malformed(format!(
                        "tuple projection .{index} out of range for {} fields",
                        fields.len()
                    ))
                })?;
                vec![field]
            }
            ExprKind::Let { var, value, body } => {
                let bound = self.visit(value)?;
                self.vars.insert(var.id(), bound);
                self.visit(body)?
            }
            ExprKind::Call { callee, args, .. } => {
                let ExprKind::Op(op) = callee.kind() else {
                    return Err(LowerError::malformed(format!(
                        "primitive body calls non-operator `{callee}`"
                    )));
                };
                let def = self.ops.get(op.name()).ok_or_else(|| LowerError::UnknownOp {
                    op: op.name().to_string(),
                })?;
                let mut inputs = Vec::new();
                for arg in args {
                    inputs.extend(self.visit(arg)?);
                }
                let ty = expr.checked_type().ok_or_else(|| {
                    LowerError::malformed(format!("call to `{}` has no checked type", op.name()))
                })?;
                let outputs = self.fresh_buffers(&format!("T_{}", op.name()), ty);
                self.stages.push(StageInfo {
                    op: op.name().to_string(),
                    is_op: true,
                    emits_helper: def.emits_helper,
                    data_dependent: def.shape_data_dependent,
                    inputs,
                    outputs: outputs.clone(),
                });
                outputs
            }
            _ => {
                return Err(LowerError::malformed(format!(
                    "unsupported expression in primitive body: {expr}"
                )))
            }
        };
        self.memo.insert(expr.id(), buffers.clone());
        Ok(buffers)
    }
}

fn allocate_around(body: Stmt, buffers: &[(String, TensorType)]) -> Stmt {
    buffers.iter().rev().fold(body, |body, (name, ty)| Stmt::Allocate {
        buffer: name.clone(),
        dtype: ty.dtype,
        extents: ty.shape.dims().to_vec(),
        scope: StorageScope::Global,
        body: Box::new(body),
    })
}

fn param_buffers(descs: &[TensorDesc]) -> Vec<Buffer> {
    let mut seen = HashSet::new();
    descs
        .iter()
        .filter(|desc| seen.insert(desc.name.clone()))
        .map(|desc| Buffer::new(desc.name.clone(), desc.ty.dtype, desc.ty.shape.clone()))
        .collect()
}

fn single_op_call(func: &Function) -> Option<&str> {
    match func.body.kind() {
        ExprKind::Call { callee, args, .. } => match callee.kind() {
            ExprKind::Op(op) if args.iter().all(|arg| arg.as_var().is_some()) => Some(op.name()),
            _ => None,
        },
        _ => None,
    }
}

/// Lowers `func` for `target`, naming the primary function and helpers through `fresh_name`.
pub(crate) fn lower_primitive(
    ops: &OpRegistry,
    func: &Function,
    target: &Target,
    fresh_name: &mut FreshName<'_>,
) -> LowerResult<CompiledArtifact> {
    let walk = Walker::new(ops).run(func)?;
    let inputs = walk.inputs();
    let outputs = walk.outputs();
    let mut funcs = LoweredModule::new();

    if let Some(direct) = single_op_call(func)
        .and_then(|name| ops.get(name))
        .and_then(|def| def.direct.clone())
    {
        if let Some(prim) = direct(func, target) {
            let name = fresh_name(&walk.fused_name());
            trace!("operator supplied low-level function {name}");
            let prim = prim.with_target(target.clone()).with_global_symbol(name.clone());
            let prim_fn_var = GlobalVar::new(name);
            funcs.add(prim_fn_var.clone(), LoweredFunc::Prim(prim.clone()));
            return Ok(CompiledArtifact {
                target: target.clone(),
                prim_fn_var,
                inputs,
                outputs,
                schedule: None,
                prim_func: Some(prim),
                shape_func_param_states: Vec::new(),
                funcs,
            });
        }
    }

    let fused = walk.fused_name();
    let name = fresh_name(&fused);
    let prim_fn_var = GlobalVar::new(name.clone());

    let mut stmts = Vec::with_capacity(walk.stages.len());
    let mut stages = Vec::with_capacity(walk.stages.len());
    for stage in &walk.stages {
        let mut args = stage.inputs.clone();
        args.extend(stage.outputs.iter().cloned());
        if stage.emits_helper {
            let helper_name = fresh_name(&format!("{fused}_{}", sanitize_symbol(&stage.op)));
            let helper_params = args
                .iter()
                .filter_map(|buffer| {
                    walk.types.get(buffer).map(|ty| TensorDesc {
                        name: buffer.clone(),
                        ty: ty.clone(),
                    })
                })
                .collect::<Vec<_>>();
            let helper = PrimFunc::new(
                param_buffers(&helper_params),
                Stmt::Kernel {
                    op: stage.op.clone(),
                    inputs: stage.inputs.clone(),
                    outputs: stage.outputs.clone(),
                },
            )
            .with_target(target.clone())
            .with_global_symbol(helper_name.clone());
            let helper_var = GlobalVar::new(helper_name);
            funcs.add(helper_var.clone(), LoweredFunc::Prim(helper));
            stmts.push(Stmt::CallPrim {
                callee: helper_var,
                args,
            });
        } else {
            stmts.push(Stmt::Kernel {
                op: stage.op.clone(),
                inputs: stage.inputs.clone(),
                outputs: stage.outputs.clone(),
            });
        }
        stages.push(Stage {
            name: stage.outputs.first().cloned().unwrap_or_default(),
            op: stage.op.clone(),
            inputs: stage.inputs.clone(),
            outputs: stage.outputs.clone(),
        });
    }

    let scratch = walk
        .intermediates()
        .into_iter()
        .filter_map(|name| walk.types.get(&name).cloned().map(|ty| (name, ty)))
        .collect::<Vec<_>>();
    let body = allocate_around(Stmt::Seq(stmts), &scratch);

    let mut signature = inputs.clone();
    signature.extend(outputs.iter().cloned());
    let prim = PrimFunc::new(param_buffers(&signature), body)
        .with_target(target.clone())
        .with_global_symbol(name);
    funcs.add(prim_fn_var.clone(), LoweredFunc::Prim(prim));

    Ok(CompiledArtifact {
        target: target.clone(),
        prim_fn_var,
        inputs,
        outputs,
        schedule: Some(Schedule { stages }),
        prim_func: None,
        shape_func_param_states: Vec::new(),
        funcs,
    })
}

fn shape_desc(name: &str, ty: &TensorType) -> TensorDesc {
    TensorDesc {
        name: format!("{name}_shape"),
        ty: TensorType::fixed(DType::I64, &[ty.shape.rank() as u64]),
    }
}

/// Lowers the host-side function computing only the output shapes of `func`.
pub(crate) fn lower_shape_func(
    ops: &OpRegistry,
    func: &Function,
    host_target: &Target,
    fresh_name: &mut FreshName<'_>,
) -> LowerResult<CompiledArtifact> {
    let walk = Walker::new(ops).run(func)?;
    let mut states = vec![ShapeFuncParamState::NoNeed; walk.params.len()];
    let mut data_inputs = HashSet::new();

    for stage in walk.stages.iter().filter(|stage| stage.is_op) {
        for input in &stage.inputs {
            match walk.param_index(input) {
                Some(index) if stage.data_dependent => {
                    states[index] = states[index].merge(ShapeFuncParamState::NeedInputData);
                    data_inputs.insert(input.clone());
                }
                Some(index) => {
                    states[index] = states[index].merge(ShapeFuncParamState::NeedInputShape);
                }
                None if stage.data_dependent => {
                    return Err(LowerError::malformed(format!(
                        "shape function of `{}` depends on the value of intermediate `{input}`",
                        stage.op
                    )));
                }
                None => {}
            }
        }
    }
    for output in &walk.outputs {
        if let Some(index) = walk.param_index(output) {
            states[index] = states[index].merge(ShapeFuncParamState::NeedInputShape);
        }
    }

    let mut inputs = Vec::new();
    for (descs, state) in walk.params.iter().zip(&states) {
        for desc in descs {
            if state.needs_data() {
                inputs.push(desc.clone());
            }
            if state.needs_shape() {
                inputs.push(shape_desc(&desc.name, &desc.ty));
            }
        }
    }
    let outputs = walk
        .outputs()
        .iter()
        .map(|desc| shape_desc(&desc.name, &desc.ty))
        .collect::<Vec<_>>();

    let shape_name = |buffer: &str| format!("{buffer}_shape");
    let stmts = walk
        .stages
        .iter()
        .filter(|stage| stage.is_op)
        .map(|stage| Stmt::Kernel {
            op: format!("{}_shape_func", stage.op),
            inputs: stage
                .inputs
                .iter()
                .map(|input| {
                    if data_inputs.contains(input) {
                        input.clone()
                    } else {
                        shape_name(input)
                    }
                })
                .collect(),
            outputs: stage.outputs.iter().map(|output| shape_name(output)).collect(),
        })
        .collect::<Vec<_>>();
    let scratch = walk
        .intermediates()
        .into_iter()
        .filter_map(|name| {
            walk.types.get(&name).map(|ty| {
                let desc = shape_desc(&name, ty);
                (desc.name, desc.ty)
            })
        })
        .collect::<Vec<_>>();
    let body = allocate_around(Stmt::Seq(stmts), &scratch);

    let name = fresh_name(&format!("{}_shape_func", walk.fused_name()));
    let prim_fn_var = GlobalVar::new(name.clone());
    let mut signature = inputs.clone();
    signature.extend(outputs.iter().cloned());
    let prim = PrimFunc::new(param_buffers(&signature), body)
        .with_target(host_target.clone())
        .with_global_symbol(name);
    let mut funcs = LoweredModule::new();
    funcs.add(prim_fn_var.clone(), LoweredFunc::Prim(prim));

    Ok(CompiledArtifact {
        target: host_target.clone(),
        prim_fn_var,
        inputs,
        outputs,
        schedule: None,
        prim_func: None,
        shape_func_param_states: states,
        funcs,
    })
}
