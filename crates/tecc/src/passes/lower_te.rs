//! Rewrites calls to primitive and externally tagged functions into
//! `call_lowered` invocations of their lowered global functions.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::trace;

use crate::compiler::{CacheKey, CompiledArtifact, TeCompiler};
use crate::error::{LowerError, LowerResult};
use crate::ir::{
    BaseFunc, CallLowered, CallLoweredAttrs, Expr, ExprKind, Function, GlobalVar, IrModule,
    OpAttrs, ShapeFuncCallInfo, VarId,
};
use crate::op::{DEBUG_OP, DEVICE_COPY_OP};
use crate::passes::scope::ScopeStack;
use crate::target::{Target, VirtualDevice};
use crate::tir::{LoweredFunc, LoweredModule, PrimFunc};

/// What a processed callee was lowered from.
#[derive(Debug, Clone)]
pub enum ProcessedSource {
    Relay(Function),
    Prim(PrimFunc),
}

/// Record handed to the per-function callback once per distinct lowered callee.
///
/// The optional fields are always set by the rewriter; consumers treat a
/// missing one as a pipeline-ordering defect.
#[derive(Debug, Clone)]
pub struct ProcessedFunction {
    pub source: ProcessedSource,
    pub prim_fn_var: Option<GlobalVar>,
    pub prim_funcs: Option<BTreeMap<GlobalVar, PrimFunc>>,
    pub target: Option<Target>,
}

/// Artifacts one rewrite obtained from the cache, keyed by `prim_fn_var`.
#[derive(Debug, Clone, Default)]
pub struct ReachedArtifacts {
    pub lowered: BTreeMap<GlobalVar, Arc<CompiledArtifact>>,
    pub shape_funcs: BTreeMap<GlobalVar, Arc<CompiledArtifact>>,
}

impl ReachedArtifacts {
    /// Target-annotated low-level functions of every reached artifact.
    pub fn lowered_functions(&self) -> LoweredModule {
        let mut module = LoweredModule::new();
        for artifact in self.lowered.values().chain(self.shape_funcs.values()) {
            for (global, func) in artifact.targeted_funcs().iter() {
                module.add(global.clone(), func.clone());
            }
        }
        module
    }
}

/// A callee the rewriter knows how to lower.
#[derive(Debug, Clone)]
enum Callee {
    Primitive(Function),
    External(Function),
    PreLowered { global: GlobalVar, func: PrimFunc },
}

fn is_debug_wrapper(func: &Function) -> bool {
    match func.body.kind() {
        ExprKind::Call { callee, .. } => {
            matches!(callee.kind(), ExprKind::Op(op) if op.name() == DEBUG_OP)
        }
        _ => false,
    }
}

fn device_copy_props(func: &Function) -> Option<(VirtualDevice, VirtualDevice)> {
    match func.body.kind() {
        ExprKind::Call {
            callee,
            attrs: OpAttrs::DeviceCopy { src, dst },
            ..
        } => match callee.kind() {
            ExprKind::Op(op) if op.name() == DEVICE_COPY_OP => Some((src.clone(), dst.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn resolve_function(func: &Function) -> Option<Callee> {
    if func.is_external() {
        return Some(Callee::External(func.clone()));
    }
    if !func.is_primitive() || is_debug_wrapper(func) {
        return None;
    }
    Some(Callee::Primitive(func.clone()))
}

fn rebuilt(original: &Expr, kind: ExprKind) -> Expr {
    let expr = Expr::new(kind);
    match original.checked_type() {
        Some(ty) => expr.with_type(ty.clone()),
        None => expr,
    }
}

fn all_same(new: &[Expr], old: &[Expr]) -> bool {
    new.iter().zip(old).all(|(a, b)| a.same_as(b))
}

pub struct LowerTensorExprRewriter<'a, F> {
    module: &'a IrModule,
    compiler: &'a TeCompiler,
    module_name: &'a str,
    host_target: Target,
    process_fn: F,
    processed: HashSet<GlobalVar>,
    reached: ReachedArtifacts,
    scopes: ScopeStack<VarId, Option<Callee>>,
    devices: Vec<VirtualDevice>,
    current: String,
}

impl<'a, F> LowerTensorExprRewriter<'a, F>
where
    F: FnMut(&ProcessedFunction) -> LowerResult<()>,
{
    pub fn new(
        module: &'a IrModule,
        compiler: &'a TeCompiler,
        module_name: &'a str,
        host_target: Target,
        process_fn: F,
    ) -> Self {
        Self {
            module,
            compiler,
            module_name,
            host_target,
            process_fn,
            processed: HashSet::new(),
            reached: ReachedArtifacts::default(),
            scopes: ScopeStack::new(),
            devices: Vec::new(),
            current: String::new(),
        }
    }

    /// Rewrites the body of one top-level function.
    pub fn rewrite_function(&mut self, name: &str, func: &Function) -> LowerResult<Function> {
        self.current = name.to_string();
        let body = self.rewrite_on_device(func.attrs.result_device.as_ref(), &func.body)?;
        Ok(Function {
            params: func.params.clone(),
            body,
            ret_type: func.ret_type.clone(),
            attrs: func.attrs.clone(),
        })
    }

    /// Functions already lowered to `prim_fn_var`s during this rewrite.
    pub fn processed(&self) -> &HashSet<GlobalVar> {
        &self.processed
    }

    /// Consumes the rewriter, returning what it lowered.
    pub fn into_reached(self) -> ReachedArtifacts {
        self.reached
    }

    fn rewrite_on_device(
        &mut self,
        device: Option<&VirtualDevice>,
        expr: &Expr,
    ) -> LowerResult<Expr> {
        let Some(device) = device else {
            return self.rewrite(expr);
        };
        self.devices.push(device.clone());
        let result = self.rewrite(expr);
        self.devices.pop();
        result
    }

    fn resolve(&self, expr: &Expr) -> Option<Callee> {
        match expr.kind() {
            ExprKind::Global(global) => match self.module.lookup(global)? {
                BaseFunc::Relay(func) => resolve_function(func),
                BaseFunc::Prim(func) => Some(Callee::PreLowered {
                    global: global.clone(),
                    func: func.clone(),
                }),
            },
            ExprKind::Var(var) => self.scopes.lookup(&var.id()).cloned().flatten(),
            ExprKind::Function(func) => resolve_function(func),
            _ => None,
        }
    }

    fn rewrite_all(&mut self, exprs: &[Expr]) -> LowerResult<Vec<Expr>> {
        exprs.iter().map(|expr| self.rewrite(expr)).collect()
    }

    fn rewrite(&mut self, expr: &Expr) -> LowerResult<Expr> {
        match expr.kind() {
            ExprKind::Var(_) | ExprKind::Global(_) | ExprKind::Op(_) | ExprKind::Constant(_) => {
                Ok(expr.clone())
            }
            ExprKind::Tuple(fields) => {
                let new_fields = self.rewrite_all(fields)?;
                if all_same(&new_fields, fields) {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(expr, ExprKind::Tuple(new_fields)))
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let new_tuple = self.rewrite(tuple)?;
                if new_tuple.same_as(tuple) {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(
                    expr,
                    ExprKind::TupleGetItem {
                        tuple: new_tuple,
                        index: *index,
                    },
                ))
            }
            ExprKind::Function(func) => {
                if func.is_primitive() || func.is_external() || func.attrs.external_symbol.is_some()
                {
                    return Ok(expr.clone());
                }
                let body = self.rewrite_on_device(func.attrs.result_device.as_ref(), &func.body)?;
                if body.same_as(&func.body) {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(
                    expr,
                    ExprKind::Function(Function {
                        params: func.params.clone(),
                        body,
                        ret_type: func.ret_type.clone(),
                        attrs: func.attrs.clone(),
                    }),
                ))
            }
            ExprKind::Let { .. } => self.rewrite_let_chain(expr),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let new_cond = self.rewrite(cond)?;
                let new_then = self.rewrite(then_branch)?;
                let new_else = self.rewrite(else_branch)?;
                if new_cond.same_as(cond) && new_then.same_as(then_branch) && new_else.same_as(else_branch)
                {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(
                    expr,
                    ExprKind::If {
                        cond: new_cond,
                        then_branch: new_then,
                        else_branch: new_else,
                    },
                ))
            }
            ExprKind::OnDevice { body, device } => {
                let new_body = self.rewrite_on_device(Some(device), body)?;
                if new_body.same_as(body) {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(
                    expr,
                    ExprKind::OnDevice {
                        body: new_body,
                        device: device.clone(),
                    },
                ))
            }
            ExprKind::DeviceCopy { body, src, dst } => {
                let new_body = self.rewrite(body)?;
                if new_body.same_as(body) {
                    return Ok(expr.clone());
                }
                Ok(rebuilt(
                    expr,
                    ExprKind::DeviceCopy {
                        body: new_body,
                        src: src.clone(),
                        dst: dst.clone(),
                    },
                ))
            }
            ExprKind::CallLowered(call) => {
                let new_args = self.rewrite_all(&call.args)?;
                if all_same(&new_args, &call.args) {
                    return Ok(expr.clone());
                }
                let mut call = call.clone();
                call.args = new_args;
                Ok(rebuilt(expr, ExprKind::CallLowered(call)))
            }
            ExprKind::Call {
                callee,
                args,
                attrs,
            } => self.rewrite_call(expr, callee, args, attrs),
        }
    }

    fn rewrite_let_chain(&mut self, expr: &Expr) -> LowerResult<Expr> {
        let mut bindings = Vec::new();
        let mut cursor = expr.clone();
        while let ExprKind::Let { var, value, body } = cursor.kind() {
            bindings.push((cursor.clone(), var.clone(), value.clone()));
            let next = body.clone();
            cursor = next;
        }

        let mut new_values = Vec::with_capacity(bindings.len());
        let mut frames = 0;
        let mut result = Ok(());
        for (_, var, value) in &bindings {
            self.scopes.push_frame();
            frames += 1;
            match self.rewrite(value) {
                Ok(new_value) => {
                    let resolved = self.resolve(&new_value);
                    self.scopes.bind(var.id(), resolved);
                    new_values.push(new_value);
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        let body = result.and_then(|_| self.rewrite(&cursor));
        for _ in 0..frames {
            self.scopes.pop_frame();
        }
        let mut body = body?;

        for ((original, var, value), new_value) in bindings.iter().zip(new_values).rev() {
            let ExprKind::Let { body: old_body, .. } = original.kind() else {
                continue;
            };
            if new_value.same_as(value) && body.same_as(old_body) {
                body = original.clone();
                continue;
            }
            body = rebuilt(
                original,
                ExprKind::Let {
                    var: var.clone(),
                    value: new_value,
                    body,
                },
            );
        }
        Ok(body)
    }

    fn rewrite_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        args: &[Expr],
        attrs: &OpAttrs,
    ) -> LowerResult<Expr> {
        let Some(resolved) = self.resolve(callee) else {
            let new_callee = self.rewrite(callee)?;
            let new_args = self.rewrite_all(args)?;
            if new_callee.same_as(callee) && all_same(&new_args, args) {
                return Ok(expr.clone());
            }
            return Ok(rebuilt(
                expr,
                ExprKind::Call {
                    callee: new_callee,
                    args: new_args,
                    attrs: attrs.clone(),
                },
            ));
        };

        let new_args = self.rewrite_all(args)?;

        match resolved {
            Callee::PreLowered { global, func } => {
                trace!("call to already lowered {global}");
                let target = func.target().cloned();
                if !self.processed.contains(&global) {
                    let mut prim_funcs = BTreeMap::new();
                    prim_funcs.insert(global.clone(), func.clone());
                    (self.process_fn)(&ProcessedFunction {
                        source: ProcessedSource::Prim(func),
                        prim_fn_var: Some(global.clone()),
                        prim_funcs: Some(prim_funcs),
                        target: target.clone(),
                    })?;
                    self.processed.insert(global.clone());
                }
                let attrs = CallLoweredAttrs {
                    all_prim_fn_vars: vec![global.clone()],
                    target,
                    ..CallLoweredAttrs::default()
                };
                Ok(rebuilt(
                    expr,
                    ExprKind::CallLowered(CallLowered {
                        callee: global,
                        args: new_args,
                        attrs,
                    }),
                ))
            }
            Callee::Primitive(func) | Callee::External(func) => {
                if let Some((src, dst)) = device_copy_props(&func) {
                    if new_args.len() != 1 {
                        return Err(LowerError::InvalidDeviceCopy {
                            found: new_args.len(),
                        });
                    }
                    let mut new_args = new_args;
                    return Ok(rebuilt(
                        expr,
                        ExprKind::DeviceCopy {
                            body: new_args.remove(0),
                            src,
                            dst,
                        },
                    ));
                }
                let target = if func.is_external() {
                    Target::ext_dev()
                } else {
                    self.devices
                        .last()
                        .and_then(|device| device.target.clone())
                        .ok_or_else(|| LowerError::UnconstrainedDevice {
                            function: self.current.clone(),
                        })?
                };
                self.make_lowered_call(expr, func, new_args, target)
            }
        }
    }

    fn make_lowered_call(
        &mut self,
        expr: &Expr,
        func: Function,
        args: Vec<Expr>,
        target: Target,
    ) -> LowerResult<Expr> {
        let key = CacheKey::new(func.clone(), target);
        let artifact = self.compiler.lower_for_module(&key, self.module_name)?;
        let external = func.is_external();

        let mut prim_funcs = BTreeMap::new();
        for (global, lowered) in artifact.funcs.iter() {
            match lowered {
                LoweredFunc::Prim(prim) if !external => {
                    prim_funcs.insert(global.clone(), prim.clone());
                }
                LoweredFunc::External(_) if external => {}
                _ => {
                    return Err(LowerError::malformed(format!(
                        "{global} is bound to the wrong kind of definition for {}",
                        if external {
                            "an external function"
                        } else {
                            "a lowered primitive"
                        }
                    )))
                }
            }
        }
        let all_prim_fn_vars = prim_funcs.keys().cloned().collect::<Vec<_>>();
        self.reached
            .lowered
            .entry(artifact.prim_fn_var.clone())
            .or_insert_with(|| Arc::clone(&artifact));

        if self.processed.insert(artifact.prim_fn_var.clone()) {
            (self.process_fn)(&ProcessedFunction {
                source: ProcessedSource::Relay(func.clone()),
                prim_fn_var: Some(artifact.prim_fn_var.clone()),
                prim_funcs: Some(prim_funcs),
                target: Some(artifact.target.clone()),
            })?;
        }

        let shape_func = if func.ret_type.is_dynamic() {
            let shape_key = CacheKey::new(func.clone(), self.host_target.clone());
            let shape = self.compiler.lower_shape_func(&shape_key)?;
            self.reached
                .shape_funcs
                .entry(shape.prim_fn_var.clone())
                .or_insert_with(|| Arc::clone(&shape));
            Some(shape_func_info(&shape))
        } else {
            None
        };

        let attrs = CallLoweredAttrs {
            relay_attrs: func.attrs.clone(),
            all_prim_fn_vars,
            reshape_only: !external && func.attrs.reshape_only,
            shape_func,
            target: Some(artifact.target.clone()),
        };
        Ok(rebuilt(
            expr,
            ExprKind::CallLowered(CallLowered {
                callee: artifact.prim_fn_var.clone(),
                args,
                attrs,
            }),
        ))
    }
}

fn shape_func_info(shape: &CompiledArtifact) -> ShapeFuncCallInfo {
    ShapeFuncCallInfo {
        prim_shape_fn_var: shape.prim_fn_var.clone(),
        param_states: shape.shape_func_param_states.clone(),
        num_inputs: shape.inputs.len(),
        num_outputs: shape.outputs.len(),
        all_prim_shape_fn_vars: shape.all_prim_fn_vars(),
    }
}
