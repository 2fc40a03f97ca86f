//! Structural equality and hashing modulo bound-variable renaming.
//!
//! Two independently constructed functions with the same parameters, body
//! and attributes compare equal even though their variables carry different
//! ids. Free variables still compare by identity.

use std::collections::HashMap;

use crate::hashing::FingerprintHasher;
use crate::ir::expr::{Expr, ExprKind, Function, Var, VarId};

pub fn expr_eq(lhs: &Expr, rhs: &Expr) -> bool {
    EqContext::default().expr(lhs, rhs)
}

pub fn function_eq(lhs: &Function, rhs: &Function) -> bool {
    EqContext::default().function(lhs, rhs)
}

pub fn expr_hash(expr: &Expr) -> u64 {
    let mut ctx = HashContext::default();
    ctx.expr(expr);
    ctx.hasher.finish()
}

pub fn function_hash(func: &Function) -> u64 {
    let mut ctx = HashContext::default();
    ctx.function(func);
    ctx.hasher.finish()
}

#[derive(Default)]
struct EqContext {
    lhs: HashMap<VarId, usize>,
    rhs: HashMap<VarId, usize>,
    next: usize,
}

impl EqContext {
    fn bind(&mut self, lhs: &Var, rhs: &Var) -> bool {
        if lhs.ty() != rhs.ty() {
            return false;
        }
        self.lhs.insert(lhs.id(), self.next);
        self.rhs.insert(rhs.id(), self.next);
        self.next += 1;
        true
    }

    fn var(&self, lhs: &Var, rhs: &Var) -> bool {
        match (self.lhs.get(&lhs.id()), self.rhs.get(&rhs.id())) {
            (Some(a), Some(b)) => a == b,
            (None, None) => lhs.id() == rhs.id(),
            _ => false,
        }
    }

    fn function(&mut self, lhs: &Function, rhs: &Function) -> bool {
        if lhs.attrs != rhs.attrs
            || lhs.ret_type != rhs.ret_type
            || lhs.params.len() != rhs.params.len()
        {
            return false;
        }
        for (a, b) in lhs.params.iter().zip(&rhs.params) {
            if !self.bind(a, b) {
                return false;
            }
        }
        self.expr(&lhs.body, &rhs.body)
    }

    fn exprs(&mut self, lhs: &[Expr], rhs: &[Expr]) -> bool {
        lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| self.expr(a, b))
    }

    fn expr(&mut self, lhs: &Expr, rhs: &Expr) -> bool {
        if lhs.same_as(rhs) {
            return true;
        }
        if lhs.checked_type() != rhs.checked_type() {
            return false;
        }
        match (lhs.kind(), rhs.kind()) {
            (ExprKind::Var(a), ExprKind::Var(b)) => self.var(a, b),
            (ExprKind::Global(a), ExprKind::Global(b)) => a == b,
            (ExprKind::Op(a), ExprKind::Op(b)) => a == b,
            (ExprKind::Constant(a), ExprKind::Constant(b)) => a == b,
            (ExprKind::Tuple(a), ExprKind::Tuple(b)) => self.exprs(a, b),
            (
                ExprKind::TupleGetItem { tuple: ta, index: ia },
                ExprKind::TupleGetItem { tuple: tb, index: ib },
            ) => ia == ib && self.expr(ta, tb),
            (
                ExprKind::Call {
                    callee: ca,
                    args: aa,
                    attrs: xa,
                },
                ExprKind::Call {
                    callee: cb,
                    args: ab,
                    attrs: xb,
                },
            ) => xa == xb && self.expr(ca, cb) && self.exprs(aa, ab),
            (ExprKind::Function(a), ExprKind::Function(b)) => self.function(a, b),
            (
                ExprKind::Let {
                    var: va,
                    value: xa,
                    body: ba,
                },
                ExprKind::Let {
                    var: vb,
                    value: xb,
                    body: bb,
                },
            ) => self.expr(xa, xb) && self.bind(va, vb) && self.expr(ba, bb),
            (
                ExprKind::If {
                    cond: ca,
                    then_branch: ta,
                    else_branch: ea,
                },
                ExprKind::If {
                    cond: cb,
                    then_branch: tb,
                    else_branch: eb,
                },
            ) => self.expr(ca, cb) && self.expr(ta, tb) && self.expr(ea, eb),
            (
                ExprKind::OnDevice {
                    body: ba,
                    device: da,
                },
                ExprKind::OnDevice {
                    body: bb,
                    device: db,
                },
            ) => da == db && self.expr(ba, bb),
            (
                ExprKind::DeviceCopy {
                    body: ba,
                    src: sa,
                    dst: da,
                },
                ExprKind::DeviceCopy {
                    body: bb,
                    src: sb,
                    dst: db,
                },
            ) => sa == sb && da == db && self.expr(ba, bb),
            (ExprKind::CallLowered(a), ExprKind::CallLowered(b)) => {
                a.callee == b.callee && a.attrs == b.attrs && self.exprs(&a.args, &b.args)
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct HashContext {
    hasher: FingerprintHasher,
    bound: HashMap<VarId, usize>,
    next: usize,
}

impl HashContext {
    fn bind(&mut self, var: &Var) {
        self.hasher.write(&var.ty());
        self.bound.insert(var.id(), self.next);
        self.next += 1;
    }

    fn function(&mut self, func: &Function) {
        self.hasher.write_u8(0xf0);
        self.hasher.write(&func.attrs);
        self.hasher.write(&func.ret_type);
        self.hasher.write_u64(func.params.len() as u64);
        for param in &func.params {
            self.bind(param);
        }
        self.expr(&func.body);
    }

    fn exprs(&mut self, exprs: &[Expr]) {
        self.hasher.write_u64(exprs.len() as u64);
        for expr in exprs {
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        self.hasher.write(&expr.checked_type());
        match expr.kind() {
            ExprKind::Var(var) => match self.bound.get(&var.id()).copied() {
                Some(index) => {
                    self.hasher.write_u8(1);
                    self.hasher.write_u64(index as u64);
                }
                None => {
                    self.hasher.write_u8(2);
                    self.hasher.write(&var.id());
                }
            },
            ExprKind::Global(global) => {
                self.hasher.write_u8(3);
                self.hasher.write(global);
            }
            ExprKind::Op(op) => {
                self.hasher.write_u8(4);
                self.hasher.write(op);
            }
            ExprKind::Constant(constant) => {
                self.hasher.write_u8(5);
                self.hasher.write(constant);
            }
            ExprKind::Tuple(fields) => {
                self.hasher.write_u8(6);
                self.exprs(fields);
            }
            ExprKind::TupleGetItem { tuple, index } => {
                self.hasher.write_u8(7);
                self.hasher.write_u64(*index as u64);
                self.expr(tuple);
            }
            ExprKind::Call {
                callee,
                args,
                attrs,
            } => {
                self.hasher.write_u8(8);
                self.hasher.write(attrs);
                self.expr(callee);
                self.exprs(args);
            }
            ExprKind::Function(func) => self.function(func),
            ExprKind::Let { var, value, body } => {
                self.hasher.write_u8(9);
                self.expr(value);
                self.bind(var);
                self.expr(body);
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.hasher.write_u8(10);
                self.expr(cond);
                self.expr(then_branch);
                self.expr(else_branch);
            }
            ExprKind::OnDevice { body, device } => {
                self.hasher.write_u8(11);
                self.hasher.write(device);
                self.expr(body);
            }
            ExprKind::DeviceCopy { body, src, dst } => {
                self.hasher.write_u8(12);
                self.hasher.write(src);
                self.hasher.write(dst);
                self.expr(body);
            }
            ExprKind::CallLowered(call) => {
                self.hasher.write_u8(13);
                self.hasher.write(&call.callee);
                self.hasher.write(&call.attrs);
                self.exprs(&call.args);
            }
        }
    }
}
