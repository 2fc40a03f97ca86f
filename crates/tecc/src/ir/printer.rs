//! Compact textual form of graph expressions for logs and error messages.

use std::fmt::{self, Write};

use crate::ir::attrs::OpAttrs;
use crate::ir::expr::{Expr, ExprKind, Function, Var};

fn write_var(f: &mut dyn Write, var: &Var) -> fmt::Result {
    write!(f, "%{}", var.name())
}

fn write_list(f: &mut dyn Write, exprs: &[Expr]) -> fmt::Result {
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}

fn write_attrs(f: &mut dyn Write, attrs: &OpAttrs) -> fmt::Result {
    match attrs {
        OpAttrs::None => Ok(()),
        OpAttrs::DeviceCopy { src, dst } => write!(f, ", src={src}, dst={dst}"),
        OpAttrs::Shape(shape) => write!(f, ", newshape={shape:?}"),
        OpAttrs::Axes(axes) => write!(f, ", axis={axes:?}"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fn (")?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write_var(f, param)?;
            if let Some(ty) = param.ty() {
                write!(f, ": {ty}")?;
            }
        }
        write!(f, ") -> {}", self.ret_type)?;
        if self.attrs.primitive {
            f.write_str(" primitive")?;
        }
        if let Some(compiler) = &self.attrs.compiler {
            write!(f, " compiler={compiler:?}")?;
        }
        if let Some(symbol) = &self.attrs.global_symbol {
            write!(f, " global_symbol={symbol:?}")?;
        }
        write!(f, " {{ {} }}", self.body)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Var(var) => write_var(f, var),
            ExprKind::Global(global) => write!(f, "{global}"),
            ExprKind::Op(op) => f.write_str(op.name()),
            ExprKind::Constant(constant) => write!(f, "meta[Constant]{}", constant.ty.shape),
            ExprKind::Tuple(fields) => {
                f.write_str("(")?;
                write_list(f, fields)?;
                f.write_str(")")
            }
            ExprKind::TupleGetItem { tuple, index } => write!(f, "{tuple}.{index}"),
            ExprKind::Call {
                callee,
                args,
                attrs,
            } => {
                match callee.kind() {
                    ExprKind::Function(_) => write!(f, "({callee})(")?,
                    _ => write!(f, "{callee}(")?,
                }
                write_list(f, args)?;
                write_attrs(f, attrs)?;
                f.write_str(")")
            }
            ExprKind::Function(func) => write!(f, "{func}"),
            ExprKind::Let { var, value, body } => {
                f.write_str("let ")?;
                write_var(f, var)?;
                write!(f, " = {value}; {body}")
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => write!(f, "if ({cond}) {{ {then_branch} }} else {{ {else_branch} }}"),
            ExprKind::OnDevice { body, device } => write!(f, "on_device({body}, {device})"),
            ExprKind::DeviceCopy { body, src, dst } => {
                write!(f, "device_copy({body}, src={src}, dst={dst})")
            }
            ExprKind::CallLowered(call) => {
                write!(f, "call_lowered({}, (", call.callee)?;
                write_list(f, &call.args)?;
                f.write_str("))")
            }
        }
    }
}
