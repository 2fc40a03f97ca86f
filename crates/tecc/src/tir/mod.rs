//! Low-level, loop-and-buffer IR that primitive functions lower into.

mod workspace;

use std::collections::BTreeMap;
use std::fmt;

use crate::ir::{extents_bytes, DType, Dimension, Function, GlobalVar, Shape};
use crate::target::Target;

pub use workspace::calculate_workspace_bytes;

pub const DEFAULT_WORKSPACE_ALIGNMENT: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Buffer {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
}

impl Buffer {
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }

    pub fn size_in_bytes(&self) -> Option<u64> {
        extents_bytes(self.dtype, self.shape.dims())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    Global,
    Shared,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    Seq(Vec<Stmt>),
    /// Scratch allocation live for the duration of `body`.
    Allocate {
        buffer: String,
        dtype: DType,
        extents: Vec<Dimension>,
        scope: StorageScope,
        body: Box<Stmt>,
    },
    /// One operator evaluated over named buffers.
    Kernel {
        op: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
    /// Invocation of another low-level function in the same module.
    CallPrim {
        callee: GlobalVar,
        args: Vec<String>,
    },
    Nop,
}

impl Stmt {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Stmt::Seq(stmts) => stmts
                .iter()
                .try_for_each(|stmt| stmt.fmt_indented(f, depth)),
            Stmt::Allocate {
                buffer,
                dtype,
                extents,
                body,
                ..
            } => {
                let dims = extents
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "{pad}allocate {buffer}: {dtype}[{dims}]")?;
                body.fmt_indented(f, depth + 1)
            }
            Stmt::Kernel {
                op,
                inputs,
                outputs,
            } => writeln!(f, "{pad}{} = {op}({})", outputs.join(", "), inputs.join(", ")),
            Stmt::CallPrim { callee, args } => {
                writeln!(f, "{pad}call {callee}({})", args.join(", "))
            }
            Stmt::Nop => writeln!(f, "{pad}nop"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PrimFuncAttrs {
    pub global_symbol: Option<String>,
    pub target: Option<Target>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimFunc {
    pub params: Vec<String>,
    pub buffer_map: BTreeMap<String, Buffer>,
    pub body: Stmt,
    pub attrs: PrimFuncAttrs,
}

impl PrimFunc {
    pub fn new(params: Vec<Buffer>, body: Stmt) -> Self {
        let names = params.iter().map(|buffer| buffer.name.clone()).collect();
        let buffer_map = params
            .into_iter()
            .map(|buffer| (buffer.name.clone(), buffer))
            .collect();
        Self {
            params: names,
            buffer_map,
            body,
            attrs: PrimFuncAttrs::default(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.attrs.target = Some(target);
        self
    }

    pub fn with_global_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.attrs.global_symbol = Some(symbol.into());
        self
    }

    pub fn target(&self) -> Option<&Target> {
        self.attrs.target.as_ref()
    }

    pub fn param_buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffer_map.get(name)
    }
}

impl fmt::Display for PrimFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            match self.buffer_map.get(param) {
                Some(buffer) => write!(f, "{param}: {}{}", buffer.dtype, buffer.shape)?,
                None => f.write_str(param)?,
            }
        }
        f.write_str(")")?;
        if let Some(target) = self.target() {
            write!(f, " target={target:?}")?;
        }
        f.write_str(" {\n")?;
        self.body.fmt_indented(f, 1)?;
        f.write_str("}")
    }
}

/// An entry of a lowered module: a compiled kernel or a deferred external body.
#[derive(Debug, Clone, PartialEq)]
pub enum LoweredFunc {
    Prim(PrimFunc),
    External(Function),
}

impl LoweredFunc {
    pub fn as_prim(&self) -> Option<&PrimFunc> {
        match self {
            LoweredFunc::Prim(func) => Some(func),
            LoweredFunc::External(_) => None,
        }
    }
}

/// Ordered collection of low-level definitions keyed by global identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoweredModule {
    functions: BTreeMap<GlobalVar, LoweredFunc>,
}

impl LoweredModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, global: GlobalVar, func: LoweredFunc) {
        self.functions.insert(global, func);
    }

    pub fn get(&self, global: &GlobalVar) -> Option<&LoweredFunc> {
        self.functions.get(global)
    }

    pub fn contains(&self, global: &GlobalVar) -> bool {
        self.functions.contains_key(global)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GlobalVar, &LoweredFunc)> {
        self.functions.iter()
    }

    pub fn global_vars(&self) -> impl Iterator<Item = &GlobalVar> {
        self.functions.keys()
    }

    /// Only the compiled low-level functions, skipping external placeholders.
    pub fn prim_funcs(&self) -> impl Iterator<Item = (&GlobalVar, &PrimFunc)> {
        self.functions
            .iter()
            .filter_map(|(global, func)| func.as_prim().map(|prim| (global, prim)))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
