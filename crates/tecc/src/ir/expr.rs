use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ir::attrs::{CallLoweredAttrs, FuncAttrs, OpAttrs};
use crate::ir::structural;
use crate::ir::ty::{FuncType, TensorType, Type};
use crate::target::VirtualDevice;

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

impl VarId {
    fn fresh() -> Self {
        VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A local variable; identity is its id, not its name.
#[derive(Debug, Clone)]
pub struct Var {
    id: VarId,
    name: Arc<str>,
    ty: Option<Type>,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: VarId::fresh(),
            name: Arc::from(name.into()),
            ty: Some(ty),
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            id: VarId::fresh(),
            name: Arc::from(name.into()),
            ty: None,
        }
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Option<&Type> {
        self.ty.as_ref()
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Var {}

impl std::hash::Hash for Var {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Module-level function identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalVar(Arc<str>);

impl GlobalVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::from(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Reference to a registered operator by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Op(Arc<str>);

impl Op {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::from(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: TensorType,
    pub data: Arc<[u8]>,
}

impl Constant {
    pub fn zeros(ty: TensorType) -> Self {
        let len = ty.size_in_bytes().unwrap_or(0) as usize;
        Self {
            ty,
            data: Arc::from(vec![0u8; len]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub params: Vec<Var>,
    pub body: Expr,
    pub ret_type: Type,
    pub attrs: FuncAttrs,
}

impl Function {
    pub fn new(params: Vec<Var>, body: Expr, ret_type: Type) -> Self {
        Self {
            params,
            body,
            ret_type,
            attrs: FuncAttrs::default(),
        }
    }

    pub fn with_attrs(mut self, attrs: FuncAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn is_primitive(&self) -> bool {
        self.attrs.primitive
    }

    pub fn is_external(&self) -> bool {
        self.attrs.compiler.is_some()
    }

    pub fn func_type(&self) -> Type {
        Type::Func(FuncType {
            params: self
                .params
                .iter()
                .map(|param| param.ty().cloned().unwrap_or(Type::Tuple(Vec::new())))
                .collect(),
            ret: Box::new(self.ret_type.clone()),
        })
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        structural::function_eq(self, other)
    }
}

impl Eq for Function {}

/// The uniform low-level invocation form produced by the call-rewriting pass.
#[derive(Debug, Clone)]
pub struct CallLowered {
    pub callee: GlobalVar,
    pub args: Vec<Expr>,
    pub attrs: CallLoweredAttrs,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Var(Var),
    Global(GlobalVar),
    Op(Op),
    Constant(Constant),
    Tuple(Vec<Expr>),
    TupleGetItem {
        tuple: Expr,
        index: usize,
    },
    Call {
        callee: Expr,
        args: Vec<Expr>,
        attrs: OpAttrs,
    },
    Function(Function),
    Let {
        var: Var,
        value: Expr,
        body: Expr,
    },
    If {
        cond: Expr,
        then_branch: Expr,
        else_branch: Expr,
    },
    OnDevice {
        body: Expr,
        device: VirtualDevice,
    },
    DeviceCopy {
        body: Expr,
        src: VirtualDevice,
        dst: VirtualDevice,
    },
    CallLowered(CallLowered),
}

#[derive(Debug)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub ty: Option<Type>,
}

/// Pointer identity of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

/// Immutable, cheaply cloneable graph expression.
#[derive(Clone)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr(Arc::new(ExprNode { kind, ty: None }))
    }

    pub fn with_type(self, ty: Type) -> Self {
        let node = Arc::try_unwrap(self.0).unwrap_or_else(|shared| ExprNode {
            kind: shared.kind.clone(),
            ty: shared.ty.clone(),
        });
        Expr(Arc::new(ExprNode {
            kind: node.kind,
            ty: Some(ty),
        }))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    pub fn checked_type(&self) -> Option<&Type> {
        self.0.ty.as_ref()
    }

    pub fn id(&self) -> ExprId {
        ExprId(Arc::as_ptr(&self.0) as usize)
    }

    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn var(var: &Var) -> Self {
        let expr = Expr::new(ExprKind::Var(var.clone()));
        match var.ty() {
            Some(ty) => expr.with_type(ty.clone()),
            None => expr,
        }
    }

    pub fn global(global: GlobalVar) -> Self {
        Expr::new(ExprKind::Global(global))
    }

    pub fn op(name: &str) -> Self {
        Expr::new(ExprKind::Op(Op::new(name)))
    }

    pub fn constant(constant: Constant) -> Self {
        let ty = Type::Tensor(constant.ty.clone());
        Expr::new(ExprKind::Constant(constant)).with_type(ty)
    }

    pub fn tuple(fields: Vec<Expr>) -> Self {
        let types = fields
            .iter()
            .map(|field| field.checked_type().cloned())
            .collect::<Option<Vec<_>>>();
        let expr = Expr::new(ExprKind::Tuple(fields));
        match types {
            Some(types) => expr.with_type(Type::Tuple(types)),
            None => expr,
        }
    }

    pub fn tuple_get_item(tuple: Expr, index: usize) -> Self {
        let ty = match tuple.checked_type() {
            Some(Type::Tuple(fields)) => fields.get(index).cloned(),
            _ => None,
        };
        let expr = Expr::new(ExprKind::TupleGetItem { tuple, index });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::call_with_attrs(callee, args, OpAttrs::None)
    }

    pub fn call_with_attrs(callee: Expr, args: Vec<Expr>, attrs: OpAttrs) -> Self {
        let ty = match callee.kind() {
            ExprKind::Function(func) => Some(func.ret_type.clone()),
            _ => match callee.checked_type() {
                Some(Type::Func(func)) => Some((*func.ret).clone()),
                _ => None,
            },
        };
        let expr = Expr::new(ExprKind::Call {
            callee,
            args,
            attrs,
        });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn function(func: Function) -> Self {
        let ty = func.func_type();
        Expr::new(ExprKind::Function(func)).with_type(ty)
    }

    pub fn let_(var: Var, value: Expr, body: Expr) -> Self {
        let ty = body.checked_type().cloned();
        let expr = Expr::new(ExprKind::Let { var, value, body });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn if_(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        let ty = then_branch.checked_type().cloned();
        let expr = Expr::new(ExprKind::If {
            cond,
            then_branch,
            else_branch,
        });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn on_device(body: Expr, device: VirtualDevice) -> Self {
        let ty = body.checked_type().cloned();
        let expr = Expr::new(ExprKind::OnDevice { body, device });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn device_copy(body: Expr, src: VirtualDevice, dst: VirtualDevice) -> Self {
        let ty = body.checked_type().cloned();
        let expr = Expr::new(ExprKind::DeviceCopy { body, src, dst });
        match ty {
            Some(ty) => expr.with_type(ty),
            None => expr,
        }
    }

    pub fn call_lowered(callee: GlobalVar, args: Vec<Expr>, attrs: CallLoweredAttrs) -> Self {
        Expr::new(ExprKind::CallLowered(CallLowered {
            callee,
            args,
            attrs,
        }))
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self.kind() {
            ExprKind::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self.kind() {
            ExprKind::Var(var) => Some(var),
            _ => None,
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other) || structural::expr_eq(self, other)
    }
}

impl Eq for Expr {}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
