use std::fmt;
use std::sync::Arc;

/// Scalar element types understood by the lowering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    F32,
    F64,
}

impl DType {
    pub fn bits(self) -> u64 {
        match self {
            DType::Bool => 1,
            DType::I8 | DType::U8 => 8,
            DType::I16 | DType::U16 | DType::F16 | DType::Bf16 => 16,
            DType::I32 | DType::U32 | DType::F32 => 32,
            DType::I64 | DType::U64 | DType::F64 => 64,
        }
    }

    /// Storage size of one element, rounded up to whole bytes.
    pub fn bytes(self) -> u64 {
        self.bits().div_ceil(8)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::Bf16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names a symbolic dynamic dimension (e.g. `?n`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single axis extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(u64),
    Dynamic(DimSymbol),
}

impl Dimension {
    pub fn dynamic(name: impl Into<String>) -> Self {
        Dimension::Dynamic(DimSymbol::new(name))
    }

    pub fn as_static(&self) -> Option<u64> {
        match self {
            Dimension::Static(value) => Some(*value),
            Dimension::Dynamic(_) => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn fixed(dims: &[u64]) -> Self {
        Self::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|dim| dim.as_static().is_some())
    }

    /// Element count, or `None` when any dimension is dynamic or the count
    /// does not fit in a `u64`.
    pub fn num_elements(&self) -> Option<u64> {
        element_count(&self.dims)
    }
}

fn element_count(dims: &[Dimension]) -> Option<u64> {
    dims.iter()
        .try_fold(1u64, |acc, dim| acc.checked_mul(dim.as_static()?))
}

/// Bytes held by `dims` elements of `dtype`. Dynamic extents and sizes past
/// `u64::MAX` are both unknown.
pub fn extents_bytes(dtype: DType, dims: &[Dimension]) -> Option<u64> {
    element_count(dims)?.checked_mul(dtype.bytes())
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn fixed(dtype: DType, dims: &[u64]) -> Self {
        Self::new(dtype, Shape::fixed(dims))
    }

    pub fn size_in_bytes(&self) -> Option<u64> {
        extents_bytes(self.dtype, self.shape.dims())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

/// Checked type of a graph expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
    Func(FuncType),
}

impl Type {
    pub fn tensor(dtype: DType, dims: &[u64]) -> Self {
        Type::Tensor(TensorType::fixed(dtype, dims))
    }

    /// `true` when any tensor reachable through this type has a dynamic extent.
    pub fn is_dynamic(&self) -> bool {
        match self {
            Type::Tensor(tensor) => !tensor.shape.is_static(),
            Type::Tuple(fields) => fields.iter().any(Type::is_dynamic),
            Type::Func(_) => false,
        }
    }

    /// Total bytes of all tensors in the type; `None` if any extent is dynamic.
    pub fn size_in_bytes(&self) -> Option<u64> {
        match self {
            Type::Tensor(tensor) => tensor.size_in_bytes(),
            Type::Tuple(fields) => fields
                .iter()
                .try_fold(0u64, |acc, field| acc.checked_add(field.size_in_bytes()?)),
            Type::Func(_) => Some(0),
        }
    }

    /// Flattens nested tuples into their tensor leaves, in order.
    pub fn tensors(&self) -> Vec<&TensorType> {
        let mut out = Vec::new();
        collect_tensors(self, &mut out);
        out
    }
}

fn collect_tensors<'a>(ty: &'a Type, out: &mut Vec<&'a TensorType>) {
    match ty {
        Type::Tensor(tensor) => out.push(tensor),
        Type::Tuple(fields) => fields.iter().for_each(|field| collect_tensors(field, out)),
        Type::Func(_) => {}
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tensor) => write!(f, "Tensor[{}, {}]", tensor.shape, tensor.dtype),
            Type::Tuple(fields) => {
                f.write_str("(")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            Type::Func(func) => {
                f.write_str("fn (")?;
                for (idx, param) in func.params.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {}", func.ret)
            }
        }
    }
}
