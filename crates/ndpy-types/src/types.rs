//! Runtime type descriptors.
//!
//! A [`RuntimeType`] is an immutable, cheaply cloned description of the
//! values an array holds: scalar kinds, optional values, fixed and ragged
//! dimensions, tuples, structs and categoricals.
//!
//! ## Layout
//!
//! Every type has a fixed inline size and alignment:
//!
//! | Kind                  | Inline storage                          |
//! |-----------------------|-----------------------------------------|
//! | `bool`                | 1 byte                                  |
//! | `intN` / `uintN`      | N/8 bytes, little-endian                |
//! | `float16/32/64`       | IEEE binary16/32/64                     |
//! | `complexN`            | two floats of N/2 bits                  |
//! | `string`, `bytes`     | [`Span`](crate::Span) into a pool block |
//! | `fixed_string[n]`     | n bytes, zero padded                    |
//! | `date`                | `i32` days since 1970-01-01             |
//! | `time`                | `i64` ticks since midnight              |
//! | `datetime`            | `i64` ticks since the epoch             |
//! | `type`                | `u64` id into a [`TypePool`](crate::TypePool) |
//! | `N * T`               | N elements of `T`, densely strided      |
//! | `var * T`             | `(begin, size)` into a pool block       |
//!
//! A tick is 100 nanoseconds.

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::categorical::Categories;
use crate::shape::{Axis, ShapeDescriptor};

/// Number of ticks in one microsecond.
pub const TICKS_PER_MICROSECOND: i64 = 10;
/// Number of ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Number of ticks in one day.
pub const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;

/// Integer widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
    W128,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
            IntWidth::W128 => 128,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Smallest width able to index `count` distinct values.
    pub fn for_count(count: usize) -> Self {
        if count < u8::MAX as usize {
            IntWidth::W8
        } else if count < u16::MAX as usize {
            IntWidth::W16
        } else {
            IntWidth::W32
        }
    }
}

/// Floating point widths, also used for complex components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatWidth {
    F16,
    F32,
    F64,
}

impl FloatWidth {
    pub fn bytes(self) -> usize {
        match self {
            FloatWidth::F16 => 2,
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

/// Character encodings for string types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringEncoding {
    Ascii,
    Utf8,
}

/// The structural kind of a runtime type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Zero-sized placeholder; also the type of a missing value with no other info
    Void,
    Bool,
    Int { width: IntWidth, signed: bool },
    Float(FloatWidth),
    /// Complex number whose components have the given width
    Complex(FloatWidth),
    /// Byte string, variable length unless `fixed` is set
    Bytes { fixed: Option<usize> },
    /// Text, variable length unless `fixed` is set
    String {
        encoding: StringEncoding,
        fixed: Option<usize>,
    },
    Date,
    Time,
    DateTime,
    /// A value that is itself a runtime type
    Type,
    /// Value or missing
    Option(RuntimeType),
    FixedDim { size: usize, element: RuntimeType },
    VarDim { element: RuntimeType },
    Tuple(Vec<RuntimeType>),
    Struct(Vec<(SmolStr, RuntimeType)>),
    Categorical(Categories),
    /// Unconstrained placeholder
    Any,
}

/// Immutable, shareable runtime type.
#[derive(Clone, PartialEq)]
pub struct RuntimeType(Arc<TypeKind>);

impl RuntimeType {
    pub fn new(kind: TypeKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn bool() -> Self {
        Self::new(TypeKind::Bool)
    }

    pub fn int(width: IntWidth, signed: bool) -> Self {
        Self::new(TypeKind::Int { width, signed })
    }

    pub fn int8() -> Self {
        Self::int(IntWidth::W8, true)
    }

    pub fn int16() -> Self {
        Self::int(IntWidth::W16, true)
    }

    pub fn int32() -> Self {
        Self::int(IntWidth::W32, true)
    }

    pub fn int64() -> Self {
        Self::int(IntWidth::W64, true)
    }

    pub fn int128() -> Self {
        Self::int(IntWidth::W128, true)
    }

    pub fn uint8() -> Self {
        Self::int(IntWidth::W8, false)
    }

    pub fn uint64() -> Self {
        Self::int(IntWidth::W64, false)
    }

    pub fn uint128() -> Self {
        Self::int(IntWidth::W128, false)
    }

    pub fn float(width: FloatWidth) -> Self {
        Self::new(TypeKind::Float(width))
    }

    pub fn float32() -> Self {
        Self::float(FloatWidth::F32)
    }

    pub fn float64() -> Self {
        Self::float(FloatWidth::F64)
    }

    pub fn complex64() -> Self {
        Self::new(TypeKind::Complex(FloatWidth::F32))
    }

    pub fn complex128() -> Self {
        Self::new(TypeKind::Complex(FloatWidth::F64))
    }

    pub fn bytes() -> Self {
        Self::new(TypeKind::Bytes { fixed: None })
    }

    pub fn fixed_bytes(len: usize) -> Self {
        Self::new(TypeKind::Bytes { fixed: Some(len) })
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String {
            encoding: StringEncoding::Utf8,
            fixed: None,
        })
    }

    pub fn ascii_string() -> Self {
        Self::new(TypeKind::String {
            encoding: StringEncoding::Ascii,
            fixed: None,
        })
    }

    pub fn fixed_string(len: usize) -> Self {
        Self::new(TypeKind::String {
            encoding: StringEncoding::Utf8,
            fixed: Some(len),
        })
    }

    pub fn date() -> Self {
        Self::new(TypeKind::Date)
    }

    pub fn time() -> Self {
        Self::new(TypeKind::Time)
    }

    pub fn datetime() -> Self {
        Self::new(TypeKind::DateTime)
    }

    pub fn type_type() -> Self {
        Self::new(TypeKind::Type)
    }

    pub fn any() -> Self {
        Self::new(TypeKind::Any)
    }

    /// `?T`. Wrapping an option again is a no-op.
    pub fn option(value: RuntimeType) -> Self {
        if value.is_option() {
            return value;
        }
        Self::new(TypeKind::Option(value))
    }

    pub fn fixed_dim(size: usize, element: RuntimeType) -> Self {
        Self::new(TypeKind::FixedDim { size, element })
    }

    pub fn var_dim(element: RuntimeType) -> Self {
        Self::new(TypeKind::VarDim { element })
    }

    pub fn tuple(fields: Vec<RuntimeType>) -> Self {
        Self::new(TypeKind::Tuple(fields))
    }

    pub fn struct_type<N: Into<SmolStr>>(fields: impl IntoIterator<Item = (N, RuntimeType)>) -> Self {
        Self::new(TypeKind::Struct(
            fields.into_iter().map(|(n, t)| (n.into(), t)).collect(),
        ))
    }

    pub fn categorical(categories: Categories) -> Self {
        Self::new(TypeKind::Categorical(categories))
    }

    /// Prefix `dtype` with one dimension per axis of `shape`.
    ///
    /// Fixed extents become fixed dimensions; ragged axes become `var`.
    pub fn from_shape(shape: &ShapeDescriptor, dtype: RuntimeType) -> Self {
        shape.axes().iter().rev().fold(dtype, |inner, axis| match axis {
            Axis::Fixed(n) => RuntimeType::fixed_dim(*n, inner),
            Axis::Ragged => RuntimeType::var_dim(inner),
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_option(&self) -> bool {
        matches!(self.kind(), TypeKind::Option(_))
    }

    pub fn is_dim(&self) -> bool {
        matches!(self.kind(), TypeKind::FixedDim { .. } | TypeKind::VarDim { .. })
    }

    pub fn is_any(&self) -> bool {
        matches!(self.kind(), TypeKind::Any)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind(), TypeKind::String { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind(), TypeKind::Struct(_))
    }

    pub fn is_tuple_or_struct(&self) -> bool {
        matches!(self.kind(), TypeKind::Tuple(_) | TypeKind::Struct(_))
    }

    /// Numeric kinds take part in promotion.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float(_) | TypeKind::Complex(_)
        )
    }

    /// Whether any part of the type is the unconstrained placeholder.
    pub fn is_symbolic(&self) -> bool {
        match self.kind() {
            TypeKind::Any => true,
            TypeKind::Option(t) => t.is_symbolic(),
            TypeKind::FixedDim { element, .. } | TypeKind::VarDim { element } => element.is_symbolic(),
            TypeKind::Tuple(fields) => fields.iter().any(RuntimeType::is_symbolic),
            TypeKind::Struct(fields) => fields.iter().any(|(_, t)| t.is_symbolic()),
            _ => false,
        }
    }

    /// Number of leading dimensions.
    pub fn ndim(&self) -> usize {
        match self.kind() {
            TypeKind::FixedDim { element, .. } | TypeKind::VarDim { element } => 1 + element.ndim(),
            _ => 0,
        }
    }

    /// The element type of a dimension, if this is one.
    pub fn element_type(&self) -> Option<&RuntimeType> {
        match self.kind() {
            TypeKind::FixedDim { element, .. } | TypeKind::VarDim { element } => Some(element),
            _ => None,
        }
    }

    /// The type with every leading dimension stripped.
    pub fn dtype(&self) -> &RuntimeType {
        match self.element_type() {
            Some(element) => element.dtype(),
            None => self,
        }
    }

    /// The type with `n` leading dimensions stripped.
    pub fn dtype_at(&self, n: usize) -> &RuntimeType {
        match (n, self.element_type()) {
            (0, _) | (_, None) => self,
            (n, Some(element)) => element.dtype_at(n - 1),
        }
    }

    /// The type behind an option, or the type itself.
    pub fn value_type(&self) -> &RuntimeType {
        match self.kind() {
            TypeKind::Option(t) => t,
            _ => self,
        }
    }

    /// Field types of a tuple or struct.
    pub fn field_types(&self) -> Vec<RuntimeType> {
        match self.kind() {
            TypeKind::Tuple(fields) => fields.clone(),
            TypeKind::Struct(fields) => fields.iter().map(|(_, t)| t.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Position of a struct field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        match self.kind() {
            TypeKind::Struct(fields) => fields.iter().position(|(n, _)| n == name),
            _ => None,
        }
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Inline size in bytes.
    pub fn data_size(&self) -> usize {
        match self.kind() {
            TypeKind::Void | TypeKind::Any => 0,
            TypeKind::Bool => 1,
            TypeKind::Int { width, .. } => width.bytes(),
            TypeKind::Float(w) => w.bytes(),
            TypeKind::Complex(w) => 2 * w.bytes(),
            TypeKind::Bytes { fixed: Some(n) } | TypeKind::String { fixed: Some(n), .. } => *n,
            TypeKind::Bytes { fixed: None } | TypeKind::String { fixed: None, .. } => 16,
            TypeKind::Date => 4,
            TypeKind::Time | TypeKind::DateTime | TypeKind::Type => 8,
            TypeKind::Option(t) => t.data_size(),
            TypeKind::FixedDim { size, element } => size * element.data_size(),
            TypeKind::VarDim { .. } => 16,
            TypeKind::Tuple(_) | TypeKind::Struct(_) => field_layout(&self.field_types()).size,
            TypeKind::Categorical(c) => c.index_width().bytes(),
        }
    }

    /// Required alignment in bytes.
    pub fn data_alignment(&self) -> usize {
        match self.kind() {
            TypeKind::Void | TypeKind::Any | TypeKind::Bool => 1,
            TypeKind::Int { width, .. } => width.bytes().min(16),
            TypeKind::Float(w) | TypeKind::Complex(w) => w.bytes(),
            TypeKind::Bytes { fixed: Some(_) } | TypeKind::String { fixed: Some(_), .. } => 1,
            TypeKind::Bytes { fixed: None } | TypeKind::String { fixed: None, .. } => 8,
            TypeKind::Date => 4,
            TypeKind::Time | TypeKind::DateTime | TypeKind::Type | TypeKind::VarDim { .. } => 8,
            TypeKind::Option(t) => t.data_alignment(),
            TypeKind::FixedDim { element, .. } => element.data_alignment(),
            TypeKind::Tuple(_) | TypeKind::Struct(_) => field_layout(&self.field_types()).align,
            TypeKind::Categorical(c) => c.index_width().bytes(),
        }
    }
}

/// Computed placement of tuple or struct fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
    pub align: usize,
}

/// Lay out fields in order, each at its natural alignment.
pub fn field_layout(fields: &[RuntimeType]) -> FieldLayout {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    let mut align = 1usize;
    for field in fields {
        let field_align = field.data_alignment();
        offset = offset.next_multiple_of(field_align);
        offsets.push(offset);
        offset += field.data_size();
        align = align.max(field_align);
    }
    FieldLayout {
        offsets,
        size: offset.next_multiple_of(align),
        align,
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Int { width, signed: true } => write!(f, "int{width}"),
            TypeKind::Int { width, signed: false } => write!(f, "uint{width}"),
            TypeKind::Float(w) => write!(f, "float{}", w.bytes() * 8),
            TypeKind::Complex(w) => write!(f, "complex{}", w.bytes() * 16),
            TypeKind::Bytes { fixed: None } => write!(f, "bytes"),
            TypeKind::Bytes { fixed: Some(n) } => write!(f, "fixed_bytes[{n}]"),
            TypeKind::String {
                encoding: StringEncoding::Utf8,
                fixed: None,
            } => write!(f, "string"),
            TypeKind::String {
                encoding: StringEncoding::Ascii,
                fixed: None,
            } => write!(f, "string['ascii']"),
            TypeKind::String {
                encoding: StringEncoding::Utf8,
                fixed: Some(n),
            } => write!(f, "fixed_string[{n}]"),
            TypeKind::String {
                encoding: StringEncoding::Ascii,
                fixed: Some(n),
            } => write!(f, "fixed_string[{n}, 'ascii']"),
            TypeKind::Date => write!(f, "date"),
            TypeKind::Time => write!(f, "time"),
            TypeKind::DateTime => write!(f, "datetime"),
            TypeKind::Type => write!(f, "type"),
            TypeKind::Option(t) => write!(f, "?{t}"),
            TypeKind::FixedDim { size, element } => write!(f, "{size} * {element}"),
            TypeKind::VarDim { element } => write!(f, "var * {element}"),
            TypeKind::Tuple(fields) => {
                write!(f, "(")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            TypeKind::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {t}")?;
                }
                write!(f, "}}")
            }
            TypeKind::Categorical(c) => write!(f, "categorical[{}, {}]", c.category_type(), c.len()),
            TypeKind::Any => write!(f, "Any"),
        }
    }
}

impl fmt::Debug for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeType({self})")
    }
}
