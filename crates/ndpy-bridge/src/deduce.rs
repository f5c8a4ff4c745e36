//! Shape and Type Deduction
//!
//! Walks a nested host value once and reports the smallest runtime type and
//! the shape that hold it.
//!
//! ## Rules
//!
//! - Scalars take their minimal type; ints climb `int32` → `int64` → overflow
//! - Elements join through a fixed numeric lattice:
//!   `bool < int32 < int64 < float32 < float64 < complex64 < complex128`
//! - An axis stays fixed while every sibling agrees on its length and turns
//!   ragged on the first disagreement
//! - Dicts are never inspected; they produce [`DeducedType::DeferredStruct`]
//! - Anything the walk cannot settle is [`ConvertError::IndeterminateType`],
//!   which callers answer with the dynamic path

use ndpy_types::{Axis, FloatWidth, IntWidth, RuntimeType, ShapeDescriptor, TypeKind};
use num_traits::ToPrimitive;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};
use crate::numeric::host_to_bigint;
use crate::py_types::PyValue;

/// The element type found by [`deduce`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeducedType {
    Concrete(RuntimeType),
    /// Leaves are dicts; the struct is built where the value is used
    DeferredStruct,
}

/// Result of [`deduce`].
#[derive(Debug, Clone, PartialEq)]
pub struct Deduction {
    pub dtype: DeducedType,
    pub shape: ShapeDescriptor,
}

impl Deduction {
    /// The full array type, if the element type is concrete.
    pub fn full_type(&self) -> Option<RuntimeType> {
        match &self.dtype {
            DeducedType::Concrete(dtype) => Some(RuntimeType::from_shape(&self.shape, dtype.clone())),
            DeducedType::DeferredStruct => None,
        }
    }
}

// ============================================================================
// Scalar typing and promotion
// ============================================================================

/// Minimal runtime type of a host scalar. `None` has no type of its own.
pub fn scalar_type(value: &PyValue) -> ConvertResult<Option<RuntimeType>> {
    let tp = match value {
        PyValue::None => return Ok(None),
        PyValue::Bool(_) => RuntimeType::bool(),
        PyValue::Int(n) => int_type(n)?,
        PyValue::Float(_) => RuntimeType::float64(),
        PyValue::Complex(_) => RuntimeType::complex128(),
        PyValue::String(_) => RuntimeType::string(),
        PyValue::Bytes(_) => RuntimeType::bytes(),
        PyValue::Date(_) => RuntimeType::date(),
        PyValue::Time(t) if t.tzinfo.is_none() => RuntimeType::time(),
        PyValue::DateTime(dt) if dt.tzinfo.is_none() => RuntimeType::datetime(),
        PyValue::Time(_) | PyValue::DateTime(_) => {
            return Err(ConvertError::unsupported("timezone-aware time and datetime values"));
        }
        PyValue::Type(_) => RuntimeType::type_type(),
        PyValue::Object(obj) if obj.has_attr("__index__") || obj.has_attr("__int__") => match host_to_bigint(value) {
            Some(n) => int_type(&n)?,
            None => return Err(cannot_convert(value)),
        },
        PyValue::Object(obj) if obj.has_attr("__float__") => RuntimeType::float64(),
        _ => return Err(cannot_convert(value)),
    };
    Ok(Some(tp))
}

fn int_type(n: &num_bigint::BigInt) -> ConvertResult<RuntimeType> {
    if n.to_i32().is_some() {
        Ok(RuntimeType::int32())
    } else if n.to_i64().is_some() {
        Ok(RuntimeType::int64())
    } else {
        Err(ConvertError::overflow(n, "int64"))
    }
}

pub(crate) fn cannot_convert(value: &PyValue) -> ConvertError {
    ConvertError::type_mismatch(format!(
        "could not convert value {} of type {} into an array",
        value,
        value.type_name()
    ))
}

fn numeric_rank(tp: &RuntimeType) -> Option<u8> {
    let rank = match tp.kind() {
        TypeKind::Bool => 0,
        TypeKind::Int { width, signed } => match (width, signed) {
            (IntWidth::W8 | IntWidth::W16 | IntWidth::W32, true) | (IntWidth::W8 | IntWidth::W16, false) => 1,
            _ => 2,
        },
        TypeKind::Float(FloatWidth::F16 | FloatWidth::F32) => 3,
        TypeKind::Float(FloatWidth::F64) => 4,
        TypeKind::Complex(FloatWidth::F64) => 6,
        TypeKind::Complex(_) => 5,
        _ => return None,
    };
    Some(rank)
}

fn ranked_type(rank: u8) -> RuntimeType {
    match rank {
        0 => RuntimeType::bool(),
        1 => RuntimeType::int32(),
        2 => RuntimeType::int64(),
        3 => RuntimeType::float32(),
        4 => RuntimeType::float64(),
        5 => RuntimeType::complex64(),
        _ => RuntimeType::complex128(),
    }
}

/// Join two element types.
///
/// `void` stands for a missing value and turns the other side into an
/// option. Numbers meet on the lattice; text, bytes and calendar types only
/// join with themselves (a date widens to a datetime).
pub fn promote(a: &RuntimeType, b: &RuntimeType) -> ConvertResult<RuntimeType> {
    if a == b {
        return Ok(a.clone());
    }
    match (a.kind(), b.kind()) {
        (TypeKind::Void, _) => return Ok(RuntimeType::option(b.value_type().clone())),
        (_, TypeKind::Void) => return Ok(RuntimeType::option(a.value_type().clone())),
        (TypeKind::Option(inner), _) => return Ok(RuntimeType::option(promote(inner, b.value_type())?)),
        (_, TypeKind::Option(inner)) => return Ok(RuntimeType::option(promote(a, inner)?)),
        (TypeKind::Date, TypeKind::DateTime) | (TypeKind::DateTime, TypeKind::Date) => {
            return Ok(RuntimeType::datetime());
        }
        (TypeKind::String { .. }, TypeKind::String { .. }) => return Ok(RuntimeType::string()),
        (TypeKind::Bytes { .. }, TypeKind::Bytes { .. }) => return Ok(RuntimeType::bytes()),
        _ => {}
    }
    match (numeric_rank(a), numeric_rank(b)) {
        (Some(x), Some(y)) => {
            let rank = x.max(y);
            // Keep the wider operand when it already sits at the joined rank.
            if numeric_rank(a) == Some(rank) && !matches!(rank, 1 | 2) {
                Ok(a.clone())
            } else if numeric_rank(b) == Some(rank) && !matches!(rank, 1 | 2) {
                Ok(b.clone())
            } else {
                Ok(ranked_type(rank))
            }
        }
        _ => Err(ConvertError::type_mismatch(format!(
            "cannot combine values of type {a} and {b} in one array"
        ))),
    }
}

// ============================================================================
// Deduction
// ============================================================================

#[derive(Debug, Default)]
struct Walk {
    axes: Vec<Axis>,
    leaf_depth: Option<usize>,
    // Deepest level at which an empty sequence would have held its elements
    empty_depth: Option<usize>,
    dtype: Option<RuntimeType>,
    saw_missing: bool,
    saw_dict: bool,
    saw_scalar: bool,
}

impl Walk {
    fn record_axis(&mut self, depth: usize, len: usize) {
        if depth < self.axes.len() {
            self.axes[depth] = self.axes[depth].merge(Axis::Fixed(len));
        } else {
            self.axes.push(Axis::Fixed(len));
        }
    }

    fn record_leaf(&mut self, depth: usize) -> ConvertResult<()> {
        match self.leaf_depth {
            Some(d) if d != depth => Err(ConvertError::indeterminate(
                "sequence elements are nested to different depths",
            )),
            _ => {
                self.leaf_depth = Some(depth);
                Ok(())
            }
        }
    }

    fn visit(&mut self, value: &PyValue, depth: usize) -> ConvertResult<()> {
        match value {
            PyValue::List(_) | PyValue::Tuple(_) => {
                if self.leaf_depth.is_some_and(|d| d <= depth) {
                    return Err(ConvertError::indeterminate(
                        "sequence elements are nested to different depths",
                    ));
                }
                let items = value.fast_sequence()?;
                self.record_axis(depth, items.len());
                if items.is_empty() {
                    self.empty_depth = Some(self.empty_depth.map_or(depth + 1, |d| d.max(depth + 1)));
                }
                for item in items.iter() {
                    self.visit(item, depth + 1)?;
                }
                Ok(())
            }
            PyValue::Set(_) | PyValue::Native(_) | PyValue::Foreign(_) if depth > 0 => Err(
                ConvertError::indeterminate(format!("nested {} values are typed one by one", value.type_name())),
            ),
            PyValue::Set(_) => Err(ConvertError::indeterminate("sets are not sequences")),
            PyValue::Dict(_) => {
                self.record_leaf(depth)?;
                self.saw_dict = true;
                Ok(())
            }
            _ => {
                self.record_leaf(depth)?;
                match scalar_type(value)? {
                    None => self.saw_missing = true,
                    Some(tp) => {
                        self.saw_scalar = true;
                        self.dtype = Some(match &self.dtype {
                            Some(current) => promote(current, &tp)?,
                            None => tp,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// Deduce the element type and shape of a host value.
pub fn deduce(value: &PyValue) -> ConvertResult<Deduction> {
    let mut walk = Walk::default();
    walk.visit(value, 0)?;

    let leaf_depth = walk
        .leaf_depth
        .ok_or_else(|| ConvertError::indeterminate("no element has a concrete type"))?;
    if walk.empty_depth.is_some_and(|d| d > leaf_depth) {
        return Err(ConvertError::indeterminate("an empty sequence sits where elements were expected"));
    }
    let mut shape = ShapeDescriptor::new(walk.axes);
    shape.truncate(leaf_depth);

    let dtype = match (walk.saw_dict, walk.saw_scalar, walk.dtype) {
        (true, true, _) => {
            return Err(ConvertError::type_mismatch("cannot mix dicts and scalars in one array"));
        }
        (true, false, _) if walk.saw_missing => {
            return Err(ConvertError::unsupported("missing values among dicts"));
        }
        (true, false, _) => DeducedType::DeferredStruct,
        (false, _, Some(tp)) if walk.saw_missing => DeducedType::Concrete(RuntimeType::option(tp)),
        (false, _, Some(tp)) => DeducedType::Concrete(tp),
        (false, _, None) => return Err(ConvertError::indeterminate("every element is missing")),
    };
    debug!(shape = %shape, dtype = ?dtype, "deduced host value");
    Ok(Deduction { dtype, shape })
}

/// Shape of a host value as far as its sequences reach.
///
/// Every level of lists, tuples and sets becomes an axis; a set axis is
/// always ragged. Wrapped and foreign arrays contribute their own shape.
/// Where siblings nest to different depths the shallowest one wins.
pub fn deduce_shape(value: &PyValue) -> ConvertResult<ShapeDescriptor> {
    let mut axes = Vec::new();
    let mut min_depth = usize::MAX;
    shape_walk(value, 0, &mut axes, &mut min_depth)?;
    let mut shape = ShapeDescriptor::new(axes);
    shape.truncate(min_depth);
    Ok(shape)
}

fn shape_walk(value: &PyValue, depth: usize, axes: &mut Vec<Axis>, min_depth: &mut usize) -> ConvertResult<()> {
    let mut record = |axes: &mut Vec<Axis>, depth: usize, axis: Axis| {
        if depth < axes.len() {
            axes[depth] = axes[depth].merge(axis);
        } else {
            axes.push(axis);
        }
    };
    match value {
        PyValue::List(_) | PyValue::Tuple(_) | PyValue::Set(_) => {
            let items = value.fast_sequence()?;
            let axis = if matches!(value, PyValue::Set(_)) {
                Axis::Ragged
            } else {
                Axis::Fixed(items.len())
            };
            record(axes, depth, axis);
            if items.is_empty() {
                *min_depth = (*min_depth).min(depth + 1);
            }
            for item in items.iter() {
                shape_walk(item, depth + 1, axes, min_depth)?;
            }
        }
        PyValue::Native(arr) => {
            let inner = arr.shape()?;
            for (i, axis) in inner.axes().iter().enumerate() {
                record(axes, depth + i, *axis);
            }
            *min_depth = (*min_depth).min(depth + inner.ndim());
        }
        PyValue::Foreign(foreign) => {
            for (i, &n) in foreign.shape().iter().enumerate() {
                record(axes, depth + i, Axis::Fixed(n));
            }
            *min_depth = (*min_depth).min(depth + foreign.ndim());
        }
        _ => *min_depth = (*min_depth).min(depth),
    }
    Ok(())
}

/// Shape of the dimensions a host value adds in front of `dtype`.
///
/// A tuple or struct dtype absorbs the innermost host sequence unless the
/// elements are dicts, and a dimensioned dtype absorbs one axis per
/// dimension.
pub fn deduce_shape_using_dtype(value: &PyValue, dtype: &RuntimeType) -> ConvertResult<ShapeDescriptor> {
    let mut shape = deduce_shape(value)?;
    let mut absorbed = dtype.ndim();
    if dtype.dtype().value_type().is_tuple_or_struct() && !innermost_is_dict(value) {
        absorbed += 1;
    }
    shape.truncate(shape.ndim().saturating_sub(absorbed));
    Ok(shape)
}

fn innermost_is_dict(value: &PyValue) -> bool {
    match value {
        PyValue::Dict(_) => true,
        PyValue::List(_) | PyValue::Tuple(_) | PyValue::Set(_) => value
            .fast_sequence()
            .ok()
            .and_then(|items| items.first().map(innermost_is_dict))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py_types::{PyDict, PyObject};
    use ndpy_types::parse_type;
    use num_bigint::BigInt;
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> PyValue {
        PyValue::list(values.iter().map(|&n| PyValue::from(n)))
    }

    fn full_type(value: &PyValue) -> String {
        deduce(value).unwrap().full_type().unwrap().to_string()
    }

    #[test]
    fn test_integer_ladder() {
        assert_eq!(scalar_type(&PyValue::from(1i64)).unwrap(), Some(RuntimeType::int32()));
        assert_eq!(
            scalar_type(&PyValue::from(i64::from(i32::MAX) + 1)).unwrap(),
            Some(RuntimeType::int64())
        );
        let huge = PyValue::Int(BigInt::from(i64::MAX) + 1);
        assert!(scalar_type(&huge).unwrap_err().is_overflow());
    }

    #[test]
    fn test_promotion_lattice() {
        let p = |a: RuntimeType, b: RuntimeType| promote(&a, &b).unwrap();
        assert_eq!(p(RuntimeType::bool(), RuntimeType::int32()), RuntimeType::int32());
        assert_eq!(p(RuntimeType::int32(), RuntimeType::int64()), RuntimeType::int64());
        assert_eq!(p(RuntimeType::int64(), RuntimeType::float32()), RuntimeType::float32());
        assert_eq!(p(RuntimeType::float64(), RuntimeType::complex64()), RuntimeType::complex64());
        assert_eq!(p(RuntimeType::complex128(), RuntimeType::bool()), RuntimeType::complex128());
        assert_eq!(p(RuntimeType::date(), RuntimeType::datetime()), RuntimeType::datetime());
        assert_eq!(p(RuntimeType::void(), RuntimeType::int32()), RuntimeType::option(RuntimeType::int32()));
        assert!(promote(&RuntimeType::string(), &RuntimeType::int32()).unwrap_err().is_type_error());
        assert!(promote(&RuntimeType::bytes(), &RuntimeType::string()).is_err());
    }

    #[test]
    fn test_fixed_matrix() {
        let value = PyValue::list([ints(&[1, 2, 3]), ints(&[4, 5, 6])]);
        let deduction = deduce(&value).unwrap();
        assert_eq!(deduction.shape, ShapeDescriptor::fixed(&[2, 3]));
        assert_eq!(deduction.dtype, DeducedType::Concrete(RuntimeType::int32()));
    }

    #[test]
    fn test_ragged_axis() {
        let value = PyValue::list([ints(&[1, 2]), ints(&[3, 4, 5])]);
        let deduction = deduce(&value).unwrap();
        assert_eq!(deduction.shape, ShapeDescriptor::new(vec![Axis::Fixed(2), Axis::Ragged]));
        assert_eq!(deduction.dtype, DeducedType::Concrete(RuntimeType::int32()));
        assert_eq!(full_type(&value), "2 * var * int32");
    }

    #[test]
    fn test_mixed_numbers_promote() {
        let value = PyValue::list([PyValue::from(1i64), PyValue::from(2.5), PyValue::Bool(true)]);
        assert_eq!(full_type(&value), "3 * float64");
    }

    #[test]
    fn test_missing_values_make_an_option() {
        let value = PyValue::list([PyValue::from(1i64), PyValue::None]);
        assert_eq!(full_type(&value), "2 * ?int32");
        assert!(deduce(&PyValue::list([PyValue::None])).unwrap_err().is_indeterminate());
    }

    #[test]
    fn test_text_does_not_mix_with_numbers() {
        let value = PyValue::list([PyValue::from(1i64), PyValue::str("a")]);
        assert!(deduce(&value).unwrap_err().is_type_error());
    }

    #[test]
    fn test_dicts_are_deferred() {
        let a: PyDict = [("x", PyValue::from(1i64))].into_iter().collect();
        let b: PyDict = [("z", PyValue::from(2i64))].into_iter().collect();
        let value = PyValue::list([PyValue::Dict(a), PyValue::Dict(b)]);
        let deduction = deduce(&value).unwrap();
        assert_eq!(deduction.dtype, DeducedType::DeferredStruct);
        assert_eq!(deduction.shape, ShapeDescriptor::fixed(&[2]));
        assert_eq!(deduction.full_type(), None);
    }

    #[test]
    fn test_indeterminate_cases() {
        assert!(deduce(&PyValue::list([])).unwrap_err().is_indeterminate());
        let inconsistent = PyValue::list([PyValue::from(1i64), ints(&[2])]);
        assert!(deduce(&inconsistent).unwrap_err().is_indeterminate());
        let empty_leaf = PyValue::list([ints(&[1]), PyValue::list([ints(&[])])]);
        assert!(deduce(&empty_leaf).unwrap_err().is_indeterminate());
        assert!(deduce(&PyValue::Set(vec![PyValue::from(1i64)])).unwrap_err().is_indeterminate());
    }

    #[test]
    fn test_empty_row_is_ragged() {
        let value = PyValue::list([ints(&[]), ints(&[1])]);
        assert_eq!(full_type(&value), "2 * var * int32");
    }

    #[test]
    fn test_protocol_objects() {
        let obj = PyObject::new("MyFloat");
        obj.set_attr("__float__", PyValue::from(1.5));
        assert_eq!(scalar_type(&PyValue::Object(obj)).unwrap(), Some(RuntimeType::float64()));
        assert!(scalar_type(&PyValue::Object(PyObject::new("Opaque"))).unwrap_err().is_type_error());
    }

    #[test]
    fn test_shape_using_dtype() {
        let rows = PyValue::list([ints(&[1, 2]), ints(&[3, 4])]);
        let shape = |value: &PyValue, dtype: &str| {
            deduce_shape_using_dtype(value, &parse_type(dtype).unwrap()).unwrap().to_string()
        };
        assert_eq!(shape(&rows, "int32"), "(2, 2)");
        assert_eq!(shape(&rows, "{x: int32, y: int32}"), "(2)");
        assert_eq!(shape(&rows, "2 * float64"), "(2)");
        let dict: PyDict = [("x", PyValue::from(1i64))].into_iter().collect();
        assert_eq!(shape(&PyValue::list([PyValue::Dict(dict)]), "{x: int32}"), "(1)");
        assert_eq!(shape(&PyValue::Set(vec![PyValue::from(1i64)]), "int32"), "(var)");
        assert_eq!(shape(&PyValue::list([]), "int32"), "(0)");
    }
}
