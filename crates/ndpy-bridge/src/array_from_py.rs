//! Array construction from host values
//!
//! The entry points a host binding calls:
//!
//! - [`array_from_py`]: deduce type and shape, allocate, convert
//! - [`array_from_py_typed`]: convert against a known dtype or full type
//! - [`asarray`] / [`view`]: pass native arrays through where possible
//! - [`setitem`] / [`getitem`]: element access on an existing array
//!
//! Values deduction cannot settle (empty nestings, sets, mixed depths) go
//! through the dynamic path, which types every element on its own and joins
//! the results.

use ndpy_types::missing::check_option_value_type;
use ndpy_types::{Access, NdArray, RuntimeType, TypeKind};
use smol_str::SmolStr;
use tracing::debug;

use crate::binding::{view_with_access, wrap};
use crate::config::ConvertOptions;
use crate::deduce::{cannot_convert, deduce, deduce_shape_using_dtype, promote, scalar_type, DeducedType};
use crate::error::{ConvertError, ConvertResult};
use crate::exec::assign_from_py;
use crate::foreign::array_from_foreign;
use crate::numeric::host_to_bigint;
use crate::py_types::{PyDict, PyValue};
use crate::to_py::as_py;

/// Convert a host value into a new array of deduced type.
///
/// Native arrays are returned as views unless `opts.always_copy` is set.
/// Without a requested access the result is immutable.
pub fn array_from_py(value: &PyValue, opts: &ConvertOptions) -> ConvertResult<NdArray> {
    match value {
        PyValue::Native(arr) => return native_source(arr, opts),
        PyValue::Foreign(foreign) => return Ok(finish(array_from_foreign(foreign, opts)?, opts)),
        // Read the integer protocol once and convert what it returned.
        PyValue::Object(obj) if obj.has_attr("__index__") || obj.has_attr("__int__") => {
            return match host_to_bigint(value) {
                Some(n) => array_from_py(&PyValue::Int(n), opts),
                None => Err(cannot_convert(value)),
            };
        }
        _ => {}
    }

    let tp = match value {
        PyValue::List(_) | PyValue::Tuple(_) => match deduce(value) {
            Ok(deduction) => match deduction.full_type() {
                Some(tp) => tp,
                None => {
                    let dtype = first_dict_struct(value)?;
                    RuntimeType::from_shape(&deduction.shape, dtype)
                }
            },
            Err(err) if err.is_indeterminate() => {
                debug!(reason = %err, "falling back to dynamic typing");
                dynamic_type(value)?
            }
            Err(err) => return Err(err),
        },
        PyValue::Set(_) | PyValue::Dict(_) => dynamic_type(value)?,
        _ => match scalar_type(value)? {
            Some(tp) => tp,
            None => RuntimeType::option(RuntimeType::int32()),
        },
    };
    let tp = default_unknowns(&tp)?;
    debug!(tp = %tp, src = value.type_name(), "array from host value");

    let arr = NdArray::empty(tp)?;
    assign_from_py(&arr, value, opts)?;
    Ok(finish(arr, opts))
}

/// Convert a host value into a new array whose type is given.
///
/// With `fulltype` the type is used as is; otherwise `tp` is the element
/// type and the leading dimensions come from the value's shape.
pub fn array_from_py_typed(
    value: &PyValue,
    tp: &RuntimeType,
    fulltype: bool,
    opts: &ConvertOptions,
) -> ConvertResult<NdArray> {
    let tp = if fulltype {
        tp.clone()
    } else {
        let shape = deduce_shape_using_dtype(value, tp)?;
        RuntimeType::from_shape(&shape, tp.clone())
    };
    if let PyValue::Native(arr) = value {
        if !opts.always_copy && *arr.tp() == tp {
            return native_source(arr, opts);
        }
    }
    if tp.is_symbolic() {
        return Err(ConvertError::unsupported(format!("converting into symbolic type {tp}")));
    }
    debug!(tp = %tp, fulltype, src = value.type_name(), "array from host value with given type");

    let arr = NdArray::empty(tp)?;
    assign_from_py(&arr, value, opts)?;
    Ok(finish(arr, opts))
}

/// Like [`array_from_py`], but a native array is never copied.
pub fn asarray(value: &PyValue, opts: &ConvertOptions) -> ConvertResult<NdArray> {
    let opts = ConvertOptions {
        always_copy: false,
        ..*opts
    };
    array_from_py(value, &opts)
}

/// A native array viewed with `access`; any other value is converted.
pub fn view(value: &PyValue, access: Option<Access>) -> ConvertResult<NdArray> {
    let opts = ConvertOptions {
        access,
        ..ConvertOptions::default()
    };
    asarray(value, &opts)
}

fn native_source(arr: &NdArray, opts: &ConvertOptions) -> ConvertResult<NdArray> {
    if opts.always_copy {
        return Ok(arr.eval_copy(opts.access.unwrap_or(Access::Immutable))?);
    }
    match opts.access {
        Some(access) => view_with_access(arr, access),
        None => Ok(arr.clone()),
    }
}

fn finish(arr: NdArray, opts: &ConvertOptions) -> NdArray {
    let access = opts.access.unwrap_or(Access::Immutable);
    if arr.access() == access {
        arr
    } else {
        arr.with_access(access)
    }
}

// ============================================================================
// Element access
// ============================================================================

/// Which elements of an array an index selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscript {
    /// The whole array
    Ellipsis,
    /// One position along the outer dimension
    Index(isize),
    /// One position per leading dimension
    Indices(Vec<isize>),
}

impl Subscript {
    /// Read a host index: `...`, an int, or a tuple of ints.
    pub fn from_py(index: &PyValue) -> ConvertResult<Self> {
        let as_isize = |v: &PyValue| {
            v.as_i64()
                .and_then(|n| isize::try_from(n).ok())
                .ok_or_else(|| ConvertError::type_mismatch(format!("indices must be integers, not {}", v.type_name())))
        };
        match index {
            PyValue::Ellipsis => Ok(Subscript::Ellipsis),
            PyValue::Tuple(items) => Ok(Subscript::Indices(
                items.iter().map(as_isize).collect::<ConvertResult<_>>()?,
            )),
            other => Ok(Subscript::Index(as_isize(other)?)),
        }
    }

    fn select(&self, arr: &NdArray) -> ConvertResult<NdArray> {
        Ok(match self {
            Subscript::Ellipsis => arr.clone(),
            Subscript::Index(i) => arr.index(*i)?,
            Subscript::Indices(indices) => arr.at(indices)?,
        })
    }
}

/// Convert `value` into the elements of `arr` selected by `index`.
pub fn setitem(arr: &NdArray, index: &Subscript, value: &PyValue, opts: &ConvertOptions) -> ConvertResult<()> {
    arr.writable_data()?;
    let target = index.select(arr)?;
    assign_from_py(&target, value, opts)
}

/// The selected element as a host value, or a view for sub-arrays.
pub fn getitem(arr: &NdArray, index: &Subscript) -> ConvertResult<PyValue> {
    let target = index.select(arr)?;
    if target.is_scalar() {
        as_py(&target)
    } else {
        Ok(wrap(target))
    }
}

// ============================================================================
// Dynamic typing
// ============================================================================

/// Type a host value element by element.
///
/// `void` marks a missing value and `Any` the element of an empty
/// sequence; [`default_unknowns`] settles both once the whole value is seen.
pub fn dynamic_type(value: &PyValue) -> ConvertResult<RuntimeType> {
    match value {
        PyValue::None => Ok(RuntimeType::void()),
        PyValue::Native(arr) => Ok(arr.tp().clone()),
        PyValue::Foreign(foreign) => Ok(foreign.runtime_type()),
        PyValue::List(_) | PyValue::Tuple(_) | PyValue::Set(_) => {
            let items = value.fast_sequence()?;
            let element = items
                .iter()
                .try_fold(RuntimeType::any(), |joined, item| join_types(&joined, &dynamic_type(item)?))?;
            if matches!(value, PyValue::Set(_)) {
                Ok(RuntimeType::var_dim(element))
            } else {
                Ok(RuntimeType::fixed_dim(items.len(), element))
            }
        }
        PyValue::Dict(dict) => dict_struct(dict),
        _ => scalar_type(value)?.ok_or_else(|| cannot_convert(value)),
    }
}

/// Join two dynamically found types.
pub fn join_types(a: &RuntimeType, b: &RuntimeType) -> ConvertResult<RuntimeType> {
    if a == b {
        return Ok(a.clone());
    }
    match (a.kind(), b.kind()) {
        (TypeKind::Any, _) => Ok(b.clone()),
        (_, TypeKind::Any) => Ok(a.clone()),
        (TypeKind::FixedDim { size: n, element: x }, TypeKind::FixedDim { size: m, element: y }) if n == m => {
            Ok(RuntimeType::fixed_dim(*n, join_types(x, y)?))
        }
        (
            TypeKind::FixedDim { element: x, .. } | TypeKind::VarDim { element: x },
            TypeKind::FixedDim { element: y, .. } | TypeKind::VarDim { element: y },
        ) => Ok(RuntimeType::var_dim(join_types(x, y)?)),
        (TypeKind::Struct(xs), TypeKind::Struct(ys))
            if xs.len() == ys.len() && xs.iter().zip(ys).all(|((p, _), (q, _))| p == q) =>
        {
            let fields = xs
                .iter()
                .zip(ys)
                .map(|((name, x), (_, y))| Ok((name.clone(), join_types(x, y)?)))
                .collect::<ConvertResult<Vec<(SmolStr, RuntimeType)>>>()?;
            Ok(RuntimeType::struct_type(fields))
        }
        (TypeKind::Tuple(xs), TypeKind::Tuple(ys)) if xs.len() == ys.len() => {
            let fields = xs
                .iter()
                .zip(ys)
                .map(|(x, y)| join_types(x, y))
                .collect::<ConvertResult<Vec<_>>>()?;
            Ok(RuntimeType::tuple(fields))
        }
        (TypeKind::Void, _) | (_, TypeKind::Void) => {
            let other = if matches!(a.kind(), TypeKind::Void) { b } else { a };
            check_option_value_type(other.value_type())?;
            Ok(RuntimeType::option(other.value_type().clone()))
        }
        _ if a.is_dim() || b.is_dim() || a.is_tuple_or_struct() || b.is_tuple_or_struct() => Err(
            ConvertError::type_mismatch(format!("cannot combine values of type {a} and {b} in one array")),
        ),
        _ => promote(a, b),
    }
}

/// Replace what dynamic typing left open: an empty sequence holds `int32`,
/// a value seen only as missing is `?int32`.
pub fn default_unknowns(tp: &RuntimeType) -> ConvertResult<RuntimeType> {
    Ok(match tp.kind() {
        TypeKind::Any => RuntimeType::int32(),
        TypeKind::Void => RuntimeType::option(RuntimeType::int32()),
        TypeKind::Option(inner) if matches!(inner.kind(), TypeKind::Void | TypeKind::Any) => {
            RuntimeType::option(RuntimeType::int32())
        }
        TypeKind::Option(inner) => {
            check_option_value_type(inner)?;
            tp.clone()
        }
        TypeKind::FixedDim { size, element } => RuntimeType::fixed_dim(*size, default_unknowns(element)?),
        TypeKind::VarDim { element } => RuntimeType::var_dim(default_unknowns(element)?),
        TypeKind::Tuple(fields) => {
            RuntimeType::tuple(fields.iter().map(default_unknowns).collect::<ConvertResult<_>>()?)
        }
        TypeKind::Struct(fields) => RuntimeType::struct_type(
            fields
                .iter()
                .map(|(name, t)| Ok((name.clone(), default_unknowns(t)?)))
                .collect::<ConvertResult<Vec<(SmolStr, RuntimeType)>>>()?,
        ),
        _ => tp.clone(),
    })
}

fn dict_struct(dict: &PyDict) -> ConvertResult<RuntimeType> {
    let fields = dict
        .items()
        .into_iter()
        .map(|(name, value)| Ok((name, dynamic_type(&value)?)))
        .collect::<ConvertResult<Vec<(SmolStr, RuntimeType)>>>()?;
    Ok(RuntimeType::struct_type(fields))
}

// The struct for a sequence of dicts takes its fields from the first dict.
// Each field's type joins that key's values across every dict carrying it;
// disagreeing key sets are reported when the values are converted.
fn first_dict_struct(value: &PyValue) -> ConvertResult<RuntimeType> {
    let mut dicts = Vec::new();
    collect_dicts(value, &mut dicts)?;
    let first = dicts
        .first()
        .ok_or_else(|| ConvertError::indeterminate("no dict to take struct fields from"))?;
    let mut fields = Vec::new();
    for name in first.keys() {
        let mut field_tp = RuntimeType::any();
        for dict in &dicts {
            if let Some(v) = dict.get(&name) {
                field_tp = join_types(&field_tp, &dynamic_type(&v)?)?;
            }
        }
        fields.push((name, default_unknowns(&field_tp)?));
    }
    Ok(RuntimeType::struct_type(fields))
}

fn collect_dicts(value: &PyValue, out: &mut Vec<PyDict>) -> ConvertResult<()> {
    match value {
        PyValue::Dict(dict) => out.push(dict.clone()),
        PyValue::List(_) | PyValue::Tuple(_) => {
            for item in value.fast_sequence()?.iter() {
                collect_dicts(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py_types::PyObject;
    use ndpy_types::{parse_type, Scalar};
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> PyValue {
        PyValue::list(values.iter().map(|&n| PyValue::from(n)))
    }

    fn type_of(value: &PyValue) -> String {
        array_from_py(value, &ConvertOptions::default()).unwrap().tp().to_string()
    }

    #[test]
    fn test_scalar_types() {
        assert_eq!(type_of(&PyValue::from(1i64)), "int32");
        assert_eq!(type_of(&PyValue::from(1i64 << 40)), "int64");
        assert_eq!(type_of(&PyValue::from(1.5)), "float64");
        assert_eq!(type_of(&PyValue::Bool(true)), "bool");
        assert_eq!(type_of(&PyValue::str("a")), "string");
        assert_eq!(type_of(&PyValue::Bytes(vec![1])), "bytes");
        assert_eq!(type_of(&PyValue::Type(RuntimeType::int8())), "type");
        assert_eq!(type_of(&PyValue::None), "?int32");
    }

    #[test]
    fn test_nested_lists() {
        let value = PyValue::list([ints(&[1, 2, 3]), ints(&[4, 5, 6])]);
        let arr = array_from_py(&value, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * 3 * int32");
        assert_eq!(arr.access(), Access::Immutable);
        assert_eq!(as_py(&arr).unwrap(), value);
    }

    #[test]
    fn test_dynamic_path() {
        assert_eq!(type_of(&PyValue::list([])), "0 * int32");
        assert_eq!(type_of(&PyValue::list([ints(&[]), ints(&[])])), "2 * 0 * int32");
        assert_eq!(type_of(&PyValue::list([PyValue::None, PyValue::None])), "2 * ?int32");
        assert_eq!(type_of(&PyValue::Set(vec![PyValue::from(1i64), PyValue::from(2i64)])), "var * int32");
        let mixed = PyValue::list([ints(&[1]), PyValue::list([ints(&[])])]);
        assert!(array_from_py(&mixed, &ConvertOptions::default()).unwrap_err().is_type_error());
    }

    #[test]
    fn test_dicts_become_structs() {
        let dict: PyDict = [("x", PyValue::from(1i64)), ("y", PyValue::from(2.5))].into_iter().collect();
        assert_eq!(type_of(&PyValue::Dict(dict.clone())), "{x: int32, y: float64}");
        let other: PyDict = [("x", PyValue::from(3i64)), ("y", PyValue::from(4i64))].into_iter().collect();
        let value = PyValue::list([PyValue::Dict(dict), PyValue::Dict(other)]);
        let arr = array_from_py(&value, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * {x: int32, y: float64}");
    }

    #[test]
    fn test_dicts_with_other_keys_fail_at_conversion() {
        let a: PyDict = [("x", PyValue::from(1i64))].into_iter().collect();
        let b: PyDict = [("z", PyValue::from(2i64))].into_iter().collect();
        let value = PyValue::list([PyValue::Dict(a), PyValue::Dict(b)]);
        let err = array_from_py(&value, &ConvertOptions::default()).unwrap_err();
        assert!(err.is_broadcast());
        assert!(err.to_string().contains("\"z\""));
    }

    #[test]
    fn test_native_source() {
        let arr = NdArray::empty(parse_type("2 * int32").unwrap()).unwrap();
        let value = PyValue::Native(arr.clone());
        let same = array_from_py(&value, &ConvertOptions::default()).unwrap();
        assert!(same.data().same_location(arr.data()));
        assert_eq!(same.access(), Access::ReadWrite);

        let copy = array_from_py(&value, &ConvertOptions::default().always_copy()).unwrap();
        assert!(!copy.data().same_location(arr.data()));
        assert_eq!(copy.access(), Access::Immutable);

        let err = view(&value, Some(Access::Immutable)).unwrap_err();
        assert!(matches!(err, ConvertError::Access { .. }));
        assert_eq!(view(&value, Some(Access::ReadOnly)).unwrap().access(), Access::ReadOnly);
    }

    #[test]
    fn test_requested_access() {
        let opts = ConvertOptions::default().with_access_str("rw").unwrap();
        let arr = array_from_py(&ints(&[1]), &opts).unwrap();
        assert_eq!(arr.access(), Access::ReadWrite);
    }

    #[test]
    fn test_typed_with_dtype() {
        let value = PyValue::list([ints(&[1, 2]), ints(&[3, 4, 5])]);
        let arr = array_from_py_typed(&value, &RuntimeType::int64(), false, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * var * int64");
        assert_eq!(as_py(&arr).unwrap(), value);

        let points = PyValue::list([ints(&[1, 2]), ints(&[3, 4])]);
        let dtype = parse_type("{x: int32, y: float64}").unwrap();
        let arr = array_from_py_typed(&points, &dtype, false, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * {x: int32, y: float64}");
    }

    #[test]
    fn test_typed_with_full_type_broadcasts() {
        let tp = parse_type("3 * int8").unwrap();
        let arr = array_from_py_typed(&PyValue::from(7i64), &tp, true, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.to_scalars().unwrap(), vec![Scalar::Int(7); 3]);

        let opts = ConvertOptions::default().with_broadcast(false);
        let err = array_from_py_typed(&PyValue::from(7i64), &tp, true, &opts).unwrap_err();
        assert!(err.is_broadcast());
    }

    #[test]
    fn test_setitem_and_getitem() {
        let opts = ConvertOptions::default().with_access(Access::ReadWrite);
        let arr = array_from_py(&PyValue::list([ints(&[1, 2, 3]), ints(&[4, 5, 6])]), &opts).unwrap();

        setitem(&arr, &Subscript::Indices(vec![0, 1]), &PyValue::from(20i64), &opts).unwrap();
        setitem(&arr, &Subscript::Index(-1), &PyValue::from(0i64), &opts).unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([ints(&[1, 20, 3]), ints(&[0, 0, 0])]));
        assert_eq!(getitem(&arr, &Subscript::Indices(vec![0, 1])).unwrap(), PyValue::from(20i64));
        assert!(matches!(getitem(&arr, &Subscript::Index(0)).unwrap(), PyValue::Native(_)));

        setitem(&arr, &Subscript::Ellipsis, &ints(&[7, 8, 9]), &opts).unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([ints(&[7, 8, 9]), ints(&[7, 8, 9])]));

        let frozen = array_from_py(&ints(&[1]), &ConvertOptions::default()).unwrap();
        let err = setitem(&frozen, &Subscript::Index(0), &PyValue::from(2i64), &opts).unwrap_err();
        assert!(matches!(err, ConvertError::Access { .. }));
    }

    #[test]
    fn test_subscript_from_py() {
        assert_eq!(Subscript::from_py(&PyValue::Ellipsis).unwrap(), Subscript::Ellipsis);
        assert_eq!(Subscript::from_py(&PyValue::from(-2i64)).unwrap(), Subscript::Index(-2));
        let pair = PyValue::Tuple(vec![PyValue::from(0i64), PyValue::from(1i64)]);
        assert_eq!(Subscript::from_py(&pair).unwrap(), Subscript::Indices(vec![0, 1]));
        assert!(Subscript::from_py(&PyValue::str("a")).unwrap_err().is_type_error());
    }

    #[test]
    fn test_integer_protocol_scalar_is_read_once() {
        let obj = PyObject::new("Counter");
        obj.set_attr("__index__", PyValue::int(1i64 << 40));
        let arr = array_from_py(&PyValue::Object(obj.clone()), &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "int64");
        assert_eq!(arr.read_scalar().unwrap(), Scalar::Int(1i128 << 40));
        assert_eq!(obj.protocol_calls(), 1);
    }

    #[test]
    fn test_unconvertible_object() {
        let err = array_from_py(&PyValue::Object(PyObject::new("Widget")), &ConvertOptions::default()).unwrap_err();
        assert!(err.is_type_error());
        assert!(err.to_string().contains("Widget"));
    }
}
