//! Conversion back to host values
//!
//! - `as_py`: a native array becomes nested host lists, tuples and dicts
//! - `ToPython`: Rust values become host values, used to build inputs

use std::collections::HashMap;

use ndpy_types::{dim_view, read_scalar, ArrMeta, DataPtr, NdArray, RuntimeType, Scalar, TypeKind};
use num_bigint::BigInt;
use smol_str::SmolStr;

use crate::error::{ConvertError, ConvertResult};
use crate::py_types::{PyDateTime, PyDict, PyList, PyTime, PyValue};

/// Convert a native array into the equivalent host value.
///
/// Dimensions become lists, tuples become tuples and structs become dicts
/// in field order. Missing values become `None`.
pub fn as_py(arr: &NdArray) -> ConvertResult<PyValue> {
    value_as_py(arr.tp(), arr.meta(), arr.data())
}

fn value_as_py(tp: &RuntimeType, meta: &ArrMeta, ptr: &DataPtr) -> ConvertResult<PyValue> {
    if let Some(view) = dim_view(tp, meta, ptr)? {
        let items = (0..view.extent)
            .map(|i| value_as_py(view.element_type, view.element_meta, &view.at(i)))
            .collect::<ConvertResult<Vec<_>>>()?;
        return Ok(PyValue::List(PyList::from_vec(items)));
    }
    match tp.kind() {
        TypeKind::Tuple(fields) => {
            let items = fields
                .iter()
                .enumerate()
                .map(|(i, field_tp)| field_as_py(field_tp, meta, ptr, i))
                .collect::<ConvertResult<Vec<_>>>()?;
            Ok(PyValue::Tuple(items))
        }
        TypeKind::Struct(fields) => {
            let dict = PyDict::new();
            for (i, (name, field_tp)) in fields.iter().enumerate() {
                dict.set(name.clone(), field_as_py(field_tp, meta, ptr, i)?);
            }
            Ok(PyValue::Dict(dict))
        }
        TypeKind::Void | TypeKind::Any => Ok(PyValue::None),
        _ => Ok(read_scalar(tp, meta, ptr)?.to_python()),
    }
}

fn field_as_py(tp: &RuntimeType, meta: &ArrMeta, ptr: &DataPtr, index: usize) -> ConvertResult<PyValue> {
    let (offset, field_meta) = meta
        .field(index)
        .ok_or_else(|| ConvertError::invariant(format!("metadata has no field {index}")))?;
    value_as_py(tp, field_meta, &ptr.offset_by(offset as isize))
}

// ============================================================================
// ToPython Trait - Convert Rust values to host values
// ============================================================================

/// Conversion of a Rust value into a host value.
///
/// ```
/// use ndpy_bridge::{PyValue, ToPython};
///
/// assert_eq!(vec![1i64, 2].to_python(), PyValue::list([PyValue::from(1i64), PyValue::from(2i64)]));
/// ```
pub trait ToPython {
    fn to_python(&self) -> PyValue;
}

impl ToPython for () {
    fn to_python(&self) -> PyValue {
        PyValue::None
    }
}

impl ToPython for bool {
    fn to_python(&self) -> PyValue {
        PyValue::Bool(*self)
    }
}

macro_rules! int_to_python {
    ($($t:ty),*) => {
        $(
            impl ToPython for $t {
                fn to_python(&self) -> PyValue {
                    PyValue::Int(BigInt::from(*self))
                }
            }
        )*
    };
}

int_to_python!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl ToPython for f32 {
    fn to_python(&self) -> PyValue {
        PyValue::Float(*self as f64)
    }
}

impl ToPython for f64 {
    fn to_python(&self) -> PyValue {
        PyValue::Float(*self)
    }
}

impl ToPython for str {
    fn to_python(&self) -> PyValue {
        PyValue::String(SmolStr::new(self))
    }
}

impl ToPython for String {
    fn to_python(&self) -> PyValue {
        PyValue::String(SmolStr::new(self))
    }
}

impl ToPython for SmolStr {
    fn to_python(&self) -> PyValue {
        PyValue::String(self.clone())
    }
}

impl<T: ToPython> ToPython for Option<T> {
    fn to_python(&self) -> PyValue {
        match self {
            Some(v) => v.to_python(),
            None => PyValue::None,
        }
    }
}

impl<T: ToPython> ToPython for Vec<T> {
    fn to_python(&self) -> PyValue {
        self.as_slice().to_python()
    }
}

impl<T: ToPython> ToPython for [T] {
    fn to_python(&self) -> PyValue {
        PyValue::List(self.iter().map(ToPython::to_python).collect())
    }
}

impl<K: AsRef<str>, V: ToPython> ToPython for HashMap<K, V> {
    fn to_python(&self) -> PyValue {
        let dict = PyDict::new();
        for (k, v) in self {
            dict.set(k.as_ref(), v.to_python());
        }
        PyValue::Dict(dict)
    }
}

impl ToPython for Scalar {
    fn to_python(&self) -> PyValue {
        match self {
            Scalar::Missing => PyValue::None,
            Scalar::Bool(b) => PyValue::Bool(*b),
            Scalar::Int(n) => n.to_python(),
            Scalar::UInt(n) => n.to_python(),
            Scalar::Float(x) => PyValue::Float(*x),
            Scalar::Complex(c) => PyValue::Complex(*c),
            Scalar::Bytes(b) => PyValue::Bytes(b.clone()),
            Scalar::String(s) => s.to_python(),
            Scalar::Date(d) => PyValue::Date(*d),
            Scalar::Time(t) => PyValue::Time(PyTime::naive(*t)),
            Scalar::DateTime(dt) => PyValue::DateTime(PyDateTime::naive(*dt)),
            Scalar::Type(t) => PyValue::Type(t.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndpy_types::{parse_type, write_scalar, AssignErrorMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_primitives_to_python() {
        assert_eq!(().to_python(), PyValue::None);
        assert_eq!(u64::MAX.to_python(), PyValue::Int(BigInt::from(u64::MAX)));
        assert_eq!(Some("a").map(str::to_string).to_python(), PyValue::str("a"));
        assert_eq!(Option::<i32>::None.to_python(), PyValue::None);
        let map: HashMap<&str, i64> = [("k", 1)].into_iter().collect();
        let PyValue::Dict(dict) = map.to_python() else {
            panic!("expected a dict");
        };
        assert_eq!(dict.get("k"), Some(PyValue::from(1i64)));
    }

    #[test]
    fn test_zeroed_array_as_py() {
        let arr = NdArray::empty(parse_type("2 * 2 * int16").unwrap()).unwrap();
        let zeros = || PyValue::list([PyValue::from(0i64), PyValue::from(0i64)]);
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([zeros(), zeros()]));
    }

    #[test]
    fn test_unallocated_var_dim_is_empty() {
        let arr = NdArray::empty(parse_type("var * int32").unwrap()).unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([]));
    }

    #[test]
    fn test_struct_as_dict_and_tuple_as_tuple() {
        let arr = NdArray::empty(parse_type("{a: bool, b: (int8, float32)}").unwrap()).unwrap();
        let PyValue::Dict(dict) = as_py(&arr).unwrap() else {
            panic!("expected a dict");
        };
        assert_eq!(dict.keys(), vec![SmolStr::new("a"), SmolStr::new("b")]);
        assert_eq!(dict.get("a"), Some(PyValue::Bool(false)));
        assert_eq!(
            dict.get("b"),
            Some(PyValue::Tuple(vec![PyValue::from(0i64), PyValue::from(0.0)]))
        );
    }

    #[test]
    fn test_missing_value_is_none() {
        let tp = parse_type("?float64").unwrap();
        let arr = NdArray::empty(tp.clone()).unwrap();
        write_scalar(&tp, arr.meta(), arr.data(), &Scalar::Missing, AssignErrorMode::default()).unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::None);
    }
}
