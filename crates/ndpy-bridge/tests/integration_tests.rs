//! Integration tests for the conversion engine.
//!
//! These tests drive whole conversions the way a host binding would:
//! host values in, native arrays out, and back again.

use std::ffi::c_void;

use ndpy_bridge::{
    array_from_py, array_from_py_typed, as_py, getitem, setitem, wrap, CompiledConversion, ConvertOptions,
    ForeignArray, NativeArrFunc, PyDict, PyObject, PyValue, Subscript,
};
use ndpy_types::{parse_type, Access, ArrMeta, DataPtr, MemoryBlock, NdArray, Scalar};
use pretty_assertions::assert_eq;

fn ints(values: &[i64]) -> PyValue {
    PyValue::list(values.iter().map(|&n| PyValue::from(n)))
}

fn writable() -> ConvertOptions {
    ConvertOptions::default().with_access(Access::ReadWrite)
}

// ============================================================================
// End to end
// ============================================================================

mod end_to_end {
    use super::*;
    #[allow(unused_imports)]
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matrix_deduce_set_and_query() {
        let value = PyValue::list([ints(&[1, 2, 3]), ints(&[4, 5, 6])]);
        let arr = array_from_py(&value, &writable()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * 3 * int32");

        let index = Subscript::from_py(&PyValue::Tuple(vec![PyValue::from(0i64), PyValue::from(1i64)])).unwrap();
        setitem(&arr, &index, &PyValue::from(50i64), &writable()).unwrap();

        assert_eq!(
            arr.to_scalars().unwrap(),
            [1, 50, 3, 4, 5, 6].map(Scalar::Int).to_vec()
        );
        assert_eq!(arr.shape().unwrap().to_string(), "(2, 3)");
        assert_eq!(getitem(&arr, &index).unwrap(), PyValue::from(50i64));
    }

    #[test]
    fn test_records() {
        let rec = |name: &str, score: f64| -> PyValue {
            let dict: PyDict = [("name", PyValue::str(name)), ("score", PyValue::from(score))]
                .into_iter()
                .collect();
            PyValue::Dict(dict)
        };
        let value = PyValue::list([rec("ada", 9.5), rec("grace", 8.0)]);
        let arr = array_from_py(&value, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * {name: string, score: float64}");
        assert_eq!(as_py(&arr).unwrap(), value);
    }

    #[test]
    fn test_nested_var_with_missing() {
        let value = PyValue::list([
            PyValue::list([PyValue::from(1i64), PyValue::None]),
            PyValue::list([]),
            ints(&[2, 3, 4]),
        ]);
        let arr = array_from_py(&value, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "3 * var * ?int32");
        assert_eq!(as_py(&arr).unwrap(), value);
    }
}

// ============================================================================
// Option routing
// ============================================================================

mod options {
    use super::*;
    #[allow(unused_imports)]
    use pretty_assertions::assert_eq;

    #[test]
    fn test_native_missing_value_is_recognised() {
        let missing = array_from_py(&PyValue::None, &ConvertOptions::default()).unwrap();
        let value = PyValue::list([PyValue::from(1i64), wrap(missing)]);
        let arr = array_from_py_typed(&value, &parse_type("2 * ?int32").unwrap(), true, &ConvertOptions::default())
            .unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([PyValue::from(1i64), PyValue::None]));
    }

    #[test]
    fn test_missing_strings_parse_as_missing() {
        let value = PyValue::list([PyValue::str("12"), PyValue::str("NA"), PyValue::str("")]);
        let arr = array_from_py_typed(&value, &parse_type("3 * ?int32").unwrap(), true, &ConvertOptions::default())
            .unwrap();
        assert_eq!(
            arr.to_scalars().unwrap(),
            vec![Scalar::Int(12), Scalar::Missing, Scalar::Missing]
        );
    }
}

// ============================================================================
// Compiled conversions
// ============================================================================

#[test]
fn test_compiled_conversion_is_reusable() {
    let tp = parse_type("2 * float64").unwrap();
    let meta = ArrMeta::for_type(&tp);
    let compiled = CompiledConversion::compile(&tp, &meta, &ConvertOptions::default()).unwrap();
    assert_eq!(compiled.tp(), &tp);

    let rows = [ints(&[1, 2]), PyValue::from(0.5), PyValue::list([PyValue::from(3.5)])];
    let dst = DataPtr::new(MemoryBlock::zeroed(tp.data_size() * rows.len()), 0);
    compiled.apply_strided(&dst, tp.data_size() as isize, &rows).unwrap();

    let out = NdArray::from_parts(
        parse_type("3 * 2 * float64").unwrap(),
        ArrMeta::for_type(&parse_type("3 * 2 * float64").unwrap()),
        dst,
        Access::ReadOnly,
    );
    assert_eq!(
        out.to_scalars().unwrap(),
        [1.0, 2.0, 0.5, 0.5, 3.5, 3.5].map(Scalar::Float).to_vec()
    );
}

// ============================================================================
// Foreign arrays
// ============================================================================

mod foreign {
    use super::*;
    #[allow(unused_imports)]
    use pretty_assertions::assert_eq;

    #[test]
    fn test_foreign_array_converts_directly() {
        let foreign = ForeignArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4]).unwrap();
        let arr = array_from_py(&PyValue::Foreign(foreign), &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * 2 * int32");
        assert_eq!(arr.access(), Access::Immutable);
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([ints(&[1, 2]), ints(&[3, 4])]));
    }

    #[test]
    fn test_transposed_foreign_array() {
        let foreign = ForeignArray::from_elements(vec![2, 3], &[1i64, 2, 3, 4, 5, 6]).unwrap();
        let arr = array_from_py(&PyValue::Foreign(foreign.transpose()), &ConvertOptions::default()).unwrap();
        assert_eq!(as_py(&arr).unwrap(), PyValue::list([ints(&[1, 4]), ints(&[2, 5]), ints(&[3, 6])]));
    }

    #[test]
    fn test_foreign_rows_inside_a_list() {
        let row = ForeignArray::from_elements(vec![2], &[1.5f64, 2.5]).unwrap();
        let value = PyValue::list([PyValue::Foreign(row.clone()), PyValue::Foreign(row)]);
        let arr = array_from_py_typed(&value, &parse_type("2 * 2 * float32").unwrap(), true, &ConvertOptions::default())
            .unwrap();
        assert_eq!(arr.to_scalars().unwrap(), [1.5, 2.5, 1.5, 2.5].map(Scalar::Float).to_vec());
    }
}

// ============================================================================
// Native functions
// ============================================================================

extern "C" fn mul(ret: *mut i32, _excinfo: *mut c_void, _env: *mut c_void, a: i32, b: i32) -> i32 {
    // SAFETY: the adapter passes a pointer to a live i32
    unsafe { *ret = a.wrapping_mul(b) };
    0
}

#[test]
fn test_native_function_adapter() {
    let obj = PyObject::native_function("mul", mul);
    {
        let f = NativeArrFunc::new(&obj, "(int32, int32) -> int32").unwrap();
        assert_eq!(obj.ref_count(), 2);
        assert_eq!(f.call(&[PyValue::from(6i64), PyValue::from(7i64)]).unwrap(), PyValue::from(42i64));
    }
    assert_eq!(obj.ref_count(), 1);
}
