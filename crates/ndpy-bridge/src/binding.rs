//! Host Binding Layer
//!
//! Wrapping and unwrapping of native arrays inside host values, plus the
//! access checks applied when a wrapped array is handed back unchanged.

use ndpy_types::{Access, NdArray};
use tracing::trace;

use crate::error::{ConvertError, ConvertResult};
use crate::py_types::PyValue;

/// Whether `value` wraps a native array.
pub fn is_native_array(value: &PyValue) -> bool {
    matches!(value, PyValue::Native(_))
}

/// The native array wrapped by `value`.
pub fn unwrap(value: &PyValue) -> ConvertResult<&NdArray> {
    value.as_native().ok_or_else(|| {
        ConvertError::type_mismatch(format!("expected an ndpy.array, got {}", value.type_name()))
    })
}

/// Wrap a native array as a host value.
pub fn wrap(arr: NdArray) -> PyValue {
    PyValue::Native(arr)
}

/// View `arr` with the requested permissions, sharing its data.
///
/// A read-only or immutable array cannot become writable, and only an array
/// that is already immutable may be viewed as immutable.
pub fn view_with_access(arr: &NdArray, access: Access) -> ConvertResult<NdArray> {
    trace!(from = %arr.access(), to = %access, "view with access");
    match access {
        Access::Immutable if arr.access() != Access::Immutable => Err(ConvertError::access(
            "cannot view a non-immutable array as immutable",
        )),
        Access::ReadWrite if !arr.access().is_writable() => Err(ConvertError::access(
            "cannot view a readonly array as readwrite",
        )),
        _ if access == arr.access() => Ok(arr.clone()),
        _ => Ok(arr.with_access(access)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndpy_types::parse_type;
    use pretty_assertions::assert_eq;

    fn array(access: Access) -> NdArray {
        NdArray::empty(parse_type("3 * int32").unwrap()).unwrap().with_access(access)
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let value = wrap(array(Access::ReadWrite));
        assert!(is_native_array(&value));
        assert_eq!(unwrap(&value).unwrap().tp().to_string(), "3 * int32");
        assert!(!is_native_array(&PyValue::from(1i64)));
        assert!(unwrap(&PyValue::from(1i64)).unwrap_err().is_type_error());
    }

    #[test]
    fn test_view_with_access() {
        let rw = array(Access::ReadWrite);
        let view = view_with_access(&rw, Access::ReadOnly).unwrap();
        assert_eq!(view.access(), Access::ReadOnly);
        assert!(view.data().same_location(rw.data()));

        let err = view_with_access(&view, Access::ReadWrite).unwrap_err();
        assert_eq!(err.to_string(), "access error: cannot view a readonly array as readwrite");
        let err = view_with_access(&rw, Access::Immutable).unwrap_err();
        assert_eq!(err.to_string(), "access error: cannot view a non-immutable array as immutable");

        let frozen = array(Access::Immutable);
        assert_eq!(view_with_access(&frozen, Access::Immutable).unwrap().access(), Access::Immutable);
        assert_eq!(view_with_access(&frozen, Access::ReadOnly).unwrap().access(), Access::ReadOnly);
    }
}
