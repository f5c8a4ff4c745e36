//! Scalar Converters
//!
//! One conversion per primitive runtime type: a host scalar goes into a
//! fixed-layout destination slot, or fails with a typed error.
//!
//! Host values the fast path does not recognise fall back to a full
//! conversion of that one value ([`array_from_py`]) followed by the
//! runtime's generic assignment. Bytes, strings and type values have no
//! fallback.

use chrono::NaiveTime;
use ndpy_types::{
    typed_data_assign, write_scalar, ArrMeta, AssignErrorMode, DataPtr, NdArray, RuntimeType, Scalar, TypeKind, Typed,
};
use tracing::warn;

use crate::array_from_py::array_from_py;
use crate::config::ConvertOptions;
use crate::error::{ConvertError, ConvertResult};
use crate::numeric::{host_to_bigint, host_to_f64, narrow_signed, narrow_unsigned};
use crate::py_types::PyValue;

/// Convert `value` into the scalar slot at `dst`.
pub fn assign_scalar(
    tp: &RuntimeType,
    meta: &ArrMeta,
    dst: &DataPtr,
    value: &PyValue,
    mode: AssignErrorMode,
) -> ConvertResult<()> {
    match fast_scalar(tp, value)? {
        Some(scalar) => Ok(write_scalar(tp, meta, dst, &scalar, mode)?),
        None => assign_generic(tp, meta, dst, value, mode),
    }
}

/// Whether the fast path for `tp` has no generic fallback.
fn is_strict(tp: &RuntimeType) -> bool {
    matches!(
        tp.kind(),
        TypeKind::Bytes { .. } | TypeKind::String { .. } | TypeKind::Type
    )
}

// The runtime scalar for `value`, or `None` when the generic path should run.
fn fast_scalar(tp: &RuntimeType, value: &PyValue) -> ConvertResult<Option<Scalar>> {
    let scalar = match (tp.kind(), value) {
        (TypeKind::Bool, PyValue::Bool(b)) => Scalar::Bool(*b),
        (TypeKind::Int { width, signed }, _) => match host_to_bigint(value) {
            Some(n) if *signed => Scalar::Int(narrow_signed(&n, *width)?),
            Some(n) => Scalar::UInt(narrow_unsigned(&n, *width)?),
            None => return Ok(None),
        },
        (TypeKind::Float(_), PyValue::Float(_) | PyValue::Int(_) | PyValue::Bool(_) | PyValue::Object(_)) => {
            Scalar::Float(host_to_f64(value)?)
        }
        (TypeKind::Complex(_), PyValue::Complex(c)) => Scalar::Complex(*c),
        (TypeKind::Complex(_), PyValue::Float(_) | PyValue::Int(_) | PyValue::Bool(_)) => {
            Scalar::Float(host_to_f64(value)?)
        }
        (TypeKind::Bytes { .. }, PyValue::Bytes(b)) => Scalar::Bytes(b.clone()),
        (TypeKind::String { .. }, PyValue::String(s)) => Scalar::String(s.to_string()),
        (TypeKind::Type, PyValue::Type(t)) => Scalar::Type(t.clone()),
        (TypeKind::Type, PyValue::String(s)) => Scalar::String(s.to_string()),
        (TypeKind::Date, PyValue::Date(d)) => Scalar::Date(*d),
        (TypeKind::Date, PyValue::DateTime(dt)) => {
            if dt.tzinfo.is_some() {
                return Err(tz_unsupported(tp));
            }
            if dt.value.time() != NaiveTime::default() {
                return Err(ConvertError::invalid_value(format!(
                    "cannot assign datetime {} with a nonzero time part to a date value",
                    dt.value
                )));
            }
            Scalar::Date(dt.value.date())
        }
        (TypeKind::Time, PyValue::Time(t)) => {
            if t.tzinfo.is_some() {
                return Err(tz_unsupported(tp));
            }
            Scalar::Time(t.time)
        }
        (TypeKind::DateTime, PyValue::DateTime(dt)) => {
            if dt.tzinfo.is_some() {
                return Err(tz_unsupported(tp));
            }
            Scalar::DateTime(dt.value)
        }
        _ if is_strict(tp) => {
            return Err(ConvertError::type_mismatch(format!(
                "cannot assign object {} of type {} to a {} value",
                value,
                value.type_name(),
                tp
            )));
        }
        _ => return Ok(None),
    };
    Ok(Some(scalar))
}

fn tz_unsupported(tp: &RuntimeType) -> ConvertError {
    ConvertError::unsupported(format!("converting a timezone-aware value to {tp}"))
}

/// Convert `value` on its own, then assign the result through the runtime.
pub fn assign_generic(
    tp: &RuntimeType,
    meta: &ArrMeta,
    dst: &DataPtr,
    value: &PyValue,
    mode: AssignErrorMode,
) -> ConvertResult<()> {
    warn!(dst = %tp, src = value.type_name(), "no direct conversion, converting through a temporary array");
    let src: NdArray = array_from_py(value, &ConvertOptions::default())?;
    typed_data_assign(Typed::new(tp, meta, dst), src.typed(), mode)?;
    Ok(())
}
