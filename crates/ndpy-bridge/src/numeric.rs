//! Overflow-checked numeric extraction from host values.
//!
//! Host integers have arbitrary precision. Narrowing checks the destination
//! range per width and signedness; 128-bit values are rebuilt from two 64-bit
//! words and a sign residue.

use ndpy_types::IntWidth;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::error::{ConvertError, ConvertResult};
use crate::py_types::PyValue;

fn int_type_name(width: IntWidth, signed: bool) -> String {
    format!("{}int{}", if signed { "" } else { "u" }, width.bits())
}

/// Narrow a host integer to a signed integer of `width`.
pub fn narrow_signed(value: &BigInt, width: IntWidth) -> ConvertResult<i128> {
    if width == IntWidth::W128 {
        return reconstruct_i128(value);
    }
    let bits = width.bits();
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    match value.to_i64() {
        Some(n) if (min..=max).contains(&(n as i128)) => Ok(n as i128),
        _ => Err(ConvertError::overflow(value, int_type_name(width, true))),
    }
}

/// Narrow a host integer to an unsigned integer of `width`.
pub fn narrow_unsigned(value: &BigInt, width: IntWidth) -> ConvertResult<u128> {
    if width == IntWidth::W128 {
        return reconstruct_u128(value);
    }
    let bits = width.bits();
    let max = (1u128 << bits) - 1;
    match value.to_u64() {
        Some(n) if (n as u128) <= max => Ok(n as u128),
        _ => Err(ConvertError::overflow(value, int_type_name(width, false))),
    }
}

// Low word, high word and whatever remains above bit 128.
fn split_words(value: &BigInt) -> ConvertResult<(u64, u64, BigInt)> {
    let mask = BigInt::from(u64::MAX);
    let lo = (value & &mask)
        .to_u64()
        .ok_or_else(|| ConvertError::invariant("masked low word exceeds 64 bits"))?;
    let shifted = value >> 64u32;
    let hi = (&shifted & &mask)
        .to_u64()
        .ok_or_else(|| ConvertError::invariant("masked high word exceeds 64 bits"))?;
    Ok((lo, hi, shifted >> 64u32))
}

/// Rebuild a signed 128-bit integer.
///
/// After removing both words, the residue must be the sign extension of the
/// result: 0 for non-negative and -1 for negative values.
pub fn reconstruct_i128(value: &BigInt) -> ConvertResult<i128> {
    let (lo, hi, rest) = split_words(value)?;
    let negative = hi >> 63 == 1;
    let expected = if negative { BigInt::from(-1) } else { BigInt::zero() };
    if rest != expected {
        return Err(ConvertError::overflow(value, "int128"));
    }
    Ok((((hi as u128) << 64) | lo as u128) as i128)
}

/// Rebuild an unsigned 128-bit integer. The residue must be zero.
pub fn reconstruct_u128(value: &BigInt) -> ConvertResult<u128> {
    let (lo, hi, rest) = split_words(value)?;
    if !rest.is_zero() {
        return Err(ConvertError::overflow(value, "uint128"));
    }
    Ok(((hi as u128) << 64) | lo as u128)
}

/// A host integer, following `__index__` and then `__int__` on objects.
pub fn host_to_bigint(value: &PyValue) -> Option<BigInt> {
    match value {
        PyValue::Int(n) => Some(n.clone()),
        PyValue::Bool(b) => Some(BigInt::from(*b as u8)),
        PyValue::Object(obj) => {
            let converted = obj.call_protocol("__index__").or_else(|| obj.call_protocol("__int__"))?;
            match converted {
                PyValue::Int(n) => Some(n),
                PyValue::Bool(b) => Some(BigInt::from(b as u8)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Host double-precision extraction.
///
/// Values the host cannot turn into a float surface as a host `TypeError`.
pub fn host_to_f64(value: &PyValue) -> ConvertResult<f64> {
    match value {
        PyValue::Float(x) => Ok(*x),
        PyValue::Bool(b) => Ok(*b as u8 as f64),
        PyValue::Int(n) => n
            .to_f64()
            .filter(|x| x.is_finite())
            .ok_or_else(|| ConvertError::host("OverflowError", "int too large to convert to float")),
        PyValue::Object(obj) => match obj.call_protocol("__float__") {
            Some(PyValue::Float(x)) => Ok(x),
            Some(other) => Err(ConvertError::host(
                "TypeError",
                format!("__float__ returned non-float (type {})", other.type_name()),
            )),
            // Without __float__ the host falls back to __index__.
            None => match obj.call_protocol("__index__") {
                Some(index @ (PyValue::Int(_) | PyValue::Bool(_))) => host_to_f64(&index),
                Some(other) => Err(ConvertError::host(
                    "TypeError",
                    format!("__index__ returned non-int (type {})", other.type_name()),
                )),
                None => Err(ConvertError::host(
                    "TypeError",
                    format!("must be real number, not {}", obj.type_name()),
                )),
            },
        },
        other => Err(ConvertError::host(
            "TypeError",
            format!("must be real number, not {}", other.type_name()),
        )),
    }
}
