//! Missing-value sentinels for option types.
//!
//! An option slot has the same storage as its value type; one reserved bit
//! pattern per kind marks it as missing.

use crate::error::{NdError, NdResult};
use crate::memblock::{DataPtr, Span};
use crate::types::{FloatWidth, IntWidth, RuntimeType, TypeKind};

pub const BOOL_NA: u8 = 2;
pub const FLOAT16_NA_BITS: u16 = 0x7c01;
pub const FLOAT32_NA_BITS: u32 = 0x7f80_07a2;
pub const FLOAT64_NA_BITS: u64 = 0x7ff0_0000_0000_07a2;

fn int_na_bytes(width: IntWidth, signed: bool) -> Vec<u8> {
    let n = width.bytes();
    if signed {
        let mut bytes = vec![0u8; n];
        bytes[n - 1] = 0x80;
        bytes
    } else {
        vec![0xff; n]
    }
}

fn float_na_bytes(width: FloatWidth) -> Vec<u8> {
    match width {
        FloatWidth::F16 => FLOAT16_NA_BITS.to_le_bytes().to_vec(),
        FloatWidth::F32 => FLOAT32_NA_BITS.to_le_bytes().to_vec(),
        FloatWidth::F64 => FLOAT64_NA_BITS.to_le_bytes().to_vec(),
    }
}

/// The sentinel bytes of `tp`, or `None` for kinds without one.
fn sentinel(tp: &RuntimeType) -> NdResult<Option<Vec<u8>>> {
    Ok(Some(match tp.value_type().kind() {
        TypeKind::Void => return Ok(None),
        TypeKind::Bool => vec![BOOL_NA],
        TypeKind::Int { width, signed } => int_na_bytes(*width, *signed),
        TypeKind::Float(w) => float_na_bytes(*w),
        TypeKind::Complex(w) => {
            let mut bytes = float_na_bytes(*w);
            bytes.extend(float_na_bytes(*w));
            bytes
        }
        TypeKind::Bytes { fixed: None } | TypeKind::String { fixed: None, .. } => Span::NA.to_bytes().to_vec(),
        TypeKind::Date => i32::MIN.to_le_bytes().to_vec(),
        TypeKind::Time | TypeKind::DateTime => i64::MIN.to_le_bytes().to_vec(),
        TypeKind::Type => u64::MAX.to_le_bytes().to_vec(),
        TypeKind::Categorical(c) => vec![0xff; c.index_width().bytes()],
        _ => {
            return Err(NdError::unsupported(format!(
                "missing values of type {} are not supported",
                tp.value_type()
            )))
        }
    }))
}

/// Check that `tp` can be wrapped in an option.
pub fn check_option_value_type(tp: &RuntimeType) -> NdResult<()> {
    sentinel(tp).map(|_| ())
}

/// Mark the slot at `ptr` as missing.
pub fn assign_na(tp: &RuntimeType, ptr: &DataPtr) -> NdResult<()> {
    if let Some(bytes) = sentinel(tp)? {
        ptr.write(&bytes);
    }
    Ok(())
}

/// Whether the slot at `ptr` holds the missing sentinel.
pub fn is_na(tp: &RuntimeType, ptr: &DataPtr) -> NdResult<bool> {
    match sentinel(tp)? {
        Some(bytes) => Ok(ptr.read(bytes.len()) == bytes),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memblock::MemoryBlock;
    use crate::RuntimeType;

    #[test]
    fn test_na_roundtrip_per_kind() {
        for tp in [
            RuntimeType::bool(),
            RuntimeType::int8(),
            RuntimeType::uint64(),
            RuntimeType::float64(),
            RuntimeType::complex64(),
            RuntimeType::string(),
            RuntimeType::datetime(),
        ] {
            let ptr = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
            assert!(!is_na(&tp, &ptr).unwrap(), "{tp} zero is not NA");
            assign_na(&tp, &ptr).unwrap();
            assert!(is_na(&tp, &ptr).unwrap(), "{tp} sentinel reads back as NA");
        }
    }

    #[test]
    fn test_unsupported_kinds() {
        assert!(check_option_value_type(&RuntimeType::fixed_string(4)).is_err());
        assert!(check_option_value_type(&RuntimeType::tuple(vec![RuntimeType::int32()])).is_err());
        assert!(check_option_value_type(&RuntimeType::int32()).is_ok());
    }
}
