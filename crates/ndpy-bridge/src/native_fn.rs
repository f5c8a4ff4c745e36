//! Native function adapter
//!
//! Wraps a host object that carries a compiled entry point with the ABI
//! `(ret: *mut i32, excinfo: *mut void, env: *mut void, a: i32, b: i32) -> status`
//! as a two-argument `int32` kernel. The adapter holds one reference to the
//! host object from construction until it is dropped.
//!
//! Only single-element calls exist; strided execution reports
//! [`ConvertError::NotSupported`].

use std::any::Any;
use std::ptr;

use ndpy_types::{parse_signature, DataPtr, IntWidth, RuntimeType};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{ConvertError, ConvertResult};
use crate::kernel::{Kernel, KernelBuilder, KernelSrc, StridedSrc};
use crate::numeric::{host_to_bigint, narrow_signed};
use crate::py_types::{NativeBinaryIntFn, PyObject, PyValue};

/// The only prototype native functions may have.
pub const NATIVE_SIGNATURE: &str = "(int32, int32) -> int32";

/// A compiled host function exposed as a kernel.
#[derive(Debug)]
pub struct NativeArrFunc {
    name: SmolStr,
    func: NativeBinaryIntFn,
    owner: PyObject,
    params: Vec<RuntimeType>,
    ret: RuntimeType,
}

impl NativeArrFunc {
    /// Adapt `obj`, whose entry point has the prototype `signature`.
    pub fn new(obj: &PyObject, signature: &str) -> ConvertResult<Self> {
        let func = obj.native_fn().ok_or_else(|| {
            ConvertError::type_mismatch(format!(
                "object of type {} does not expose a native entry point",
                obj.type_name()
            ))
        })?;
        let (params, ret) = parse_signature(signature)?;
        if params != [RuntimeType::int32(), RuntimeType::int32()] || ret != RuntimeType::int32() {
            return Err(ConvertError::unsupported(format!(
                "native functions with prototype {signature}, only {NATIVE_SIGNATURE} is available"
            )));
        }
        obj.incref();
        debug!(function = obj.type_name(), signature, "wrapped native function");
        Ok(Self {
            name: SmolStr::new(obj.type_name()),
            func,
            owner: obj.clone(),
            params,
            ret,
        })
    }

    pub fn params(&self) -> &[RuntimeType] {
        &self.params
    }

    pub fn ret(&self) -> &RuntimeType {
        &self.ret
    }

    fn invoke(&self, a: i32, b: i32) -> ConvertResult<i32> {
        let mut ret = 0i32;
        let status = (self.func)(&mut ret, ptr::null_mut(), ptr::null_mut(), a, b);
        if status != 0 {
            return Err(ConvertError::host(
                "RuntimeError",
                format!("native function {} failed with status {status}", self.name),
            ));
        }
        Ok(ret)
    }

    /// Call with two host arguments.
    pub fn call(&self, args: &[PyValue]) -> ConvertResult<PyValue> {
        let [a, b] = args else {
            return Err(ConvertError::type_mismatch(format!(
                "{} takes 2 arguments, {} given",
                self.name,
                args.len()
            )));
        };
        let result = self.invoke(host_int32(a)?, host_int32(b)?)?;
        Ok(PyValue::int(result))
    }
}

fn host_int32(value: &PyValue) -> ConvertResult<i32> {
    let n = host_to_bigint(value).ok_or_else(|| {
        ConvertError::type_mismatch(format!("expected an int argument, got {}", value.type_name()))
    })?;
    // narrow_signed has already checked the int32 range
    Ok(narrow_signed(&n, IntWidth::W32)? as i32)
}

fn read_i32(ptr: &DataPtr) -> i32 {
    i32::from_le_bytes(ptr.read_array())
}

impl Kernel for NativeArrFunc {
    fn name(&self) -> &'static str {
        "native_fn"
    }

    /// The source is a host pair or runtime data laid out as `(int32, int32)`.
    fn single(&self, _ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let (a, b) = match src {
            KernelSrc::Data(args) => (read_i32(&args), read_i32(&args.offset_by(4))),
            KernelSrc::Host(value) => {
                let items = value.fast_sequence()?;
                match &items[..] {
                    [a, b] => (host_int32(a)?, host_int32(b)?),
                    _ => return Err(ConvertError::broadcast(value, NATIVE_SIGNATURE)),
                }
            }
        };
        dst.write(&self.invoke(a, b)?.to_le_bytes());
        Ok(())
    }

    fn strided(
        &self,
        _ckb: &KernelBuilder,
        _dst: &DataPtr,
        _dst_stride: isize,
        _src: StridedSrc<'_>,
        _count: usize,
    ) -> ConvertResult<()> {
        Err(ConvertError::not_supported(format!("strided execution of native function {}", self.name)))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for NativeArrFunc {
    fn drop(&mut self) {
        self.owner.decref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndpy_types::MemoryBlock;
    use pretty_assertions::assert_eq;
    use std::ffi::c_void;

    extern "C" fn add(ret: *mut i32, _excinfo: *mut c_void, _env: *mut c_void, a: i32, b: i32) -> i32 {
        match a.checked_add(b) {
            Some(sum) => {
                // SAFETY: the adapter always passes a valid out pointer
                unsafe { *ret = sum };
                0
            }
            None => 1,
        }
    }

    fn adder() -> PyObject {
        PyObject::native_function("add", add)
    }

    #[test]
    fn test_call() {
        let obj = adder();
        let f = NativeArrFunc::new(&obj, NATIVE_SIGNATURE).unwrap();
        assert_eq!(f.call(&[PyValue::from(2i64), PyValue::from(40i64)]).unwrap(), PyValue::from(42i64));
        assert!(f.call(&[PyValue::from(1i64)]).unwrap_err().is_type_error());
        assert!(f.call(&[PyValue::from(1i64), PyValue::from(1i64 << 40)]).unwrap_err().is_overflow());
        let err = f.call(&[PyValue::from(i64::from(i32::MAX)), PyValue::from(1i64)]).unwrap_err();
        assert!(matches!(err, ConvertError::Host { .. }));
    }

    #[test]
    fn test_reference_held_for_lifetime() {
        let obj = adder();
        assert_eq!(obj.ref_count(), 1);
        let f = NativeArrFunc::new(&obj, "(int32, int32) -> int32").unwrap();
        assert_eq!(obj.ref_count(), 2);
        drop(f);
        assert_eq!(obj.ref_count(), 1);
    }

    #[test]
    fn test_rejects_other_prototypes() {
        let err = NativeArrFunc::new(&adder(), "(int64, int64) -> int64").unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFeature { .. }));
        assert!(NativeArrFunc::new(&PyObject::new("plain"), NATIVE_SIGNATURE).unwrap_err().is_type_error());
    }

    #[test]
    fn test_kernel_single_and_strided() {
        let obj = adder();
        let mut ckb = KernelBuilder::new();
        let root = ckb.push(Box::new(NativeArrFunc::new(&obj, NATIVE_SIGNATURE).unwrap()));

        let args = DataPtr::new(MemoryBlock::zeroed(8), 0);
        args.write(&3i32.to_le_bytes());
        args.offset_by(4).write(&4i32.to_le_bytes());
        let dst = DataPtr::new(MemoryBlock::zeroed(4), 0);
        ckb.call_single(root, &dst, KernelSrc::Data(args)).unwrap();
        assert_eq!(read_i32(&dst), 7);

        let pair = PyValue::Tuple(vec![PyValue::from(5i64), PyValue::from(6i64)]);
        ckb.call_single(root, &dst, KernelSrc::Host(&pair)).unwrap();
        assert_eq!(read_i32(&dst), 11);

        let err = ckb
            .call_strided(root, &dst, 4, StridedSrc::Host(&[pair]), 1)
            .unwrap_err();
        assert!(matches!(err, ConvertError::NotSupported { .. }));

        drop(ckb);
        assert_eq!(obj.ref_count(), 1);
    }
}
