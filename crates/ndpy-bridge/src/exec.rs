//! Execution and Broadcast Engine
//!
//! Runs an instantiated kernel tree against host values. Any element failure
//! aborts the whole call; slots written before the failure keep whatever
//! they received.

use ndpy_types::{ArrMeta, DataPtr, NdArray, RuntimeType};
use tracing::debug;

use crate::config::ConvertOptions;
use crate::error::ConvertResult;
use crate::from_py::instantiate;
use crate::kernel::{KernelBuilder, KernelOffset, KernelSrc, StridedSrc};
use crate::py_types::PyValue;

/// Whether `value` should be broadcast as one element across `tp`'s
/// dimensions rather than matched against them.
///
/// The host value's dimensionality is estimated by descending into first
/// elements. Strings, bytes and dicts stop the descent. When `tp` holds
/// tuples or structs, the innermost host sequence is the tuple itself.
pub fn broadcast_as_scalar(tp: &RuntimeType, value: &PyValue) -> bool {
    let mut host_ndim = 0usize;
    let mut current = value.clone();
    loop {
        match &current {
            PyValue::Native(arr) => {
                host_ndim += arr.ndim();
                break;
            }
            PyValue::Foreign(foreign) => {
                host_ndim += foreign.ndim();
                break;
            }
            PyValue::List(_) | PyValue::Tuple(_) | PyValue::Set(_) => {
                host_ndim += 1;
                let first = match current.fast_sequence() {
                    Ok(items) => items.first().cloned(),
                    Err(_) => None,
                };
                match first {
                    Some(item) => current = item,
                    None => break,
                }
            }
            _ => break,
        }
    }
    let dtype = tp.dtype().value_type();
    if dtype.is_tuple_or_struct() && host_ndim > 0 && !matches!(current, PyValue::Dict(_)) {
        host_ndim -= 1;
    }
    host_ndim < tp.ndim()
}

/// Convert `value` into an existing array, broadcasting as needed.
pub fn assign_from_py(dst: &NdArray, value: &PyValue, opts: &ConvertOptions) -> ConvertResult<()> {
    let data = dst.writable_data()?;
    debug!(dst = %dst.tp(), src = value.type_name(), "assign from host value");
    let compiled = CompiledConversion::compile(dst.tp(), dst.meta(), opts)?;
    compiled.apply(data, value)
}

/// A kernel tree built once and applied to many host values.
#[derive(Debug)]
pub struct CompiledConversion {
    ckb: KernelBuilder,
    root: KernelOffset,
    tp: RuntimeType,
}

impl CompiledConversion {
    /// Build the kernels converting host values into `tp` with metadata `meta`.
    pub fn compile(tp: &RuntimeType, meta: &ArrMeta, opts: &ConvertOptions) -> ConvertResult<Self> {
        let mut ckb = KernelBuilder::new();
        let root = instantiate(&mut ckb, tp, meta, opts)?;
        Ok(Self {
            ckb,
            root,
            tp: tp.clone(),
        })
    }

    pub fn tp(&self) -> &RuntimeType {
        &self.tp
    }

    /// Number of kernels in the tree
    pub fn kernel_count(&self) -> usize {
        self.ckb.live()
    }

    /// Convert one host value into `dst`.
    pub fn apply(&self, dst: &DataPtr, value: &PyValue) -> ConvertResult<()> {
        self.ckb.call_single(self.root, dst, KernelSrc::Host(value))
    }

    /// Convert `values` into consecutive destinations `dst_stride` bytes apart.
    pub fn apply_strided(&self, dst: &DataPtr, dst_stride: isize, values: &[PyValue]) -> ConvertResult<()> {
        self.ckb
            .call_strided(self.root, dst, dst_stride, StridedSrc::Host(values), values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py_types::PyDict;
    use ndpy_types::{parse_type, MemoryBlock, Scalar};
    use pretty_assertions::assert_eq;

    fn ints(values: &[i64]) -> PyValue {
        PyValue::list(values.iter().map(|&n| PyValue::from(n)))
    }

    #[test]
    fn test_broadcast_as_scalar() {
        let tp = parse_type("3 * int32").unwrap();
        assert!(broadcast_as_scalar(&tp, &PyValue::from(1i64)));
        assert!(broadcast_as_scalar(&tp, &PyValue::str("abc")));
        assert!(!broadcast_as_scalar(&tp, &ints(&[1, 2, 3])));

        let tp = parse_type("2 * 3 * int32").unwrap();
        assert!(broadcast_as_scalar(&tp, &ints(&[1, 2, 3])));
        assert!(!broadcast_as_scalar(&tp, &PyValue::list([ints(&[1, 2, 3])])));
    }

    #[test]
    fn test_broadcast_as_scalar_with_struct_dtype() {
        let tp = parse_type("3 * {x: int32, y: int32}").unwrap();
        let point = PyValue::list([PyValue::from(1i64), PyValue::from(2i64)]);
        assert!(broadcast_as_scalar(&tp, &point));
        let dict: PyDict = [("x", PyValue::from(1i64)), ("y", PyValue::from(2i64))].into_iter().collect();
        assert!(broadcast_as_scalar(&tp, &PyValue::Dict(dict.clone())));
        assert!(!broadcast_as_scalar(&tp, &PyValue::list([PyValue::Dict(dict)])));
    }

    #[test]
    fn test_apply_strided() {
        let tp = parse_type("int16").unwrap();
        let compiled = CompiledConversion::compile(&tp, &ArrMeta::for_type(&tp), &ConvertOptions::default()).unwrap();
        let dst = DataPtr::new(MemoryBlock::zeroed(6), 0);
        let values = [1i64, -2, 3].map(PyValue::from);
        compiled.apply_strided(&dst, 2, &values).unwrap();
        assert_eq!(dst.read(6), vec![1, 0, 0xfe, 0xff, 3, 0]);
    }

    #[test]
    fn test_one_bad_element_fails_the_batch() {
        let tp = parse_type("int8").unwrap();
        let compiled = CompiledConversion::compile(&tp, &ArrMeta::for_type(&tp), &ConvertOptions::default()).unwrap();
        let dst = DataPtr::new(MemoryBlock::zeroed(3), 0);
        let values = [1i64, 1000, 3].map(PyValue::from);
        assert!(compiled.apply_strided(&dst, 1, &values).unwrap_err().is_overflow());
    }

    #[test]
    fn test_offset_var_dim_without_storage_is_fatal() {
        let tp = parse_type("var * int32").unwrap();
        let meta = match ArrMeta::for_type(&tp) {
            ArrMeta::VarDim { stride, block, element, .. } => ArrMeta::VarDim {
                stride,
                offset: 8,
                block,
                element,
            },
            other => panic!("unexpected metadata {other:?}"),
        };
        let compiled = CompiledConversion::compile(&tp, &meta, &ConvertOptions::default()).unwrap();
        let dst = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);

        let err = compiled.apply(&dst, &ints(&[1])).unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::InvariantViolation { .. }));
        assert_eq!(err.severity(), crate::error::Severity::Fatal);
    }

    #[test]
    fn test_assign_from_py_checks_access() {
        let arr = NdArray::empty(parse_type("2 * int32").unwrap())
            .unwrap()
            .with_access(ndpy_types::Access::ReadOnly);
        let err = assign_from_py(&arr, &ints(&[1, 2]), &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::Access { .. }));
    }

    #[test]
    fn test_assign_from_py_broadcasts_rows() {
        let arr = NdArray::empty(parse_type("2 * 3 * int32").unwrap()).unwrap();
        assign_from_py(&arr, &ints(&[1, 2, 3]), &ConvertOptions::default()).unwrap();
        assert_eq!(
            arr.to_scalars().unwrap(),
            [1, 2, 3, 1, 2, 3].map(Scalar::Int).to_vec()
        );
    }
}
