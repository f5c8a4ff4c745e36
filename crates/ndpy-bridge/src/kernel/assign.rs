//! Kernels over runtime data: typed copies, missing-value writes and
//! two-stage chains through a temporary buffer.

use std::any::Any;

use ndpy_types::missing::assign_na;
use ndpy_types::{typed_data_assign, ArrMeta, AssignErrorMode, DataPtr, MemoryBlock, RuntimeType, Typed};

use super::{Kernel, KernelBuilder, KernelOffset, KernelSrc};
use crate::error::ConvertResult;

/// Typed assignment from runtime data of `src_tp` into `dst_tp`.
///
/// With `src_tp == dst_tp` this is the dst→dst copy used to replicate a
/// broadcast value.
#[derive(Debug)]
pub struct AssignKernel {
    dst_tp: RuntimeType,
    dst_meta: ArrMeta,
    src_tp: RuntimeType,
    src_meta: ArrMeta,
    mode: AssignErrorMode,
}

impl AssignKernel {
    pub fn new(
        dst_tp: RuntimeType,
        dst_meta: ArrMeta,
        src_tp: RuntimeType,
        src_meta: ArrMeta,
        mode: AssignErrorMode,
    ) -> Self {
        Self {
            dst_tp,
            dst_meta,
            src_tp,
            src_meta,
            mode,
        }
    }

    /// A copy between two slots of the same type and metadata.
    pub fn copy(tp: &RuntimeType, meta: &ArrMeta) -> Self {
        Self::new(tp.clone(), meta.clone(), tp.clone(), meta.clone(), AssignErrorMode::Nocheck)
    }
}

impl Kernel for AssignKernel {
    fn name(&self) -> &'static str {
        "assign"
    }

    fn single(&self, _ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let src = src.data(self.name())?;
        typed_data_assign(
            Typed::new(&self.dst_tp, &self.dst_meta, dst),
            Typed::new(&self.src_tp, &self.src_meta, src),
            self.mode,
        )?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Writes the missing-value sentinel of an option's value type.
#[derive(Debug)]
pub struct AssignNaKernel {
    value_tp: RuntimeType,
}

impl AssignNaKernel {
    pub fn new(value_tp: RuntimeType) -> Self {
        Self { value_tp }
    }
}

impl Kernel for AssignNaKernel {
    fn name(&self) -> &'static str {
        "assign_na"
    }

    fn single(&self, _ckb: &KernelBuilder, dst: &DataPtr, _src: KernelSrc<'_>) -> ConvertResult<()> {
        assign_na(&self.value_tp, dst)?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Two stages: `first` converts the source into a temporary of
/// `buffer_tp`, then `second` converts the temporary into the destination.
#[derive(Debug)]
pub struct ChainKernel {
    first: KernelOffset,
    second: KernelOffset,
    buffer_tp: RuntimeType,
    buffer_meta: ArrMeta,
}

impl ChainKernel {
    /// Instantiate a chain ending in a typed assignment into `dst_tp`.
    ///
    /// `build_first` instantiates the first stage against the buffer type
    /// and metadata.
    pub fn instantiate<F>(
        ckb: &mut KernelBuilder,
        buffer_tp: RuntimeType,
        dst_tp: &RuntimeType,
        dst_meta: &ArrMeta,
        mode: AssignErrorMode,
        build_first: F,
    ) -> ConvertResult<KernelOffset>
    where
        F: FnOnce(&mut KernelBuilder, &RuntimeType, &ArrMeta) -> ConvertResult<KernelOffset>,
    {
        let buffer_meta = ArrMeta::for_type(&buffer_tp);
        let self_off = ckb.push(Box::new(ChainKernel {
            first: KernelOffset::UNSET,
            second: KernelOffset::UNSET,
            buffer_tp: buffer_tp.clone(),
            buffer_meta: buffer_meta.clone(),
        }));

        let first = build_first(ckb, &buffer_tp, &buffer_meta)?;
        ckb.check_child(self_off, first)?;
        ckb.get_at_mut::<ChainKernel>(self_off)?.first = first;

        let second = ckb.push(Box::new(AssignKernel::new(
            dst_tp.clone(),
            dst_meta.clone(),
            buffer_tp,
            buffer_meta,
            mode,
        )));
        ckb.check_child(self_off, second)?;
        ckb.get_at_mut::<ChainKernel>(self_off)?.second = second;
        Ok(self_off)
    }
}

impl Kernel for ChainKernel {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let buffer = DataPtr::new(MemoryBlock::zeroed(self.buffer_tp.data_size()), 0);
        let result = ckb
            .call_single(self.first, &buffer, src)
            .and_then(|()| ckb.call_single(self.second, dst, KernelSrc::Data(buffer)));
        // The temporary's payloads are dead once copied out
        self.buffer_meta.release_pools();
        result
    }

    fn destruct_children(&mut self, ckb: &mut KernelBuilder) {
        ckb.destroy(self.first);
        ckb.destroy(self.second);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndpy_types::memblock::POOL_RESERVED;
    use ndpy_types::{read_scalar, write_scalar, Scalar};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_copy_kernel() {
        let tp = RuntimeType::string();
        let meta = ArrMeta::for_type(&tp);
        let a = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
        let b = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
        write_scalar(&tp, &meta, &a, &Scalar::String("abc".into()), AssignErrorMode::default()).unwrap();

        let mut ckb = KernelBuilder::new();
        let copy = ckb.push(Box::new(AssignKernel::copy(&tp, &meta)));
        ckb.call_single(copy, &b, KernelSrc::Data(a)).unwrap();
        assert_eq!(read_scalar(&tp, &meta, &b).unwrap(), Scalar::String("abc".into()));
    }

    #[test]
    fn test_assign_na_kernel() {
        let tp = RuntimeType::option(RuntimeType::int16());
        let ptr = DataPtr::new(MemoryBlock::zeroed(2), 0);
        let mut ckb = KernelBuilder::new();
        let na = ckb.push(Box::new(AssignNaKernel::new(RuntimeType::int16())));
        ckb.call_single(na, &ptr, KernelSrc::Host(&crate::py_types::PyValue::None)).unwrap();
        assert_eq!(read_scalar(&tp, &ArrMeta::for_type(&tp), &ptr).unwrap(), Scalar::Missing);
    }

    #[test]
    fn test_chain_converts_through_buffer() {
        let dst_tp = RuntimeType::float64();
        let dst_meta = ArrMeta::for_type(&dst_tp);
        let mut ckb = KernelBuilder::new();
        let root = ChainKernel::instantiate(
            &mut ckb,
            RuntimeType::int32(),
            &dst_tp,
            &dst_meta,
            AssignErrorMode::default(),
            |ckb, buffer_tp, buffer_meta| {
                Ok(ckb.push(Box::new(AssignKernel::copy(buffer_tp, buffer_meta))))
            },
        )
        .unwrap();

        let src = DataPtr::new(MemoryBlock::zeroed(4), 0);
        src.write(&7i32.to_le_bytes());
        let dst = DataPtr::new(MemoryBlock::zeroed(8), 0);
        ckb.call_single(root, &dst, KernelSrc::Data(src)).unwrap();
        assert_eq!(read_scalar(&dst_tp, &dst_meta, &dst).unwrap(), Scalar::Float(7.0));
        assert_eq!(ckb.live(), 3);
    }

    #[test]
    fn test_chain_releases_buffer_payloads() {
        let tp = RuntimeType::string();
        let src_meta = ArrMeta::for_type(&tp);
        let dst_meta = ArrMeta::for_type(&tp);
        let mut buffer_meta = None;
        let mut ckb = KernelBuilder::new();
        let root = ChainKernel::instantiate(&mut ckb, tp.clone(), &tp, &dst_meta, AssignErrorMode::default(), |ckb, buffer_tp, meta| {
            buffer_meta = Some(meta.clone());
            Ok(ckb.push(Box::new(AssignKernel::new(
                buffer_tp.clone(),
                meta.clone(),
                tp.clone(),
                src_meta.clone(),
                AssignErrorMode::default(),
            ))))
        })
        .unwrap();
        let buffer_pool = buffer_meta.unwrap().blockref().unwrap().clone();

        let src = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
        write_scalar(&tp, &src_meta, &src, &Scalar::String("payload".into()), AssignErrorMode::default()).unwrap();
        let dst = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
        for _ in 0..3 {
            ckb.call_single(root, &dst, KernelSrc::Data(src.clone())).unwrap();
            assert_eq!(buffer_pool.len(), POOL_RESERVED);
        }
        assert_eq!(read_scalar(&tp, &dst_meta, &dst).unwrap(), Scalar::String("payload".into()));
    }
}
