//! Conversion Kernels
//!
//! A conversion is a tree of small kernels mirroring the destination type.
//! The tree lives in one growable arena ([`KernelBuilder`]); a parent refers
//! to each child by its [`KernelOffset`] in that arena, never by reference.
//!
//! ## Building
//!
//! Instantiating a child may grow the arena, so a parent is pushed first and
//! patched afterwards by re-fetching it through its offset:
//!
//! ```text
//! let self_off = ckb.push(Box::new(ParentKernel { child: KernelOffset::UNSET, .. }));
//! let child = instantiate(ckb, ..)?;
//! ckb.check_child(self_off, child)?;
//! ckb.get_at_mut::<ParentKernel>(self_off)?.child = child;
//! ```
//!
//! Children always come after their parent. [`KernelBuilder::check_child`]
//! rejects anything else as a fatal invariant violation.

pub mod assign;

use std::any::Any;
use std::fmt;

use ndpy_types::DataPtr;
use tracing::trace;

use crate::error::{ConvertError, ConvertResult};
use crate::py_types::PyValue;

pub use assign::{AssignKernel, AssignNaKernel, ChainKernel};

/// Position of a kernel in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelOffset(pub usize);

impl KernelOffset {
    /// Placeholder for a child not yet instantiated
    pub const UNSET: KernelOffset = KernelOffset(usize::MAX);

    pub fn is_set(self) -> bool {
        self != Self::UNSET
    }
}

impl fmt::Display for KernelOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The source of one kernel call.
#[derive(Debug, Clone)]
pub enum KernelSrc<'a> {
    /// A host value
    Host(&'a PyValue),
    /// Runtime data in the layout the kernel was built for
    Data(DataPtr),
}

impl<'a> KernelSrc<'a> {
    /// The host value, or an invariant error for runtime data.
    pub fn host(&self, kernel: &str) -> ConvertResult<&'a PyValue> {
        match self {
            KernelSrc::Host(value) => Ok(*value),
            KernelSrc::Data(_) => Err(ConvertError::invariant(format!(
                "{kernel} kernel called with runtime data instead of a host value"
            ))),
        }
    }

    /// The runtime data, or an invariant error for a host value.
    pub fn data(&self, kernel: &str) -> ConvertResult<&DataPtr> {
        match self {
            KernelSrc::Data(ptr) => Ok(ptr),
            KernelSrc::Host(_) => Err(ConvertError::invariant(format!(
                "{kernel} kernel called with a host value instead of runtime data"
            ))),
        }
    }
}

/// The source of a strided kernel call.
#[derive(Debug, Clone)]
pub enum StridedSrc<'a> {
    /// Consecutive host values
    Host(&'a [PyValue]),
    /// Runtime elements `stride` bytes apart
    Data { ptr: DataPtr, stride: isize },
}

impl<'a> StridedSrc<'a> {
    /// Source element `index`.
    pub fn at(&self, index: usize) -> ConvertResult<KernelSrc<'a>> {
        match self {
            StridedSrc::Host(items) => {
                let items: &'a [PyValue] = *items;
                items
                    .get(index)
                    .map(KernelSrc::Host)
                    .ok_or_else(|| ConvertError::invariant(format!("strided source has no element {index}")))
            }
            StridedSrc::Data { ptr, stride } => Ok(KernelSrc::Data(ptr.element(*stride, index))),
        }
    }
}

/// One node of a conversion tree.
pub trait Kernel: Any + fmt::Debug {
    /// Short node kind, for logs
    fn name(&self) -> &'static str;

    /// Convert one element.
    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()>;

    /// Convert `count` elements. The default calls [`Kernel::single`] per element.
    fn strided(
        &self,
        ckb: &KernelBuilder,
        dst: &DataPtr,
        dst_stride: isize,
        src: StridedSrc<'_>,
        count: usize,
    ) -> ConvertResult<()> {
        for i in 0..count {
            self.single(ckb, &dst.element(dst_stride, i), src.at(i)?)?;
        }
        Ok(())
    }

    /// Destroy this kernel's children, depth first.
    fn destruct_children(&mut self, _ckb: &mut KernelBuilder) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Arena holding one kernel tree.
#[derive(Debug, Default)]
pub struct KernelBuilder {
    nodes: Vec<Option<Box<dyn Kernel>>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots ever allocated
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of kernels not yet destroyed
    pub fn live(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Append a kernel, returning its offset.
    pub fn push(&mut self, kernel: Box<dyn Kernel>) -> KernelOffset {
        let offset = KernelOffset(self.nodes.len());
        trace!(kernel = kernel.name(), offset = offset.0, "instantiate kernel");
        self.nodes.push(Some(kernel));
        offset
    }

    /// Reserve room for `additional` more kernels.
    pub fn reserve(&mut self, additional: usize) {
        self.nodes.reserve(additional);
    }

    pub fn get(&self, offset: KernelOffset) -> ConvertResult<&dyn Kernel> {
        self.nodes
            .get(offset.0)
            .and_then(|slot| slot.as_deref())
            .ok_or_else(|| ConvertError::invariant(format!("no kernel at {offset}")))
    }

    /// Re-fetch the kernel at `offset` as its concrete type.
    pub fn get_at_mut<K: Kernel>(&mut self, offset: KernelOffset) -> ConvertResult<&mut K> {
        self.nodes
            .get_mut(offset.0)
            .and_then(|slot| slot.as_deref_mut())
            .and_then(|kernel| kernel.as_any_mut().downcast_mut::<K>())
            .ok_or_else(|| {
                ConvertError::invariant(format!(
                    "no kernel of type {} at {offset}",
                    std::any::type_name::<K>()
                ))
            })
    }

    /// Check that `child` was instantiated after `parent`.
    pub fn check_child(&self, parent: KernelOffset, child: KernelOffset) -> ConvertResult<()> {
        if !child.is_set() || child <= parent || child.0 >= self.nodes.len() {
            return Err(ConvertError::invariant(format!(
                "child kernel {child} must follow its parent {parent}"
            )));
        }
        Ok(())
    }

    pub fn call_single(&self, offset: KernelOffset, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        self.get(offset)?.single(self, dst, src)
    }

    pub fn call_strided(
        &self,
        offset: KernelOffset,
        dst: &DataPtr,
        dst_stride: isize,
        src: StridedSrc<'_>,
        count: usize,
    ) -> ConvertResult<()> {
        self.get(offset)?.strided(self, dst, dst_stride, src, count)
    }

    /// Destroy the kernel at `offset` and everything below it.
    pub fn destroy(&mut self, offset: KernelOffset) {
        let taken = self.nodes.get_mut(offset.0).and_then(Option::take);
        if let Some(mut kernel) = taken {
            kernel.destruct_children(self);
        }
    }
}

impl Drop for KernelBuilder {
    fn drop(&mut self) {
        if !self.nodes.is_empty() {
            self.destroy(KernelOffset(0));
        }
    }
}
