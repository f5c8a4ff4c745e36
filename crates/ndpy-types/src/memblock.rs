//! Reference-counted memory blocks.
//!
//! Array data lives in [`MemoryBlock`]s. A block is either a fixed data
//! buffer, sized once for an array's dense layout, or a growable pool that
//! backs variable-length payloads (ragged dimensions, strings, bytes).
//!
//! Positions inside a block are plain byte offsets, so growing a pool never
//! invalidates a [`DataPtr`]. Pools reserve their first bytes so that offset
//! zero can stand for "not yet allocated".

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::types::RuntimeType;

/// Number of bytes reserved at the front of every pool block.
pub const POOL_RESERVED: usize = 16;

/// A contiguous, shareable byte buffer.
#[derive(Clone)]
pub struct MemoryBlock {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl MemoryBlock {
    /// Create a zero-filled data buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(vec![0; len])),
        }
    }

    /// Create an empty pool for variable-length allocations.
    pub fn pool() -> Self {
        Self::zeroed(POOL_RESERVED)
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate `len` zeroed bytes aligned to `align`, returning the span.
    ///
    /// The returned `begin` is never zero for pool blocks.
    pub fn allocate(&self, len: usize, align: usize) -> Span {
        let mut bytes = self.bytes.borrow_mut();
        let align = align.max(1);
        let begin = bytes.len().max(POOL_RESERVED).next_multiple_of(align);
        bytes.resize(begin + len, 0);
        Span::new(begin as u64, (begin + len) as u64)
    }

    /// Copy `len` bytes starting at `offset` out of the block.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        self.bytes.borrow()[offset..offset + len].to_vec()
    }

    /// Read a fixed-size chunk.
    pub fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes.borrow()[offset..offset + N]);
        out
    }

    /// Overwrite bytes starting at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) {
        self.bytes.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Zero `len` bytes starting at `offset`.
    pub fn fill_zero(&self, offset: usize, len: usize) {
        self.bytes.borrow_mut()[offset..offset + len].fill(0);
    }

    /// Copy between two regions that may live in different blocks.
    pub fn copy(src: &MemoryBlock, src_offset: usize, dst: &MemoryBlock, dst_offset: usize, len: usize) {
        if Rc::ptr_eq(&src.bytes, &dst.bytes) {
            dst.bytes
                .borrow_mut()
                .copy_within(src_offset..src_offset + len, dst_offset);
        } else {
            let data = src.read(src_offset, len);
            dst.write(dst_offset, &data);
        }
    }

    /// Drop every allocation of a pool block, keeping the reserved prefix.
    ///
    /// Spans handed out earlier become dangling; only call this on pools
    /// whose contents are no longer referenced.
    pub fn release(&self) {
        self.bytes.borrow_mut().truncate(POOL_RESERVED);
    }

    /// Whether two handles refer to the same block.
    pub fn ptr_eq(&self, other: &MemoryBlock) -> bool {
        Rc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Number of live handles to this block.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.bytes)
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A `[begin, end)` byte range inside a pool block.
///
/// Stored inline as two little-endian `u64`s for strings, bytes and ragged
/// dimensions. The all-zero span is null; the all-ones span marks a missing
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub begin: u64,
    pub end: u64,
}

impl Span {
    pub const NULL: Span = Span { begin: 0, end: 0 };
    pub const NA: Span = Span {
        begin: u64::MAX,
        end: u64::MAX,
    };
    pub const SIZE: usize = 16;

    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self) -> bool {
        self.begin == 0
    }

    pub fn is_na(&self) -> bool {
        *self == Self::NA
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.begin.to_le_bytes());
        out[8..].copy_from_slice(&self.end.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut begin = [0u8; 8];
        let mut end = [0u8; 8];
        begin.copy_from_slice(&bytes[..8]);
        end.copy_from_slice(&bytes[8..]);
        Self {
            begin: u64::from_le_bytes(begin),
            end: u64::from_le_bytes(end),
        }
    }
}

/// A position inside a memory block.
#[derive(Debug, Clone)]
pub struct DataPtr {
    block: MemoryBlock,
    offset: usize,
}

impl DataPtr {
    pub fn new(block: MemoryBlock, offset: usize) -> Self {
        Self { block, offset }
    }

    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Pointer displaced by a signed byte delta.
    pub fn offset_by(&self, delta: isize) -> DataPtr {
        DataPtr {
            block: self.block.clone(),
            offset: self.offset.wrapping_add_signed(delta),
        }
    }

    /// Pointer to element `index` of a strided run.
    pub fn element(&self, stride: isize, index: usize) -> DataPtr {
        self.offset_by(stride * index as isize)
    }

    /// Whether both pointers address the same byte.
    pub fn same_location(&self, other: &DataPtr) -> bool {
        self.offset == other.offset && self.block.ptr_eq(&other.block)
    }

    pub fn read_array<const N: usize>(&self) -> [u8; N] {
        self.block.read_array(self.offset)
    }

    pub fn read(&self, len: usize) -> Vec<u8> {
        self.block.read(self.offset, len)
    }

    pub fn write(&self, data: &[u8]) {
        self.block.write(self.offset, data);
    }

    pub fn read_u64(&self) -> u64 {
        u64::from_le_bytes(self.read_array())
    }

    pub fn write_u64(&self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    pub fn read_span(&self) -> Span {
        Span::from_bytes(self.read_array())
    }

    pub fn write_span(&self, span: Span) {
        self.write(&span.to_bytes());
    }

    /// Copy `len` bytes from `src` to this location.
    pub fn copy_from(&self, src: &DataPtr, len: usize) {
        if len > 0 {
            MemoryBlock::copy(&src.block, src.offset, &self.block, self.offset, len);
        }
    }
}

/// Storage for type-valued slots.
///
/// A slot holds a 1-based id into the pool; zero means no type was stored.
#[derive(Clone, Default)]
pub struct TypePool {
    types: Rc<RefCell<Vec<RuntimeType>>>,
}

impl TypePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, tp: RuntimeType) -> u64 {
        let mut types = self.types.borrow_mut();
        types.push(tp);
        types.len() as u64
    }

    pub fn len(&self) -> usize {
        self.types.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.types.borrow_mut().clear();
    }

    pub fn get(&self, id: u64) -> Option<RuntimeType> {
        if id == 0 {
            return None;
        }
        self.types.borrow().get(id as usize - 1).cloned()
    }
}

impl fmt::Debug for TypePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePool")
            .field("len", &self.types.borrow().len())
            .finish()
    }
}
