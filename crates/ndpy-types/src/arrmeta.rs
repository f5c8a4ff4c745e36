//! Per-array metadata.
//!
//! [`ArrMeta`] mirrors the structure of a [`RuntimeType`] and carries what the
//! type alone cannot: dimension strides, the pool blocks that hold
//! variable-length payloads, and field offsets.

use crate::error::{NdError, NdResult};
use crate::memblock::{DataPtr, MemoryBlock, TypePool};
use crate::types::{field_layout, RuntimeType, TypeKind};

/// Metadata tree for one array.
#[derive(Debug, Clone)]
pub enum ArrMeta {
    /// Plain inline scalars
    Empty,
    /// Variable-length strings and bytes allocate from this block
    Blockref(MemoryBlock),
    /// Type-valued slots resolve ids through this pool
    Types(TypePool),
    Option(Box<ArrMeta>),
    FixedDim {
        stride: isize,
        element: Box<ArrMeta>,
    },
    /// Ragged dimension. Element storage lives in `block`, displaced by `offset`.
    VarDim {
        stride: isize,
        offset: isize,
        block: MemoryBlock,
        element: Box<ArrMeta>,
    },
    /// Tuple or struct fields
    Fields {
        offsets: Vec<usize>,
        fields: Vec<ArrMeta>,
    },
}

impl ArrMeta {
    /// Build fresh metadata for `tp`, allocating new pools where needed.
    pub fn for_type(tp: &RuntimeType) -> ArrMeta {
        match tp.kind() {
            TypeKind::Bytes { fixed: None } | TypeKind::String { fixed: None, .. } => {
                ArrMeta::Blockref(MemoryBlock::pool())
            }
            TypeKind::Type => ArrMeta::Types(TypePool::new()),
            TypeKind::Option(t) => ArrMeta::Option(Box::new(ArrMeta::for_type(t))),
            TypeKind::FixedDim { element, .. } => ArrMeta::FixedDim {
                stride: element.data_size() as isize,
                element: Box::new(ArrMeta::for_type(element)),
            },
            TypeKind::VarDim { element } => ArrMeta::VarDim {
                stride: element.data_size() as isize,
                offset: 0,
                block: MemoryBlock::pool(),
                element: Box::new(ArrMeta::for_type(element)),
            },
            TypeKind::Tuple(_) | TypeKind::Struct(_) => {
                let fields = tp.field_types();
                ArrMeta::Fields {
                    offsets: field_layout(&fields).offsets,
                    fields: fields.iter().map(ArrMeta::for_type).collect(),
                }
            }
            _ => ArrMeta::Empty,
        }
    }

    /// Metadata of the value behind an option, or self.
    pub fn value_meta(&self) -> &ArrMeta {
        match self {
            ArrMeta::Option(inner) => inner,
            other => other,
        }
    }

    pub fn blockref(&self) -> Option<&MemoryBlock> {
        match self.value_meta() {
            ArrMeta::Blockref(block) => Some(block),
            _ => None,
        }
    }

    pub fn type_pool(&self) -> Option<&TypePool> {
        match self.value_meta() {
            ArrMeta::Types(pool) => Some(pool),
            _ => None,
        }
    }

    /// Release every pool in the tree. Used for temporaries whose values
    /// have already been copied out.
    pub fn release_pools(&self) {
        match self {
            ArrMeta::Empty => {}
            ArrMeta::Blockref(block) => block.release(),
            ArrMeta::Types(pool) => pool.clear(),
            ArrMeta::Option(inner) => inner.release_pools(),
            ArrMeta::FixedDim { element, .. } => element.release_pools(),
            ArrMeta::VarDim { block, element, .. } => {
                block.release();
                element.release_pools();
            }
            ArrMeta::Fields { fields, .. } => fields.iter().for_each(ArrMeta::release_pools),
        }
    }

    /// Element stride of a dimension.
    pub fn stride(&self) -> Option<isize> {
        match self {
            ArrMeta::FixedDim { stride, .. } | ArrMeta::VarDim { stride, .. } => Some(*stride),
            _ => None,
        }
    }

    /// Element metadata of a dimension.
    pub fn element(&self) -> Option<&ArrMeta> {
        match self {
            ArrMeta::FixedDim { element, .. } | ArrMeta::VarDim { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Offset and metadata of field `index`.
    pub fn field(&self, index: usize) -> Option<(usize, &ArrMeta)> {
        match self {
            ArrMeta::Fields { offsets, fields } => Some((*offsets.get(index)?, fields.get(index)?)),
            _ => None,
        }
    }

    /// Field offsets of a tuple or struct.
    pub fn field_offsets(&self) -> &[usize] {
        match self {
            ArrMeta::Fields { offsets, .. } => offsets,
            _ => &[],
        }
    }
}

/// Inline slot of a ragged dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VarDimData {
    /// Offset of the first element in the dimension's block; zero if unallocated
    pub begin: u64,
    pub size: u64,
}

impl VarDimData {
    pub fn read(ptr: &DataPtr) -> Self {
        let bytes: [u8; 16] = ptr.read_array();
        let mut begin = [0u8; 8];
        let mut size = [0u8; 8];
        begin.copy_from_slice(&bytes[..8]);
        size.copy_from_slice(&bytes[8..]);
        Self {
            begin: u64::from_le_bytes(begin),
            size: u64::from_le_bytes(size),
        }
    }

    pub fn write(self, ptr: &DataPtr) {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.begin.to_le_bytes());
        bytes[8..].copy_from_slice(&self.size.to_le_bytes());
        ptr.write(&bytes);
    }

    pub fn is_allocated(&self) -> bool {
        self.begin != 0
    }
}

/// A resolved view of one dimension at a particular data location.
#[derive(Debug, Clone)]
pub struct DimView<'a> {
    pub extent: usize,
    pub stride: isize,
    pub element_type: &'a RuntimeType,
    pub element_meta: &'a ArrMeta,
    /// Location of element zero
    pub base: DataPtr,
}

impl DimView<'_> {
    pub fn at(&self, index: usize) -> DataPtr {
        self.base.element(self.stride, index)
    }
}

/// Resolve the outer dimension of `tp` at `ptr`, or `None` for non-dimensions.
pub fn dim_view<'a>(tp: &'a RuntimeType, meta: &'a ArrMeta, ptr: &DataPtr) -> NdResult<Option<DimView<'a>>> {
    match (tp.kind(), meta) {
        (TypeKind::FixedDim { size, element }, ArrMeta::FixedDim { stride, element: el_meta }) => {
            Ok(Some(DimView {
                extent: *size,
                stride: *stride,
                element_type: element,
                element_meta: el_meta,
                base: ptr.clone(),
            }))
        }
        (
            TypeKind::VarDim { element },
            ArrMeta::VarDim {
                stride,
                offset,
                block,
                element: el_meta,
            },
        ) => {
            let slot = VarDimData::read(ptr);
            let base = if slot.is_allocated() {
                DataPtr::new(block.clone(), slot.begin as usize).offset_by(*offset)
            } else {
                DataPtr::new(block.clone(), 0)
            };
            Ok(Some(DimView {
                extent: slot.size as usize,
                stride: *stride,
                element_type: element,
                element_meta: el_meta,
                base,
            }))
        }
        (TypeKind::FixedDim { .. } | TypeKind::VarDim { .. }, _) => Err(NdError::invariant(format!(
            "metadata does not match dimension type {tp}"
        ))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_for_type_structure() {
        let tp = RuntimeType::fixed_dim(3, RuntimeType::var_dim(RuntimeType::string()));
        let meta = ArrMeta::for_type(&tp);
        assert_eq!(meta.stride(), Some(16));
        let inner = meta.element().map(|m| matches!(m, ArrMeta::VarDim { .. }));
        assert_eq!(inner, Some(true));
        let leaf = meta.element().and_then(ArrMeta::element);
        assert!(leaf.and_then(ArrMeta::blockref).is_some());
    }

    #[test]
    fn test_struct_offsets() {
        let tp = RuntimeType::struct_type([("a", RuntimeType::int8()), ("b", RuntimeType::float64())]);
        let meta = ArrMeta::for_type(&tp);
        assert_eq!(meta.field_offsets(), &[0, 8]);
    }

    #[test]
    fn test_unallocated_var_dim_view() {
        let tp = RuntimeType::var_dim(RuntimeType::int32());
        let meta = ArrMeta::for_type(&tp);
        let ptr = DataPtr::new(MemoryBlock::zeroed(16), 0);
        let view = dim_view(&tp, &meta, &ptr).unwrap().unwrap();
        assert_eq!(view.extent, 0);
        assert_eq!(view.stride, 4);
    }
}
