//! Generic typed assignment between two array locations.
//!
//! [`typed_data_assign`] copies one value of any supported type into another,
//! converting element types, broadcasting size-1 and scalar sources across
//! dimensions, and allocating unallocated ragged destinations on demand.

use tracing::trace;

use crate::arrmeta::{dim_view, ArrMeta, DimView, VarDimData};
use crate::error::{NdError, NdResult};
use crate::memblock::DataPtr;
use crate::missing;
use crate::scalar::{read_scalar, write_scalar, AssignErrorMode};
use crate::types::{RuntimeType, TypeKind};

/// One side of an assignment: a typed location.
#[derive(Debug, Clone, Copy)]
pub struct Typed<'a> {
    pub tp: &'a RuntimeType,
    pub meta: &'a ArrMeta,
    pub ptr: &'a DataPtr,
}

impl<'a> Typed<'a> {
    pub fn new(tp: &'a RuntimeType, meta: &'a ArrMeta, ptr: &'a DataPtr) -> Self {
        Self { tp, meta, ptr }
    }
}

/// Assign the value at `src` into `dst`.
pub fn typed_data_assign(dst: Typed<'_>, src: Typed<'_>, mode: AssignErrorMode) -> NdResult<()> {
    trace!(dst = %dst.tp, src = %src.tp, "typed assign");
    match dst.tp.kind() {
        TypeKind::FixedDim { .. } | TypeKind::VarDim { .. } => assign_dim(dst, src, mode),
        TypeKind::Tuple(_) | TypeKind::Struct(_) => assign_fields(dst, src, mode),
        TypeKind::Option(value_tp) => match src.tp.kind() {
            TypeKind::Option(src_value) => {
                if missing::is_na(src_value, src.ptr)? {
                    missing::assign_na(value_tp, dst.ptr)
                } else {
                    let src = Typed::new(src_value, src.meta.value_meta(), src.ptr);
                    typed_data_assign(Typed::new(value_tp, dst.meta.value_meta(), dst.ptr), src, mode)
                }
            }
            _ => typed_data_assign(Typed::new(value_tp, dst.meta.value_meta(), dst.ptr), src, mode),
        },
        _ => {
            if src.tp.is_dim() {
                return assign_dim_to_scalar(dst, src, mode);
            }
            if src.tp.is_tuple_or_struct() {
                return Err(NdError::not_assignable(src.tp, dst.tp));
            }
            if dst.tp == src.tp && is_inline_pod(dst.tp) {
                dst.ptr.copy_from(src.ptr, dst.tp.data_size());
                return Ok(());
            }
            let value = read_scalar(src.tp, src.meta, src.ptr)?;
            write_scalar(dst.tp, dst.meta, dst.ptr, &value, mode)
        }
    }
}

// Kinds whose whole value lives inline with no pool references.
fn is_inline_pod(tp: &RuntimeType) -> bool {
    matches!(
        tp.kind(),
        TypeKind::Bool
            | TypeKind::Int { .. }
            | TypeKind::Float(_)
            | TypeKind::Complex(_)
            | TypeKind::Bytes { fixed: Some(_) }
            | TypeKind::String { fixed: Some(_), .. }
            | TypeKind::Date
            | TypeKind::Time
            | TypeKind::DateTime
    )
}

// A one-element dimension may be assigned to a scalar.
fn assign_dim_to_scalar(dst: Typed<'_>, src: Typed<'_>, mode: AssignErrorMode) -> NdResult<()> {
    let view = dim_view(src.tp, src.meta, src.ptr)?
        .ok_or_else(|| NdError::invariant("expected a dimension"))?;
    if view.extent != 1 {
        return Err(NdError::broadcast(src.tp, dst.tp));
    }
    let el = view.at(0);
    typed_data_assign(dst, Typed::new(view.element_type, view.element_meta, &el), mode)
}

/// Prepare a ragged destination to receive `extent` elements.
///
/// Unallocated slots are allocated from the dimension's block. An allocated
/// slot must already have the right size.
pub fn prepare_var_dim<'a>(dst: Typed<'a>, extent: usize, src_desc: &dyn std::fmt::Display) -> NdResult<DimView<'a>> {
    let (stride, offset, block) = match dst.meta {
        ArrMeta::VarDim { stride, offset, block, .. } => (*stride, *offset, block),
        _ => return Err(NdError::invariant(format!("metadata does not match {}", dst.tp))),
    };
    let slot = VarDimData::read(dst.ptr);
    if !slot.is_allocated() {
        if offset != 0 {
            return Err(NdError::invariant(
                "cannot assign to an uninitialized var dim which has a non-zero offset",
            ));
        }
        let element = dst.tp.element_type().ok_or_else(|| NdError::invariant("expected a dimension"))?;
        let span = block.allocate(extent * stride.unsigned_abs(), element.data_alignment());
        VarDimData {
            begin: span.begin,
            size: extent as u64,
        }
        .write(dst.ptr);
    } else if slot.size as usize != extent {
        return Err(NdError::broadcast(src_desc, dst.tp));
    }
    dim_view(dst.tp, dst.meta, dst.ptr)?.ok_or_else(|| NdError::invariant("expected a dimension"))
}

fn assign_dim(dst: Typed<'_>, src: Typed<'_>, mode: AssignErrorMode) -> NdResult<()> {
    // A source with fewer dimensions broadcasts across this one.
    let src_view = if src.tp.ndim() >= dst.tp.ndim() {
        dim_view(src.tp, src.meta, src.ptr)?
    } else {
        None
    };

    let dst_view = match (dst.tp.kind(), &src_view) {
        (TypeKind::VarDim { .. }, Some(view)) => {
            let existing = VarDimData::read(dst.ptr);
            let extent = if existing.is_allocated() && view.extent == 1 {
                existing.size as usize
            } else {
                view.extent
            };
            prepare_var_dim(dst, extent, src.tp)?
        }
        (TypeKind::VarDim { .. }, None) => {
            let existing = VarDimData::read(dst.ptr);
            let extent = if existing.is_allocated() { existing.size as usize } else { 1 };
            prepare_var_dim(dst, extent, src.tp)?
        }
        _ => dim_view(dst.tp, dst.meta, dst.ptr)?.ok_or_else(|| NdError::invariant("expected a dimension"))?,
    };

    match src_view {
        Some(view) if view.extent == dst_view.extent => {
            for i in 0..dst_view.extent {
                let d = dst_view.at(i);
                let s = view.at(i);
                typed_data_assign(
                    Typed::new(dst_view.element_type, dst_view.element_meta, &d),
                    Typed::new(view.element_type, view.element_meta, &s),
                    mode,
                )?;
            }
            Ok(())
        }
        Some(view) if view.extent == 1 => {
            let s = view.at(0);
            broadcast_into(&dst_view, Typed::new(view.element_type, view.element_meta, &s), mode)
        }
        Some(_) => Err(NdError::broadcast(src.tp, dst.tp)),
        None => broadcast_into(&dst_view, src, mode),
    }
}

fn broadcast_into(dst_view: &DimView<'_>, src: Typed<'_>, mode: AssignErrorMode) -> NdResult<()> {
    for i in 0..dst_view.extent {
        let d = dst_view.at(i);
        typed_data_assign(Typed::new(dst_view.element_type, dst_view.element_meta, &d), src, mode)?;
    }
    Ok(())
}

fn assign_fields(dst: Typed<'_>, src: Typed<'_>, mode: AssignErrorMode) -> NdResult<()> {
    let dst_fields = dst.tp.field_types();
    let src_fields = src.tp.field_types();
    if !src.tp.is_tuple_or_struct() || dst_fields.len() != src_fields.len() {
        return Err(NdError::not_assignable(src.tp, dst.tp));
    }

    // Struct to struct matches by name; anything else is positional.
    let order: Vec<usize> = match (dst.tp.kind(), src.tp.kind()) {
        (TypeKind::Struct(dst_names), TypeKind::Struct(_)) => dst_names
            .iter()
            .map(|(name, _)| {
                src.tp
                    .field_index(name)
                    .ok_or_else(|| NdError::not_assignable(src.tp, dst.tp))
            })
            .collect::<NdResult<_>>()?,
        _ => (0..dst_fields.len()).collect(),
    };

    for (i, &j) in order.iter().enumerate() {
        let (dst_off, dst_meta) = dst.meta.field(i).ok_or_else(|| NdError::invariant("missing field metadata"))?;
        let (src_off, src_meta) = src.meta.field(j).ok_or_else(|| NdError::invariant("missing field metadata"))?;
        let d = dst.ptr.offset_by(dst_off as isize);
        let s = src.ptr.offset_by(src_off as isize);
        typed_data_assign(
            Typed::new(&dst_fields[i], dst_meta, &d),
            Typed::new(&src_fields[j], src_meta, &s),
            mode,
        )?;
    }
    Ok(())
}
