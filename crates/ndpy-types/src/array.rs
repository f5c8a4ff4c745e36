//! Arrays: a type, its metadata and a data location.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::arrmeta::{dim_view, ArrMeta};
use crate::assign::{typed_data_assign, Typed};
use crate::error::{NdError, NdResult};
use crate::memblock::{DataPtr, MemoryBlock};
use crate::scalar::{read_scalar, write_scalar, AssignErrorMode, Scalar};
use crate::shape::{Axis, ShapeDescriptor};
use crate::types::{RuntimeType, TypeKind};

/// Access permissions of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    ReadWrite,
    ReadOnly,
    /// Read-only, and no other view may write either
    Immutable,
}

impl Access {
    pub fn is_writable(self) -> bool {
        self == Access::ReadWrite
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Access::ReadWrite => "readwrite",
            Access::ReadOnly => "readonly",
            Access::Immutable => "immutable",
        }
    }
}

impl FromStr for Access {
    type Err = NdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readwrite" | "rw" => Ok(Access::ReadWrite),
            "readonly" | "r" => Ok(Access::ReadOnly),
            "immutable" => Ok(Access::Immutable),
            other => Err(NdError::access(format!(
                "invalid access string {other:?}, expected 'readwrite', 'readonly' or 'immutable'"
            ))),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, possibly multi-dimensional array value.
#[derive(Debug, Clone)]
pub struct NdArray {
    tp: RuntimeType,
    meta: ArrMeta,
    data: DataPtr,
    access: Access,
}

impl NdArray {
    /// Allocate a zero-initialised, writable array of type `tp`.
    ///
    /// Ragged dimensions start unallocated.
    pub fn empty(tp: RuntimeType) -> NdResult<Self> {
        if tp.is_symbolic() {
            return Err(NdError::unsupported(format!("cannot allocate an array of symbolic type {tp}")));
        }
        trace!(tp = %tp, size = tp.data_size(), "allocate array");
        let meta = ArrMeta::for_type(&tp);
        let data = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
        Ok(Self {
            tp,
            meta,
            data,
            access: Access::ReadWrite,
        })
    }

    /// A zero-dimensional array holding `value`.
    pub fn from_scalar(tp: RuntimeType, value: &Scalar) -> NdResult<Self> {
        let arr = Self::empty(tp)?;
        write_scalar(&arr.tp, &arr.meta, &arr.data, value, AssignErrorMode::default())?;
        Ok(arr)
    }

    /// Assemble an array from parts. The caller vouches that they agree.
    pub fn from_parts(tp: RuntimeType, meta: ArrMeta, data: DataPtr, access: Access) -> Self {
        Self { tp, meta, data, access }
    }

    pub fn tp(&self) -> &RuntimeType {
        &self.tp
    }

    pub fn meta(&self) -> &ArrMeta {
        &self.meta
    }

    pub fn data(&self) -> &DataPtr {
        &self.data
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn typed(&self) -> Typed<'_> {
        Typed::new(&self.tp, &self.meta, &self.data)
    }

    pub fn ndim(&self) -> usize {
        self.tp.ndim()
    }

    pub fn is_scalar(&self) -> bool {
        self.ndim() == 0
    }

    /// Data location for writing, checking permissions.
    pub fn writable_data(&self) -> NdResult<&DataPtr> {
        if !self.access.is_writable() {
            return Err(NdError::access(format!("array is {}", self.access)));
        }
        Ok(&self.data)
    }

    /// The same data viewed with different permissions.
    pub fn with_access(&self, access: Access) -> Self {
        Self {
            access,
            ..self.clone()
        }
    }

    /// Mark this array immutable.
    pub fn flag_as_immutable(&mut self) {
        self.access = Access::Immutable;
    }

    /// Extents of every dimension. Ragged axes are reported as such.
    pub fn shape(&self) -> NdResult<ShapeDescriptor> {
        let mut axes: Vec<Option<Axis>> = vec![None; self.ndim()];
        collect_shape(&self.tp, &self.meta, &self.data, 0, &mut axes)?;
        Ok(ShapeDescriptor::new(
            axes.into_iter().map(|a| a.unwrap_or(Axis::Ragged)).collect(),
        ))
    }

    /// Element strides of every dimension, in bytes.
    pub fn strides(&self) -> Vec<isize> {
        let mut strides = Vec::with_capacity(self.ndim());
        let mut meta = &self.meta;
        while let Some(stride) = meta.stride() {
            strides.push(stride);
            match meta.element() {
                Some(element) => meta = element,
                None => break,
            }
        }
        strides
    }

    /// Extent of the outermost dimension.
    pub fn dim_size(&self) -> NdResult<usize> {
        dim_view(&self.tp, &self.meta, &self.data)?
            .map(|view| view.extent)
            .ok_or_else(|| NdError::invalid_value(&self.tp, "a zero-dimensional array has no length"))
    }

    /// View of element `index` along the outer dimension. Negative indices count from the end.
    pub fn index(&self, index: isize) -> NdResult<NdArray> {
        let view = dim_view(&self.tp, &self.meta, &self.data)?
            .ok_or_else(|| NdError::invalid_value(&self.tp, "too many indices for array"))?;
        let resolved = if index < 0 { index + view.extent as isize } else { index };
        if resolved < 0 || resolved as usize >= view.extent {
            return Err(NdError::IndexOutOfBounds {
                index,
                size: view.extent,
            });
        }
        Ok(NdArray {
            tp: view.element_type.clone(),
            meta: view.element_meta.clone(),
            data: view.at(resolved as usize),
            access: self.access,
        })
    }

    /// View at a multi-dimensional index.
    pub fn at(&self, indices: &[isize]) -> NdResult<NdArray> {
        indices
            .iter()
            .try_fold(self.clone(), |arr, &i| arr.index(i))
    }

    /// Read a zero-dimensional array's value.
    pub fn read_scalar(&self) -> NdResult<Scalar> {
        read_scalar(&self.tp, &self.meta, &self.data)
    }

    /// Overwrite from another array with broadcasting.
    pub fn assign(&self, src: &NdArray, mode: AssignErrorMode) -> NdResult<()> {
        self.writable_data()?;
        typed_data_assign(self.typed(), src.typed(), mode)
    }

    /// Deep copy into freshly allocated storage with the given access.
    pub fn eval_copy(&self, access: Access) -> NdResult<NdArray> {
        let mut out = NdArray::empty(self.tp.clone())?;
        typed_data_assign(out.typed(), self.typed(), AssignErrorMode::Nocheck)?;
        out.access = access;
        Ok(out)
    }

    /// Flatten the leaves into a vector, outermost dimension first.
    pub fn to_scalars(&self) -> NdResult<Vec<Scalar>> {
        let mut out = Vec::new();
        self.visit_leaves(&mut |leaf| {
            out.push(leaf.read_scalar()?);
            Ok(())
        })?;
        Ok(out)
    }

    fn visit_leaves(&self, f: &mut dyn FnMut(&NdArray) -> NdResult<()>) -> NdResult<()> {
        if self.is_scalar() {
            return f(self);
        }
        for i in 0..self.dim_size()? {
            self.index(i as isize)?.visit_leaves(f)?;
        }
        Ok(())
    }
}

fn collect_shape(
    tp: &RuntimeType,
    meta: &ArrMeta,
    ptr: &DataPtr,
    axis: usize,
    axes: &mut [Option<Axis>],
) -> NdResult<()> {
    let Some(view) = dim_view(tp, meta, ptr)? else {
        return Ok(());
    };
    let observed = match tp.kind() {
        TypeKind::VarDim { .. } if !crate::arrmeta::VarDimData::read(ptr).is_allocated() => None,
        _ => Some(Axis::Fixed(view.extent)),
    };
    if let Some(observed) = observed {
        axes[axis] = Some(match axes[axis] {
            Some(seen) => seen.merge(observed),
            None => observed,
        });
    }
    for i in 0..view.extent {
        collect_shape(view.element_type, view.element_meta, &view.at(i), axis + 1, axes)?;
    }
    Ok(())
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(arr: &NdArray, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if arr.is_scalar() {
                return match arr.read_scalar() {
                    Ok(value) => write!(f, "{value}"),
                    Err(_) => write!(f, "<{}>", arr.tp),
                };
            }
            let n = arr.dim_size().map_err(|_| fmt::Error)?;
            write!(f, "[")?;
            for i in 0..n {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let el = arr.index(i as isize).map_err(|_| fmt::Error)?;
                render(&el, f)?;
            }
            write!(f, "]")
        }
        render(self, f)?;
        write!(f, " : {}", self.tp)
    }
}
