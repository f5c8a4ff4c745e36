//! Foreign Buffer Arrays
//!
//! Third-party array objects (NumPy and friends) that expose a raw strided
//! buffer. Conversions recognise them and copy the buffer directly instead
//! of walking elements one host value at a time.
//!
//! ## Direct copies
//!
//! A direct byte copy needs:
//! - C-contiguous element order
//! - An element dtype whose encoding matches the runtime's
//!
//! A transposed (column-major) buffer is gathered element by element
//! through its strides first.

use std::fmt;
use std::sync::{Arc, RwLock};

use ndpy_types::{typed_data_assign, AssignErrorMode, FloatWidth, IntWidth, NdArray, RuntimeType, ShapeDescriptor, Typed};
use tracing::debug;

use crate::config::ConvertOptions;
use crate::error::{ConvertError, ConvertResult};

// ============================================================================
// Element types
// ============================================================================

/// Element type of a foreign buffer, named as the buffer protocol names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    /// Two float32 parts
    Complex64,
    /// Two float64 parts
    Complex128,
}

impl DType {
    /// Item size in bytes
    pub fn size(&self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 | DType::Float16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    /// Runtime element type with the same byte encoding.
    pub fn runtime_type(&self) -> RuntimeType {
        match self {
            DType::Bool => RuntimeType::bool(),
            DType::Int8 => RuntimeType::int(IntWidth::W8, true),
            DType::Int16 => RuntimeType::int(IntWidth::W16, true),
            DType::Int32 => RuntimeType::int(IntWidth::W32, true),
            DType::Int64 => RuntimeType::int(IntWidth::W64, true),
            DType::UInt8 => RuntimeType::int(IntWidth::W8, false),
            DType::UInt16 => RuntimeType::int(IntWidth::W16, false),
            DType::UInt32 => RuntimeType::int(IntWidth::W32, false),
            DType::UInt64 => RuntimeType::int(IntWidth::W64, false),
            DType::Float16 => RuntimeType::float(FloatWidth::F16),
            DType::Float32 => RuntimeType::float(FloatWidth::F32),
            DType::Float64 => RuntimeType::float(FloatWidth::F64),
            DType::Complex64 => RuntimeType::complex64(),
            DType::Complex128 => RuntimeType::complex128(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.runtime_type())
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Element order of a foreign buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOrder {
    /// Row-major
    C,
    /// Column-major
    Fortran,
}

/// Shape, byte strides and dtype of a foreign buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLayout {
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub dtype: DType,
    pub order: ArrayOrder,
}

impl ArrayLayout {
    /// Row-major layout over a dense buffer.
    pub fn c_contiguous(shape: Vec<usize>, dtype: DType) -> Self {
        let mut strides = vec![0isize; shape.len()];
        let mut stride = dtype.size() as isize;
        for (axis, &dim) in shape.iter().enumerate().rev() {
            strides[axis] = stride;
            stride *= dim as isize;
        }
        Self {
            shape,
            strides,
            dtype,
            order: ArrayOrder::C,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element count
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn nbytes(&self) -> usize {
        self.size() * self.dtype.size()
    }

    /// Whether the buffer already holds its elements in runtime order.
    pub fn supports_direct_copy(&self) -> bool {
        self.order == ArrayOrder::C
    }

    /// Byte offset of the element at `indices`, `None` when out of range.
    pub fn byte_offset(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() || indices.iter().zip(&self.shape).any(|(i, dim)| i >= dim) {
            return None;
        }
        let offset: isize = indices.iter().zip(&self.strides).map(|(&i, &stride)| i as isize * stride).sum();
        usize::try_from(offset).ok()
    }

    /// Reverse the axes.
    pub fn transpose(&self) -> Self {
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.reverse();
        strides.reverse();
        let order = match (self.order, self.ndim()) {
            (order, 0 | 1) => order,
            (ArrayOrder::C, _) => ArrayOrder::Fortran,
            (ArrayOrder::Fortran, _) => ArrayOrder::C,
        };
        Self {
            shape,
            strides,
            dtype: self.dtype,
            order,
        }
    }
}

// ============================================================================
// ForeignArray
// ============================================================================

/// A third-party array: a layout over a buffer it shares with its views.
#[derive(Debug, Clone)]
pub struct ForeignArray {
    layout: ArrayLayout,
    data: Arc<RwLock<Vec<u8>>>,
}

impl ForeignArray {
    /// Wrap a dense row-major buffer.
    pub fn from_data(data: Vec<u8>, shape: Vec<usize>, dtype: DType) -> ConvertResult<Self> {
        let layout = ArrayLayout::c_contiguous(shape, dtype);
        if data.len() != layout.nbytes() {
            return Err(ConvertError::invalid_value(format!(
                "buffer of {} bytes does not hold {} elements of {dtype}",
                data.len(),
                layout.size()
            )));
        }
        Ok(Self {
            layout,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Build from typed elements in row-major order.
    pub fn from_elements<T: ArrayElement>(shape: Vec<usize>, values: &[T]) -> ConvertResult<Self> {
        let data: Vec<u8> = values.iter().flat_map(ArrayElement::to_bytes).collect();
        Self::from_data(data, shape, T::dtype())
    }

    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    pub fn dtype(&self) -> DType {
        self.layout.dtype
    }

    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Whether two arrays view the same buffer
    pub fn shares_buffer(&self, other: &ForeignArray) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// A transposed view of the same buffer.
    pub fn transpose(&self) -> Self {
        Self {
            layout: self.layout.transpose(),
            data: Arc::clone(&self.data),
        }
    }

    /// The runtime type this array converts to
    pub fn runtime_type(&self) -> RuntimeType {
        RuntimeType::from_shape(&ShapeDescriptor::fixed(self.shape()), self.dtype().runtime_type())
    }

    /// Element bytes gathered in row-major order
    pub fn to_c_order_bytes(&self) -> ConvertResult<Vec<u8>> {
        let layout = &self.layout;
        let data = self
            .data
            .read()
            .map_err(|_| ConvertError::invariant("foreign buffer lock is poisoned"))?;
        if layout.supports_direct_copy() {
            return Ok(data[..layout.nbytes()].to_vec());
        }

        let item = layout.dtype.size();
        let mut out = Vec::with_capacity(layout.nbytes());
        let mut index = vec![0usize; layout.ndim()];
        for _ in 0..layout.size() {
            let at = layout
                .byte_offset(&index)
                .ok_or_else(|| ConvertError::invariant("foreign layout index out of range"))?;
            out.extend_from_slice(&data[at..at + item]);
            // odometer increment, last axis fastest
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < layout.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(out)
    }
}

/// Copy a foreign array into a fresh native array.
pub fn array_from_foreign(foreign: &ForeignArray, opts: &ConvertOptions) -> ConvertResult<NdArray> {
    let tp = foreign.runtime_type();
    debug!(tp = %tp, direct = foreign.layout().supports_direct_copy(), "copy foreign buffer");
    let arr = NdArray::empty(tp)?;
    arr.data().write(&foreign.to_c_order_bytes()?);
    Ok(match opts.access {
        Some(access) => arr.with_access(access),
        None => arr,
    })
}

/// Assign a foreign array into a typed destination.
///
/// A destination of exactly the foreign array's type receives the buffer
/// bytes directly; anything else goes through typed assignment.
pub fn copy_from_foreign(dst: Typed<'_>, foreign: &ForeignArray, mode: AssignErrorMode) -> ConvertResult<()> {
    if *dst.tp == foreign.runtime_type() {
        dst.ptr.write(&foreign.to_c_order_bytes()?);
        return Ok(());
    }
    let src = array_from_foreign(foreign, &ConvertOptions::default())?;
    typed_data_assign(dst, src.typed(), mode)?;
    Ok(())
}

// ============================================================================
// Typed elements
// ============================================================================

/// Rust primitives that can seed a foreign buffer.
pub trait ArrayElement: Sized + Copy {
    /// Get the dtype for this type
    fn dtype() -> DType;

    /// Convert to little-endian bytes
    fn to_bytes(&self) -> Vec<u8>;
}

macro_rules! impl_array_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                fn dtype() -> DType {
                    DType::$dtype
                }

                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_array_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

#[cfg(test)]
mod tests {
    use super::*;
    use ndpy_types::Scalar;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dtype_properties() {
        assert_eq!(DType::Float64.size(), 8);
        assert_eq!(DType::Complex64.size(), 8);
        assert_eq!(DType::UInt16.runtime_type(), RuntimeType::int(IntWidth::W16, false));
        assert_eq!(DType::Complex128.to_string(), "complex128");
    }

    #[test]
    fn test_array_layout_strides() {
        let c = ArrayLayout::c_contiguous(vec![3, 4, 5], DType::Float64);
        assert_eq!(c.strides, vec![160, 40, 8]);
        assert_eq!(c.byte_offset(&[2, 3, 4]), Some(472));
        assert_eq!(c.byte_offset(&[3, 0, 0]), None);

        let t = c.transpose();
        assert_eq!(t.shape, vec![5, 4, 3]);
        assert_eq!(t.strides, vec![8, 40, 160]);
        assert!(!t.supports_direct_copy());
    }

    #[test]
    fn test_direct_copy() {
        let foreign = ForeignArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4]).unwrap();
        let arr = array_from_foreign(&foreign, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "2 * 2 * int32");
        assert_eq!(
            arr.to_scalars().unwrap(),
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3), Scalar::Int(4)]
        );
    }

    #[test]
    fn test_strided_copy_of_transpose() {
        let foreign = ForeignArray::from_elements(vec![2, 3], &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = foreign.transpose();
        let arr = array_from_foreign(&t, &ConvertOptions::default()).unwrap();
        assert_eq!(arr.tp().to_string(), "3 * 2 * float64");
        assert_eq!(
            arr.to_scalars().unwrap(),
            [1.0, 4.0, 2.0, 5.0, 3.0, 6.0].map(Scalar::Float).to_vec()
        );
    }

    #[test]
    fn test_copy_from_foreign_converts_dtype() {
        let foreign = ForeignArray::from_elements(vec![3], &[1i32, 2, 3]).unwrap();
        let dst = NdArray::empty(RuntimeType::fixed_dim(3, RuntimeType::float64())).unwrap();
        copy_from_foreign(dst.typed(), &foreign, AssignErrorMode::default()).unwrap();
        assert_eq!(dst.to_scalars().unwrap(), [1.0, 2.0, 3.0].map(Scalar::Float).to_vec());
    }

    #[test]
    fn test_size_mismatch() {
        let err = ForeignArray::from_data(vec![0; 6], vec![2], DType::Int32).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { .. }));
    }

    #[test]
    fn test_transpose_shares_buffer() {
        let foreign = ForeignArray::from_elements(vec![2, 2], &[1u8, 2, 3, 4]).unwrap();
        let t = foreign.transpose();
        assert!(t.shares_buffer(&foreign));
        assert_eq!(t.to_c_order_bytes().unwrap(), vec![1, 3, 2, 4]);
    }
}
