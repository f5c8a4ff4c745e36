//! ndpy runtime types
//!
//! The array runtime that host conversions target: runtime type descriptors,
//! per-array metadata, reference-counted memory blocks, scalar encodings and
//! generic typed assignment.
//!
//! ## Example
//!
//! ```
//! use ndpy_types::{parse_type, NdArray, Scalar};
//!
//! let arr = NdArray::empty(parse_type("2 * int32").unwrap()).unwrap();
//! arr.index(1).unwrap().assign(
//!     &NdArray::from_scalar(parse_type("int32").unwrap(), &Scalar::Int(5)).unwrap(),
//!     Default::default(),
//! ).unwrap();
//! assert_eq!(arr.to_scalars().unwrap(), vec![Scalar::Int(0), Scalar::Int(5)]);
//! ```

pub mod array;
pub mod arrmeta;
pub mod assign;
pub mod categorical;
pub mod error;
pub mod memblock;
pub mod missing;
pub mod parse;
pub mod scalar;
pub mod shape;
pub mod types;

pub use array::{Access, NdArray};
pub use arrmeta::{dim_view, ArrMeta, DimView, VarDimData};
pub use assign::{prepare_var_dim, typed_data_assign, Typed};
pub use categorical::Categories;
pub use error::{NdError, NdResult};
pub use memblock::{DataPtr, MemoryBlock, Span, TypePool};
pub use parse::{parse_signature, parse_type};
pub use scalar::{read_scalar, write_scalar, AssignErrorMode, Scalar};
pub use shape::{Axis, ShapeDescriptor};
pub use types::{FloatWidth, IntWidth, RuntimeType, StringEncoding, TypeKind};
