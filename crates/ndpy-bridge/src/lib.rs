//! # ndpy Bridge
//!
//! Conversion engine between host (Python-style) values and ndpy arrays.
//!
//! ## Overview
//!
//! Converting a host value runs in three stages:
//! - Deduction: the smallest runtime type and shape holding the value
//! - Kernel building: a tree of conversion kernels mirroring that type
//! - Execution: the tree applied to the value, broadcasting as needed
//!
//! A value with a known destination type skips deduction.
//!
//! ## Example
//!
//! ```
//! use ndpy_bridge::{array_from_py, as_py, ConvertOptions, PyValue};
//!
//! let row = |a: i64, b: i64| PyValue::list([PyValue::from(a), PyValue::from(b)]);
//! let value = PyValue::list([row(1, 2), row(3, 4)]);
//! let arr = array_from_py(&value, &ConvertOptions::default()).unwrap();
//! assert_eq!(arr.tp().to_string(), "2 * 2 * int32");
//! assert_eq!(as_py(&arr).unwrap(), value);
//! ```
//!
//! ## Module Structure
//!
//! - [`py_types`]: host value representations
//! - [`numeric`]: overflow-checked integer narrowing
//! - [`scalar`]: one converter per primitive runtime type
//! - [`deduce`]: type and shape deduction
//! - [`kernel`]: the kernel arena and runtime-data kernels
//! - [`from_py`]: the kernel tree builder
//! - [`exec`]: running kernel trees against host values
//! - [`array_from_py`]: top-level entry points
//! - [`to_py`]: arrays back to host values
//! - [`binding`]: wrapping native arrays in host values
//! - [`foreign`]: third-party array buffers
//! - [`native_fn`]: compiled host functions as kernels
//! - [`config`]: conversion options
//! - [`error`]: error types

pub mod array_from_py;
pub mod binding;
pub mod config;
pub mod deduce;
pub mod error;
pub mod exec;
pub mod foreign;
pub mod from_py;
pub mod kernel;
pub mod native_fn;
pub mod numeric;
pub mod py_types;
pub mod scalar;
pub mod to_py;

// Re-export main types for convenience
pub use array_from_py::{array_from_py, array_from_py_typed, asarray, getitem, setitem, view, Subscript};
pub use binding::{is_native_array, unwrap, view_with_access, wrap};
pub use config::ConvertOptions;
pub use deduce::{deduce, deduce_shape, deduce_shape_using_dtype, DeducedType, Deduction};
pub use error::{ConvertError, ConvertResult, Severity};
pub use exec::{assign_from_py, broadcast_as_scalar, CompiledConversion};
pub use foreign::{array_from_foreign, ArrayLayout, ArrayOrder, DType, ForeignArray};
pub use from_py::instantiate;
pub use kernel::{Kernel, KernelBuilder, KernelOffset};
pub use native_fn::NativeArrFunc;
pub use py_types::{PyDict, PyList, PyObject, PyValue};
pub use to_py::{as_py, ToPython};
