//! Host Value Representations
//!
//! The host side of every conversion: a dynamically typed value as the host
//! interpreter sees it.
//!
//! Lists, dicts and objects share their storage between clones, as host
//! references do. Dict keys are strings in insertion order. Times and
//! datetimes may carry a fixed timezone offset, which conversions reject.
//!
//! Native arrays (`PyValue::Native`) and foreign buffer-protocol arrays
//! (`PyValue::Foreign`) are host values too; conversions recognise both and
//! skip per-element work.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use ndpy_types::{NdArray, RuntimeType};
use num_bigint::BigInt;
use num_complex::Complex64;
use smol_str::SmolStr;

use crate::error::{ConvertError, ConvertResult};
use crate::foreign::ForeignArray;

/// Native signature of a compiled binary integer function:
/// `(ret, excinfo, env, a, b) -> status`.
pub type NativeBinaryIntFn = extern "C" fn(*mut i32, *mut c_void, *mut c_void, i32, i32) -> i32;

// ============================================================================
// PyValue
// ============================================================================

/// A host value.
#[derive(Debug, Clone, Default)]
pub enum PyValue {
    #[default]
    None,
    Bool(bool),
    /// Arbitrary precision
    Int(BigInt),
    Float(f64),
    Complex(Complex64),
    String(SmolStr),
    Bytes(Vec<u8>),
    List(PyList),
    Tuple(Vec<PyValue>),
    Dict(PyDict),
    /// An iterable without indexed access
    Set(Vec<PyValue>),
    Date(NaiveDate),
    Time(PyTime),
    DateTime(PyDateTime),
    /// A host object naming a runtime type
    Type(RuntimeType),
    /// `...`, the whole-array subscript
    Ellipsis,
    /// Any other host object
    Object(PyObject),
    /// A native array wrapped by the binding layer
    Native(NdArray),
    /// A third-party array exposing a raw buffer
    Foreign(ForeignArray),
}

impl PyValue {
    pub fn int(value: impl Into<BigInt>) -> Self {
        PyValue::Int(value.into())
    }

    pub fn str(value: &str) -> Self {
        PyValue::String(SmolStr::new(value))
    }

    pub fn list(items: impl IntoIterator<Item = PyValue>) -> Self {
        PyValue::List(items.into_iter().collect())
    }

    /// Name of the host type, as used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Complex(_) => "complex",
            PyValue::String(_) => "str",
            PyValue::Bytes(_) => "bytes",
            PyValue::List(_) => "list",
            PyValue::Tuple(_) => "tuple",
            PyValue::Dict(_) => "dict",
            PyValue::Set(_) => "set",
            PyValue::Date(_) => "datetime.date",
            PyValue::Time(_) => "datetime.time",
            PyValue::DateTime(_) => "datetime.datetime",
            PyValue::Type(_) => "ndpy.type",
            PyValue::Ellipsis => "ellipsis",
            PyValue::Object(obj) => obj.type_name(),
            PyValue::Native(_) => "ndpy.array",
            PyValue::Foreign(_) => "numpy.ndarray",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PyValue::None)
    }

    /// Lists and tuples; sets iterate but cannot be indexed.
    pub fn is_sequence(&self) -> bool {
        matches!(self, PyValue::List(_) | PyValue::Tuple(_))
    }

    /// The value as an `i64`, when it is an int (or bool) in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PyValue::Int(n) => i64::try_from(n).ok(),
            PyValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&PyDict> {
        match self {
            PyValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NdArray> {
        match self {
            PyValue::Native(arr) => Some(arr),
            _ => None,
        }
    }

    /// Items of a list, tuple or set.
    ///
    /// Lists are borrowed in place; sets are materialised.
    pub fn fast_sequence(&self) -> ConvertResult<FastSequence<'_>> {
        match self {
            PyValue::List(list) => Ok(FastSequence::Borrowed(list.items.borrow())),
            PyValue::Tuple(items) => Ok(FastSequence::Slice(items)),
            PyValue::Set(items) => Ok(FastSequence::Slice(items)),
            other => Err(ConvertError::type_mismatch(format!(
                "expected a sequence, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Borrowed items of a host sequence.
pub enum FastSequence<'a> {
    Borrowed(Ref<'a, Vec<PyValue>>),
    Slice(&'a [PyValue]),
}

impl Deref for FastSequence<'_> {
    type Target = [PyValue];

    fn deref(&self) -> &[PyValue] {
        match self {
            FastSequence::Borrowed(items) => items,
            FastSequence::Slice(items) => items,
        }
    }
}

impl PartialEq for PyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PyValue::None, PyValue::None) | (PyValue::Ellipsis, PyValue::Ellipsis) => true,
            (PyValue::Bool(a), PyValue::Bool(b)) => a == b,
            (PyValue::Int(a), PyValue::Int(b)) => a == b,
            (PyValue::Float(a), PyValue::Float(b)) => a == b,
            (PyValue::Complex(a), PyValue::Complex(b)) => a == b,
            (PyValue::String(a), PyValue::String(b)) => a == b,
            (PyValue::Bytes(a), PyValue::Bytes(b)) => a == b,
            (PyValue::List(a), PyValue::List(b)) => a == b,
            (PyValue::Tuple(a), PyValue::Tuple(b)) | (PyValue::Set(a), PyValue::Set(b)) => a == b,
            (PyValue::Dict(a), PyValue::Dict(b)) => a == b,
            (PyValue::Date(a), PyValue::Date(b)) => a == b,
            (PyValue::Time(a), PyValue::Time(b)) => a == b,
            (PyValue::DateTime(a), PyValue::DateTime(b)) => a == b,
            (PyValue::Type(a), PyValue::Type(b)) => a == b,
            (PyValue::Object(a), PyValue::Object(b)) => a == b,
            (PyValue::Native(a), PyValue::Native(b)) => a.tp() == b.tp() && a.data().same_location(b.data()),
            (PyValue::Foreign(a), PyValue::Foreign(b)) => a.shares_buffer(b),
            _ => false,
        }
    }
}

impl From<bool> for PyValue {
    fn from(b: bool) -> Self {
        PyValue::Bool(b)
    }
}

impl From<i64> for PyValue {
    fn from(n: i64) -> Self {
        PyValue::Int(BigInt::from(n))
    }
}

impl From<f64> for PyValue {
    fn from(x: f64) -> Self {
        PyValue::Float(x)
    }
}

impl From<&str> for PyValue {
    fn from(s: &str) -> Self {
        PyValue::str(s)
    }
}

impl From<NdArray> for PyValue {
    fn from(arr: NdArray) -> Self {
        PyValue::Native(arr)
    }
}

impl fmt::Display for PyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::None => f.write_str("None"),
            PyValue::Bool(true) => f.write_str("True"),
            PyValue::Bool(false) => f.write_str("False"),
            PyValue::Int(n) => write!(f, "{n}"),
            PyValue::Float(n) => write!(f, "{:?}", n),
            PyValue::Complex(c) => write!(f, "({}{:+}j)", c.re, c.im),
            PyValue::String(s) => write!(f, "'{s}'"),
            PyValue::Bytes(b) => write!(f, "b'{}'", b.escape_ascii()),
            PyValue::List(list) => fmt::Display::fmt(list, f),
            PyValue::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            PyValue::Tuple(items) => write!(f, "({})", Joined(items)),
            PyValue::Dict(dict) => fmt::Display::fmt(dict, f),
            PyValue::Set(items) => write!(f, "{{{}}}", Joined(items)),
            PyValue::Date(d) => write!(f, "datetime.date({})", d.format("%Y, %-m, %-d")),
            PyValue::Time(t) => write!(f, "datetime.time({})", t.time),
            PyValue::DateTime(dt) => write!(f, "datetime.datetime({})", dt.value),
            PyValue::Type(t) => write!(f, "ndpy.type('{}')", t),
            PyValue::Ellipsis => f.write_str("Ellipsis"),
            PyValue::Object(obj) => write!(f, "<{} instance>", obj.type_name()),
            PyValue::Native(arr) => write!(f, "ndpy.array({})", arr),
            PyValue::Foreign(arr) => write!(f, "<ndarray shape={:?} dtype={}>", arr.shape(), arr.dtype()),
        }
    }
}

/// Comma separated display of a run of values.
struct Joined<'a>(&'a [PyValue]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(item, f)?;
        }
        Ok(())
    }
}

// ============================================================================
// Calendar values
// ============================================================================

/// `datetime.time`, optionally timezone-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyTime {
    pub time: NaiveTime,
    pub tzinfo: Option<FixedOffset>,
}

impl PyTime {
    pub fn naive(time: NaiveTime) -> Self {
        Self { time, tzinfo: None }
    }
}

/// `datetime.datetime`, optionally timezone-aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyDateTime {
    pub value: NaiveDateTime,
    pub tzinfo: Option<FixedOffset>,
}

impl PyDateTime {
    pub fn naive(value: NaiveDateTime) -> Self {
        Self { value, tzinfo: None }
    }

    pub fn with_tz(value: NaiveDateTime, tzinfo: FixedOffset) -> Self {
        Self {
            value,
            tzinfo: Some(tzinfo),
        }
    }
}

// ============================================================================
// PyObject
// ============================================================================

/// Opaque handle to a host object.
///
/// Objects carry attributes and a reference count. Conversion protocols
/// (`__int__`, `__index__`, `__float__`) are modelled as attributes; every
/// protocol call is counted so callers can observe how often a conversion
/// touched the object.
///
/// Clones are the same object: identity is the shared reference count.
#[derive(Debug, Clone)]
pub struct PyObject {
    type_name: SmolStr,
    ref_count: Rc<Cell<usize>>,
    attributes: Rc<RefCell<HashMap<SmolStr, PyValue>>>,
    protocol_calls: Rc<Cell<usize>>,
    /// Set for objects wrapping compiled code
    native_fn: Option<NativeBinaryIntFn>,
}

impl PyObject {
    /// A fresh object holding one reference.
    pub fn new(type_name: impl Into<SmolStr>) -> Self {
        Self {
            type_name: type_name.into(),
            ref_count: Rc::new(Cell::new(1)),
            attributes: Rc::default(),
            protocol_calls: Rc::new(Cell::new(0)),
            native_fn: None,
        }
    }

    /// An object exposing `func` as its compiled entry point.
    pub fn native_function(type_name: impl Into<SmolStr>, func: NativeBinaryIntFn) -> Self {
        Self {
            native_fn: Some(func),
            ..Self::new(type_name)
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.get()
    }

    pub fn incref(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Saturates at zero.
    pub fn decref(&self) {
        self.ref_count.set(self.ref_count.get().saturating_sub(1));
    }

    pub fn set_attr(&self, name: impl Into<SmolStr>, value: PyValue) {
        self.attributes.borrow_mut().insert(name.into(), value);
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.borrow().contains_key(name)
    }

    /// Invoke a conversion protocol such as `__int__`, if the object has it
    pub fn call_protocol(&self, name: &str) -> Option<PyValue> {
        let result = self.attributes.borrow().get(name).cloned()?;
        self.protocol_calls.set(self.protocol_calls.get() + 1);
        Some(result)
    }

    /// Number of protocol invocations so far
    pub fn protocol_calls(&self) -> usize {
        self.protocol_calls.get()
    }

    /// The compiled entry point, if any
    pub fn native_fn(&self) -> Option<NativeBinaryIntFn> {
        self.native_fn
    }
}

impl PartialEq for PyObject {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.ref_count, &other.ref_count)
    }
}

// ============================================================================
// PyList and PyDict
// ============================================================================

/// A host list. Clones alias the same storage.
#[derive(Debug, Clone, Default)]
pub struct PyList {
    items: Rc<RefCell<Vec<PyValue>>>,
}

impl PyList {
    pub fn from_vec(items: Vec<PyValue>) -> Self {
        Self {
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<PyValue> {
        self.items.borrow().get(index).cloned()
    }

    /// Replace the item at `index`, raising the host's `IndexError` when out of range.
    pub fn set(&self, index: usize, value: PyValue) -> ConvertResult<()> {
        let mut items = self.items.borrow_mut();
        let len = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ConvertError::host(
                "IndexError",
                format!("list index {index} out of range for length {len}"),
            )),
        }
    }

    pub fn push(&self, value: PyValue) {
        self.items.borrow_mut().push(value);
    }

    /// Copy of the current items
    pub fn to_vec(&self) -> Vec<PyValue> {
        self.items.borrow().clone()
    }
}

impl PartialEq for PyList {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.items, &other.items) || *self.items.borrow() == *other.items.borrow()
    }
}

impl fmt::Display for PyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", Joined(&self.items.borrow()))
    }
}

impl FromIterator<PyValue> for PyList {
    fn from_iter<I: IntoIterator<Item = PyValue>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// A host dict with string keys in insertion order. Clones alias the same storage.
#[derive(Debug, Clone, Default)]
pub struct PyDict {
    items: Rc<RefCell<IndexMap<SmolStr, PyValue>>>,
}

impl PyDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<PyValue> {
        self.items.borrow().get(key).cloned()
    }

    /// Insert or overwrite; a new key goes last.
    pub fn set(&self, key: impl Into<SmolStr>, value: PyValue) {
        self.items.borrow_mut().insert(key.into(), value);
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<SmolStr> {
        self.items.borrow().keys().cloned().collect()
    }

    /// Snapshot of the key-value pairs, in insertion order
    pub fn items(&self) -> Vec<(SmolStr, PyValue)> {
        self.items
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl PartialEq for PyDict {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.items, &other.items) || *self.items.borrow() == *other.items.borrow()
    }
}

impl<K: Into<SmolStr>> FromIterator<(K, PyValue)> for PyDict {
    fn from_iter<I: IntoIterator<Item = (K, PyValue)>>(iter: I) -> Self {
        let dict = PyDict::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl fmt::Display for PyDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.items.borrow().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{key}': {value}")?;
        }
        f.write_str("}")
    }
}
