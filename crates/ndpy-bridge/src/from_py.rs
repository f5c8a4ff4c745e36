//! Kernel Tree Builder
//!
//! [`instantiate`] builds the kernels that convert a host value into a
//! destination of a given runtime type. The tree mirrors the type:
//!
//! | Destination        | Kernel                                            |
//! |--------------------|---------------------------------------------------|
//! | scalar             | [`ScalarKernel`]                                  |
//! | `?T`               | [`OptionKernel`] over an assign-NA and a `T` child |
//! | `N * T`            | [`FixedDimKernel`] over a `T` child and a copy     |
//! | `var * T`          | [`VarDimKernel`] over a `T` child and a copy       |
//! | tuple / struct     | [`FieldsKernel`] with one child per field         |
//! | categorical        | a chain through the category type                 |
//! | `Any`, `void`      | [`GenericKernel`]                                 |
//!
//! Dimension kernels broadcast a length-1 source by converting it once and
//! copying the converted element into the remaining slots.

use std::any::Any;

use ndpy_types::{
    prepare_var_dim, typed_data_assign, write_scalar, ArrMeta, AssignErrorMode, DataPtr, RuntimeType,
    Scalar, TypeKind, Typed, VarDimData,
};
use smol_str::SmolStr;

use crate::config::ConvertOptions;
use crate::error::{ConvertError, ConvertResult};
use crate::exec::broadcast_as_scalar;
use crate::foreign::copy_from_foreign;
use crate::kernel::{AssignKernel, AssignNaKernel, ChainKernel, Kernel, KernelBuilder, KernelOffset, KernelSrc, StridedSrc};
use crate::py_types::{FastSequence, PyDict, PyValue};
use crate::scalar::{assign_generic, assign_scalar};

/// Instantiate the kernel tree converting host values into `tp`.
pub fn instantiate(
    ckb: &mut KernelBuilder,
    tp: &RuntimeType,
    meta: &ArrMeta,
    opts: &ConvertOptions,
) -> ConvertResult<KernelOffset> {
    let mode = opts.error_mode;
    match tp.kind() {
        TypeKind::Option(value_tp) => OptionKernel::instantiate(ckb, tp, value_tp, meta, opts),
        TypeKind::FixedDim { .. } => FixedDimKernel::instantiate(ckb, tp, meta, opts),
        TypeKind::VarDim { .. } => VarDimKernel::instantiate(ckb, tp, meta, opts),
        TypeKind::Tuple(_) | TypeKind::Struct(_) => FieldsKernel::instantiate(ckb, tp, meta, opts),
        TypeKind::Categorical(categories) => {
            ChainKernel::instantiate(ckb, categories.category_type().clone(), tp, meta, mode, |ckb, btp, bmeta| {
                instantiate(ckb, btp, bmeta, opts)
            })
        }
        TypeKind::Any | TypeKind::Void => Ok(ckb.push(Box::new(GenericKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            mode,
        }))),
        _ => Ok(ckb.push(Box::new(ScalarKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            mode,
        }))),
    }
}

/// Assign a native or foreign array source directly. Returns whether it did.
fn assign_array_source(
    tp: &RuntimeType,
    meta: &ArrMeta,
    dst: &DataPtr,
    value: &PyValue,
    mode: AssignErrorMode,
) -> ConvertResult<bool> {
    match value {
        PyValue::Native(arr) => {
            typed_data_assign(Typed::new(tp, meta, dst), arr.typed(), mode)?;
            Ok(true)
        }
        PyValue::Foreign(foreign) => {
            copy_from_foreign(Typed::new(tp, meta, dst), foreign, mode)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn sequence_items<'v>(value: &'v PyValue, tp: &RuntimeType) -> ConvertResult<FastSequence<'v>> {
    if !value.is_sequence() && !matches!(value, PyValue::Set(_)) {
        return Err(ConvertError::broadcast(value, tp));
    }
    value.fast_sequence()
}

// Convert `src` into element 0, then copy element 0 into elements 1..count.
fn broadcast_fill(
    ckb: &KernelBuilder,
    child: KernelOffset,
    copy_child: KernelOffset,
    base: &DataPtr,
    stride: isize,
    count: usize,
    src: KernelSrc<'_>,
) -> ConvertResult<()> {
    if count == 0 {
        return Ok(());
    }
    ckb.call_single(child, base, src)?;
    if count > 1 {
        let first = StridedSrc::Data {
            ptr: base.clone(),
            stride: 0,
        };
        ckb.call_strided(copy_child, &base.element(stride, 1), stride, first, count - 1)?;
    }
    Ok(())
}

// ============================================================================
// Scalars
// ============================================================================

/// Leaf kernel running one scalar converter.
#[derive(Debug)]
pub struct ScalarKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    mode: AssignErrorMode,
}

impl Kernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn single(&self, _ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        if assign_array_source(&self.tp, &self.meta, dst, value, self.mode)? {
            return Ok(());
        }
        assign_scalar(&self.tp, &self.meta, dst, value, self.mode)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Converts through a temporary array and the runtime's generic assignment.
#[derive(Debug)]
pub struct GenericKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    mode: AssignErrorMode,
}

impl Kernel for GenericKernel {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn single(&self, _ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        if assign_array_source(&self.tp, &self.meta, dst, value, self.mode)? {
            return Ok(());
        }
        assign_generic(&self.tp, &self.meta, dst, value, self.mode)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Options
// ============================================================================

/// Host strings that read as a missing value.
const NA_STRINGS: [&str; 4] = ["", "NA", "None", "null"];

/// `?T`: `None` goes to the assign-NA child, anything else to the `T` child.
#[derive(Debug)]
pub struct OptionKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    value_is_string: bool,
    na_child: KernelOffset,
    value_child: KernelOffset,
    mode: AssignErrorMode,
}

impl OptionKernel {
    fn instantiate(
        ckb: &mut KernelBuilder,
        tp: &RuntimeType,
        value_tp: &RuntimeType,
        meta: &ArrMeta,
        opts: &ConvertOptions,
    ) -> ConvertResult<KernelOffset> {
        ndpy_types::missing::check_option_value_type(value_tp)?;
        let self_off = ckb.push(Box::new(OptionKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            value_is_string: value_tp.is_string(),
            na_child: KernelOffset::UNSET,
            value_child: KernelOffset::UNSET,
            mode: opts.error_mode,
        }));

        let na_child = ckb.push(Box::new(AssignNaKernel::new(value_tp.clone())));
        ckb.check_child(self_off, na_child)?;
        ckb.get_at_mut::<OptionKernel>(self_off)?.na_child = na_child;

        let value_child = instantiate(ckb, value_tp, meta.value_meta(), opts)?;
        ckb.check_child(self_off, value_child)?;
        ckb.get_at_mut::<OptionKernel>(self_off)?.value_child = value_child;
        Ok(self_off)
    }
}

impl Kernel for OptionKernel {
    fn name(&self) -> &'static str {
        "option"
    }

    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        match value {
            PyValue::None => ckb.call_single(self.na_child, dst, src),
            // A native array may itself hold a missing value; the runtime copies NA to NA.
            PyValue::Native(arr) => {
                typed_data_assign(Typed::new(&self.tp, &self.meta, dst), arr.typed(), self.mode)?;
                Ok(())
            }
            PyValue::String(s) if !self.value_is_string => {
                if NA_STRINGS.contains(&s.as_str()) {
                    return ckb.call_single(self.na_child, dst, src);
                }
                write_scalar(&self.tp, &self.meta, dst, &Scalar::String(s.to_string()), self.mode)?;
                Ok(())
            }
            _ => ckb.call_single(self.value_child, dst, src),
        }
    }

    fn destruct_children(&mut self, ckb: &mut KernelBuilder) {
        ckb.destroy(self.na_child);
        ckb.destroy(self.value_child);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Dimensions
// ============================================================================

/// `N * T`
#[derive(Debug)]
pub struct FixedDimKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    size: usize,
    stride: isize,
    child: KernelOffset,
    copy_child: KernelOffset,
    broadcast: bool,
    mode: AssignErrorMode,
}

// Instantiate the element kernel and the element copy kernel of a dimension.
fn instantiate_dim_children(
    ckb: &mut KernelBuilder,
    self_off: KernelOffset,
    element_tp: &RuntimeType,
    element_meta: &ArrMeta,
    opts: &ConvertOptions,
) -> ConvertResult<(KernelOffset, KernelOffset)> {
    let child = instantiate(ckb, element_tp, element_meta, opts)?;
    ckb.check_child(self_off, child)?;
    let copy_child = ckb.push(Box::new(AssignKernel::copy(element_tp, element_meta)));
    ckb.check_child(self_off, copy_child)?;
    Ok((child, copy_child))
}

impl FixedDimKernel {
    fn instantiate(
        ckb: &mut KernelBuilder,
        tp: &RuntimeType,
        meta: &ArrMeta,
        opts: &ConvertOptions,
    ) -> ConvertResult<KernelOffset> {
        let (size, element_tp) = match tp.kind() {
            TypeKind::FixedDim { size, element } => (*size, element),
            _ => return Err(ConvertError::invariant(format!("{tp} is not a fixed dimension"))),
        };
        let (stride, element_meta) = match meta {
            ArrMeta::FixedDim { stride, element } => (*stride, element.as_ref()),
            _ => return Err(ConvertError::invariant(format!("metadata does not match {tp}"))),
        };

        let self_off = ckb.push(Box::new(FixedDimKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            size,
            stride,
            child: KernelOffset::UNSET,
            copy_child: KernelOffset::UNSET,
            broadcast: opts.broadcast,
            mode: opts.error_mode,
        }));
        let (child, copy_child) = instantiate_dim_children(ckb, self_off, element_tp, element_meta, opts)?;
        let this = ckb.get_at_mut::<FixedDimKernel>(self_off)?;
        this.child = child;
        this.copy_child = copy_child;
        Ok(self_off)
    }
}

impl Kernel for FixedDimKernel {
    fn name(&self) -> &'static str {
        "fixed_dim"
    }

    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        if assign_array_source(&self.tp, &self.meta, dst, value, self.mode)? {
            return Ok(());
        }
        if self.broadcast && broadcast_as_scalar(&self.tp, value) {
            return broadcast_fill(ckb, self.child, self.copy_child, dst, self.stride, self.size, src);
        }

        let items = sequence_items(value, &self.tp)?;
        if items.len() == self.size {
            ckb.call_strided(self.child, dst, self.stride, StridedSrc::Host(&items), self.size)
        } else if items.len() == 1 {
            let first = KernelSrc::Host(&items[0]);
            broadcast_fill(ckb, self.child, self.copy_child, dst, self.stride, self.size, first)
        } else {
            Err(ConvertError::broadcast(value, &self.tp))
        }
    }

    fn destruct_children(&mut self, ckb: &mut KernelBuilder) {
        ckb.destroy(self.child);
        ckb.destroy(self.copy_child);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `var * T`. Storage is allocated on first write.
#[derive(Debug)]
pub struct VarDimKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    child: KernelOffset,
    copy_child: KernelOffset,
    broadcast: bool,
    mode: AssignErrorMode,
}

impl VarDimKernel {
    fn instantiate(
        ckb: &mut KernelBuilder,
        tp: &RuntimeType,
        meta: &ArrMeta,
        opts: &ConvertOptions,
    ) -> ConvertResult<KernelOffset> {
        let element_tp = tp
            .element_type()
            .ok_or_else(|| ConvertError::invariant(format!("{tp} is not a dimension")))?;
        let element_meta = match meta {
            ArrMeta::VarDim { element, .. } => element.as_ref(),
            _ => return Err(ConvertError::invariant(format!("metadata does not match {tp}"))),
        };

        let self_off = ckb.push(Box::new(VarDimKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            child: KernelOffset::UNSET,
            copy_child: KernelOffset::UNSET,
            broadcast: opts.broadcast,
            mode: opts.error_mode,
        }));
        let (child, copy_child) = instantiate_dim_children(ckb, self_off, element_tp, element_meta, opts)?;
        let this = ckb.get_at_mut::<VarDimKernel>(self_off)?;
        this.child = child;
        this.copy_child = copy_child;
        Ok(self_off)
    }
}

impl Kernel for VarDimKernel {
    fn name(&self) -> &'static str {
        "var_dim"
    }

    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        if assign_array_source(&self.tp, &self.meta, dst, value, self.mode)? {
            return Ok(());
        }
        let existing = VarDimData::read(dst);
        let target = Typed::new(&self.tp, &self.meta, dst);

        if self.broadcast && broadcast_as_scalar(&self.tp, value) {
            let extent = if existing.is_allocated() { existing.size as usize } else { 1 };
            let view = prepare_var_dim(target, extent, value)?;
            return broadcast_fill(ckb, self.child, self.copy_child, &view.base, view.stride, view.extent, src);
        }

        let items = sequence_items(value, &self.tp)?;
        if items.len() == 1 && existing.is_allocated() && existing.size != 1 {
            let view = prepare_var_dim(target, existing.size as usize, value)?;
            let first = KernelSrc::Host(&items[0]);
            return broadcast_fill(ckb, self.child, self.copy_child, &view.base, view.stride, view.extent, first);
        }
        let view = prepare_var_dim(target, items.len(), value)?;
        ckb.call_strided(self.child, &view.base, view.stride, StridedSrc::Host(&items), view.extent)
    }

    fn destruct_children(&mut self, ckb: &mut KernelBuilder) {
        ckb.destroy(self.child);
        ckb.destroy(self.copy_child);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Tuples and structs
// ============================================================================

/// Tuple or struct: one child per field.
///
/// A dict source must name every struct field exactly; it is validated
/// completely before any field is written. A broadcast source is converted
/// into field 0 only; `copies[i - 1]` assigns field 0 into field `i`.
#[derive(Debug)]
pub struct FieldsKernel {
    tp: RuntimeType,
    meta: ArrMeta,
    names: Option<Vec<SmolStr>>,
    offsets: Vec<usize>,
    children: Vec<KernelOffset>,
    copies: Vec<KernelOffset>,
    broadcast: bool,
    mode: AssignErrorMode,
}

impl FieldsKernel {
    fn instantiate(
        ckb: &mut KernelBuilder,
        tp: &RuntimeType,
        meta: &ArrMeta,
        opts: &ConvertOptions,
    ) -> ConvertResult<KernelOffset> {
        let names = match tp.kind() {
            TypeKind::Struct(fields) => Some(fields.iter().map(|(name, _)| name.clone()).collect()),
            _ => None,
        };
        let field_types = tp.field_types();
        let self_off = ckb.push(Box::new(FieldsKernel {
            tp: tp.clone(),
            meta: meta.clone(),
            names,
            offsets: meta.field_offsets().to_vec(),
            children: Vec::with_capacity(field_types.len()),
            copies: Vec::with_capacity(field_types.len().saturating_sub(1)),
            broadcast: opts.broadcast,
            mode: opts.error_mode,
        }));
        ckb.reserve(field_types.len());

        for (i, field_tp) in field_types.iter().enumerate() {
            let (_, field_meta) = meta
                .field(i)
                .ok_or_else(|| ConvertError::invariant(format!("missing metadata for field {i} of {tp}")))?;
            let child = instantiate(ckb, field_tp, field_meta, opts)?;
            ckb.check_child(self_off, child)?;
            ckb.get_at_mut::<FieldsKernel>(self_off)?.children.push(child);
        }

        if let Some((first_tp, (_, first_meta))) = field_types.first().zip(meta.field(0)) {
            for (i, field_tp) in field_types.iter().enumerate().skip(1) {
                let (_, field_meta) = meta
                    .field(i)
                    .ok_or_else(|| ConvertError::invariant(format!("missing metadata for field {i} of {tp}")))?;
                let copy = ckb.push(Box::new(AssignKernel::new(
                    field_tp.clone(),
                    field_meta.clone(),
                    first_tp.clone(),
                    first_meta.clone(),
                    opts.error_mode,
                )));
                ckb.check_child(self_off, copy)?;
                ckb.get_at_mut::<FieldsKernel>(self_off)?.copies.push(copy);
            }
        }
        Ok(self_off)
    }

    // Convert `value` once into field 0, then assign field 0 to the others.
    fn broadcast_one(&self, ckb: &KernelBuilder, dst: &DataPtr, value: &PyValue) -> ConvertResult<()> {
        let Some(&first) = self.children.first() else {
            return Ok(());
        };
        let first_ptr = self.field_ptr(dst, 0);
        ckb.call_single(first, &first_ptr, KernelSrc::Host(value))?;
        for (i, &copy) in self.copies.iter().enumerate() {
            ckb.call_single(copy, &self.field_ptr(dst, i + 1), KernelSrc::Data(first_ptr.clone()))?;
        }
        Ok(())
    }

    fn field_ptr(&self, dst: &DataPtr, i: usize) -> DataPtr {
        dst.offset_by(self.offsets[i] as isize)
    }

    fn assign_from_dict(&self, ckb: &KernelBuilder, dst: &DataPtr, dict: &PyDict) -> ConvertResult<()> {
        let names = self.names.as_deref().unwrap_or_default();
        for key in dict.keys() {
            if !names.contains(&key) {
                return Err(ConvertError::unknown_field(&key, &self.tp));
            }
        }
        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let value = dict
                .get(name)
                .ok_or_else(|| ConvertError::missing_field(name, &self.tp))?;
            values.push(value);
        }
        for (i, value) in values.iter().enumerate() {
            ckb.call_single(self.children[i], &self.field_ptr(dst, i), KernelSrc::Host(value))?;
        }
        Ok(())
    }
}

impl Kernel for FieldsKernel {
    fn name(&self) -> &'static str {
        if self.names.is_some() {
            "struct"
        } else {
            "tuple"
        }
    }

    fn single(&self, ckb: &KernelBuilder, dst: &DataPtr, src: KernelSrc<'_>) -> ConvertResult<()> {
        let value = src.host(self.name())?;
        if assign_array_source(&self.tp, &self.meta, dst, value, self.mode)? {
            return Ok(());
        }
        if let (Some(_), PyValue::Dict(dict)) = (&self.names, value) {
            return self.assign_from_dict(ckb, dst, dict);
        }

        let count = self.children.len();
        if !value.is_sequence() {
            if !self.broadcast {
                return Err(ConvertError::broadcast(value, &self.tp));
            }
            return self.broadcast_one(ckb, dst, value);
        }

        let items = value.fast_sequence()?;
        if items.len() == count {
            for (i, item) in items.iter().enumerate() {
                ckb.call_single(self.children[i], &self.field_ptr(dst, i), KernelSrc::Host(item))?;
            }
            return Ok(());
        }
        match &items[..] {
            [item] => self.broadcast_one(ckb, dst, item),
            _ => Err(ConvertError::broadcast(value, &self.tp)),
        }
    }

    fn destruct_children(&mut self, ckb: &mut KernelBuilder) {
        for child in self.children.drain(..).chain(self.copies.drain(..)) {
            ckb.destroy(child);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::py_types::{PyDict, PyObject};
    use ndpy_types::{parse_type, NdArray};
    use pretty_assertions::assert_eq;

    fn convert(tp: &str, value: &PyValue) -> ConvertResult<NdArray> {
        let arr = NdArray::empty(parse_type(tp)?)?;
        let mut ckb = KernelBuilder::new();
        let root = instantiate(&mut ckb, arr.tp(), arr.meta(), &ConvertOptions::default())?;
        ckb.call_single(root, arr.data(), KernelSrc::Host(value))?;
        Ok(arr)
    }

    fn ints(arr: &NdArray) -> Vec<Scalar> {
        arr.to_scalars().unwrap()
    }

    #[test]
    fn test_fixed_dim_exact_and_broadcast() {
        let arr = convert("3 * int32", &PyValue::list([1i64, 2, 3].map(PyValue::from))).unwrap();
        assert_eq!(ints(&arr), vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)]);

        let arr = convert("3 * int32", &PyValue::list([PyValue::from(7i64)])).unwrap();
        assert_eq!(ints(&arr), vec![Scalar::Int(7); 3]);

        let arr = convert("2 * 2 * int32", &PyValue::from(5i64)).unwrap();
        assert_eq!(ints(&arr), vec![Scalar::Int(5); 4]);
    }

    #[test]
    fn test_length_mismatch_is_broadcast_error() {
        let err = convert("3 * int32", &PyValue::list([1i64, 2].map(PyValue::from))).unwrap_err();
        assert!(err.is_broadcast());
        assert!(err.to_string().contains("3 * int32"));
    }

    #[test]
    fn test_broadcast_converts_once() {
        let obj = PyObject::new("Counter");
        obj.set_attr("__index__", PyValue::int(9));
        let arr = convert("5 * int32", &PyValue::list([PyValue::Object(obj.clone())])).unwrap();
        assert_eq!(ints(&arr), vec![Scalar::Int(9); 5]);
        assert_eq!(obj.protocol_calls(), 1);
    }

    #[test]
    fn test_var_dim_allocates() {
        let value = PyValue::list([PyValue::list([PyValue::from(1i64)]), PyValue::list([2i64, 3].map(PyValue::from))]);
        let arr = convert("2 * var * int32", &value).unwrap();
        assert_eq!(arr.shape().unwrap().to_string(), "(2, var)");
        assert_eq!(ints(&arr), vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)]);
    }

    #[test]
    fn test_option_routes_none_and_strings() {
        let value = PyValue::list([PyValue::from(1i64), PyValue::None, PyValue::str("12"), PyValue::str("NA")]);
        let arr = convert("4 * ?int32", &value).unwrap();
        assert_eq!(
            ints(&arr),
            vec![Scalar::Int(1), Scalar::Missing, Scalar::Int(12), Scalar::Missing]
        );
    }

    #[test]
    fn test_option_accepts_native_missing() {
        let missing = NdArray::from_scalar(parse_type("?int32").unwrap(), &Scalar::Missing).unwrap();
        let arr = convert("?int32", &PyValue::Native(missing)).unwrap();
        assert_eq!(arr.read_scalar().unwrap(), Scalar::Missing);
    }

    #[test]
    fn test_struct_from_dict() {
        let dict: PyDict = [("y", PyValue::from(2i64)), ("x", PyValue::from(1i64))].into_iter().collect();
        let arr = convert("{x: int32, y: int32}", &PyValue::Dict(dict)).unwrap();
        let fields = crate::to_py::as_py(&arr).unwrap();
        let fields = fields.as_dict().unwrap();
        assert_eq!(fields.get("x"), Some(PyValue::from(1i64)));
        assert_eq!(fields.get("y"), Some(PyValue::from(2i64)));
    }

    #[test]
    fn test_struct_unknown_and_missing_keys() {
        let dict: PyDict = [("x", PyValue::from(1i64)), ("z", PyValue::from(2i64))].into_iter().collect();
        let err = convert("{x: int32, y: int32}", &PyValue::Dict(dict)).unwrap_err();
        assert!(err.to_string().contains("\"z\""));

        let dict: PyDict = [("x", PyValue::from(1i64))].into_iter().collect();
        let err = convert("{x: int32, y: int32}", &PyValue::Dict(dict)).unwrap_err();
        assert!(err.to_string().contains("\"y\""));
    }

    #[test]
    fn test_tuple_positional() {
        let value = PyValue::Tuple(vec![PyValue::from(1i64), PyValue::from(2.5)]);
        let arr = convert("(int8, float64)", &value).unwrap();
        let back = crate::to_py::as_py(&arr).unwrap();
        assert_eq!(back, value);

        let err = convert("(int8, float64)", &PyValue::list([1i64, 2, 3].map(PyValue::from))).unwrap_err();
        assert!(err.is_broadcast());
    }

    #[test]
    fn test_field_broadcast_converts_once() {
        let obj = PyObject::new("Counter");
        obj.set_attr("__index__", PyValue::int(4));
        let arr = convert("(int32, int64, float64)", &PyValue::list([PyValue::Object(obj.clone())])).unwrap();
        assert_eq!(obj.protocol_calls(), 1);
        let back = crate::to_py::as_py(&arr).unwrap();
        assert_eq!(
            back,
            PyValue::Tuple(vec![PyValue::from(4i64), PyValue::from(4i64), PyValue::from(4.0)])
        );

        let obj = PyObject::new("Counter");
        obj.set_attr("__index__", PyValue::int(6));
        let arr = convert("{a: int8, b: int16}", &PyValue::Object(obj.clone())).unwrap();
        assert_eq!(obj.protocol_calls(), 1);
        let fields = crate::to_py::as_py(&arr).unwrap();
        let fields = fields.as_dict().unwrap();
        assert_eq!(fields.get("a"), Some(PyValue::from(6i64)));
        assert_eq!(fields.get("b"), Some(PyValue::from(6i64)));
    }

    #[test]
    fn test_categorical_chain() {
        let cats = ndpy_types::Categories::new(
            RuntimeType::string(),
            ["low", "high"].map(|s| Scalar::String(s.to_string())),
        )
        .unwrap();
        let tp = RuntimeType::fixed_dim(3, RuntimeType::categorical(cats));
        let arr = NdArray::empty(tp).unwrap();
        let mut ckb = KernelBuilder::new();
        let root = instantiate(&mut ckb, arr.tp(), arr.meta(), &ConvertOptions::default()).unwrap();
        let value = PyValue::list(["high", "low", "high"].map(PyValue::str));
        ckb.call_single(root, arr.data(), KernelSrc::Host(&value)).unwrap();
        assert_eq!(
            arr.to_scalars().unwrap(),
            ["high", "low", "high"].map(|s| Scalar::String(s.to_string())).to_vec()
        );
    }

    #[test]
    fn test_tree_is_destroyed_with_builder() {
        let tp = parse_type("2 * {a: ?int32, b: var * string}").unwrap();
        let meta = ArrMeta::for_type(&tp);
        let mut ckb = KernelBuilder::new();
        let root = instantiate(&mut ckb, &tp, &meta, &ConvertOptions::default()).unwrap();
        assert_eq!(root, KernelOffset(0));
        assert!(ckb.live() > 5);
        ckb.destroy(root);
        assert_eq!(ckb.live(), 0);
    }
}
