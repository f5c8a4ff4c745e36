//! Categorical types.
//!
//! A categorical stores a small unsigned index into a fixed, ordered list of
//! distinct category values. Assigning a value looks it up by equality after
//! normalising it through the category type.

use std::sync::Arc;

use crate::arrmeta::ArrMeta;
use crate::error::{NdError, NdResult};
use crate::memblock::{DataPtr, MemoryBlock};
use crate::scalar::{read_scalar, write_scalar, AssignErrorMode, Scalar};
use crate::types::{IntWidth, RuntimeType};

/// The category list of a categorical type.
#[derive(Debug, Clone, PartialEq)]
pub struct Categories {
    values: Arc<Vec<Scalar>>,
    category_type: RuntimeType,
    index_width: IntWidth,
}

impl Categories {
    /// Build a category list, normalising each value through `category_type`.
    ///
    /// Duplicates are dropped, keeping first occurrence order.
    pub fn new(category_type: RuntimeType, values: impl IntoIterator<Item = Scalar>) -> NdResult<Self> {
        if category_type.is_dim() || category_type.is_tuple_or_struct() || category_type.is_symbolic() {
            return Err(NdError::unsupported(format!(
                "categories of type {category_type}"
            )));
        }
        let mut normalised: Vec<Scalar> = Vec::new();
        for value in values {
            let value = normalise(&category_type, &value, AssignErrorMode::default())?;
            if !normalised.contains(&value) {
                normalised.push(value);
            }
        }
        Ok(Self {
            index_width: IntWidth::for_count(normalised.len()),
            values: Arc::new(normalised),
            category_type,
        })
    }

    pub fn category_type(&self) -> &RuntimeType {
        &self.category_type
    }

    pub fn index_width(&self) -> IntWidth {
        self.index_width
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Scalar> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    /// Index of `value`, which must equal one of the categories.
    pub fn index_of(&self, value: &Scalar, mode: AssignErrorMode) -> NdResult<usize> {
        let value = normalise(&self.category_type, value, mode)?;
        self.values
            .iter()
            .position(|v| *v == value)
            .ok_or_else(|| NdError::invalid_value(format!("categorical[{}]", self.category_type), format!("{value} is not a category")))
    }
}

fn normalise(tp: &RuntimeType, value: &Scalar, mode: AssignErrorMode) -> NdResult<Scalar> {
    let meta = ArrMeta::for_type(tp);
    let ptr = DataPtr::new(MemoryBlock::zeroed(tp.data_size()), 0);
    write_scalar(tp, &meta, &ptr, value, mode)?;
    read_scalar(tp, &meta, &ptr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dedup_and_lookup() {
        let cats = Categories::new(
            RuntimeType::string(),
            ["red", "green", "red", "blue"].map(|s| Scalar::String(s.into())),
        )
        .unwrap();
        assert_eq!(cats.len(), 3);
        assert_eq!(cats.index_width(), IntWidth::W8);
        assert_eq!(cats.index_of(&Scalar::String("blue".into()), AssignErrorMode::default()), Ok(2));
        assert!(cats.index_of(&Scalar::String("pink".into()), AssignErrorMode::default()).is_err());
    }

    #[test]
    fn test_lookup_normalises_through_category_type() {
        let cats = Categories::new(RuntimeType::int32(), [Scalar::Int(10), Scalar::Int(20)]).unwrap();
        assert_eq!(cats.index_of(&Scalar::Float(20.0), AssignErrorMode::default()), Ok(1));
    }
}
