//! Array shapes.

use std::fmt;

/// Extent of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Fixed(usize),
    /// Extent varies between sibling sub-arrays
    Ragged,
}

impl Axis {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Axis::Fixed(n) => Some(*n),
            Axis::Ragged => None,
        }
    }

    /// Combine two observations of the same axis.
    pub fn merge(self, other: Axis) -> Axis {
        match (self, other) {
            (Axis::Fixed(a), Axis::Fixed(b)) if a == b => Axis::Fixed(a),
            _ => Axis::Ragged,
        }
    }
}

/// Ordered axis extents, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShapeDescriptor {
    axes: Vec<Axis>,
}

impl ShapeDescriptor {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    pub fn fixed(extents: &[usize]) -> Self {
        Self {
            axes: extents.iter().map(|&n| Axis::Fixed(n)).collect(),
        }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn push(&mut self, axis: Axis) {
        self.axes.push(axis);
    }

    pub fn truncate(&mut self, ndim: usize) {
        self.axes.truncate(ndim);
    }

    pub fn is_ragged(&self) -> bool {
        self.axes.iter().any(|a| matches!(a, Axis::Ragged))
    }

    /// Extents if no axis is ragged.
    pub fn to_fixed(&self) -> Option<Vec<usize>> {
        self.axes.iter().map(Axis::fixed).collect()
    }
}

impl fmt::Display for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match axis {
                Axis::Fixed(n) => write!(f, "{n}")?,
                Axis::Ragged => write!(f, "var")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge() {
        assert_eq!(Axis::Fixed(2).merge(Axis::Fixed(2)), Axis::Fixed(2));
        assert_eq!(Axis::Fixed(2).merge(Axis::Fixed(3)), Axis::Ragged);
        assert_eq!(Axis::Ragged.merge(Axis::Fixed(3)), Axis::Ragged);
    }

    #[test]
    fn test_display_and_fixed() {
        let shape = ShapeDescriptor::new(vec![Axis::Fixed(2), Axis::Ragged]);
        assert_eq!(shape.to_string(), "(2, var)");
        assert!(shape.to_fixed().is_none());
        assert_eq!(ShapeDescriptor::fixed(&[2, 3]).to_fixed(), Some(vec![2, 3]));
    }
}
