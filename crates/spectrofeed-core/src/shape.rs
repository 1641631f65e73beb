use std::fmt;

// Shape: dimension sizes of a stored array or an assembled batch
//
//   - Label:    Shape([])               scalar, 1 element
//   - Feature:  Shape([40, 512])        F rows by T_k columns
//   - Batch:    Shape([64, 40, 500, 1]) batch, F, T_max, channels

/// N-dimensional shape of an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Option<usize> {
        self.0.get(d).copied()
    }

    /// Whether the shape holds exactly one element (`[]`, `[1]`, `[1, 1]`, ...).
    pub fn is_single(&self) -> bool {
        self.0.iter().all(|&d| d == 1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert!(s.is_single());
    }

    #[test]
    fn test_matrix_shape() {
        let s = Shape::from((40, 600));
        assert_eq!(s.rank(), 2);
        assert_eq!(s.elem_count(), 24_000);
        assert_eq!(s.dim(1), Some(600));
        assert_eq!(s.dim(2), None);
        assert!(!s.is_single());
    }

    #[test]
    fn test_empty_time_axis() {
        // A record with zero frames has no elements at all.
        assert_eq!(Shape::from((40, 0)).elem_count(), 0);
    }

    #[test]
    fn test_display() {
        let s = Shape::from((2, 40, 500, 1));
        assert_eq!(format!("{}", s), "[2, 40, 500, 1]");
    }
}
