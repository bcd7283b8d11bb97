//! Tensor trait consumed by the selector

use crate::dtype::DType;

/// Shape and precision introspection for a (device-resident) numeric buffer.
///
/// Backends implement this for their own tensor type; the selection checks in
/// [`crate::select`] only ever look at the shape and element type.
pub trait Tensor {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the data type of tensor elements
    fn dtype(&self) -> DType;

    /// Size of dimension `axis`. Negative axes count from the end, so
    /// `dim(-1)` is the innermost dimension.
    ///
    /// # Panics
    /// Panics if `axis` is out of range for the tensor's rank.
    fn dim(&self, axis: isize) -> usize {
        let shape = self.shape();
        let rank = shape.len();
        let idx = if axis < 0 {
            rank.checked_sub(axis.unsigned_abs())
        } else {
            Some(axis.unsigned_abs()).filter(|&i| i < rank)
        };
        match idx {
            Some(i) => shape[i],
            None => panic!("axis {axis} out of range for tensor of shape {shape:?}"),
        }
    }

    /// Returns the total number of elements in the tensor
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Returns the size of the tensor data in bytes
    fn size_in_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }
}
