//! Validation shared by the host and device operation sets
//!
//! Both sets parse axes and compute output shapes through the functions here, so
//! they reject exactly the same inputs with exactly the same errors. Everything in
//! this module runs before any output is allocated.

use crate::error::{Result, TensorError};

/// One of the two dimensions of a tensor.
///
/// `Rows` is axis 0: reducing over it collapses every column to a single value.
/// `Cols` is axis 1: reducing over it collapses every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Rows,
    Cols,
}

impl Axis {
    pub fn parse(op: &'static str, axis: usize) -> Result<Self> {
        match axis {
            0 => Ok(Axis::Rows),
            1 => Ok(Axis::Cols),
            _ => Err(TensorError::InvalidAxis { op, axis }),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::Rows => 0,
            Axis::Cols => 1,
        }
    }

    /// Extent of `shape` along this axis
    pub fn extent(self, shape: [usize; 2]) -> usize {
        shape[self.index()]
    }
}

/// Element-wise operands must have identical shapes.
pub(crate) fn same_shape(op: &'static str, lhs: [usize; 2], rhs: [usize; 2]) -> Result<()> {
    if lhs == rhs {
        Ok(())
    } else {
        Err(TensorError::ShapeMismatch { op, lhs, rhs })
    }
}

/// Shape left after reducing `shape` along `axis`, keeping the reduced dimension as 1.
pub(crate) fn reduced_shape([rows, cols]: [usize; 2], axis: Axis) -> [usize; 2] {
    match axis {
        Axis::Rows => [1, cols],
        Axis::Cols => [rows, 1],
    }
}

/// Output shape of `max`, which has no identity element to return for an empty slice.
pub(crate) fn max_shape(op: &'static str, shape: [usize; 2], axis: Axis) -> Result<[usize; 2]> {
    let out = reduced_shape(shape, axis);
    if axis.extent(shape) == 0 && out[0] * out[1] > 0 {
        return Err(TensorError::EmptyReduction { op });
    }
    Ok(out)
}

pub(crate) fn matmul_shape(lhs: [usize; 2], rhs: [usize; 2]) -> Result<[usize; 2]> {
    let [m, k1] = lhs;
    let [k2, n] = rhs;
    if k1 != k2 {
        return Err(TensorError::MatmulDimMismatch { m, k1, k2, n });
    }
    Ok([m, n])
}

pub(crate) fn broadcast_shape(
    op: &'static str,
    shape: [usize; 2],
    axis: Axis,
    dim: usize,
) -> Result<[usize; 2]> {
    let extent = axis.extent(shape);
    if extent != 1 || dim == 0 {
        return Err(TensorError::InvalidBroadcast {
            op,
            axis: axis.index(),
            extent,
            target: dim,
        });
    }
    let mut out = shape;
    out[axis.index()] = dim;
    Ok(out)
}

/// Index tensors for `axial_mask` have the shape of a reduction of the masked tensor.
pub(crate) fn mask_index_shape(
    op: &'static str,
    shape: [usize; 2],
    idx_shape: [usize; 2],
    axis: Axis,
) -> Result<()> {
    same_shape(op, reduced_shape(shape, axis), idx_shape)
}
