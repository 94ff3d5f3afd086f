//! Host operation set
//!
//! Synchronous routines over host-resident tensors. Every tensor argument must be
//! host-resident and every routine returns a new host-resident tensor, except
//! [`set_zero`] which overwrites its argument in place.

use tracing::instrument;

use crate::error::Result;
use crate::tensor::kernels::{
    cpu_gemm, mask_index, relu_grad as relu_grad_scalar, BinaryOp, UnaryOp,
};
use crate::tensor::ops::{self, Axis};
use crate::tensor::Tensor;

fn binary(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let name = op.name();
    let (lhs, rhs) = (a.host_data(name)?, b.host_data(name)?);
    ops::same_shape(name, a.shape(), b.shape())?;

    let data = lhs.iter().zip(rhs).map(|(&x, &y)| op.apply(x, y)).collect();
    Ok(Tensor::from_host_parts(data, a.rows(), a.cols()))
}

fn unary(op: UnaryOp, a: &Tensor) -> Result<Tensor> {
    let data = a.host_data(op.name())?.iter().map(|&x| op.apply(x)).collect();
    Ok(Tensor::from_host_parts(data, a.rows(), a.cols()))
}

#[instrument(skip(a, b), fields(lhs = ?a.shape(), rhs = ?b.shape()))]
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary(BinaryOp::Add, a, b)
}

#[instrument(skip(a, b), fields(lhs = ?a.shape(), rhs = ?b.shape()))]
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary(BinaryOp::Sub, a, b)
}

#[instrument(skip(a, b), fields(lhs = ?a.shape(), rhs = ?b.shape()))]
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary(BinaryOp::Mul, a, b)
}

#[instrument(skip(a, b), fields(lhs = ?a.shape(), rhs = ?b.shape()))]
pub fn div(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    binary(BinaryOp::Div, a, b)
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn neg(a: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Neg, a)
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn exp(a: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Exp, a)
}

/// Natural logarithm
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn log(a: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Log, a)
}

#[instrument(skip(a), fields(shape = ?a.shape(), exponent = val))]
pub fn pow(a: &Tensor, val: f32) -> Result<Tensor> {
    unary(UnaryOp::Pow(val), a)
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn relu(a: &Tensor) -> Result<Tensor> {
    unary(UnaryOp::Relu, a)
}

/// `grad` masked to the positions where `a` is positive
#[instrument(skip(a, grad), fields(shape = ?a.shape()))]
pub fn relu_grad(a: &Tensor, grad: &Tensor) -> Result<Tensor> {
    let (x, g) = (a.host_data("relu_grad")?, grad.host_data("relu_grad")?);
    ops::same_shape("relu_grad", a.shape(), grad.shape())?;

    let data = x.iter().zip(g).map(|(&x, &g)| relu_grad_scalar(x, g)).collect();
    Ok(Tensor::from_host_parts(data, a.rows(), a.cols()))
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn transpose(a: &Tensor) -> Result<Tensor> {
    let src = a.host_data("transpose")?;
    let (rows, cols) = (a.rows(), a.cols());

    let mut data = vec![0.0; src.len()];
    for r in 0..rows {
        for c in 0..cols {
            data[c * rows + r] = src[r * cols + c];
        }
    }
    Ok(Tensor::from_host_parts(data, cols, rows))
}

/// Dense product of `a` (`m x k`) and `b` (`k x n`)
#[instrument(skip(a, b), fields(shape_a = ?a.shape(), shape_b = ?b.shape()))]
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (lhs, rhs) = (a.host_data("matmul")?, b.host_data("matmul")?);
    let [m, n] = ops::matmul_shape(a.shape(), b.shape())?;

    let data = cpu_gemm::matmul(lhs, a.shape(), rhs, b.shape());
    Ok(Tensor::from_host_parts(data, m, n))
}

/// Sum along `axis`, keeping it as a dimension of extent 1
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn sum(a: &Tensor, axis: usize) -> Result<Tensor> {
    let src = a.host_data("sum")?;
    let axis = Axis::parse("sum", axis)?;
    let (rows, cols) = (a.rows(), a.cols());
    let [out_rows, out_cols] = ops::reduced_shape(a.shape(), axis);

    let data = match axis {
        Axis::Rows => {
            let mut out = vec![0.0; cols];
            for r in 0..rows {
                for (acc, &x) in out.iter_mut().zip(&src[r * cols..(r + 1) * cols]) {
                    *acc += x;
                }
            }
            out
        }
        Axis::Cols => (0..rows)
            .map(|r| src[r * cols..(r + 1) * cols].iter().fold(0.0, |acc, &x| acc + x))
            .collect(),
    };
    Ok(Tensor::from_host_parts(data, out_rows, out_cols))
}

/// Maximum along `axis` and the index where it occurs, stored as `f32`.
///
/// Ties resolve to the lowest index.
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn max(a: &Tensor, axis: usize) -> Result<(Tensor, Tensor)> {
    let src = a.host_data("max")?;
    let axis = Axis::parse("max", axis)?;
    let [out_rows, out_cols] = ops::max_shape("max", a.shape(), axis)?;
    let (rows, cols) = (a.rows(), a.cols());

    let len = out_rows * out_cols;
    let mut values = Vec::with_capacity(len);
    let mut indices = Vec::with_capacity(len);
    for slice in 0..len {
        let (extent, base, stride) = match axis {
            Axis::Rows => (rows, slice, cols),
            Axis::Cols => (cols, slice * cols, 1),
        };
        let mut best = src[base];
        let mut best_idx = 0usize;
        for i in 1..extent {
            let x = src[base + i * stride];
            if x > best {
                best = x;
                best_idx = i;
            }
        }
        values.push(best);
        indices.push(best_idx as f32);
    }

    Ok((
        Tensor::from_host_parts(values, out_rows, out_cols),
        Tensor::from_host_parts(indices, out_rows, out_cols),
    ))
}

/// Replicate `a` along `axis`, which must have extent 1, to extent `dim`
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn broadcast(a: &Tensor, axis: usize, dim: usize) -> Result<Tensor> {
    let src = a.host_data("broadcast")?;
    let axis = Axis::parse("broadcast", axis)?;
    let [rows, cols] = ops::broadcast_shape("broadcast", a.shape(), axis, dim)?;

    let data = match axis {
        Axis::Rows => src.repeat(rows),
        Axis::Cols => src
            .iter()
            .flat_map(|&x| std::iter::repeat(x).take(cols))
            .collect(),
    };
    Ok(Tensor::from_host_parts(data, rows, cols))
}

/// Keep the element of each slice along `axis` selected by `idx`, zeroing the rest.
///
/// `idx` has the shape of a reduction of `a` along `axis`. A stored index that is
/// negative, fractional or out of range selects nothing, zeroing its whole slice.
#[instrument(skip(a, idx), fields(shape = ?a.shape(), idx_shape = ?idx.shape()))]
pub fn axial_mask(a: &Tensor, idx: &Tensor, axis: usize) -> Result<Tensor> {
    let (src, index) = (a.host_data("axial_mask")?, idx.host_data("axial_mask")?);
    let axis = Axis::parse("axial_mask", axis)?;
    ops::mask_index_shape("axial_mask", a.shape(), idx.shape(), axis)?;
    let (rows, cols) = (a.rows(), a.cols());

    let mut data = vec![0.0; src.len()];
    match axis {
        Axis::Rows => {
            for (c, &i) in index.iter().enumerate() {
                if let Some(r) = mask_index(i, rows) {
                    data[r * cols + c] = src[r * cols + c];
                }
            }
        }
        Axis::Cols => {
            for (r, &i) in index.iter().enumerate() {
                if let Some(c) = mask_index(i, cols) {
                    data[r * cols + c] = src[r * cols + c];
                }
            }
        }
    }
    Ok(Tensor::from_host_parts(data, rows, cols))
}

/// Overwrite `a` with zeros in place
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn set_zero(a: &mut Tensor) -> Result<()> {
    a.host_data_mut("set_zero")?.fill(0.0);
    Ok(())
}

/// Deep copy of `a`
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn copy(a: &Tensor) -> Result<Tensor> {
    let data = a.host_data("copy")?.to_vec();
    Ok(Tensor::from_host_parts(data, a.rows(), a.cols()))
}
