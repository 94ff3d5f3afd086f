//! Device kernel bodies
//!
//! Each constructor returns the per-unit body of one kernel: a closure mapping the
//! global index of an execution unit to the output element it owns. The launcher in
//! [`crate::device`] decides how units are grouped into blocks.

use crate::tensor::kernels::{mask_index, relu_grad, BinaryOp, GemmParams, UnaryOp};
use crate::tensor::ops::Axis;

pub(crate) fn binary<'a>(
    op: BinaryOp,
    a: &'a [f32],
    b: &'a [f32],
) -> impl Fn(usize) -> f32 + Sync + 'a {
    move |gid| op.apply(a[gid], b[gid])
}

pub(crate) fn unary(op: UnaryOp, a: &[f32]) -> impl Fn(usize) -> f32 + Sync + '_ {
    move |gid| op.apply(a[gid])
}

pub(crate) fn relu_backward<'a>(
    a: &'a [f32],
    grad: &'a [f32],
) -> impl Fn(usize) -> f32 + Sync + 'a {
    move |gid| relu_grad(a[gid], grad[gid])
}

/// Output is `cols x rows`; unit `gid` owns output element `(gid / rows, gid % rows)`.
pub(crate) fn transpose(a: &[f32], [rows, cols]: [usize; 2]) -> impl Fn(usize) -> f32 + Sync + '_ {
    move |gid| {
        let (c, r) = (gid / rows, gid % rows);
        a[r * cols + c]
    }
}

pub(crate) fn matmul(params: GemmParams<'_>) -> impl Fn(usize) -> f32 + Sync + '_ {
    let n = params.out_shape()[1];
    move |gid| params.dot(gid / n, gid % n)
}

/// One unit per output slice, summing along `axis` in index order.
pub(crate) fn sum(
    a: &[f32],
    [rows, cols]: [usize; 2],
    axis: Axis,
) -> impl Fn(usize) -> f32 + Sync + '_ {
    move |gid| match axis {
        Axis::Rows => (0..rows).map(|r| a[r * cols + gid]).fold(0.0, |acc, x| acc + x),
        Axis::Cols => a[gid * cols..(gid + 1) * cols].iter().fold(0.0, |acc, &x| acc + x),
    }
}

/// One unit per output slice, producing `(max, argmax)`. The reduced axis is non-empty.
pub(crate) fn max(
    a: &[f32],
    [rows, cols]: [usize; 2],
    axis: Axis,
) -> impl Fn(usize) -> (f32, f32) + Sync + '_ {
    move |gid| {
        let (extent, base, stride) = match axis {
            Axis::Rows => (rows, gid, cols),
            Axis::Cols => (cols, gid * cols, 1),
        };
        let mut best = a[base];
        let mut best_idx = 0;
        for i in 1..extent {
            let value = a[base + i * stride];
            if value > best {
                best = value;
                best_idx = i;
            }
        }
        (best, best_idx as f32)
    }
}

/// Replicate a `1 x cols` (Rows) or `rows x 1` (Cols) input; `out_cols` is the output width.
pub(crate) fn broadcast(
    a: &[f32],
    out_cols: usize,
    axis: Axis,
) -> impl Fn(usize) -> f32 + Sync + '_ {
    move |gid| match axis {
        Axis::Rows => a[gid % out_cols],
        Axis::Cols => a[gid / out_cols],
    }
}

pub(crate) fn axial_mask<'a>(
    a: &'a [f32],
    idx: &'a [f32],
    [rows, cols]: [usize; 2],
    axis: Axis,
) -> impl Fn(usize) -> f32 + Sync + 'a {
    move |gid| {
        let (r, c) = (gid / cols, gid % cols);
        let keep = match axis {
            Axis::Rows => mask_index(idx[c], rows) == Some(r),
            Axis::Cols => mask_index(idx[r], cols) == Some(c),
        };
        if keep {
            a[gid]
        } else {
            0.0
        }
    }
}

pub(crate) fn fill(value: f32) -> impl Fn(usize) -> f32 + Sync {
    move |_| value
}

pub(crate) fn copy(a: &[f32]) -> impl Fn(usize) -> f32 + Sync + '_ {
    move |gid| a[gid]
}
