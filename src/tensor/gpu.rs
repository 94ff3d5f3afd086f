//! Device operation set
//!
//! The same catalog as [`crate::tensor::cpu`] with the residency requirement inverted.
//! Each routine validates its arguments, allocates the output on the operands'
//! device, launches one kernel with an execution unit per output element and waits
//! for it to finish. The result is device-resident.

use tracing::instrument;

use crate::device::{Device, DeviceBuffer};
use crate::error::{DeviceError, Result};
use crate::tensor::kernels::{gpu as kernels, BinaryOp, GemmParams, UnaryOp};
use crate::tensor::ops::{self, Axis};
use crate::tensor::Tensor;

/// Device shared by two operand buffers
fn common_device<'a>(lhs: &'a DeviceBuffer, rhs: &DeviceBuffer) -> Result<&'a Device> {
    let device = lhs.device();
    if !device.same_device(rhs.device()) {
        return Err(DeviceError::DeviceMismatch {
            lhs: device.id(),
            rhs: rhs.device().id(),
        }
        .into());
    }
    Ok(device)
}

/// Allocate a `rows x cols` output on `device` and fill it with one launch of `body`.
fn run<K>(
    device: &Device,
    kernel: &'static str,
    [rows, cols]: [usize; 2],
    body: K,
) -> Result<Tensor>
where
    K: Fn(usize) -> f32 + Sync,
{
    let mut out = device.alloc(rows * cols)?;
    device.launch(kernel, &mut out, body)?;
    Ok(Tensor::from_device_parts(out, rows, cols))
}

fn binary(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let name = op.name();
    let (lhs, rhs) = (a.device_buffer(name)?, b.device_buffer(name)?);
    ops::same_shape(name, a.shape(), b.shape())?;
    let device = common_device(lhs, rhs)?;

    let body = kernels::binary(op, lhs.kernel_input(), rhs.kernel_input());
    run(device, name, a.shape(), body)
}

fn unary(op: UnaryOp, a: &Tensor) -> Result<Tensor> {
    let buffer = a.device_buffer(op.name())?;
    let body = kernels::unary(op, buffer.kernel_input());
    run(buffer.device(), op.name(), a.shape(), body)
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

#[instrument(skip(a, grad), fields(shape = ?a.shape()))]
pub fn relu_grad(a: &Tensor, grad: &Tensor) -> Result<Tensor> {
    let (x, g) = (a.device_buffer("relu_grad")?, grad.device_buffer("relu_grad")?);
    ops::same_shape("relu_grad", a.shape(), grad.shape())?;
    let device = common_device(x, g)?;

    let body = kernels::relu_backward(x.kernel_input(), g.kernel_input());
    run(device, "relu_grad", a.shape(), body)
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn transpose(a: &Tensor) -> Result<Tensor> {
    let buffer = a.device_buffer("transpose")?;
    let body = kernels::transpose(buffer.kernel_input(), a.shape());
    run(buffer.device(), "transpose", [a.cols(), a.rows()], body)
}

#[instrument(skip(a, b), fields(shape_a = ?a.shape(), shape_b = ?b.shape()))]
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (lhs, rhs) = (a.device_buffer("matmul")?, b.device_buffer("matmul")?);
    let out_shape = ops::matmul_shape(a.shape(), b.shape())?;
    let device = common_device(lhs, rhs)?;

    let params = GemmParams {
        a_data: lhs.kernel_input(),
        a_shape: a.shape(),
        b_data: rhs.kernel_input(),
        b_shape: b.shape(),
    };
    run(device, "matmul", out_shape, kernels::matmul(params))
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn sum(a: &Tensor, axis: usize) -> Result<Tensor> {
    let buffer = a.device_buffer("sum")?;
    let axis = Axis::parse("sum", axis)?;
    let out_shape = ops::reduced_shape(a.shape(), axis);

    let body = kernels::sum(buffer.kernel_input(), a.shape(), axis);
    run(buffer.device(), "sum", out_shape, body)
}

/// Maximum along `axis` and its index as `f32`; ties resolve to the lowest index.
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn max(a: &Tensor, axis: usize) -> Result<(Tensor, Tensor)> {
    let buffer = a.device_buffer("max")?;
    let axis = Axis::parse("max", axis)?;
    let [rows, cols] = ops::max_shape("max", a.shape(), axis)?;
    let device = buffer.device();

    let mut values = device.alloc(rows * cols)?;
    let mut indices = device.alloc(rows * cols)?;
    let body = kernels::max(buffer.kernel_input(), a.shape(), axis);
    device.launch_pair("max", &mut values, &mut indices, body)?;

    Ok((
        Tensor::from_device_parts(values, rows, cols),
        Tensor::from_device_parts(indices, rows, cols),
    ))
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn broadcast(a: &Tensor, axis: usize, dim: usize) -> Result<Tensor> {
    let buffer = a.device_buffer("broadcast")?;
    let axis = Axis::parse("broadcast", axis)?;
    let out_shape = ops::broadcast_shape("broadcast", a.shape(), axis, dim)?;

    let body = kernels::broadcast(buffer.kernel_input(), out_shape[1], axis);
    run(buffer.device(), "broadcast", out_shape, body)
}

/// See [`crate::tensor::cpu::axial_mask`].
#[instrument(skip(a, idx), fields(shape = ?a.shape(), idx_shape = ?idx.shape()))]
pub fn axial_mask(a: &Tensor, idx: &Tensor, axis: usize) -> Result<Tensor> {
    let (src, index) = (a.device_buffer("axial_mask")?, idx.device_buffer("axial_mask")?);
    let axis = Axis::parse("axial_mask", axis)?;
    ops::mask_index_shape("axial_mask", a.shape(), idx.shape(), axis)?;
    let device = common_device(src, index)?;

    let body = kernels::axial_mask(src.kernel_input(), index.kernel_input(), a.shape(), axis);
    run(device, "axial_mask", a.shape(), body)
}

/// Overwrite `a` with zeros in place, reusing its device buffer
#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn set_zero(a: &mut Tensor) -> Result<()> {
    let buffer = a.device_buffer_mut("set_zero")?;
    let device = buffer.device().clone();
    device.launch("set_zero", buffer, kernels::fill(0.0))?;
    Ok(())
}

#[instrument(skip(a), fields(shape = ?a.shape()))]
pub fn copy(a: &Tensor) -> Result<Tensor> {
    let buffer = a.device_buffer("copy")?;
    run(buffer.device(), "copy", a.shape(), kernels::copy(buffer.kernel_input()))
}
