//! Kernel implementations for tensor operations
//!
//! The scalar building blocks here are shared by the host routines and the device
//! kernel bodies, so both operation sets evaluate every element with the same
//! arithmetic in the same order.

pub mod cpu_gemm;
pub mod gpu;

/// Element-wise binary arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub(crate) fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    #[inline]
    pub(crate) fn apply(self, x: f32, y: f32) -> f32 {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
        }
    }
}

/// Element-wise unary maps
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Neg,
    Exp,
    Log,
    Pow(f32),
    Relu,
}

impl UnaryOp {
    pub(crate) fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Pow(_) => "pow",
            UnaryOp::Relu => "relu",
        }
    }

    #[inline]
    pub(crate) fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Pow(exponent) => x.powf(exponent),
            UnaryOp::Relu => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
        }
    }
}

/// `grad * (x > 0)`
#[inline]
pub(crate) fn relu_grad(x: f32, grad: f32) -> f32 {
    if x > 0.0 {
        grad
    } else {
        0.0
    }
}

/// Interpret a stored index value as a position along an axis of `extent` elements.
///
/// Negative, non-integral, non-finite or out-of-range values name no position.
#[inline]
pub(crate) fn mask_index(value: f32, extent: usize) -> Option<usize> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return None;
    }
    let index = value as usize;
    (index < extent).then_some(index)
}

/// Operands of a dense row-major product `C = A @ B`
///
/// `a_shape` is `[m, k]` and `b_shape` is `[k, n]`; callers validate the inner
/// dimension before building the params.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GemmParams<'a> {
    pub a_data: &'a [f32],
    pub a_shape: [usize; 2],
    pub b_data: &'a [f32],
    pub b_shape: [usize; 2],
}

impl GemmParams<'_> {
    pub(crate) fn out_shape(&self) -> [usize; 2] {
        [self.a_shape[0], self.b_shape[1]]
    }

    /// Inner product of row `i` of A with column `j` of B, accumulated in `p` order.
    #[inline]
    pub(crate) fn dot(&self, i: usize, j: usize) -> f32 {
        let k = self.a_shape[1];
        let n = self.b_shape[1];
        let row = &self.a_data[i * k..(i + 1) * k];
        let mut sum = 0.0;
        for (p, &a) in row.iter().enumerate() {
            sum += a * self.b_data[p * n + j];
        }
        sum
    }
}
