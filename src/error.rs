use thiserror::Error;

use crate::tensor::Residency;

/// Broad classification of a [`TensorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An argument lives on the wrong side of the host/device boundary.
    Residency,
    /// Dimensions are incompatible with the operation.
    Shape,
    /// Invalid axis, or invalid broadcast target along an axis.
    Axis,
    /// Device allocation or kernel launch failed.
    Device,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("{op}: tensor is resident on {found}, expected {expected}")]
    Residency {
        op: &'static str,
        expected: Residency,
        found: Residency,
    },

    #[error("{op}: shape mismatch, {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: [usize; 2],
        rhs: [usize; 2],
    },

    #[error("matmul dimension mismatch: [{m}x{k1}] @ [{k2}x{n}]")]
    MatmulDimMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    #[error("buffer of {len} floats cannot back a {rows}x{cols} tensor")]
    BufferLength { len: usize, rows: usize, cols: usize },

    #[error("{op}: cannot reduce over an empty axis")]
    EmptyReduction { op: &'static str },

    #[error("{op}: invalid axis {axis}, expected 0 or 1")]
    InvalidAxis { op: &'static str, axis: usize },

    #[error("{op}: cannot broadcast axis {axis} of extent {extent} to {target}")]
    InvalidBroadcast {
        op: &'static str,
        axis: usize,
        extent: usize,
        target: usize,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl TensorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TensorError::Residency { .. } => ErrorKind::Residency,
            TensorError::ShapeMismatch { .. }
            | TensorError::MatmulDimMismatch { .. }
            | TensorError::BufferLength { .. }
            | TensorError::EmptyReduction { .. } => ErrorKind::Shape,
            TensorError::InvalidAxis { .. } | TensorError::InvalidBroadcast { .. } => {
                ErrorKind::Axis
            }
            TensorError::Device(_) => ErrorKind::Device,
        }
    }
}

/// Failures of the device runtime. Fatal to the operation that hit them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device out of memory: requested {requested} bytes, {available} of {capacity} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    #[error("invalid launch configuration for {kernel}: grid {grid} x block {block} over {elems} elements")]
    InvalidLaunch {
        kernel: &'static str,
        grid: u64,
        block: u32,
        elems: usize,
    },

    #[error("block size {block} exceeds device limit of {limit} threads")]
    BlockTooLarge { block: u32, limit: u32 },

    #[error("operands live on different devices ({lhs} and {rhs})")]
    DeviceMismatch { lhs: usize, rhs: usize },

    #[error("failed to start device runtime: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
