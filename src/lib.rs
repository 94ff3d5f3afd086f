//! Two-dimensional `f32` tensors with explicit host/device residency
//!
//! A [`Tensor`] starts out in host memory and can be moved onto a [`Device`] with
//! [`Tensor::to_device`]. Every operation exists twice, once in
//! [`tensor::cpu`] for host-resident tensors and once in [`tensor::gpu`] for
//! device-resident ones, with identical validation and results. The methods on
//! [`Tensor`] pick the matching set from the receiver's residency.

pub mod device;
pub mod error;
pub mod tensor;

// Re-export commonly used types for convenience
pub use device::{Device, DeviceConfig};
pub use error::{DeviceError, ErrorKind, Result, TensorError};
pub use tensor::{Axis, HostArray, Residency, Tensor};
