mod core;
mod dispatch;
pub mod cpu;
pub mod gpu;
mod kernels;
pub mod ops;

pub use self::core::{HostArray, Residency, Tensor};
pub use ops::Axis;
