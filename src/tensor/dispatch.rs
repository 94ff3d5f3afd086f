//! Operation methods on [`Tensor`] that pick the host or device routine from the
//! receiver's residency. Any other tensor argument must share that residency, or
//! the selected routine rejects it with a residency error.

use crate::error::Result;
use crate::tensor::{cpu, gpu, Residency, Tensor};

impl Tensor {
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::add(self, other),
            Residency::Device => gpu::add(self, other),
        }
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::sub(self, other),
            Residency::Device => gpu::sub(self, other),
        }
    }

    /// Element-wise product
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::mul(self, other),
            Residency::Device => gpu::mul(self, other),
        }
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::div(self, other),
            Residency::Device => gpu::div(self, other),
        }
    }

    pub fn neg(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::neg(self),
            Residency::Device => gpu::neg(self),
        }
    }

    pub fn exp(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::exp(self),
            Residency::Device => gpu::exp(self),
        }
    }

    pub fn log(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::log(self),
            Residency::Device => gpu::log(self),
        }
    }

    pub fn pow(&self, val: f32) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::pow(self, val),
            Residency::Device => gpu::pow(self, val),
        }
    }

    pub fn relu(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::relu(self),
            Residency::Device => gpu::relu(self),
        }
    }

    /// Gradient of relu at `self`, applied to the upstream `grad`
    pub fn relu_grad(&self, grad: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::relu_grad(self, grad),
            Residency::Device => gpu::relu_grad(self, grad),
        }
    }

    pub fn transpose(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::transpose(self),
            Residency::Device => gpu::transpose(self),
        }
    }

    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::matmul(self, other),
            Residency::Device => gpu::matmul(self, other),
        }
    }

    pub fn sum(&self, axis: usize) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::sum(self, axis),
            Residency::Device => gpu::sum(self, axis),
        }
    }

    /// `(values, indices)` of the maximum along `axis`
    pub fn max(&self, axis: usize) -> Result<(Tensor, Tensor)> {
        match self.residency() {
            Residency::Host => cpu::max(self, axis),
            Residency::Device => gpu::max(self, axis),
        }
    }

    pub fn broadcast(&self, axis: usize, dim: usize) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::broadcast(self, axis, dim),
            Residency::Device => gpu::broadcast(self, axis, dim),
        }
    }

    pub fn axial_mask(&self, idx: &Tensor, axis: usize) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::axial_mask(self, idx, axis),
            Residency::Device => gpu::axial_mask(self, idx, axis),
        }
    }

    pub fn set_zero(&mut self) -> Result<()> {
        match self.residency() {
            Residency::Host => cpu::set_zero(self),
            Residency::Device => gpu::set_zero(self),
        }
    }

    /// Deep copy on the same side of the host/device boundary
    pub fn copy(&self) -> Result<Tensor> {
        match self.residency() {
            Residency::Host => cpu::copy(self),
            Residency::Device => gpu::copy(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceConfig};
    use crate::error::ErrorKind;

    #[test]
    fn test_dispatch_follows_residency() {
        let device = Device::new(DeviceConfig::builtin().with_memory_limit(1 << 20)).unwrap();
        let a = Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();

        let host = a.add(&a).unwrap().sum(1).unwrap();
        assert!(host.is_host_resident());

        let mut d = a.copy().unwrap();
        d.to_device_on(&device).unwrap();
        let mut dev = d.add(&d).unwrap().sum(1).unwrap();
        assert!(dev.is_device_resident());

        dev.to_host().unwrap();
        assert_eq!(dev.to_vec().unwrap(), host.to_vec().unwrap());
    }

    #[test]
    fn test_mixed_residency_is_rejected() {
        let device = Device::new(DeviceConfig::builtin().with_memory_limit(1 << 20)).unwrap();
        let host = Tensor::zeros(2, 2);
        let mut dev = Tensor::zeros(2, 2);
        dev.to_device_on(&device).unwrap();

        assert_eq!(host.matmul(&dev).unwrap_err().kind(), ErrorKind::Residency);
        assert_eq!(dev.matmul(&host).unwrap_err().kind(), ErrorKind::Residency);
        assert_eq!(dev.axial_mask(&host, 0).unwrap_err().kind(), ErrorKind::Residency);
    }
}
