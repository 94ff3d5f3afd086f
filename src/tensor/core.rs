use std::fmt;

use rand::distributions::Uniform;
use rand::prelude::Distribution;
use rand::Rng;
use tracing::{instrument, trace};

use crate::device::{Device, DeviceBuffer};
use crate::error::{Result, TensorError};

/// Which physical memory holds the authoritative copy of a tensor's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    Host,
    Device,
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Residency::Host => write!(f, "host"),
            Residency::Device => write!(f, "device"),
        }
    }
}

/// Independent row-major copy of a tensor's contents, as produced by [`Tensor::export_copy`]
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    pub data: Vec<f32>,
    /// `[rows, cols]`
    pub shape: [usize; 2],
    /// Byte strides: `[cols * 4, 4]`
    pub strides: [usize; 2],
}

/// A 2-D `f32` tensor resident either in host memory or on a [`Device`].
///
/// Both buffers are optional and owned exclusively by the tensor; the residency tag
/// selects which one is authoritative. Only the residency transfers allocate or free
/// either side. A buffer left behind by a transfer is kept for reuse by the next
/// transfer in the opposite direction.
pub struct Tensor {
    rows: usize,
    cols: usize,
    host: Option<Vec<f32>>,
    device: Option<DeviceBuffer>,
    residency: Residency,
}

impl Tensor {
    pub(crate) fn from_host_parts(data: Vec<f32>, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Tensor {
            rows,
            cols,
            host: Some(data),
            device: None,
            residency: Residency::Host,
        }
    }

    pub(crate) fn from_device_parts(buffer: DeviceBuffer, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(buffer.len(), rows * cols);
        Tensor {
            rows,
            cols,
            host: None,
            device: Some(buffer),
            residency: Residency::Device,
        }
    }

    /// Create a host tensor filled with zeros
    ///
    /// # Panics
    /// * If `rows * cols` overflows `usize`
    #[instrument(level = "trace")]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::full(rows, cols, 0.0)
    }

    /// Create a host tensor filled with `value`
    ///
    /// # Panics
    /// * If `rows * cols` overflows `usize`
    #[instrument(level = "trace")]
    pub fn full(rows: usize, cols: usize, value: f32) -> Self {
        Tensor::from_host_parts(vec![value; element_count(rows, cols)], rows, cols)
    }

    /// Create a host tensor by copying `rows * cols` floats out of `data`
    #[instrument(skip(data), fields(len = data.len()))]
    pub fn from_slice(data: &[f32], rows: usize, cols: usize) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(TensorError::BufferLength {
                len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Tensor::from_host_parts(data.to_vec(), rows, cols))
    }

    /// Create a host tensor with values drawn uniformly from [0, 1)
    ///
    /// # Panics
    /// * If `rows * cols` overflows `usize`
    pub fn rand(rows: usize, cols: usize) -> Self {
        Self::uniform(rows, cols, 0.0, 1.0)
    }

    /// Create a host tensor with values drawn uniformly from [low, high)
    ///
    /// # Panics
    /// * If `low >= high`
    /// * If `rows * cols` overflows `usize`
    #[instrument(level = "trace")]
    pub fn uniform(rows: usize, cols: usize, low: f32, high: f32) -> Self {
        Self::uniform_with_rng(rows, cols, low, high, &mut rand::thread_rng())
    }

    /// Like [`Tensor::uniform`] with a caller-supplied generator, for reproducible data.
    /// Panics under the same conditions.
    pub fn uniform_with_rng<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Self {
        let uniform = Uniform::new(low, high);
        let data = (0..element_count(rows, cols))
            .map(|_| uniform.sample(rng))
            .collect();
        Tensor::from_host_parts(data, rows, cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    /// Size of the tensor's data in bytes
    pub fn nbytes(&self) -> usize {
        self.numel() * std::mem::size_of::<f32>()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn is_host_resident(&self) -> bool {
        self.residency == Residency::Host
    }

    pub fn is_device_resident(&self) -> bool {
        self.residency == Residency::Device
    }

    /// Whether a host buffer is allocated, authoritative or not
    pub fn has_host_buffer(&self) -> bool {
        self.host.is_some()
    }

    /// Whether a device buffer is allocated, authoritative or not
    pub fn has_device_buffer(&self) -> bool {
        self.device.is_some()
    }

    /// The device holding this tensor's device buffer, if any
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref().map(DeviceBuffer::device)
    }

    pub(crate) fn require(&self, op: &'static str, expected: Residency) -> Result<()> {
        if self.residency == expected {
            Ok(())
        } else {
            Err(TensorError::Residency {
                op,
                expected,
                found: self.residency,
            })
        }
    }

    pub(crate) fn host_data(&self, op: &'static str) -> Result<&[f32]> {
        self.require(op, Residency::Host)?;
        Ok(self.host.as_deref().unwrap_or_default())
    }

    pub(crate) fn host_data_mut(&mut self, op: &'static str) -> Result<&mut [f32]> {
        self.require(op, Residency::Host)?;
        Ok(self.host.as_deref_mut().unwrap_or_default())
    }

    pub(crate) fn device_buffer(&self, op: &'static str) -> Result<&DeviceBuffer> {
        self.require(op, Residency::Device)?;
        self.device.as_ref().ok_or(TensorError::Residency {
            op,
            expected: Residency::Device,
            found: Residency::Host,
        })
    }

    pub(crate) fn device_buffer_mut(&mut self, op: &'static str) -> Result<&mut DeviceBuffer> {
        self.require(op, Residency::Device)?;
        self.device.as_mut().ok_or(TensorError::Residency {
            op,
            expected: Residency::Device,
            found: Residency::Host,
        })
    }

    /// Borrow the host data. Fails unless the tensor is host-resident.
    pub fn as_slice(&self) -> Result<&[f32]> {
        self.host_data("as_slice")
    }

    pub fn to_vec(&self) -> Result<Vec<f32>> {
        Ok(self.host_data("to_vec")?.to_vec())
    }

    /// Independent row-major copy of the host data. Fails unless host-resident.
    #[instrument(skip(self), fields(shape = ?self.shape()))]
    pub fn export_copy(&self) -> Result<HostArray> {
        let data = self.host_data("export_copy")?.to_vec();
        let elem = std::mem::size_of::<f32>();
        Ok(HostArray {
            data,
            shape: [self.rows, self.cols],
            strides: [self.cols * elem, elem],
        })
    }

    /// Move the authoritative copy to the process-wide device. No-op when already there.
    pub fn to_device(&mut self) -> Result<()> {
        if self.is_device_resident() {
            return Ok(());
        }
        let device = Device::global()?;
        self.to_device_on(&device)
    }

    /// Move the authoritative copy to `device`. No-op when already device-resident.
    ///
    /// A device buffer retained from an earlier round trip is reused when it belongs
    /// to `device`; otherwise a new one is allocated and the old one released. On
    /// failure the tensor is left untouched.
    #[instrument(skip(self, device), fields(shape = ?self.shape(), device = device.id()))]
    pub fn to_device_on(&mut self, device: &Device) -> Result<()> {
        if self.is_device_resident() {
            return Ok(());
        }
        let host = self.host.as_deref().unwrap_or_default();

        let reusable = matches!(&self.device, Some(buffer) if buffer.device().same_device(device));
        if reusable {
            if let Some(buffer) = self.device.as_mut() {
                buffer.copy_from_host(host);
            }
        } else {
            self.device = Some(device.alloc_copy(host)?);
        }

        self.residency = Residency::Device;
        trace!(rows = self.rows, cols = self.cols, "moved to device");
        Ok(())
    }

    /// Move the authoritative copy back to host memory. No-op when already there.
    #[instrument(skip(self), fields(shape = ?self.shape()))]
    pub fn to_host(&mut self) -> Result<()> {
        if self.is_host_resident() {
            return Ok(());
        }
        let numel = self.numel();
        let Some(buffer) = self.device.as_ref() else {
            return Err(TensorError::Residency {
                op: "to_host",
                expected: Residency::Device,
                found: Residency::Host,
            });
        };

        let mut host = self.host.take().unwrap_or_default();
        host.resize(numel, 0.0);
        buffer.copy_to_host(&mut host);

        self.host = Some(host);
        self.residency = Residency::Host;
        trace!(rows = self.rows, cols = self.cols, "moved to host");
        Ok(())
    }

    /// Release the device buffer, if any.
    ///
    /// Refused while the tensor is device-resident, since the device buffer is then
    /// the only valid copy of the data.
    #[instrument(skip(self), fields(shape = ?self.shape()))]
    pub fn free_device(&mut self) -> Result<()> {
        self.require("free_device", Residency::Host)?;
        if let Some(buffer) = self.device.take() {
            trace!(bytes = buffer.nbytes(), "freed device buffer");
        }
        Ok(())
    }
}

/// `rows * cols`, panicking when the shape cannot be addressed
fn element_count(rows: usize, cols: usize) -> usize {
    rows.checked_mul(cols)
        .unwrap_or_else(|| panic!("tensor shape {rows}x{cols} overflows usize"))
}

impl Drop for Tensor {
    fn drop(&mut self) {
        let host = self.host.take();
        let device = self.device.take();
        if host.is_some() || device.is_some() {
            trace!(
                rows = self.rows,
                cols = self.cols,
                host = host.is_some(),
                device = device.is_some(),
                "releasing tensor"
            );
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("residency", &self.residency)
            .field("host_buffer", &self.host.is_some())
            .field("device_buffer", &self.device.is_some())
            .finish()
    }
}

const PREVIEW_EDGE: usize = 3;

fn preview_indices(extent: usize) -> (Vec<usize>, bool) {
    if extent <= 2 * PREVIEW_EDGE {
        ((0..extent).collect(), false)
    } else {
        let head = 0..PREVIEW_EDGE;
        let tail = extent - PREVIEW_EDGE..extent;
        (head.chain(tail).collect(), true)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({}x{}, {})", self.rows, self.cols, self.residency)?;

        let data = match (&self.residency, self.host.as_deref()) {
            (Residency::Host, Some(data)) => data,
            _ => return write!(f, " <data on device>"),
        };

        let (row_idx, rows_elided) = preview_indices(self.rows);
        let (col_idx, cols_elided) = preview_indices(self.cols);

        writeln!(f)?;
        write!(f, "[")?;
        for (n, &r) in row_idx.iter().enumerate() {
            if n > 0 {
                write!(f, ",\n ")?;
            }
            if rows_elided && n == PREVIEW_EDGE {
                write!(f, "...,\n ")?;
            }
            write!(f, "[")?;
            for (m, &c) in col_idx.iter().enumerate() {
                if m > 0 {
                    write!(f, ", ")?;
                }
                if cols_elided && m == PREVIEW_EDGE {
                    write!(f, "..., ")?;
                }
                write!(f, "{:.4}", data[r * self.cols + c])?;
            }
            write!(f, "]")?;
        }
        write!(f, "]")
    }
}
