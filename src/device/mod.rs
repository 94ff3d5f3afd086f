//! Device runtime
//!
//! The execution substrate that device-resident tensors live on. A [`Device`] owns a
//! bounded memory pool and a dedicated worker pool. Memory handed out as a
//! [`DeviceBuffer`] is not readable from host code; data only crosses the boundary
//! through the explicit copy routines used by the residency transfers. Kernels run as
//! a grid of blocks with one execution unit per output element, and a launch blocks
//! the caller until every unit has finished.

mod config;

pub use config::{DeviceConfig, MemorySize, ParseMemorySizeError, MAX_THREADS_PER_BLOCK};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;
use tracing::{debug, debug_span, trace};

use crate::error::DeviceError;

/// Largest grid accepted by a launch.
const MAX_GRID_DIM: u64 = (1 << 31) - 1;

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

/// Handle to a device runtime. Cloning shares the same runtime.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: usize,
    config: DeviceConfig,
    allocated: AtomicUsize,
    pool: rayon::ThreadPool,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(move |i| format!("tensorlib-device{id}-{i}"))
            .build()
            .map_err(|e| DeviceError::Runtime(e.to_string()))?;

        debug!(
            device = id,
            memory_limit = config.memory_limit,
            block_size = config.block_size,
            workers = pool.current_num_threads(),
            "device runtime started"
        );

        Ok(Device {
            inner: Arc::new(DeviceInner {
                id,
                config,
                allocated: AtomicUsize::new(0),
                pool,
            }),
        })
    }

    /// Process-wide device, built on first use from [`DeviceConfig::default`].
    ///
    /// A failed start is not remembered; the next call tries again.
    pub fn global() -> Result<Device, DeviceError> {
        static GLOBAL: OnceLock<Device> = OnceLock::new();
        get_or_try_init(&GLOBAL, || {
            debug_span!("InitializeDevice").in_scope(|| Device::new(DeviceConfig::default()))
        })
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    pub fn available_bytes(&self) -> usize {
        self.inner
            .config
            .memory_limit
            .saturating_sub(self.allocated_bytes())
    }

    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn reserve(&self, len: usize) -> Result<usize, DeviceError> {
        let capacity = self.inner.config.memory_limit;
        let Some(bytes) = len.checked_mul(std::mem::size_of::<f32>()) else {
            return Err(DeviceError::OutOfMemory {
                requested: usize::MAX,
                available: self.available_bytes(),
                capacity,
            });
        };

        self.inner
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= capacity)
            })
            .map_err(|used| DeviceError::OutOfMemory {
                requested: bytes,
                available: capacity.saturating_sub(used),
                capacity,
            })?;

        trace!(device = self.inner.id, bytes, "device alloc");
        Ok(bytes)
    }

    fn release(&self, bytes: usize) {
        self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
        trace!(device = self.inner.id, bytes, "device free");
    }

    /// Allocate a zero-filled buffer of `len` floats.
    pub(crate) fn alloc(&self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        self.reserve(len)?;
        Ok(DeviceBuffer {
            data: vec![0.0; len].into_boxed_slice(),
            device: self.clone(),
        })
    }

    /// Allocate a buffer and fill it with a host-to-device copy of `src`.
    pub(crate) fn alloc_copy(&self, src: &[f32]) -> Result<DeviceBuffer, DeviceError> {
        self.reserve(src.len())?;
        Ok(DeviceBuffer {
            data: src.into(),
            device: self.clone(),
        })
    }

    fn launch_config(
        &self,
        kernel: &'static str,
        elems: usize,
    ) -> Result<LaunchConfig, DeviceError> {
        let config = LaunchConfig::for_num_elems(elems, self.inner.config.block_size);
        config.validate(kernel, elems, self.inner.config.max_threads_per_block)?;
        Ok(config)
    }

    /// Run `body` once per element of `out`, writing each unit's result to its slot.
    pub(crate) fn launch<K>(
        &self,
        kernel: &'static str,
        out: &mut DeviceBuffer,
        body: K,
    ) -> Result<(), DeviceError>
    where
        K: Fn(usize) -> f32 + Sync,
    {
        debug_assert!(self.same_device(&out.device));
        let elems = out.len();
        let config = self.launch_config(kernel, elems)?;
        if elems == 0 {
            return Ok(());
        }

        let _span = debug_span!(
            "KernelLaunch",
            kernel,
            grid = config.grid_dim,
            block = config.block_dim,
            elems
        )
        .entered();

        let block = config.block_dim as usize;
        let data: &mut [f32] = &mut out.data;
        let body = &body;
        self.inner.pool.install(|| {
            data.par_chunks_mut(block)
                .enumerate()
                .for_each(|(block_idx, lanes)| {
                    let base = block_idx * block;
                    for (thread_idx, slot) in lanes.iter_mut().enumerate() {
                        *slot = body(base + thread_idx);
                    }
                });
        });
        Ok(())
    }

    /// Like [`Device::launch`] for kernels producing two outputs per unit.
    pub(crate) fn launch_pair<K>(
        &self,
        kernel: &'static str,
        first: &mut DeviceBuffer,
        second: &mut DeviceBuffer,
        body: K,
    ) -> Result<(), DeviceError>
    where
        K: Fn(usize) -> (f32, f32) + Sync,
    {
        debug_assert_eq!(first.len(), second.len());
        let elems = first.len();
        let config = self.launch_config(kernel, elems)?;
        if elems == 0 {
            return Ok(());
        }

        let _span = debug_span!(
            "KernelLaunch",
            kernel,
            grid = config.grid_dim,
            block = config.block_dim,
            elems
        )
        .entered();

        let block = config.block_dim as usize;
        let first: &mut [f32] = &mut first.data;
        let second: &mut [f32] = &mut second.data;
        let body = &body;
        self.inner.pool.install(|| {
            first
                .par_chunks_mut(block)
                .zip(second.par_chunks_mut(block))
                .enumerate()
                .for_each(|(block_idx, (lanes_a, lanes_b))| {
                    let base = block_idx * block;
                    let lanes = lanes_a.iter_mut().zip(lanes_b.iter_mut());
                    for (thread_idx, (a, b)) in lanes.enumerate() {
                        (*a, *b) = body(base + thread_idx);
                    }
                });
        });
        Ok(())
    }
}

/// Populate `cell` from `init` unless it already holds a device. Errors leave it empty.
///
/// Concurrent first calls may each build a device; only one is kept.
fn get_or_try_init<F>(cell: &OnceLock<Device>, init: F) -> Result<Device, DeviceError>
where
    F: FnOnce() -> Result<Device, DeviceError>,
{
    if let Some(device) = cell.get() {
        return Ok(device.clone());
    }
    let device = init()?;
    Ok(cell.get_or_init(|| device).clone())
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}

/// Grid/block shape of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: u64,
    pub block_dim: u32,
}

impl LaunchConfig {
    /// Smallest grid of `block_dim`-wide blocks covering `elems` units.
    pub fn for_num_elems(elems: usize, block_dim: u32) -> Self {
        let grid_dim = if block_dim == 0 {
            0
        } else {
            (elems as u64).div_ceil(block_dim as u64)
        };
        LaunchConfig {
            grid_dim,
            block_dim,
        }
    }

    pub fn validate(
        &self,
        kernel: &'static str,
        elems: usize,
        max_threads_per_block: u32,
    ) -> Result<(), DeviceError> {
        if self.block_dim > max_threads_per_block {
            return Err(DeviceError::BlockTooLarge {
                block: self.block_dim,
                limit: max_threads_per_block,
            });
        }
        let covered = self.grid_dim.saturating_mul(self.block_dim as u64);
        if self.block_dim == 0 || self.grid_dim > MAX_GRID_DIM || covered < elems as u64 {
            return Err(DeviceError::InvalidLaunch {
                kernel,
                grid: self.grid_dim,
                block: self.block_dim,
                elems,
            });
        }
        Ok(())
    }
}

/// Memory owned on a [`Device`]. Returned to the device's pool on drop.
pub struct DeviceBuffer {
    data: Box<[f32]>,
    device: Device,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn nbytes(&self) -> usize {
        std::mem::size_of_val(&*self.data)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Host-to-device copy into this allocation.
    pub(crate) fn copy_from_host(&mut self, src: &[f32]) {
        self.data.copy_from_slice(src);
    }

    /// Device-to-host copy out of this allocation.
    pub(crate) fn copy_to_host(&self, dst: &mut [f32]) {
        dst.copy_from_slice(&self.data);
    }

    /// Read view handed to kernel bodies.
    pub(crate) fn kernel_input(&self) -> &[f32] {
        &self.data
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.release(self.nbytes());
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len())
            .field("device", &self.device.id())
            .finish()
    }
}
