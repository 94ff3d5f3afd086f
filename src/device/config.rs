//! Device runtime configuration
//!
//! Settings can be supplied in code through the builder methods or picked up from
//! the environment when the default configuration is built:
//!
//! - `TENSORLIB_DEVICE_MEMORY` - device memory capacity, e.g. `4096`, `64K`, `256MiB`, `2G`
//! - `TENSORLIB_BLOCK_SIZE` - execution units per block for kernel launches, 1 to 1024
//! - `TENSORLIB_DEVICE_WORKERS` - worker threads backing the device (0 = one per core)

use std::str::FromStr;

/// Upper bound on execution units per block, mirroring common GPU hardware limits.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

const DEFAULT_MEMORY_LIMIT: usize = 1 << 30;
const DEFAULT_BLOCK_SIZE: u32 = 256;

/// A byte count parsed from a human-friendly string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize(pub usize);

/// Error type for memory size parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMemorySizeError;

impl std::fmt::Display for ParseMemorySizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid memory size")
    }
}

impl std::error::Error for ParseMemorySizeError {}

impl FromStr for MemorySize {
    type Err = ParseMemorySizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let value: usize = digits.parse().map_err(|_| ParseMemorySizeError)?;

        let scale: usize = match unit.trim().to_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1 << 10,
            "m" | "mb" | "mib" => 1 << 20,
            "g" | "gb" | "gib" => 1 << 30,
            _ => return Err(ParseMemorySizeError),
        };

        value
            .checked_mul(scale)
            .map(MemorySize)
            .ok_or(ParseMemorySizeError)
    }
}

/// A launchable block size: a number in `1..=MAX_THREADS_PER_BLOCK`
fn parse_block_size(s: &str) -> Option<u32> {
    s.trim()
        .parse()
        .ok()
        .filter(|block| (1..=MAX_THREADS_PER_BLOCK).contains(block))
}

/// Configuration for a device runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Total bytes of device memory that may be allocated at once
    pub memory_limit: usize,
    /// Execution units per block used for kernel launches
    pub block_size: u32,
    /// Launches with a larger block are rejected
    pub max_threads_per_block: u32,
    /// Worker threads executing kernels (0 lets the pool pick one per core)
    pub workers: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let memory_limit = std::env::var("TENSORLIB_DEVICE_MEMORY")
            .ok()
            .and_then(|s| s.parse::<MemorySize>().ok())
            .map(|m| m.0)
            .unwrap_or(DEFAULT_MEMORY_LIMIT);

        let block_size = std::env::var("TENSORLIB_BLOCK_SIZE")
            .ok()
            .and_then(|s| parse_block_size(&s))
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        let workers = std::env::var("TENSORLIB_DEVICE_WORKERS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        Self {
            memory_limit,
            block_size,
            max_threads_per_block: MAX_THREADS_PER_BLOCK,
            workers,
        }
    }
}

impl DeviceConfig {
    /// Built-in defaults, ignoring the environment
    pub fn builtin() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            block_size: DEFAULT_BLOCK_SIZE,
            max_threads_per_block: MAX_THREADS_PER_BLOCK,
            workers: 0,
        }
    }

    pub fn with_memory_limit(self, memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..self
        }
    }

    pub fn with_block_size(self, block_size: u32) -> Self {
        Self { block_size, ..self }
    }

    pub fn with_workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }
}
