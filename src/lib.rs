//! Command stream timing instrumentation for Intel GPU drivers
//!
//! This crate builds a self-contained, timestamp-bracketed instruction
//! sequence in a dedicated command buffer and splices it into an already
//! finalized primary command stream via a second-level batch buffer start.
//! The interval between the two hardware timestamps measures how long the
//! bracketed payload actually spent executing, free of pipeline overlap.
//!
//! # Architecture
//!
//! - [`allocation`] - GPU-visible memory allocations and a GTT-style bump
//!   allocator
//! - [`stream`] - append-only linear command buffer with exact reservation
//!   accounting
//! - [`gfx`] - per-generation hardware instruction encodings (PIPE_CONTROL,
//!   MI_SEMAPHORE_WAIT, MI_BATCH_BUFFER_START/END)
//! - [`experimental`] - the instrumented command buffer composer and the
//!   batch buffer start injector
//!
//! # Usage
//!
//! ```ignore
//! use cmdtrace::{ExperimentalCommandBuffer, Gen12, GpuAllocator};
//!
//! let allocator = GpuAllocator::new(0x1_0000_0000, 64 * 1024 * 1024);
//! let mut ecb = ExperimentalCommandBuffer::<Gen12>::allocate(&allocator, 16)?;
//!
//! let offset = ecb.program()?;
//! ecb.inject_buffer_start(&mut primary_stream, offset)?;
//! ```

#![no_std]

extern crate alloc;

pub mod allocation;
pub mod experimental;
pub mod gfx;
pub mod stream;

// Re-exports
pub use allocation::{AllocationFlags, GpuAllocation, GpuAllocator, PAGE_SIZE};
pub use experimental::ExperimentalCommandBuffer;
pub use gfx::{gen12::Gen12, gen9::Gen9, CompareOp, GfxFamily, GpuCmd, PostSyncOp};
pub use stream::LinearStream;

/// Result type for cmdtrace operations
pub type Result<T> = core::result::Result<T, Error>;

/// cmdtrace error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Reservation exceeds the remaining capacity of a linear stream
    OutOfStreamSpace { requested: usize, available: usize },
    /// Timestamp store cannot hold another timing pass
    TimestampStoreExhausted { offset: usize, capacity: usize },
    /// GPU address space exhausted
    OutOfGpuMemory,
    /// Access past the end of an allocation
    OutOfBounds { offset: usize, size: usize },
    /// Operation requires a host mapping the allocation does not have
    NotHostMapped,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfStreamSpace {
                requested,
                available,
            } => write!(
                f,
                "Out of stream space: requested {} bytes, {} available",
                requested, available
            ),
            Error::TimestampStoreExhausted { offset, capacity } => write!(
                f,
                "Timestamp store exhausted: offset {} of {} bytes",
                offset, capacity
            ),
            Error::OutOfGpuMemory => write!(f, "Out of GPU memory"),
            Error::OutOfBounds { offset, size } => write!(
                f,
                "Access at offset {} past the end of a {}-byte allocation",
                offset, size
            ),
            Error::NotHostMapped => write!(f, "Allocation is not host-mapped"),
        }
    }
}
