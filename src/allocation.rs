//! GPU-visible memory allocations
//!
//! A [`GpuAllocation`] pairs a stable 64-bit GPU virtual address with an
//! optional host mapping. The [`GpuAllocator`] hands out page-aligned
//! addresses from a fixed range, bump-style, the same way the GTT space is
//! carved up for GEM objects.

use alloc::boxed::Box;
use alloc::vec;
use bitflags::bitflags;

use crate::{Error, Result};

/// GPU page size; allocation addresses are aligned to this.
pub const PAGE_SIZE: usize = 4096;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocationFlags: u32 {
        /// Allocation is host-mapped and writable from the CPU
        const CPU_ACCESS = 1 << 0;
        /// Allocation is visible to the GPU
        const GPU_ACCESS = 1 << 1;
    }
}

/// A block of GPU-visible memory
///
/// The GPU virtual address is stable for the allocation's lifetime. Writes
/// through the host mapping become visible to the GPU only after whatever
/// synchronization the owning submission pipeline performs.
pub struct GpuAllocation {
    gpu_address: u64,
    size: usize,
    flags: AllocationFlags,
    storage: Option<Box<[u8]>>,
}

impl GpuAllocation {
    /// GPU virtual address of the first byte
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Underlying size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> AllocationFlags {
        self.flags
    }

    /// Host pointer, if the allocation is CPU-accessible
    pub fn cpu_ptr(&self) -> Option<*const u8> {
        self.storage.as_ref().map(|s| s.as_ptr())
    }

    pub fn is_host_mapped(&self) -> bool {
        self.storage.is_some()
    }

    /// Host-mapped contents
    pub fn bytes(&self) -> Option<&[u8]> {
        self.storage.as_deref()
    }

    /// Mutable host-mapped contents
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.storage.as_deref_mut()
    }

    /// Write one little-endian dword through the host mapping
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let bytes = self.bytes_mut().ok_or(Error::NotHostMapped)?;
        match bytes.get_mut(offset..offset + 4) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            None => Err(Error::OutOfBounds {
                offset,
                size: self.size,
            }),
        }
    }

    /// Read one little-endian dword through the host mapping
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = self.bytes().ok_or(Error::NotHostMapped)?;
        match bytes.get(offset..offset + 4) {
            Some(slot) => {
                let mut dw = [0u8; 4];
                dw.copy_from_slice(slot);
                Ok(u32::from_le_bytes(dw))
            }
            None => Err(Error::OutOfBounds {
                offset,
                size: self.size,
            }),
        }
    }
}

struct BumpState {
    next: u64,
    end: u64,
}

/// Page-aligned bump allocator over a GPU virtual address range
///
/// Independent composers for concurrent submissions may share one allocator;
/// the bump state sits behind a lock for that reason, not because any single
/// allocation is ever handed to two owners.
pub struct GpuAllocator {
    inner: spin::Mutex<BumpState>,
}

impl GpuAllocator {
    /// Create an allocator over `[base, base + size)`; `base` must be
    /// page-aligned.
    pub fn new(base: u64, size: u64) -> Self {
        debug_assert_eq!(base % PAGE_SIZE as u64, 0);
        Self {
            inner: spin::Mutex::new(BumpState {
                next: base,
                end: base + size,
            }),
        }
    }

    /// Allocate `size` bytes of GPU-visible memory
    ///
    /// The returned allocation reports the requested size; the address range
    /// consumed is rounded up to a page.
    pub fn alloc(&self, size: usize, flags: AllocationFlags) -> Result<GpuAllocation> {
        let aligned = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

        let gpu_address = {
            let mut state = self.inner.lock();
            if state.next + aligned as u64 > state.end {
                return Err(Error::OutOfGpuMemory);
            }
            let address = state.next;
            state.next += aligned as u64;
            address
        };

        let storage = if flags.contains(AllocationFlags::CPU_ACCESS) {
            Some(vec![0u8; size].into_boxed_slice())
        } else {
            None
        };

        log::trace!(
            "alloc: {} bytes at {:#x} ({:?})",
            size,
            gpu_address,
            flags
        );

        Ok(GpuAllocation {
            gpu_address,
            size,
            flags,
            storage,
        })
    }
}
