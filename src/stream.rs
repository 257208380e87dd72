//! Append-only linear command buffer
//!
//! A [`LinearStream`] wraps a host-mapped [`GpuAllocation`] and hands out
//! exact byte reservations from a monotonically advancing cursor. A failed
//! reservation leaves the cursor untouched; nothing is ever truncated or
//! overwritten.

use crate::allocation::GpuAllocation;
use crate::gfx::GpuCmd;
use crate::{Error, Result};

pub struct LinearStream {
    allocation: GpuAllocation,
    used: usize,
}

impl LinearStream {
    /// Wrap a host-mapped allocation as an empty command stream
    pub fn new(allocation: GpuAllocation) -> Result<Self> {
        if !allocation.is_host_mapped() {
            return Err(Error::NotHostMapped);
        }
        Ok(Self {
            allocation,
            used: 0,
        })
    }

    /// Reserve `size` bytes and return the writable region
    pub fn get_space(&mut self, size: usize) -> Result<&mut [u8]> {
        let available = self.available();
        if size > available {
            return Err(Error::OutOfStreamSpace {
                requested: size,
                available,
            });
        }

        let start = self.used;
        self.used += size;

        let bytes = self.allocation.bytes_mut().ok_or(Error::NotHostMapped)?;
        Ok(&mut bytes[start..start + size])
    }

    /// Reserve space for one instruction record and encode it, dword by
    /// dword, little-endian.
    pub fn write_cmd<C: GpuCmd>(&mut self, cmd: &C) -> Result<()> {
        debug_assert_eq!(C::SIZE, cmd.dwords().len() * 4);

        let space = self.get_space(C::SIZE)?;
        for (slot, dw) in space.chunks_exact_mut(4).zip(cmd.dwords()) {
            slot.copy_from_slice(&dw.to_le_bytes());
        }
        Ok(())
    }

    /// Bytes written so far
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still reservable
    pub fn available(&self) -> usize {
        self.allocation.size() - self.used
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.allocation.size()
    }

    /// Backing allocation
    pub fn allocation(&self) -> &GpuAllocation {
        &self.allocation
    }

    /// GPU virtual address of the stream's first byte
    pub fn gpu_address(&self) -> u64 {
        self.allocation.gpu_address()
    }

    /// Read view of everything written so far
    pub fn written(&self) -> &[u8] {
        match self.allocation.bytes() {
            Some(bytes) => &bytes[..self.used],
            None => &[],
        }
    }
}
