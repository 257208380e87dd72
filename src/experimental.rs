//! Experimental command buffer: timestamp-bracketed instrumentation
//!
//! [`ExperimentalCommandBuffer`] owns a dedicated command stream, a
//! timestamp store, and a semaphore flag allocation. Each call to
//! [`program`](ExperimentalCommandBuffer::program) appends one self-contained
//! sequence to the stream:
//!
//! 1. stall + timestamp write (begin)
//! 2. the experimental payload (a satisfied semaphore wait here)
//! 3. stall + timestamp write (end)
//! 4. batch buffer end
//!
//! The stalls drain the pipeline before each timestamp sample, so the delta
//! between the two slots is the payload's execution latency, not pipeline
//! overlap. `inject_buffer_start` then splices a second-level jump into the
//! primary stream so hardware execution reaches the sequence.
//!
//! The semaphore flag is written as satisfied before the wait that polls it
//! is emitted. It is instrumentation bookkeeping, not a synchronization
//! primitive; nothing may rely on it for cross-thread correctness.

use core::marker::PhantomData;

use crate::allocation::{AllocationFlags, GpuAllocation, GpuAllocator, PAGE_SIZE};
use crate::gfx::{
    split_address, BatchBufferEndCmd, BatchBufferStartCmd, CompareOp, GfxFamily, GpuCmd,
    PipeControlCmd, PostSyncOp, SemaphoreWaitCmd,
};
use crate::stream::LinearStream;
use crate::{Error, Result};

/// One 64-bit timestamp slot
const TIMESTAMP_SLOT: usize = core::mem::size_of::<u64>();

/// Value written into the flag allocation and compared by the semaphore wait
const SEMAPHORE_SENTINEL: u32 = 1;

pub struct ExperimentalCommandBuffer<F: GfxFamily> {
    stream: LinearStream,
    timestamps: GpuAllocation,
    timestamps_offset: usize,
    experimental: GpuAllocation,
    experimental_offset: usize,
    _family: PhantomData<F>,
}

impl<F: GfxFamily> ExperimentalCommandBuffer<F> {
    /// Build a composer over caller-provided resources
    ///
    /// The flag allocation must be host-mapped; the sentinel is written
    /// through its CPU pointer at encode time.
    pub fn new(
        stream: LinearStream,
        timestamps: GpuAllocation,
        experimental: GpuAllocation,
    ) -> Result<Self> {
        if !experimental.is_host_mapped() {
            return Err(Error::NotHostMapped);
        }

        log::debug!(
            "{}: experimental command buffer: stream {} bytes, timestamps {} bytes",
            F::NAME,
            stream.capacity(),
            timestamps.size()
        );

        Ok(Self {
            stream,
            timestamps,
            timestamps_offset: 0,
            experimental,
            experimental_offset: 0,
            _family: PhantomData,
        })
    }

    /// Allocate backing memory for `timed_passes` instrumented sequences
    pub fn allocate(allocator: &GpuAllocator, timed_passes: usize) -> Result<Self> {
        let both = AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS;

        let stream_alloc = allocator.alloc(timed_passes * Self::required_total_size(), both)?;
        let timestamps =
            allocator.alloc(timed_passes * 2 * TIMESTAMP_SLOT, AllocationFlags::GPU_ACCESS)?;
        let experimental = allocator.alloc(PAGE_SIZE, both)?;

        Self::new(LinearStream::new(stream_alloc)?, timestamps, experimental)
    }

    /// Exact byte size of one programmed sequence
    pub fn required_total_size() -> usize {
        Self::timestamp_pipe_control_size()
            + Self::experimental_commands_size()
            + F::BatchBufferEnd::SIZE
    }

    /// Size of the begin and end timestamp brackets together
    ///
    /// Two PIPE_CONTROLs per timestamp: one stall-only ahead of the one that
    /// stalls and requests the post-sync write.
    pub fn timestamp_pipe_control_size() -> usize {
        4 * F::PipeControl::SIZE
    }

    /// Size of the payload between the brackets
    pub fn experimental_commands_size() -> usize {
        F::SemaphoreWait::SIZE
    }

    /// Size a caller must budget in the primary stream for the injected jump
    pub fn required_injection_size() -> usize {
        F::BatchBufferStart::SIZE
    }

    /// Append one instrumented sequence and return its offset in the stream
    ///
    /// The offset is the stream's used count before anything is written; it
    /// is what `inject_buffer_start` takes to target this sequence. Capacity
    /// of both the stream and the timestamp store is checked before the
    /// first write, so a failed call leaves every buffer untouched.
    pub fn program(&mut self) -> Result<usize> {
        let total = Self::required_total_size();
        let available = self.stream.available();
        if total > available {
            return Err(Error::OutOfStreamSpace {
                requested: total,
                available,
            });
        }

        // Two slots per pass: begin and end.
        if self.timestamps_offset + 2 * TIMESTAMP_SLOT > self.timestamps.size() {
            return Err(Error::TimestampStoreExhausted {
                offset: self.timestamps_offset,
                capacity: self.timestamps.size(),
            });
        }

        let return_offset = self.stream.used();

        // begin timestamp
        self.add_timestamp_pipe_control()?;

        self.add_experimental_commands()?;

        // end timestamp
        self.add_timestamp_pipe_control()?;

        self.stream.write_cmd(&F::BatchBufferEnd::init())?;

        debug_assert_eq!(self.stream.used() - return_offset, total);

        log::trace!(
            "{}: programmed {} bytes at offset {}",
            F::NAME,
            total,
            return_offset
        );

        Ok(return_offset)
    }

    /// Write a second-level batch buffer start into `parent` targeting the
    /// sequence at `cmd_buffer_offset` in this composer's stream
    ///
    /// The parent must have pre-budgeted `required_injection_size()` bytes;
    /// on capacity exhaustion the parent stream is left untouched.
    pub fn inject_buffer_start(
        &self,
        parent: &mut LinearStream,
        cmd_buffer_offset: usize,
    ) -> Result<()> {
        let target = self.stream.gpu_address() + cmd_buffer_offset as u64;

        let mut cmd = F::BatchBufferStart::init();
        cmd.set_batch_buffer_address(target);
        cmd.set_second_level(true);
        parent.write_cmd(&cmd)?;

        log::trace!("{}: injected batch buffer start to {:#x}", F::NAME, target);
        Ok(())
    }

    /// Allocations the submission pipeline must make resident before the
    /// injected sequence executes
    pub fn residency_allocations(&self) -> [&GpuAllocation; 3] {
        [
            self.stream.allocation(),
            &self.timestamps,
            &self.experimental,
        ]
    }

    /// The composer's command stream
    pub fn stream(&self) -> &LinearStream {
        &self.stream
    }

    /// The timestamp store
    pub fn timestamps(&self) -> &GpuAllocation {
        &self.timestamps
    }

    /// Next unwritten byte offset in the timestamp store
    pub fn timestamps_offset(&self) -> usize {
        self.timestamps_offset
    }

    fn add_timestamp_pipe_control(&mut self) -> Result<()> {
        // Stall-only control ahead of the sampling one, so the sample sees a
        // drained pipeline.
        let mut cmd = F::PipeControl::init();
        cmd.set_cs_stall(true);
        self.stream.write_cmd(&cmd)?;

        let timestamp_address = self.timestamps.gpu_address() + self.timestamps_offset as u64;
        let (low, high) = split_address(timestamp_address);

        let mut cmd = F::PipeControl::init();
        cmd.set_cs_stall(true);
        cmd.set_post_sync_operation(PostSyncOp::WriteTimestamp);
        cmd.set_address(low);
        cmd.set_address_high(high);
        self.stream.write_cmd(&cmd)?;

        self.timestamps_offset += TIMESTAMP_SLOT;
        debug_assert!(self.timestamps_offset <= self.timestamps.size());

        Ok(())
    }

    fn add_experimental_commands(&mut self) -> Result<()> {
        // The wait condition is satisfied before the wait is emitted; the
        // hardware polls once and proceeds.
        self.experimental
            .write_u32(self.experimental_offset, SEMAPHORE_SENTINEL)?;
        let semaphore_address = self.experimental.gpu_address() + self.experimental_offset as u64;

        let mut cmd = F::SemaphoreWait::init();
        cmd.set_compare_operation(CompareOp::SadEqualSdd);
        cmd.set_semaphore_data(SEMAPHORE_SENTINEL);
        cmd.set_semaphore_address(semaphore_address);
        self.stream.write_cmd(&cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{gen12::Gen12, gen9::Gen9};

    const GPU_BASE: u64 = 0x0000_0045_0000_0000;

    fn allocator() -> GpuAllocator {
        GpuAllocator::new(GPU_BASE, 64 * 1024 * 1024)
    }

    fn dw(bytes: &[u8], index: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
        u32::from_le_bytes(buf)
    }

    fn parent_stream(allocator: &GpuAllocator) -> LinearStream {
        let alloc = allocator
            .alloc(
                PAGE_SIZE,
                AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS,
            )
            .unwrap();
        LinearStream::new(alloc).unwrap()
    }

    #[test]
    fn test_required_size_matches_bytes_written_gen9() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 4).unwrap();

        let before = ecb.stream().used();
        ecb.program().unwrap();

        assert_eq!(
            ecb.stream().used() - before,
            ExperimentalCommandBuffer::<Gen9>::required_total_size()
        );
    }

    #[test]
    fn test_required_size_matches_bytes_written_gen12() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen12>::allocate(&allocator, 4).unwrap();

        let before = ecb.stream().used();
        ecb.program().unwrap();

        assert_eq!(
            ecb.stream().used() - before,
            ExperimentalCommandBuffer::<Gen12>::required_total_size()
        );
    }

    #[test]
    fn test_generations_differ_in_payload_size() {
        // Gen12's semaphore wait carries a wait token dword
        assert_eq!(
            ExperimentalCommandBuffer::<Gen12>::required_total_size(),
            ExperimentalCommandBuffer::<Gen9>::required_total_size() + 4
        );
    }

    #[test]
    fn test_program_returns_prior_cursor() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 3).unwrap();
        let total = ExperimentalCommandBuffer::<Gen9>::required_total_size();

        assert_eq!(ecb.program().unwrap(), 0);
        assert_eq!(ecb.program().unwrap(), total);
        assert_eq!(ecb.program().unwrap(), 2 * total);
    }

    #[test]
    fn test_timestamp_offset_advances_two_slots_per_pass() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 3).unwrap();

        assert_eq!(ecb.timestamps_offset(), 0);
        ecb.program().unwrap();
        assert_eq!(ecb.timestamps_offset(), 16);
        ecb.program().unwrap();
        assert_eq!(ecb.timestamps_offset(), 32);
    }

    #[test]
    fn test_timestamp_addresses_bracket_the_payload() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 2).unwrap();
        ecb.program().unwrap();

        let bytes = ecb.stream().written();
        let ts = ecb.timestamps().gpu_address();
        let (begin_low, begin_high) = split_address(ts);
        let (end_low, end_high) = split_address(ts + 8);

        // Sequence layout in dwords: PC(6) PC(6) SW(4) PC(6) PC(6) BBE(1).
        // The sampling control is the second of each pair.
        assert_eq!(dw(bytes, 6 + 2), begin_low);
        assert_eq!(dw(bytes, 6 + 3), begin_high);
        assert_eq!(dw(bytes, 22 + 2), end_low);
        assert_eq!(dw(bytes, 22 + 3), end_high);

        // Both sampling controls request a timestamp write and stall
        for pc in [6, 22] {
            let flags = dw(bytes, pc + 1);
            assert_eq!(flags & (1 << 20), 1 << 20);
            assert_eq!((flags >> 14) & 0x3, 3);
        }
    }

    #[test]
    fn test_semaphore_payload_matches_flag_allocation() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 2).unwrap();
        ecb.program().unwrap();

        let [_, _, flag] = ecb.residency_allocations();
        assert_eq!(flag.read_u32(0).unwrap(), 1);

        let bytes = ecb.stream().written();
        let (low, high) = split_address(flag.gpu_address());

        // Semaphore wait starts after the begin bracket (two PIPE_CONTROLs)
        let sw = 12;
        assert_eq!(dw(bytes, sw + 1), 1);
        assert_eq!(dw(bytes, sw + 2), low);
        assert_eq!(dw(bytes, sw + 3), high);
        // COMPARE_OPERATION == SAD_EQUAL_SDD
        assert_eq!((dw(bytes, sw) >> 12) & 0x7, 4);
    }

    #[test]
    fn test_inject_buffer_start_targets_sequence() {
        let allocator = allocator();
        let mut ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 2).unwrap();
        let mut parent = parent_stream(&allocator);

        ecb.program().unwrap();
        let offset = ecb.program().unwrap();
        ecb.inject_buffer_start(&mut parent, offset).unwrap();

        assert_eq!(
            parent.used(),
            ExperimentalCommandBuffer::<Gen9>::required_injection_size()
        );

        let target = ecb.stream().gpu_address() + offset as u64;
        let (low, high) = split_address(target);
        let bytes = parent.written();

        // Second-level flag set in the header
        assert_eq!(dw(bytes, 0) & (1 << 22), 1 << 22);
        assert_eq!(dw(bytes, 1), low & !0x3);
        assert_eq!(dw(bytes, 2), high);
        // The target crosses 32 bits; the high half must be non-zero
        assert_ne!(high, 0);
    }

    #[test]
    fn test_inject_requires_parent_capacity() {
        let allocator = allocator();
        let ecb = ExperimentalCommandBuffer::<Gen9>::allocate(&allocator, 1).unwrap();

        let alloc = allocator
            .alloc(
                4,
                AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS,
            )
            .unwrap();
        let mut parent = LinearStream::new(alloc).unwrap();

        let err = ecb.inject_buffer_start(&mut parent, 0).unwrap_err();
        assert!(matches!(err, Error::OutOfStreamSpace { .. }));
        assert_eq!(parent.used(), 0);
    }

    #[test]
    fn test_undersized_timestamp_store_rejected() {
        let allocator = allocator();
        let both = AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS;

        let stream_alloc = allocator.alloc(PAGE_SIZE, both).unwrap();
        // Room for one slot only; a pass needs two
        let timestamps = allocator.alloc(8, AllocationFlags::GPU_ACCESS).unwrap();
        let flag = allocator.alloc(PAGE_SIZE, both).unwrap();

        let mut ecb = ExperimentalCommandBuffer::<Gen9>::new(
            LinearStream::new(stream_alloc).unwrap(),
            timestamps,
            flag,
        )
        .unwrap();

        let err = ecb.program().unwrap_err();
        assert_eq!(
            err,
            Error::TimestampStoreExhausted {
                offset: 0,
                capacity: 8
            }
        );
        assert_eq!(ecb.stream().used(), 0);
        assert_eq!(ecb.timestamps_offset(), 0);
    }

    #[test]
    fn test_repeat_pass_exhausts_timestamp_store() {
        let allocator = allocator();
        let both = AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS;

        let stream_alloc = allocator.alloc(PAGE_SIZE, both).unwrap();
        // Exactly one pass worth of slots
        let timestamps = allocator.alloc(16, AllocationFlags::GPU_ACCESS).unwrap();
        let flag = allocator.alloc(PAGE_SIZE, both).unwrap();

        let mut ecb = ExperimentalCommandBuffer::<Gen9>::new(
            LinearStream::new(stream_alloc).unwrap(),
            timestamps,
            flag,
        )
        .unwrap();

        ecb.program().unwrap();
        let used_after_first = ecb.stream().used();

        let err = ecb.program().unwrap_err();
        assert!(matches!(err, Error::TimestampStoreExhausted { .. }));
        assert_eq!(ecb.stream().used(), used_after_first);
    }

    #[test]
    fn test_exact_fit_stream_is_fully_consumed() {
        let allocator = allocator();
        let both = AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS;
        let total = ExperimentalCommandBuffer::<Gen9>::required_total_size();

        let stream_alloc = allocator.alloc(total, both).unwrap();
        let timestamps = allocator.alloc(64, AllocationFlags::GPU_ACCESS).unwrap();
        let flag = allocator.alloc(PAGE_SIZE, both).unwrap();

        let mut ecb = ExperimentalCommandBuffer::<Gen9>::new(
            LinearStream::new(stream_alloc).unwrap(),
            timestamps,
            flag,
        )
        .unwrap();

        assert_eq!(ecb.program().unwrap(), 0);
        assert_eq!(ecb.stream().used(), ecb.stream().capacity());

        let err = ecb.program().unwrap_err();
        assert_eq!(
            err,
            Error::OutOfStreamSpace {
                requested: total,
                available: 0
            }
        );
    }

    #[test]
    fn test_unmapped_flag_allocation_rejected() {
        let allocator = allocator();
        let both = AllocationFlags::CPU_ACCESS | AllocationFlags::GPU_ACCESS;

        let stream_alloc = allocator.alloc(PAGE_SIZE, both).unwrap();
        let timestamps = allocator.alloc(64, AllocationFlags::GPU_ACCESS).unwrap();
        let flag = allocator.alloc(64, AllocationFlags::GPU_ACCESS).unwrap();

        let err = ExperimentalCommandBuffer::<Gen9>::new(
            LinearStream::new(stream_alloc).unwrap(),
            timestamps,
            flag,
        )
        .err();

        assert_eq!(err, Some(Error::NotHostMapped));
    }

    #[test]
    fn test_residency_set_covers_all_backing_memory() {
        let allocator = allocator();
        let ecb = ExperimentalCommandBuffer::<Gen12>::allocate(&allocator, 1).unwrap();

        let allocations = ecb.residency_allocations();
        assert_eq!(allocations.len(), 3);
        assert_eq!(allocations[0].gpu_address(), ecb.stream().gpu_address());
        assert_eq!(allocations[1].gpu_address(), ecb.timestamps().gpu_address());
    }
}
