//! Hardware instruction encodings, per GPU generation
//!
//! Each supported generation provides fixed-size instruction records with
//! typed field setters. The set of generations is closed and selected at
//! compile time through [`GfxFamily`]; nothing here dispatches at runtime.
//!
//! Records are arrays of dwords. Field setters mask and shift into the
//! hardware-defined bit positions; `init()` yields the generation's default
//! template with the header dword (command type, opcode, length) already
//! encoded.

pub mod gen12;
pub mod gen9;

/// Fixed-size hardware instruction record
pub trait GpuCmd: Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Raw dword view, written little-endian into a command stream
    fn dwords(&self) -> &[u32];
}

/// PIPE_CONTROL post-sync operation field values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PostSyncOp {
    NoWrite = 0,
    WriteImmediateData = 1,
    WriteTimestamp = 3,
}

/// MI_SEMAPHORE_WAIT compare operation field values
///
/// SAD is the semaphore address data (the polled memory dword), SDD the
/// semaphore data dword carried in the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompareOp {
    SadGreaterThanSdd = 0,
    SadGreaterThanOrEqualSdd = 1,
    SadLessThanSdd = 2,
    SadLessThanOrEqualSdd = 3,
    SadEqualSdd = 4,
    SadNotEqualSdd = 5,
}

/// Encode a 64-bit GPU address as (low, high) dword halves
///
/// Instruction address fields are 32 bits wide regardless of host pointer
/// width; the split is a serialization concern, done in exactly one place.
pub fn split_address(address: u64) -> (u32, u32) {
    ((address & 0xffff_ffff) as u32, (address >> 32) as u32)
}

/// Pipeline control / barrier instruction
pub trait PipeControlCmd: GpuCmd {
    fn init() -> Self;
    /// Stall the command streamer until the pipeline drains
    fn set_cs_stall(&mut self, enable: bool);
    fn set_post_sync_operation(&mut self, op: PostSyncOp);
    /// Low 32 bits of the post-sync write address
    fn set_address(&mut self, low: u32);
    /// High 32 bits of the post-sync write address
    fn set_address_high(&mut self, high: u32);
}

/// Semaphore wait instruction: poll a GPU address until the comparison holds
pub trait SemaphoreWaitCmd: GpuCmd {
    fn init() -> Self;
    fn set_compare_operation(&mut self, op: CompareOp);
    fn set_semaphore_data(&mut self, data: u32);
    fn set_semaphore_address(&mut self, address: u64);
}

/// Batch buffer start: transfer execution into another buffer
pub trait BatchBufferStartCmd: GpuCmd {
    fn init() -> Self;
    fn set_batch_buffer_address(&mut self, address: u64);
    /// Second-level batches nest; the streamer returns to the parent buffer
    /// rather than replacing the execution context.
    fn set_second_level(&mut self, second_level: bool);
}

/// Batch buffer end: terminate execution of the current buffer
pub trait BatchBufferEndCmd: GpuCmd {
    fn init() -> Self;
}

/// One supported hardware generation's instruction encodings
pub trait GfxFamily {
    const NAME: &'static str;

    type PipeControl: PipeControlCmd;
    type SemaphoreWait: SemaphoreWaitCmd;
    type BatchBufferStart: BatchBufferStartCmd;
    type BatchBufferEnd: BatchBufferEndCmd;
}
