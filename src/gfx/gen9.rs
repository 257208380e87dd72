//! Gen9 (Skylake-class) instruction encodings

use super::{
    BatchBufferEndCmd, BatchBufferStartCmd, CompareOp, GfxFamily, GpuCmd, PipeControlCmd,
    PostSyncOp, SemaphoreWaitCmd, split_address,
};

/// PIPE_CONTROL: GFXPIPE, 3D, opcode 2, 6 dwords
const PIPE_CONTROL_HEADER: u32 = (3 << 29) | (3 << 27) | (2 << 24) | (6 - 2);
/// DW1 command streamer stall enable
const PC_CS_STALL: u32 = 1 << 20;
/// DW1 post-sync operation field
const PC_POST_SYNC_SHIFT: u32 = 14;
const PC_POST_SYNC_MASK: u32 = 0x3 << PC_POST_SYNC_SHIFT;

/// MI_SEMAPHORE_WAIT: MI opcode 0x1c, polling mode, 4 dwords
const SEMAPHORE_WAIT_HEADER: u32 = (0x1c << 23) | (1 << 15) | (4 - 2);
const SW_COMPARE_SHIFT: u32 = 12;
const SW_COMPARE_MASK: u32 = 0x7 << SW_COMPARE_SHIFT;

/// MI_BATCH_BUFFER_START: MI opcode 0x31, PPGTT address space, 3 dwords
const BATCH_BUFFER_START_HEADER: u32 = (0x31 << 23) | (1 << 8) | (3 - 2);
/// DW0 second-level batch buffer flag
const BBS_SECOND_LEVEL: u32 = 1 << 22;

/// MI_BATCH_BUFFER_END: MI opcode 0x0a
const BATCH_BUFFER_END_HEADER: u32 = 0x0a << 23;

/// Address fields occupy bits 31:2; the low two bits are reserved.
const ADDRESS_LOW_MASK: u32 = !0x3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PipeControl {
    dw: [u32; 6],
}

impl GpuCmd for PipeControl {
    const SIZE: usize = 24;

    fn dwords(&self) -> &[u32] {
        &self.dw
    }
}

impl PipeControlCmd for PipeControl {
    fn init() -> Self {
        Self {
            dw: [PIPE_CONTROL_HEADER, 0, 0, 0, 0, 0],
        }
    }

    fn set_cs_stall(&mut self, enable: bool) {
        if enable {
            self.dw[1] |= PC_CS_STALL;
        } else {
            self.dw[1] &= !PC_CS_STALL;
        }
    }

    fn set_post_sync_operation(&mut self, op: PostSyncOp) {
        self.dw[1] = (self.dw[1] & !PC_POST_SYNC_MASK) | ((op as u32) << PC_POST_SYNC_SHIFT);
    }

    fn set_address(&mut self, low: u32) {
        self.dw[2] = low & ADDRESS_LOW_MASK;
    }

    fn set_address_high(&mut self, high: u32) {
        self.dw[3] = high;
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SemaphoreWait {
    dw: [u32; 4],
}

impl GpuCmd for SemaphoreWait {
    const SIZE: usize = 16;

    fn dwords(&self) -> &[u32] {
        &self.dw
    }
}

impl SemaphoreWaitCmd for SemaphoreWait {
    fn init() -> Self {
        Self {
            dw: [SEMAPHORE_WAIT_HEADER, 0, 0, 0],
        }
    }

    fn set_compare_operation(&mut self, op: CompareOp) {
        self.dw[0] = (self.dw[0] & !SW_COMPARE_MASK) | ((op as u32) << SW_COMPARE_SHIFT);
    }

    fn set_semaphore_data(&mut self, data: u32) {
        self.dw[1] = data;
    }

    fn set_semaphore_address(&mut self, address: u64) {
        let (low, high) = split_address(address);
        self.dw[2] = low & ADDRESS_LOW_MASK;
        self.dw[3] = high;
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BatchBufferStart {
    dw: [u32; 3],
}

impl GpuCmd for BatchBufferStart {
    const SIZE: usize = 12;

    fn dwords(&self) -> &[u32] {
        &self.dw
    }
}

impl BatchBufferStartCmd for BatchBufferStart {
    fn init() -> Self {
        Self {
            dw: [BATCH_BUFFER_START_HEADER, 0, 0],
        }
    }

    fn set_batch_buffer_address(&mut self, address: u64) {
        let (low, high) = split_address(address);
        self.dw[1] = low & ADDRESS_LOW_MASK;
        self.dw[2] = high;
    }

    fn set_second_level(&mut self, second_level: bool) {
        if second_level {
            self.dw[0] |= BBS_SECOND_LEVEL;
        } else {
            self.dw[0] &= !BBS_SECOND_LEVEL;
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BatchBufferEnd {
    dw: [u32; 1],
}

impl GpuCmd for BatchBufferEnd {
    const SIZE: usize = 4;

    fn dwords(&self) -> &[u32] {
        &self.dw
    }
}

impl BatchBufferEndCmd for BatchBufferEnd {
    fn init() -> Self {
        Self {
            dw: [BATCH_BUFFER_END_HEADER],
        }
    }
}

/// Gen9 instruction set
pub struct Gen9;

impl GfxFamily for Gen9 {
    const NAME: &'static str = "gen9";

    type PipeControl = PipeControl;
    type SemaphoreWait = SemaphoreWait;
    type BatchBufferStart = BatchBufferStart;
    type BatchBufferEnd = BatchBufferEnd;
}
