//! Gen12 (Xe-class) instruction encodings
//!
//! The barrier and batch buffer records are unchanged from Gen9; only
//! MI_SEMAPHORE_WAIT grew a wait-token dword.

use super::{CompareOp, GfxFamily, GpuCmd, SemaphoreWaitCmd, split_address};

pub use super::gen9::{BatchBufferEnd, BatchBufferStart, PipeControl};

/// MI_SEMAPHORE_WAIT: MI opcode 0x1c, polling mode, 5 dwords on Gen12
const SEMAPHORE_WAIT_HEADER: u32 = (0x1c << 23) | (1 << 15) | (5 - 2);
const SW_COMPARE_SHIFT: u32 = 12;
const SW_COMPARE_MASK: u32 = 0x7 << SW_COMPARE_SHIFT;

const ADDRESS_LOW_MASK: u32 = !0x3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SemaphoreWait {
    dw: [u32; 5],
}

impl GpuCmd for SemaphoreWait {
    const SIZE: usize = 20;

    fn dwords(&self) -> &[u32] {
        &self.dw
    }
}

impl SemaphoreWaitCmd for SemaphoreWait {
    fn init() -> Self {
        Self {
            dw: [SEMAPHORE_WAIT_HEADER, 0, 0, 0, 0],
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

/// Gen12 instruction set
pub struct Gen12;

impl GfxFamily for Gen12 {
    const NAME: &'static str = "gen12";

    type PipeControl = PipeControl;
    type SemaphoreWait = SemaphoreWait;
    type BatchBufferStart = BatchBufferStart;
    type BatchBufferEnd = BatchBufferEnd;
}
