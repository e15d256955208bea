//! Saving and restoring a running script.
//!
//! A snapshot is three length-prefixed segments:
//!
//! ```text
//! [u32 len][0 .. GFR)     registers, globals
//! [u32 len][HR .. HP)     heap
//! [u32 len][SP .. TM)     stack
//! ```
//!
//! Bytecode is not part of the state; it is restored from the loaded image.

use super::ScriptVm;
use crate::types::encoding::{Decode, Encode};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::registers::{Register, TOP_OF_MEMORY};
use crate::warn;

impl ScriptVm {
    /// Serializes the registers, globals, heap and stack.
    pub fn write_state(&mut self) -> Vec<u8> {
        if self.mem.register(Register::Hp) > TOP_OF_MEMORY {
            self.mem.reset_hp_to_safe_spot();
        }
        let reg = |r| self.mem.register(r);
        let segments = [
            (0, reg(Register::Gfr)),
            (reg(Register::Hr), reg(Register::Hp)),
            (reg(Register::Sp), reg(Register::Tm)),
        ];

        let mut out = Vec::new();
        for (start, end) in segments {
            self.mem.slice(start, end).unwrap_or(&[]).encode(&mut out);
        }
        out
    }

    /// Restores a snapshot written by [`write_state`](ScriptVm::write_state)
    /// and returns the number of bytes consumed.
    ///
    /// The heap and stack are cleared first. A snapshot taken with a different
    /// memory size is rejected with [`VMError::TopOfMemoryMismatch`].
    pub fn read_state(&mut self, data: &[u8]) -> Result<usize, VMError> {
        let mut input = data;
        let registers = Vec::<u8>::decode(&mut input)?;

        let hr = self.mem.register(Register::Hr);
        let tm = self.mem.register(Register::Tm);
        self.mem.zero_range(hr, tm);

        self.restore_segment("registers", 0, &registers)?;
        let tm = self.mem.register(Register::Tm);
        if tm != TOP_OF_MEMORY {
            warn!(
                "script {} state has top of memory {}, expected {}",
                self.ctx.script_id, tm, TOP_OF_MEMORY
            );
            self.mem.reset_hp_to_safe_spot();
            return Err(VMError::TopOfMemoryMismatch {
                found: tm,
                expected: TOP_OF_MEMORY,
            });
        }

        let heap = Vec::<u8>::decode(&mut input)?;
        let hr = self.mem.register(Register::Hr);
        self.restore_segment("heap", hr, &heap)?;

        let stack = Vec::<u8>::decode(&mut input)?;
        let sp = self.mem.register(Register::Sp);
        self.restore_segment("stack", sp, &stack)?;

        self.refresh_layout();
        Ok(data.len() - input.len())
    }

    fn restore_segment(
        &mut self,
        segment: &'static str,
        offset: i32,
        bytes: &[u8],
    ) -> Result<(), VMError> {
        let fits = offset >= 0
            && (offset as usize).saturating_add(bytes.len()) <= TOP_OF_MEMORY as usize;
        if !fits || !self.mem.copy_in(offset, bytes) {
            warn!(
                "script {} {} segment of {} bytes at {} does not fit",
                self.ctx.script_id,
                segment,
                bytes.len(),
                offset
            );
            return Err(VMError::SegmentOutOfBounds {
                segment,
                offset,
                size: bytes.len(),
            });
        }
        Ok(())
    }

    /// Everything below HP: registers, globals, code and heap.
    pub fn write_bytecode(&self) -> Vec<u8> {
        self.mem
            .slice(0, self.mem.register(Register::Hp))
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Restarts the script from the image it was loaded with. Queued events
    /// and a pending reset request are discarded.
    pub fn reset(&mut self) {
        let hr = self.mem.register(Register::Hr);
        let tm = self.mem.register(Register::Tm);
        self.mem.zero_range(hr, tm);
        self.mem.copy_in(0, &self.image);
        self.queue.clear();
        self.reset_pending = false;
        self.refresh_layout();
    }
}
