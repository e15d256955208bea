//! Version-dependent parts of the image format.
//!
//! Version 1 images keep 32-bit event registers and 8-byte state table entries;
//! version 2 images use the 64-bit register slots and 12-byte entries. The
//! layout is chosen from the version register whenever memory is (re)loaded.
//!
//! State table, starting at SR:
//!
//! ```text
//! SR + 0                      number of states
//! SR + 4 + stride * state     state offset, relative to SR
//! SR + 8 + stride * state     handled events (i32 or u64)
//!
//! state base:   offset to the jump table, relative to the state base
//! jump table:   per handled event, in event order: [event offset][stack size]
//! event record: offset to the first opcode, relative to the record
//! ```

use crate::virtual_machine::events::EventType;
use crate::virtual_machine::memory::Memory;
use crate::virtual_machine::registers::{
    EventRegister, LSL2_VERSION_NUMBER, LSL2_VERSION1_END_NUMBER, Register, TOP_OF_MEMORY,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    V1,
    V2,
}

impl Layout {
    /// Layout for a version register value. Unknown versions have none.
    pub fn from_version(version: i32) -> Option<Layout> {
        match version {
            LSL2_VERSION1_END_NUMBER => Some(Layout::V1),
            LSL2_VERSION_NUMBER => Some(Layout::V2),
            _ => None,
        }
    }

    pub const fn major_version(self) -> i32 {
        match self {
            Layout::V1 => 1,
            Layout::V2 => 2,
        }
    }

    /// Bytes per state table entry.
    pub const fn state_stride(self) -> i32 {
        match self {
            Layout::V1 => 8,
            Layout::V2 => 12,
        }
    }

    fn register(self, reg: EventRegister) -> Register {
        match (self, reg) {
            (Layout::V1, EventRegister::Current) => Register::Ce,
            (Layout::V1, EventRegister::InHandler) => Register::Ie,
            (Layout::V1, EventRegister::Handled) => Register::Er,
            (Layout::V2, EventRegister::Current) => Register::Nce,
            (Layout::V2, EventRegister::InHandler) => Register::Nie,
            (Layout::V2, EventRegister::Handled) => Register::Ner,
        }
    }

    pub fn event_register(self, mem: &Memory, reg: EventRegister) -> u64 {
        match self {
            Layout::V1 => mem.register(self.register(reg)) as u32 as u64,
            Layout::V2 => mem.register_u64(self.register(reg)),
        }
    }

    /// Writes an event register. Version 1 keeps only the low 32 bits.
    pub fn set_event_register(self, mem: &mut Memory, reg: EventRegister, value: u64) {
        match self {
            Layout::V1 => mem.set_register(self.register(reg), value as u32 as i32),
            Layout::V2 => mem.set_register_u64(self.register(reg), value),
        }
    }

    /// Events handled by `state`, read from its state table entry.
    pub fn handled_events(self, mem: &Memory, state: i32) -> u64 {
        let sr = mem.register(Register::Sr);
        let at = sr
            .wrapping_add(self.state_stride().wrapping_mul(state))
            .wrapping_add(8);
        match self {
            Layout::V1 => mem.int_at(at).map_or(0, |v| v as u32 as u64),
            Layout::V2 => mem.u64_at(at).unwrap_or(0),
        }
    }

    /// Jump table of `state`: SR-relative state base, then the base-relative table.
    fn jump_table(self, mem: &Memory, state: i32) -> Option<i32> {
        let sr = mem.register(Register::Sr);
        let state_offset_offset = sr
            .checked_add(4)?
            .checked_add(self.state_stride().checked_mul(state)?)?;
        in_memory(state_offset_offset)?;

        let state_base = in_memory(sr.checked_add(mem.int_at(state_offset_offset)?)?)?;
        in_memory(state_base.checked_add(mem.int_at(state_base)?)?)
    }

    /// Jump table entry for `event`. The entry index is the number of events
    /// handled by the current state that come before `event`.
    fn jump_entry(self, mem: &Memory, state: i32, event: EventType) -> Option<(i32, i32)> {
        let jump_table = self.jump_table(mem, state)?;
        let handled = self.event_register(mem, EventRegister::Handled);
        let position = (handled & (event.bit() - 1)).count_ones() as i32;
        let entry = in_memory(jump_table.checked_add(8 * position)?)?;
        Some((jump_table, entry))
    }

    /// First opcode of the handler for `event` in `state`.
    pub fn opcode_start(self, mem: &Memory, state: i32, event: EventType) -> Option<i32> {
        let (jump_table, entry) = self.jump_entry(mem, state, event)?;
        let event_start = in_memory(mem.int_at(entry)?)?.checked_add(jump_table)?;
        let opcode_offset = in_memory(mem.int_at(event_start)?)?;
        opcode_offset.checked_add(event_start)
    }

    /// Local frame size the handler for `event` in `state` expects, arguments included.
    pub fn event_stack_size(self, mem: &Memory, state: i32, event: EventType) -> Option<i32> {
        let (_, entry) = self.jump_entry(mem, state, event)?;
        in_memory(mem.int_at(entry.checked_add(4)?)?)
    }
}

fn in_memory(offset: i32) -> Option<i32> {
    (0..=TOP_OF_MEMORY).contains(&offset).then_some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::program::{CodeBuilder, ImageBuilder};

    fn two_handler_image(version: i32) -> Memory {
        let mut builder = ImageBuilder::new(version);
        let state = builder.state("default");
        builder.handler(state, EventType::StateEntry, 0, CodeBuilder::new().ret());
        builder.handler(state, EventType::Timer, 8, CodeBuilder::new().noop().ret());
        Memory::from_image(&builder.build()).unwrap()
    }

    #[test]
    fn version_selects_layout() {
        assert_eq!(Layout::from_version(0x0101), Some(Layout::V1));
        assert_eq!(Layout::from_version(0x0200), Some(Layout::V2));
        assert_eq!(Layout::from_version(0x0300), None);
        assert_eq!(Layout::V1.major_version(), 1);
        assert_eq!(Layout::V2.state_stride(), 12);
    }

    #[test]
    fn v1_event_registers_are_32_bit() {
        let mut mem = two_handler_image(LSL2_VERSION1_END_NUMBER);
        Layout::V1.set_event_register(&mut mem, EventRegister::Current, 1 << 33 | 4);
        assert_eq!(Layout::V1.event_register(&mem, EventRegister::Current), 4);
        assert_eq!(mem.register(Register::Ce), 4);
    }

    #[test]
    fn v2_event_registers_use_wide_slots() {
        let mut mem = two_handler_image(LSL2_VERSION_NUMBER);
        Layout::V2.set_event_register(&mut mem, EventRegister::InHandler, 1 << 33);
        assert_eq!(mem.register_u64(Register::Nie), 1 << 33);
        assert_eq!(mem.register(Register::Ie), 0);
    }

    #[test]
    fn handled_events_and_lookups() {
        for (version, layout) in [
            (LSL2_VERSION1_END_NUMBER, Layout::V1),
            (LSL2_VERSION_NUMBER, Layout::V2),
        ] {
            let mem = two_handler_image(version);
            let handled = EventType::StateEntry.bit() | EventType::Timer.bit();
            assert_eq!(layout.handled_events(&mem, 0), handled);
            assert_eq!(layout.event_register(&mem, EventRegister::Handled), handled);

            assert_eq!(layout.event_stack_size(&mem, 0, EventType::StateEntry), Some(0));
            assert_eq!(layout.event_stack_size(&mem, 0, EventType::Timer), Some(8));

            let entry = layout.opcode_start(&mem, 0, EventType::StateEntry).unwrap();
            let timer = layout.opcode_start(&mem, 0, EventType::Timer).unwrap();
            assert!(entry >= mem.register(Register::Gfr));
            assert!(timer < mem.register(Register::Hr));
            // state_entry is a single RETURN; timer's code follows it.
            assert!(timer > entry);
        }
    }

    #[test]
    fn corrupt_state_table_has_no_handler() {
        let mut mem = two_handler_image(LSL2_VERSION_NUMBER);
        let sr = mem.register(Register::Sr);
        mem.copy_in(sr + 4, &(-(sr + 100)).to_be_bytes());
        assert_eq!(Layout::V2.opcode_start(&mem, 0, EventType::Timer), None);
        assert_eq!(Layout::V2.event_stack_size(&mem, 0, EventType::Timer), None);
    }
}
