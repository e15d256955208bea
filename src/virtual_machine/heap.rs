//! Reference-counted heap living between HR and the stack.
//!
//! Every record starts with a 7-byte header `[size: i32][type: u8][refs: i16]`
//! followed by `size` payload bytes, so the next record begins at
//! `offset + 7 + size`. A type of 0 marks a free block. Scripts see records
//! through 1-based addresses relative to HR; address 0 is null.
//!
//! Allocation is first-fit from HR. Large free blocks are split, adjacent free
//! blocks are merged while scanning, and a block whose count drops to zero is
//! merged with the free blocks that follow it.

use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::memory::Memory;
use crate::virtual_machine::registers::{Register, TOP_OF_MEMORY};
use crate::virtual_machine::value::{LslType, LslValue, compare_bytes};

/// Bytes of a record header.
pub const HEAP_ENTRY_SIZE: i32 = 7;

/// A free block is only split if the remainder can hold a header and 4 bytes.
const MIN_SPLIT_REMAINDER: i32 = HEAP_ENTRY_SIZE + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct HeapEntry {
    size: i32,
    type_code: u8,
    ref_count: i16,
}

impl HeapEntry {
    fn is_free(&self) -> bool {
        self.type_code == LslType::Null as u8
    }
}

/// A heap record as seen by [`Memory::heap_blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapBlock {
    /// Absolute offset of the header.
    pub offset: i32,
    pub size: i32,
    pub lsl_type: LslType,
    pub ref_count: i16,
}

impl HeapBlock {
    pub fn is_free(&self) -> bool {
        self.lsl_type == LslType::Null
    }
}

/// One counted reference to a heap record.
///
/// Whoever holds a `HeapRef` owns one unit of the record's reference count and
/// must either [`release`](HeapRef::release) it or hand it to a stack or
/// variable slot with [`into_raw`](HeapRef::into_raw).
#[must_use = "a heap reference must be released or stored"]
#[derive(Debug, PartialEq, Eq)]
pub struct HeapRef(i32);

impl HeapRef {
    /// Takes ownership of a reference already counted elsewhere, such as an
    /// address popped off the stack.
    pub fn adopt(address: i32) -> HeapRef {
        HeapRef(address)
    }

    pub fn address(&self) -> i32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Counts a second reference to the same record.
    pub fn share(&self, mem: &mut Memory) -> HeapRef {
        mem.increase_ref_count(self.0);
        HeapRef(self.0)
    }

    pub fn release(self, mem: &mut Memory) {
        if self.0 != 0 {
            mem.decrease_ref_count(self.0);
        }
    }

    /// Gives up ownership; the caller stores the address somewhere that counts.
    pub fn into_raw(self) -> i32 {
        self.0
    }
}

/// Bytes of a string up to its first NUL, as stored on the heap.
fn c_bytes(s: &str) -> &[u8] {
    let bytes = s.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

impl Memory {
    fn read_entry(&mut self, offset: i32) -> HeapEntry {
        let mut at = offset;
        let size = self.read_i32(&mut at);
        let type_code = self.read_u8(&mut at);
        let ref_count = self.read_i16(&mut at);
        HeapEntry {
            size,
            type_code,
            ref_count,
        }
    }

    fn write_entry(&mut self, offset: i32, entry: HeapEntry) {
        let mut at = offset;
        self.write_i32(&mut at, entry.size);
        self.write_u8(&mut at, entry.type_code);
        self.write_i16(&mut at, entry.ref_count);
    }

    /// Header offset of a script-visible address, if it lies in the used heap.
    fn heap_offset(&mut self, address: i32) -> Option<i32> {
        let hr = self.register(Register::Hr);
        let offset = address.wrapping_add(hr).wrapping_sub(1);
        if offset < hr || offset >= self.register(Register::Hp) {
            self.set_fault(Fault::BoundCheck);
            return None;
        }
        Some(offset)
    }

    fn payload_size(&mut self, value: &LslValue) -> Option<i32> {
        let size = match value {
            LslValue::Integer(_) | LslValue::Float(_) => 4,
            LslValue::String(s) | LslValue::Key(s) => {
                match i32::try_from(c_bytes(s).len() + 1) {
                    Ok(size) => size,
                    Err(_) => {
                        self.set_fault(Fault::StackHeapCollision);
                        return None;
                    }
                }
            }
            LslValue::Vector(_) => 12,
            LslValue::Quaternion(_) => 16,
            LslValue::List(items) => {
                if items.iter().any(|item| matches!(item, LslValue::List(_))) {
                    self.set_fault(Fault::NestingLists);
                    return None;
                }
                4 + 4 * items.len() as i32
            }
        };
        Some(size)
    }

    /// `base` plus every term, or a heap fault when a corrupt header pushes the
    /// sum past `i32`.
    fn heap_span(&mut self, base: i32, terms: &[i32]) -> Option<i32> {
        let sum = terms
            .iter()
            .try_fold(base, |acc, &term| acc.checked_add(term));
        if sum.is_none() {
            self.set_fault(Fault::Heap);
        }
        sum
    }

    /// Stores `value` in a new record with a reference count of 1.
    ///
    /// On failure the fault register is set and the null reference returned.
    pub fn allocate(&mut self, value: &LslValue) -> HeapRef {
        HeapRef(self.heap_add(value))
    }

    fn heap_add(&mut self, value: &LslValue) -> i32 {
        if self.fault().is_some() {
            return 0;
        }
        let Some(size) = self.payload_size(value) else {
            return 0;
        };
        let hr = self.register(Register::Hr);
        // The heap may grow up to the current stack pointer.
        let limit = self.register(Register::Sp);

        let mut current = hr;
        let mut entry = self.read_entry(current);
        loop {
            if entry.size < 0 {
                self.set_fault(Fault::Heap);
                return 0;
            }
            let Some(next) = self.heap_span(current, &[HEAP_ENTRY_SIZE, entry.size]) else {
                return 0;
            };
            if entry.is_free() {
                if entry.size - MIN_SPLIT_REMAINDER >= size {
                    let remainder = HeapEntry {
                        size: entry.size - HEAP_ENTRY_SIZE - size,
                        type_code: LslType::Null as u8,
                        ref_count: 0,
                    };
                    self.write_entry(current + HEAP_ENTRY_SIZE + size, remainder);
                    self.write_entry(
                        current,
                        HeapEntry {
                            size,
                            type_code: value.lsl_type() as u8,
                            ref_count: 1,
                        },
                    );
                    self.insert_data(current + HEAP_ENTRY_SIZE, value);

                    let new_hp = current + size + 2 * HEAP_ENTRY_SIZE;
                    if new_hp >= limit {
                        break;
                    }
                    if new_hp > self.register(Register::Hp) {
                        self.set_register(Register::Hp, new_hp);
                    }
                    return current - hr + 1;
                } else if entry.size >= size {
                    entry.type_code = value.lsl_type() as u8;
                    entry.ref_count = 1;
                    self.write_entry(current, entry);
                    self.insert_data(current + HEAP_ENTRY_SIZE, value);
                    return current - hr + 1;
                }
            }

            if next >= limit {
                break;
            }
            let next_entry = self.read_entry(next);
            if entry.is_free() && next_entry.is_free() {
                if next_entry.size < 0 {
                    self.set_fault(Fault::Heap);
                    return 0;
                }
                let Some(merged) = self.heap_span(entry.size, &[next_entry.size, HEAP_ENTRY_SIZE])
                else {
                    return 0;
                };
                entry.size = merged;
                self.write_entry(current, entry);
            } else {
                current = next;
                entry = next_entry;
            }

            let Some(new_hp) = self.heap_span(current, &[size, 2 * HEAP_ENTRY_SIZE]) else {
                return 0;
            };
            if new_hp >= limit {
                break;
            }
            if new_hp > self.register(Register::Hp) {
                self.set_register(Register::Hp, new_hp);
            }
        }
        self.set_fault(Fault::StackHeapCollision);
        0
    }

    fn insert_data(&mut self, offset: i32, value: &LslValue) {
        if self.fault().is_some() {
            return;
        }
        let mut at = offset;
        match value {
            LslValue::Integer(i) => self.write_i32(&mut at, *i),
            LslValue::Float(f) => self.write_f32(&mut at, *f),
            LslValue::String(s) | LslValue::Key(s) => self.write_cstr(&mut at, c_bytes(s)),
            LslValue::Vector(v) => self.write_vector(&mut at, *v),
            LslValue::Quaternion(q) => self.write_quaternion(&mut at, *q),
            LslValue::List(items) => {
                self.write_i32(&mut at, items.len() as i32);
                for item in items {
                    let address = self.heap_add(item);
                    self.write_i32(&mut at, address);
                }
            }
        }
    }

    pub fn increase_ref_count(&mut self, address: i32) {
        if self.fault().is_some() {
            return;
        }
        let Some(offset) = self.heap_offset(address) else {
            return;
        };
        let mut entry = self.read_entry(offset);
        entry.ref_count = entry.ref_count.wrapping_add(1);
        self.write_entry(offset, entry);
    }

    /// Drops one reference. At zero the record is freed: list elements are
    /// released, the block is marked free and merged with free blocks after it.
    pub fn decrease_ref_count(&mut self, address: i32) {
        if self.fault().is_some() {
            return;
        }
        let Some(offset) = self.heap_offset(address) else {
            return;
        };
        let mut entry = self.read_entry(offset);
        if entry.ref_count <= 0 {
            entry.ref_count = 0;
            self.set_fault(Fault::Heap);
            self.write_entry(offset, entry);
            return;
        }
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            self.write_entry(offset, entry);
            return;
        }

        if entry.size < 0 {
            self.set_fault(Fault::Heap);
            return;
        }
        let was_list = entry.type_code == LslType::List as u8;
        entry.type_code = LslType::Null as u8;
        self.write_entry(offset, entry);
        if was_list {
            let mut at = offset + HEAP_ENTRY_SIZE;
            let count = self.read_i32(&mut at);
            for _ in 0..count.clamp(0, entry.size / 4) {
                let element = self.read_i32(&mut at);
                self.decrease_ref_count(element);
            }
        }
        self.coalesce_forward(offset);
    }

    /// Merges the free block at `offset` with every free block directly after it.
    fn coalesce_forward(&mut self, offset: i32) {
        if self.fault().is_some() {
            return;
        }
        let hp = self.register(Register::Hp);
        let mut entry = self.read_entry(offset);
        if !entry.is_free() {
            return;
        }
        loop {
            let Some(next) = self.heap_span(offset, &[HEAP_ENTRY_SIZE, entry.size]) else {
                return;
            };
            if next >= hp {
                break;
            }
            let next_entry = self.read_entry(next);
            if !next_entry.is_free() || next_entry.size < 0 {
                break;
            }
            let Some(merged) = self.heap_span(entry.size, &[next_entry.size, HEAP_ENTRY_SIZE])
            else {
                return;
            };
            entry.size = merged;
        }
        self.write_entry(offset, entry);
    }

    /// Reads the record at `address` as a value, optionally dropping one reference.
    pub fn get_data(&mut self, address: i32, release: bool) -> Option<LslValue> {
        if self.fault().is_some() {
            return None;
        }
        let offset = self.heap_offset(address)?;
        let entry = self.read_entry(offset);
        let mut at = offset + HEAP_ENTRY_SIZE;
        let value = match LslType::from_u8(entry.type_code) {
            Some(LslType::Integer) => LslValue::Integer(self.read_i32(&mut at)),
            Some(LslType::Float) => LslValue::Float(self.read_f32(&mut at)),
            Some(LslType::String) => {
                LslValue::String(String::from_utf8_lossy(&self.heap_cstr(at)).into_owned())
            }
            Some(LslType::Key) => {
                LslValue::Key(String::from_utf8_lossy(&self.heap_cstr(at)).into_owned())
            }
            Some(LslType::Vector) => LslValue::Vector(self.read_vector(&mut at)),
            Some(LslType::Quaternion) => LslValue::Quaternion(self.read_quaternion(&mut at)),
            Some(LslType::List) => {
                let count = self.read_i32(&mut at);
                let end = self.heap_span(offset, &[HEAP_ENTRY_SIZE, entry.size])?;
                if count < 0 || count > entry.size.saturating_sub(4) / 4 || end > TOP_OF_MEMORY {
                    self.set_fault(Fault::Heap);
                    return None;
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let element = self.read_i32(&mut at);
                    // Checked on the header so a list naming itself cannot recurse.
                    let element_offset = self.heap_offset(element)?;
                    if self.read_entry(element_offset).type_code == LslType::List as u8 {
                        self.set_fault(Fault::NestingLists);
                        return None;
                    }
                    items.push(self.get_data(element, false)?);
                }
                LslValue::List(items)
            }
            Some(LslType::Null | LslType::Undefined) | None => {
                self.set_fault(Fault::Heap);
                return None;
            }
        };
        if release {
            self.decrease_ref_count(address);
        }
        Some(value)
    }

    /// Consumes a reference and returns the value it pointed at.
    pub fn take_value(&mut self, value: HeapRef) -> Option<LslValue> {
        self.get_data(value.into_raw(), true)
    }

    pub fn push_ref(&mut self, value: HeapRef) {
        self.push_i32(value.into_raw());
    }

    pub fn pop_ref(&mut self) -> HeapRef {
        HeapRef::adopt(self.pop_i32())
    }

    /// Counts a new reference to the record at `address`.
    pub fn share(&mut self, address: i32) -> HeapRef {
        HeapRef::adopt(address).share(self)
    }

    // ==================== String and list helpers ====================

    pub fn concat_strings(&mut self, lhs: HeapRef, rhs: HeapRef) -> HeapRef {
        if self.fault().is_some() {
            return HeapRef(0);
        }
        let lhs = self.take_value(lhs);
        let rhs = self.take_value(rhs);
        match (
            lhs.as_ref().and_then(LslValue::as_str),
            rhs.as_ref().and_then(LslValue::as_str),
        ) {
            (Some(a), Some(b)) => self.allocate(&LslValue::String(format!("{a}{b}"))),
            _ => {
                self.set_fault(Fault::Heap);
                HeapRef(0)
            }
        }
    }

    /// Compares two strings or keys. Shorter strings order first; equal
    /// lengths compare bytewise.
    pub fn compare_strings(&mut self, lhs: HeapRef, rhs: HeapRef) -> i32 {
        if self.fault().is_some() {
            return 0;
        }
        let lhs = self.take_value(lhs);
        let rhs = self.take_value(rhs);
        match (
            lhs.as_ref().and_then(LslValue::as_str),
            rhs.as_ref().and_then(LslValue::as_str),
        ) {
            (Some(a), Some(b)) => compare_bytes(c_bytes(a), c_bytes(b)),
            _ => {
                self.set_fault(Fault::Heap);
                0
            }
        }
    }

    fn take_list(&mut self, list: HeapRef) -> Option<Vec<LslValue>> {
        match self.take_value(list) {
            Some(LslValue::List(items)) => Some(items),
            _ => {
                self.set_fault(Fault::Heap);
                None
            }
        }
    }

    pub fn concat_lists(&mut self, lhs: HeapRef, rhs: HeapRef) -> HeapRef {
        if self.fault().is_some() {
            return HeapRef(0);
        }
        let (Some(mut a), Some(b)) = (self.take_list(lhs), self.take_list(rhs)) else {
            return HeapRef(0);
        };
        a.extend(b);
        self.allocate(&LslValue::List(a))
    }

    /// Length difference first, then the first differing element.
    pub fn compare_lists(&mut self, lhs: HeapRef, rhs: HeapRef) -> i32 {
        if self.fault().is_some() {
            return 0;
        }
        // The same record pushed twice carries two references; read it once
        // without dropping the first.
        let lhs = if lhs == rhs {
            match self.get_data(lhs.into_raw(), false) {
                Some(LslValue::List(items)) => Some(items),
                _ => {
                    self.set_fault(Fault::Heap);
                    None
                }
            }
        } else {
            self.take_list(lhs)
        };
        let rhs = self.take_list(rhs);
        match (lhs, rhs) {
            (Some(a), Some(b)) => LslValue::List(a).compare(&LslValue::List(b)),
            _ => 0,
        }
    }

    /// New list holding `value` followed by the elements of `list`.
    pub fn prepend_to_list(&mut self, value: LslValue, list: HeapRef) -> HeapRef {
        if self.fault().is_some() {
            return HeapRef(0);
        }
        let Some(items) = self.take_list(list) else {
            return HeapRef(0);
        };
        let mut combined = Vec::with_capacity(items.len() + 1);
        combined.push(value);
        combined.extend(items);
        self.allocate(&LslValue::List(combined))
    }

    /// New list holding the elements of `list` followed by `value`.
    pub fn append_to_list(&mut self, list: HeapRef, value: LslValue) -> HeapRef {
        if self.fault().is_some() {
            return HeapRef(0);
        }
        let Some(mut items) = self.take_list(list) else {
            return HeapRef(0);
        };
        items.push(value);
        self.allocate(&LslValue::List(items))
    }

    /// Walks the used heap from HR. Stops at HP or at the first header that
    /// cannot be read.
    pub fn heap_blocks(&self) -> Vec<HeapBlock> {
        let hr = self.register(Register::Hr);
        let hp = self.register(Register::Hp);
        let mut blocks = Vec::new();
        let mut offset = hr;
        while offset >= hr && offset < hp {
            let Some(header) = self.slice(offset, offset + HEAP_ENTRY_SIZE) else {
                break;
            };
            let size = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            if size < 0 {
                break;
            }
            blocks.push(HeapBlock {
                offset,
                size,
                lsl_type: LslType::from_nibble(header[4]),
                ref_count: i16::from_be_bytes([header[5], header[6]]),
            });
            offset = offset.saturating_add(HEAP_ENTRY_SIZE + size);
        }
        blocks
    }
}
