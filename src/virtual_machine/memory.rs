//! Flat script memory and the byte-stream codec over it.
//!
//! A script's entire address space is one [`TOP_OF_MEMORY`]-byte buffer: the
//! register block, globals, function and state tables, bytecode, heap and stack.
//! Every access goes through this module. Accessors are total: an address that
//! fails validation latches a fault in the fault register and yields a zero
//! value instead of reading or writing out of range.
//!
//! Multi-byte values are big-endian. Vectors are stored Z,Y,X and quaternions
//! S,Z,Y,X so that a value pushed component by component pops in field order.

use crate::types::math::{Quaternion, Vector};
use crate::virtual_machine::errors::{Fault, VMError};
use crate::virtual_machine::registers::{REGISTER_BLOCK_SIZE, Register, TOP_OF_MEMORY};
use uuid::Uuid;

/// The byte buffer backing one script.
#[derive(Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Creates script memory holding `image` at offset 0, zero-filled to the top.
    pub fn from_image(image: &[u8]) -> Result<Self, VMError> {
        let capacity = TOP_OF_MEMORY as usize;
        if image.len() > capacity {
            return Err(VMError::ImageTooLarge {
                size: image.len(),
                capacity,
            });
        }
        if image.len() < REGISTER_BLOCK_SIZE as usize {
            return Err(VMError::ImageTooSmall {
                size: image.len(),
                required: REGISTER_BLOCK_SIZE as usize,
            });
        }
        let mut bytes = vec![0u8; capacity];
        bytes[..image.len()].copy_from_slice(image);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes in `[start, end)`, if the whole range lies in memory.
    pub fn slice(&self, start: i32, end: i32) -> Option<&[u8]> {
        let len = usize::try_from(end.checked_sub(start)?).ok()?;
        self.bytes_at(start, len)
    }

    /// Copies `data` to `offset`. Returns false without writing if it does not fit.
    pub(crate) fn copy_in(&mut self, offset: i32, data: &[u8]) -> bool {
        match self.bytes_at_mut(offset, data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Zeroes `[start, end)`, clamped to memory.
    pub(crate) fn zero_range(&mut self, start: i32, end: i32) {
        let len = self.bytes.len() as i32;
        let start = start.clamp(0, len) as usize;
        let end = end.clamp(0, len) as usize;
        if start < end {
            self.bytes[start..end].fill(0);
        }
    }

    fn bytes_at(&self, offset: i32, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        self.bytes.get(start..start.checked_add(len)?)
    }

    fn bytes_at_mut(&mut self, offset: i32, len: usize) -> Option<&mut [u8]> {
        let start = usize::try_from(offset).ok()?;
        self.bytes.get_mut(start..start.checked_add(len)?)
    }

    fn peek<const N: usize>(&self, offset: i32) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.bytes_at(offset, N) {
            out.copy_from_slice(src);
        }
        out
    }

    /// Integer at `offset`, or `None` outside memory. Never faults.
    pub(crate) fn int_at(&self, offset: i32) -> Option<i32> {
        let bytes = self.bytes_at(offset, 4)?;
        Some(i32::from_be_bytes(bytes.try_into().ok()?))
    }

    pub(crate) fn u64_at(&self, offset: i32) -> Option<u64> {
        let bytes = self.bytes_at(offset, 8)?;
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }

    // ==================== Registers ====================

    pub fn register(&self, reg: Register) -> i32 {
        i32::from_be_bytes(self.peek(reg.offset()))
    }

    pub fn set_register(&mut self, reg: Register, value: i32) {
        self.copy_in(reg.offset(), &value.to_be_bytes());
    }

    pub fn register_u64(&self, reg: Register) -> u64 {
        u64::from_be_bytes(self.peek(reg.offset()))
    }

    pub fn set_register_u64(&mut self, reg: Register, value: u64) {
        self.copy_in(reg.offset(), &value.to_be_bytes());
    }

    pub fn register_f32(&self, reg: Register) -> f32 {
        f32::from_bits(u32::from_be_bytes(self.peek(reg.offset())))
    }

    /// Writes a float register. Non-finite values store 0 and raise a math fault.
    pub fn set_register_f32(&mut self, reg: Register, value: f32) {
        let value = if value.is_finite() {
            value
        } else {
            self.set_fault(Fault::Math);
            0.0
        };
        self.copy_in(reg.offset(), &value.to_bits().to_be_bytes());
    }

    pub fn add_register_f32(&mut self, reg: Register, delta: f32) {
        let value = self.register_f32(reg) + delta;
        self.set_register_f32(reg, value);
    }

    // ==================== Faults ====================

    /// The latched fault, if the fault register holds a known code.
    pub fn fault(&self) -> Option<Fault> {
        Fault::from_code(self.register(Register::Fr))
    }

    /// Latches `fault` unless a fault is already recorded.
    pub fn set_fault(&mut self, fault: Fault) {
        if self.register(Register::Fr) != 0 {
            return;
        }
        if fault.corrupts_heap() {
            self.reset_hp_to_safe_spot();
        }
        self.set_register(Register::Fr, fault.code());
    }

    /// Moves HP somewhere it can no longer be trusted to describe the heap.
    pub fn reset_hp_to_safe_spot(&mut self) {
        self.set_register(Register::Hp, TOP_OF_MEMORY);
    }

    // ==================== Sequential codec ====================

    fn read_array<const N: usize>(&mut self, offset: &mut i32) -> [u8; N] {
        let at = *offset;
        *offset = at.wrapping_add(N as i32);
        match self.bytes_at(at, N) {
            Some(src) => {
                let mut out = [0u8; N];
                out.copy_from_slice(src);
                out
            }
            None => {
                self.set_fault(Fault::BoundCheck);
                [0u8; N]
            }
        }
    }

    fn write_array(&mut self, offset: &mut i32, bytes: &[u8]) {
        let at = *offset;
        *offset = at.wrapping_add(bytes.len() as i32);
        if !self.copy_in(at, bytes) {
            self.set_fault(Fault::BoundCheck);
        }
    }

    pub fn read_u8(&mut self, offset: &mut i32) -> u8 {
        let [b] = self.read_array::<1>(offset);
        b
    }

    pub fn read_u16(&mut self, offset: &mut i32) -> u16 {
        u16::from_be_bytes(self.read_array(offset))
    }

    pub fn read_i16(&mut self, offset: &mut i32) -> i16 {
        i16::from_be_bytes(self.read_array(offset))
    }

    pub fn read_i32(&mut self, offset: &mut i32) -> i32 {
        i32::from_be_bytes(self.read_array(offset))
    }

    pub fn read_u64(&mut self, offset: &mut i32) -> u64 {
        u64::from_be_bytes(self.read_array(offset))
    }

    /// Reads a float. NaN and infinities read as 0 and raise a math fault.
    pub fn read_f32(&mut self, offset: &mut i32) -> f32 {
        let value = f32::from_bits(u32::from_be_bytes(self.read_array(offset)));
        if value.is_finite() {
            value
        } else {
            self.set_fault(Fault::Math);
            0.0
        }
    }

    pub fn read_vector(&mut self, offset: &mut i32) -> Vector {
        let z = self.read_f32(offset);
        let y = self.read_f32(offset);
        let x = self.read_f32(offset);
        Vector::new(x, y, z)
    }

    pub fn read_quaternion(&mut self, offset: &mut i32) -> Quaternion {
        let s = self.read_f32(offset);
        let z = self.read_f32(offset);
        let y = self.read_f32(offset);
        let x = self.read_f32(offset);
        Quaternion::new(x, y, z, s)
    }

    pub fn read_uuid(&mut self, offset: &mut i32) -> Uuid {
        Uuid::from_bytes(self.read_array(offset))
    }

    pub fn write_u8(&mut self, offset: &mut i32, value: u8) {
        self.write_array(offset, &[value]);
    }

    pub fn write_u16(&mut self, offset: &mut i32, value: u16) {
        self.write_array(offset, &value.to_be_bytes());
    }

    pub fn write_i16(&mut self, offset: &mut i32, value: i16) {
        self.write_array(offset, &value.to_be_bytes());
    }

    pub fn write_i32(&mut self, offset: &mut i32, value: i32) {
        self.write_array(offset, &value.to_be_bytes());
    }

    pub fn write_u64(&mut self, offset: &mut i32, value: u64) {
        self.write_array(offset, &value.to_be_bytes());
    }

    pub fn write_f32(&mut self, offset: &mut i32, value: f32) {
        self.write_array(offset, &value.to_bits().to_be_bytes());
    }

    pub fn write_vector(&mut self, offset: &mut i32, value: Vector) {
        self.write_f32(offset, value.z);
        self.write_f32(offset, value.y);
        self.write_f32(offset, value.x);
    }

    pub fn write_quaternion(&mut self, offset: &mut i32, value: Quaternion) {
        self.write_f32(offset, value.s);
        self.write_f32(offset, value.z);
        self.write_f32(offset, value.y);
        self.write_f32(offset, value.x);
    }

    pub fn write_uuid(&mut self, offset: &mut i32, value: &Uuid) {
        self.write_array(offset, value.as_bytes());
    }

    /// Writes `bytes` followed by a NUL terminator.
    pub fn write_cstr(&mut self, offset: &mut i32, bytes: &[u8]) {
        self.write_array(offset, bytes);
        self.write_u8(offset, 0);
    }

    // ==================== Safe instruction and heap reads ====================

    /// Validates that `[offset, offset + size)` lies inside the bytecode region `[GFR, HR)`.
    pub fn check_instruction_address(&mut self, offset: i32, size: i32) -> bool {
        let gfr = self.register(Register::Gfr);
        let hr = self.register(Register::Hr);
        if offset < gfr || offset.saturating_add(size) > hr {
            self.set_fault(Fault::BoundCheck);
            return false;
        }
        true
    }

    /// Validates that `[offset, offset + size)` lies inside the used heap `[HR, HP)`.
    pub fn check_heap_address(&mut self, offset: i32, size: i32) -> bool {
        let hr = self.register(Register::Hr);
        let hp = self.register(Register::Hp);
        if offset < hr || offset.saturating_add(size) > hp {
            self.set_fault(Fault::BoundCheck);
            return false;
        }
        true
    }

    /// Fetches an operand from the bytecode region. A failed check reads 0 and
    /// leaves `offset` where it was.
    fn fetch<const N: usize>(&mut self, offset: &mut i32) -> [u8; N] {
        if self.check_instruction_address(*offset, N as i32) {
            self.read_array(offset)
        } else {
            [0u8; N]
        }
    }

    pub fn fetch_u8(&mut self, offset: &mut i32) -> u8 {
        let [b] = self.fetch::<1>(offset);
        b
    }

    pub fn fetch_u16(&mut self, offset: &mut i32) -> u16 {
        u16::from_be_bytes(self.fetch(offset))
    }

    pub fn fetch_i32(&mut self, offset: &mut i32) -> i32 {
        i32::from_be_bytes(self.fetch(offset))
    }

    pub fn fetch_f32(&mut self, offset: &mut i32) -> f32 {
        if self.check_instruction_address(*offset, 4) {
            self.read_f32(offset)
        } else {
            0.0
        }
    }

    pub fn fetch_vector(&mut self, offset: &mut i32) -> Vector {
        if self.check_instruction_address(*offset, 12) {
            self.read_vector(offset)
        } else {
            Vector::ZERO
        }
    }

    pub fn fetch_quaternion(&mut self, offset: &mut i32) -> Quaternion {
        if self.check_instruction_address(*offset, 16) {
            self.read_quaternion(offset)
        } else {
            Quaternion::new(0.0, 0.0, 0.0, 0.0)
        }
    }

    /// Reads a NUL-terminated operand, never past the end of the bytecode
    /// region. The terminator is consumed.
    pub fn fetch_cstr(&mut self, offset: &mut i32) -> Vec<u8> {
        let mut out = Vec::new();
        while self.check_instruction_address(*offset, 1) {
            let b = self.read_u8(offset);
            if b == 0 {
                break;
            }
            out.push(b);
        }
        out
    }

    /// Reads a NUL-terminated run inside the used heap.
    pub fn heap_cstr(&mut self, mut offset: i32) -> Vec<u8> {
        let mut out = Vec::new();
        while self.check_heap_address(offset, 1) {
            let b = self.read_u8(&mut offset);
            if b == 0 {
                break;
            }
            out.push(b);
        }
        out
    }

    // ==================== Pointer registers ====================

    /// Sets IP. Zero means "no handler running"; anything else must be bytecode.
    pub fn set_ip(&mut self, ip: i32) -> bool {
        if ip == 0 {
            self.set_register(Register::Ip, 0);
            return true;
        }
        let gfr = self.register(Register::Gfr);
        let hr = self.register(Register::Hr);
        if ip < gfr || ip >= hr {
            self.set_fault(Fault::BoundCheck);
            return false;
        }
        self.set_register(Register::Ip, ip);
        true
    }

    pub fn set_sp(&mut self, sp: i32) -> bool {
        if sp <= self.register(Register::Hp) {
            self.set_fault(Fault::StackHeapCollision);
            return false;
        }
        if sp >= self.register(Register::Tm) {
            self.set_fault(Fault::BoundCheck);
            return false;
        }
        self.set_register(Register::Sp, sp);
        true
    }

    pub fn set_bp(&mut self, bp: i32) -> bool {
        if bp <= self.register(Register::Hp) {
            self.set_fault(Fault::StackHeapCollision);
            return false;
        }
        if bp >= self.register(Register::Tm) || bp < self.register(Register::Sp) {
            self.set_fault(Fault::BoundCheck);
            return false;
        }
        self.set_register(Register::Bp, bp);
        true
    }

    // ==================== Stack ====================

    fn push_bytes(&mut self, bytes: &[u8]) {
        let sp = self.register(Register::Sp).wrapping_sub(bytes.len() as i32);
        if self.set_sp(sp) {
            let mut at = sp;
            self.write_array(&mut at, bytes);
        }
    }

    pub fn push_u8(&mut self, value: u8) {
        self.push_bytes(&[value]);
    }

    pub fn push_i32(&mut self, value: i32) {
        self.push_bytes(&value.to_be_bytes());
    }

    pub fn push_f32(&mut self, value: f32) {
        self.push_bytes(&value.to_bits().to_be_bytes());
    }

    pub fn push_vector(&mut self, value: Vector) {
        let sp = self.register(Register::Sp).wrapping_sub(12);
        if self.set_sp(sp) {
            let mut at = sp;
            self.write_vector(&mut at, value);
        }
    }

    pub fn push_quaternion(&mut self, value: Quaternion) {
        let sp = self.register(Register::Sp).wrapping_sub(16);
        if self.set_sp(sp) {
            let mut at = sp;
            self.write_quaternion(&mut at, value);
        }
    }

    /// Reserves `size` bytes of argument space without initializing it.
    pub fn pusharg(&mut self, size: i32) {
        let sp = self.register(Register::Sp).wrapping_sub(size);
        self.set_sp(sp);
    }

    /// Drops `size` bytes of argument space.
    pub fn poparg(&mut self, size: i32) {
        let sp = self.register(Register::Sp).wrapping_add(size);
        self.set_sp(sp);
    }

    /// Reserves `size` zero-filled bytes.
    pub fn pusharge(&mut self, size: i32) {
        let sp = self.register(Register::Sp).wrapping_sub(size);
        if self.set_sp(sp) && size > 0 {
            self.zero_range(sp, sp.saturating_add(size));
        }
    }

    pub fn pop_u8(&mut self) -> u8 {
        let mut sp = self.register(Register::Sp);
        let value = self.read_u8(&mut sp);
        self.set_sp(sp);
        value
    }

    pub fn pop_i32(&mut self) -> i32 {
        let mut sp = self.register(Register::Sp);
        let value = self.read_i32(&mut sp);
        self.set_sp(sp);
        value
    }

    pub fn pop_f32(&mut self) -> f32 {
        let mut sp = self.register(Register::Sp);
        let value = self.read_f32(&mut sp);
        self.set_sp(sp);
        value
    }

    pub fn pop_vector(&mut self) -> Vector {
        let mut sp = self.register(Register::Sp);
        let value = self.read_vector(&mut sp);
        self.set_sp(sp);
        value
    }

    pub fn pop_quaternion(&mut self) -> Quaternion {
        let mut sp = self.register(Register::Sp);
        let value = self.read_quaternion(&mut sp);
        self.set_sp(sp);
        value
    }

    pub fn peek_i32(&mut self) -> i32 {
        let mut sp = self.register(Register::Sp);
        self.read_i32(&mut sp)
    }

    pub fn peek_f32(&mut self) -> f32 {
        let mut sp = self.register(Register::Sp);
        self.read_f32(&mut sp)
    }

    pub fn peek_vector(&mut self) -> Vector {
        let mut sp = self.register(Register::Sp);
        self.read_vector(&mut sp)
    }

    pub fn peek_quaternion(&mut self) -> Quaternion {
        let mut sp = self.register(Register::Sp);
        self.read_quaternion(&mut sp)
    }

    // ==================== Locals and globals ====================

    /// Resolves a frame-relative local to an absolute offset. Locals sit below
    /// BP: slot `address` of width `size` starts at `BP - (address + size)`.
    fn local_slot(&mut self, address: i32, size: i32) -> Option<i32> {
        let bp = self.register(Register::Bp);
        let sp = self.register(Register::Sp);
        let at = bp.wrapping_sub(address.wrapping_add(size));
        if at < sp.wrapping_sub(size) || at.saturating_add(size) > self.register(Register::Tm) {
            self.set_fault(Fault::BoundCheck);
            return None;
        }
        Some(at)
    }

    /// Resolves a global variable address to an absolute offset inside `[GVR, GFR)`.
    fn global_slot(&mut self, address: i32, size: i32) -> Option<i32> {
        if address < 0 {
            self.set_fault(Fault::BoundCheck);
            return None;
        }
        let at = address.saturating_add(self.register(Register::Gvr));
        if at.saturating_add(size) > self.register(Register::Gfr) {
            self.set_fault(Fault::BoundCheck);
            return None;
        }
        Some(at)
    }

    pub fn local_i32(&mut self, address: i32) -> i32 {
        match self.local_slot(address, 4) {
            Some(mut at) => self.read_i32(&mut at),
            None => 0,
        }
    }

    pub fn set_local_i32(&mut self, address: i32, value: i32) {
        if let Some(mut at) = self.local_slot(address, 4) {
            self.write_i32(&mut at, value);
        }
    }

    pub fn local_f32(&mut self, address: i32) -> f32 {
        match self.local_slot(address, 4) {
            Some(mut at) => self.read_f32(&mut at),
            None => 0.0,
        }
    }

    pub fn set_local_f32(&mut self, address: i32, value: f32) {
        if let Some(mut at) = self.local_slot(address, 4) {
            self.write_f32(&mut at, value);
        }
    }

    pub fn local_vector(&mut self, address: i32) -> Vector {
        match self.local_slot(address, 12) {
            Some(mut at) => self.read_vector(&mut at),
            None => Vector::ZERO,
        }
    }

    pub fn set_local_vector(&mut self, address: i32, value: Vector) {
        if let Some(mut at) = self.local_slot(address, 12) {
            self.write_vector(&mut at, value);
        }
    }

    pub fn local_quaternion(&mut self, address: i32) -> Quaternion {
        match self.local_slot(address, 16) {
            Some(mut at) => self.read_quaternion(&mut at),
            None => Quaternion::IDENTITY,
        }
    }

    pub fn set_local_quaternion(&mut self, address: i32, value: Quaternion) {
        if let Some(mut at) = self.local_slot(address, 16) {
            self.write_quaternion(&mut at, value);
        }
    }

    pub fn global_i32(&mut self, address: i32) -> i32 {
        match self.global_slot(address, 4) {
            Some(mut at) => self.read_i32(&mut at),
            None => 0,
        }
    }

    pub fn set_global_i32(&mut self, address: i32, value: i32) {
        if let Some(mut at) = self.global_slot(address, 4) {
            self.write_i32(&mut at, value);
        }
    }

    pub fn global_f32(&mut self, address: i32) -> f32 {
        match self.global_slot(address, 4) {
            Some(mut at) => self.read_f32(&mut at),
            None => 0.0,
        }
    }

    pub fn set_global_f32(&mut self, address: i32, value: f32) {
        if let Some(mut at) = self.global_slot(address, 4) {
            self.write_f32(&mut at, value);
        }
    }

    pub fn global_vector(&mut self, address: i32) -> Vector {
        match self.global_slot(address, 12) {
            Some(mut at) => self.read_vector(&mut at),
            None => Vector::ZERO,
        }
    }

    pub fn set_global_vector(&mut self, address: i32, value: Vector) {
        if let Some(mut at) = self.global_slot(address, 12) {
            self.write_vector(&mut at, value);
        }
    }

    pub fn global_quaternion(&mut self, address: i32) -> Quaternion {
        match self.global_slot(address, 16) {
            Some(mut at) => self.read_quaternion(&mut at),
            None => Quaternion::IDENTITY,
        }
    }

    pub fn set_global_quaternion(&mut self, address: i32, value: Quaternion) {
        if let Some(mut at) = self.global_slot(address, 16) {
            self.write_quaternion(&mut at, value);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Memory with a conventional layout: code in [200, 1000), heap from 1000,
    /// globals in [104, 200) and an empty stack just under the top.
    pub(crate) fn scratch_memory() -> Memory {
        let mut mem = Memory::from_image(&[0u8; REGISTER_BLOCK_SIZE as usize]).unwrap();
        mem.set_register(Register::Gvr, REGISTER_BLOCK_SIZE);
        mem.set_register(Register::Gfr, 200);
        mem.set_register(Register::Sr, 300);
        mem.set_register(Register::Hr, 1000);
        mem.set_register(Register::Hp, 1007);
        mem.set_register(Register::Tm, TOP_OF_MEMORY);
        mem.set_register(Register::Sp, TOP_OF_MEMORY - 4);
        mem.set_register(Register::Bp, TOP_OF_MEMORY - 4);
        mem
    }

    #[test]
    fn image_bounds() {
        assert!(matches!(
            Memory::from_image(&vec![0u8; TOP_OF_MEMORY as usize + 1]),
            Err(VMError::ImageTooLarge { .. })
        ));
        assert!(matches!(
            Memory::from_image(&[0u8; 8]),
            Err(VMError::ImageTooSmall { .. })
        ));
        let mem = Memory::from_image(&[7u8; 200]).unwrap();
        assert_eq!(mem.as_bytes().len(), TOP_OF_MEMORY as usize);
        assert_eq!(mem.as_bytes()[199], 7);
        assert_eq!(mem.as_bytes()[200], 0);
    }

    #[test]
    fn registers_are_big_endian() {
        let mut mem = scratch_memory();
        mem.set_register(Register::Ip, 0x0102_0304);
        assert_eq!(&mem.as_bytes()[4..8], &[1, 2, 3, 4]);
        mem.set_register_u64(Register::Nce, 1 << 40);
        assert_eq!(mem.register_u64(Register::Nce), 1 << 40);
    }

    #[test]
    fn float_register_rejects_nan() {
        let mut mem = scratch_memory();
        mem.set_register_f32(Register::Esr, 2.5);
        assert_eq!(mem.register_f32(Register::Esr), 2.5);
        mem.set_register_f32(Register::Esr, f32::NAN);
        assert_eq!(mem.register_f32(Register::Esr), 0.0);
        assert_eq!(mem.fault(), Some(Fault::Math));
    }

    #[test]
    fn codec_round_trips() {
        let mut mem = scratch_memory();
        let id = Uuid::from_u128(0x1234_5678_9abc_def0_1122_3344_5566_7788);
        let mut at = 2000;
        mem.write_i32(&mut at, -42);
        mem.write_f32(&mut at, 3.25);
        mem.write_u16(&mut at, 0xbeef);
        mem.write_i16(&mut at, -7);
        mem.write_u64(&mut at, u64::MAX - 1);
        mem.write_vector(&mut at, Vector::new(1.0, 2.0, 3.0));
        mem.write_quaternion(&mut at, Quaternion::new(0.5, 0.25, 0.125, 1.0));
        mem.write_uuid(&mut at, &id);

        let mut at = 2000;
        assert_eq!(mem.read_i32(&mut at), -42);
        assert_eq!(mem.read_f32(&mut at), 3.25);
        assert_eq!(mem.read_u16(&mut at), 0xbeef);
        assert_eq!(mem.read_i16(&mut at), -7);
        assert_eq!(mem.read_u64(&mut at), u64::MAX - 1);
        assert_eq!(mem.read_vector(&mut at), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(
            mem.read_quaternion(&mut at),
            Quaternion::new(0.5, 0.25, 0.125, 1.0)
        );
        assert_eq!(mem.read_uuid(&mut at), id);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn vector_is_stored_reversed() {
        let mut mem = scratch_memory();
        let mut at = 2000;
        mem.write_vector(&mut at, Vector::new(1.0, 2.0, 3.0));
        let mut at = 2000;
        assert_eq!(mem.read_f32(&mut at), 3.0);
        assert_eq!(mem.read_f32(&mut at), 2.0);
        assert_eq!(mem.read_f32(&mut at), 1.0);
    }

    #[test]
    fn infinite_float_reads_as_zero() {
        let mut mem = scratch_memory();
        let mut at = 2000;
        mem.write_f32(&mut at, f32::INFINITY);
        let mut at = 2000;
        assert_eq!(mem.read_f32(&mut at), 0.0);
        assert_eq!(mem.fault(), Some(Fault::Math));
    }

    #[test]
    fn out_of_range_read_faults() {
        let mut mem = scratch_memory();
        let mut at = TOP_OF_MEMORY - 2;
        assert_eq!(mem.read_i32(&mut at), 0);
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
        assert_eq!(mem.register(Register::Hp), TOP_OF_MEMORY);
    }

    #[test]
    fn first_fault_wins() {
        let mut mem = scratch_memory();
        mem.set_fault(Fault::Math);
        mem.set_fault(Fault::Heap);
        assert_eq!(mem.fault(), Some(Fault::Math));
        assert_eq!(mem.register(Register::Hp), 1007);
    }

    #[test]
    fn instruction_fetch_stays_in_code() {
        let mut mem = scratch_memory();
        let mut at = 996;
        mem.copy_in(996, &[0, 0, 0, 9]);
        assert_eq!(mem.fetch_i32(&mut at), 9);
        assert_eq!(at, 1000);
        assert_eq!(mem.fetch_u8(&mut at), 0);
        assert_eq!(at, 1000);
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn cstr_operand_stops_at_region_end() {
        let mut mem = scratch_memory();
        mem.copy_in(997, b"abc");
        let mut at = 997;
        assert_eq!(mem.fetch_cstr(&mut at), b"abc".to_vec());
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));

        let mut mem = scratch_memory();
        mem.copy_in(500, b"hi\0rest");
        let mut at = 500;
        assert_eq!(mem.fetch_cstr(&mut at), b"hi".to_vec());
        assert_eq!(at, 503);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn ip_must_point_at_code() {
        let mut mem = scratch_memory();
        assert!(mem.set_ip(0));
        assert!(mem.set_ip(500));
        assert_eq!(mem.register(Register::Ip), 500);
        assert!(!mem.set_ip(1000));
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn stack_collision_with_heap() {
        let mut mem = scratch_memory();
        assert!(!mem.set_sp(1007));
        assert_eq!(mem.fault(), Some(Fault::StackHeapCollision));
    }

    #[test]
    fn sp_below_top_of_memory() {
        let mut mem = scratch_memory();
        assert!(!mem.set_sp(TOP_OF_MEMORY));
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn bp_not_below_sp() {
        let mut mem = scratch_memory();
        mem.set_register(Register::Sp, 5000);
        assert!(!mem.set_bp(4996));
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn push_pop_each_type() {
        let mut mem = scratch_memory();
        let top = mem.register(Register::Sp);
        mem.push_i32(11);
        mem.push_f32(1.5);
        mem.push_vector(Vector::new(1.0, 2.0, 3.0));
        mem.push_quaternion(Quaternion::new(0.0, 0.0, 0.0, 1.0));
        mem.push_u8(9);
        assert_eq!(mem.register(Register::Sp), top - 4 - 4 - 12 - 16 - 1);
        assert_eq!(mem.pop_u8(), 9);
        assert_eq!(mem.pop_quaternion(), Quaternion::IDENTITY);
        assert_eq!(mem.pop_vector(), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(mem.pop_f32(), 1.5);
        assert_eq!(mem.pop_i32(), 11);
        assert_eq!(mem.register(Register::Sp), top);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn pusharge_zero_fills() {
        let mut mem = scratch_memory();
        let top = mem.register(Register::Sp);
        mem.copy_in(top - 8, &[0xff; 8]);
        mem.pusharge(8);
        assert_eq!(mem.register(Register::Sp), top - 8);
        assert_eq!(mem.slice(top - 8, top).unwrap(), &[0u8; 8]);
        mem.poparg(8);
        assert_eq!(mem.register(Register::Sp), top);
    }

    #[test]
    fn push_into_heap_faults_without_writing() {
        let mut mem = scratch_memory();
        mem.set_register(Register::Sp, 1010);
        mem.push_i32(5);
        assert_eq!(mem.fault(), Some(Fault::StackHeapCollision));
        assert_eq!(mem.register(Register::Sp), 1010);
        assert_eq!(mem.slice(1006, 1010).unwrap(), &[0u8; 4]);
    }

    #[test]
    fn locals_are_addressed_below_bp() {
        let mut mem = scratch_memory();
        let bp = mem.register(Register::Bp);
        mem.pusharge(32);
        mem.set_local_i32(0, 77);
        assert_eq!(mem.slice(bp - 4, bp).unwrap(), &77i32.to_be_bytes());
        mem.set_local_vector(4, Vector::new(1.0, 2.0, 3.0));
        assert_eq!(mem.local_vector(4), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(mem.local_i32(0), 77);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn local_below_stack_faults() {
        let mut mem = scratch_memory();
        mem.pusharge(4);
        assert_eq!(mem.local_i32(16), 0);
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn globals_stay_below_function_table() {
        let mut mem = scratch_memory();
        mem.set_global_f32(0, 2.0);
        mem.set_global_quaternion(4, Quaternion::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(mem.global_f32(0), 2.0);
        assert_eq!(mem.global_quaternion(4), Quaternion::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(mem.fault(), None);

        mem.set_global_i32(93, 1);
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }

    #[test]
    fn negative_global_faults() {
        let mut mem = scratch_memory();
        assert_eq!(mem.global_i32(-4), 0);
        assert_eq!(mem.fault(), Some(Fault::BoundCheck));
    }
}
