//! Type-dispatched arithmetic for the binary and unary opcodes.
//!
//! Binary opcodes carry a type byte naming the left and right operand types;
//! the pair selects an entry of a 9x9 table. Every entry pops its own
//! operands (left first) and pushes at most one result. Pairs with no
//! meaning resolve to [`unknown_operation`], which touches nothing.

use crate::debug;
use crate::types::math::{Quaternion, Vector};
use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::heap::HeapRef;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::memory::Memory;
use crate::virtual_machine::value::{LslType, LslValue};
use std::fmt;

/// One table entry: pops the operands, applies `op` and pushes the result.
pub type Operation = fn(&mut Memory, Instruction);

const N: usize = LslType::COUNT;

pub struct OperationTables {
    binary: [[Operation; N]; N],
    unary: [Operation; N],
}

impl Default for OperationTables {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTables").finish_non_exhaustive()
    }
}

impl OperationTables {
    pub fn new() -> Self {
        use LslType::*;

        let mut binary: [[Operation; N]; N] = [[unknown_operation; N]; N];
        let mut set = |l: LslType, r: LslType, op: Operation| binary[l as usize][r as usize] = op;

        set(Integer, Integer, integer_integer);
        set(Integer, Float, integer_float);
        set(Integer, Vector, integer_vector);
        set(Float, Integer, float_integer);
        set(Float, Float, float_float);
        set(Float, Vector, float_vector);
        set(String, String, string_string);
        set(String, Key, string_compare);
        set(Key, String, string_compare);
        set(Key, Key, string_compare);
        set(Vector, Integer, vector_integer);
        set(Vector, Float, vector_float);
        set(Vector, Vector, vector_vector);
        set(Vector, Quaternion, vector_quaternion);
        set(Quaternion, Quaternion, quaternion_quaternion);
        set(Integer, List, scalar_list::<1>);
        set(Float, List, scalar_list::<2>);
        set(String, List, scalar_list::<3>);
        set(Key, List, scalar_list::<4>);
        set(Vector, List, scalar_list::<5>);
        set(Quaternion, List, scalar_list::<6>);
        set(List, Integer, list_scalar::<1>);
        set(List, Float, list_scalar::<2>);
        set(List, String, list_scalar::<3>);
        set(List, Key, list_scalar::<4>);
        set(List, Vector, list_scalar::<5>);
        set(List, Quaternion, list_scalar::<6>);
        set(List, List, list_list);

        let mut unary: [Operation; N] = [unknown_operation; N];
        unary[Integer as usize] = integer_unary;
        unary[Float as usize] = float_unary;
        unary[Vector as usize] = vector_unary;
        unary[Quaternion as usize] = quaternion_unary;

        Self { binary, unary }
    }

    /// Entry for a binary type byte: left type in the high nibble.
    pub fn binary(&self, types: u8) -> Operation {
        let left = LslType::from_nibble(types >> 4);
        let right = LslType::from_nibble(types & 0x0f);
        self.binary[left as usize][right as usize]
    }

    pub fn unary(&self, ty: u8) -> Operation {
        self.unary[LslType::from_nibble(ty) as usize]
    }

    /// The integer pair, used by the untyped logic and shift opcodes.
    pub fn integer(&self) -> Operation {
        self.binary[LslType::Integer as usize][LslType::Integer as usize]
    }
}

pub fn unknown_operation(_mem: &mut Memory, op: Instruction) {
    debug!("unknown arithmetic operation for {}", op.mnemonic());
}

fn bool_int(b: bool) -> i32 {
    i32::from(b)
}

// ==================== Numbers ====================

fn integer_integer(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_i32();
    let rhs = mem.pop_i32();
    let result = match op {
        Instruction::Add => lhs.wrapping_add(rhs),
        Instruction::Sub => lhs.wrapping_sub(rhs),
        Instruction::Mul => lhs.wrapping_mul(rhs),
        Instruction::Div => match rhs {
            0 => {
                mem.set_fault(Fault::Math);
                0
            }
            -1 => lhs.wrapping_neg(),
            _ => lhs / rhs,
        },
        Instruction::Mod => match rhs {
            0 => {
                mem.set_fault(Fault::Math);
                0
            }
            1 | -1 => 0,
            _ => lhs % rhs,
        },
        Instruction::Eq => bool_int(lhs == rhs),
        Instruction::Neq => bool_int(lhs != rhs),
        Instruction::Leq => bool_int(lhs <= rhs),
        Instruction::Geq => bool_int(lhs >= rhs),
        Instruction::Less => bool_int(lhs < rhs),
        Instruction::Greater => bool_int(lhs > rhs),
        Instruction::BitAnd => lhs & rhs,
        Instruction::BitOr => lhs | rhs,
        Instruction::BitXor => lhs ^ rhs,
        Instruction::BoolAnd => bool_int(lhs != 0 && rhs != 0),
        Instruction::BoolOr => bool_int(lhs != 0 || rhs != 0),
        Instruction::Shl => lhs.wrapping_shl(rhs as u32),
        Instruction::Shr => lhs.wrapping_shr(rhs as u32),
        _ => 0,
    };
    mem.push_i32(result);
}

/// Float arithmetic and comparisons shared by every int/float pairing.
fn float_math(mem: &mut Memory, op: Instruction, lhs: f32, rhs: f32) {
    match op {
        Instruction::Add => mem.push_f32(lhs + rhs),
        Instruction::Sub => mem.push_f32(lhs - rhs),
        Instruction::Mul => mem.push_f32(lhs * rhs),
        Instruction::Div => {
            let result = if rhs == 0.0 {
                mem.set_fault(Fault::Math);
                0.0
            } else {
                lhs / rhs
            };
            mem.push_f32(result);
        }
        Instruction::Eq => mem.push_i32(bool_int(lhs == rhs)),
        Instruction::Neq => mem.push_i32(bool_int(lhs != rhs)),
        Instruction::Leq => mem.push_i32(bool_int(lhs <= rhs)),
        Instruction::Geq => mem.push_i32(bool_int(lhs >= rhs)),
        Instruction::Less => mem.push_i32(bool_int(lhs < rhs)),
        Instruction::Greater => mem.push_i32(bool_int(lhs > rhs)),
        _ => {}
    }
}

fn integer_float(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_i32();
    let rhs = mem.pop_f32();
    float_math(mem, op, lhs as f32, rhs);
}

fn float_integer(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_f32();
    let rhs = mem.pop_i32();
    float_math(mem, op, lhs, rhs as f32);
}

fn float_float(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_f32();
    let rhs = mem.pop_f32();
    float_math(mem, op, lhs, rhs);
}

// ==================== Vectors and rotations ====================

fn integer_vector(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_i32();
    let rhs = mem.pop_vector();
    if op == Instruction::Mul {
        mem.push_vector(rhs.scale(lhs as f32));
    }
}

fn float_vector(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_f32();
    let rhs = mem.pop_vector();
    if op == Instruction::Mul {
        mem.push_vector(rhs.scale(lhs));
    }
}

fn scale_vector(mem: &mut Memory, op: Instruction, lhs: Vector, rhs: f32) {
    match op {
        Instruction::Mul => mem.push_vector(lhs.scale(rhs)),
        Instruction::Div => {
            let result = if rhs == 0.0 {
                mem.set_fault(Fault::Math);
                lhs
            } else {
                lhs.scale(1.0 / rhs)
            };
            mem.push_vector(result);
        }
        _ => {}
    }
}

fn vector_integer(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_vector();
    let rhs = mem.pop_i32();
    scale_vector(mem, op, lhs, rhs as f32);
}

fn vector_float(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_vector();
    let rhs = mem.pop_f32();
    scale_vector(mem, op, lhs, rhs);
}

fn vector_vector(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_vector();
    let rhs = mem.pop_vector();
    match op {
        Instruction::Add => mem.push_vector(lhs + rhs),
        Instruction::Sub => mem.push_vector(lhs - rhs),
        Instruction::Mul => mem.push_f32(lhs.dot(rhs)),
        Instruction::Mod => mem.push_vector(lhs.cross(rhs)),
        Instruction::Eq => mem.push_i32(bool_int(lhs == rhs)),
        Instruction::Neq => mem.push_i32(bool_int(lhs != rhs)),
        _ => {}
    }
}

fn vector_quaternion(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_vector();
    let rhs = mem.pop_quaternion();
    match op {
        Instruction::Mul => mem.push_vector(lhs * rhs),
        Instruction::Div => mem.push_vector(lhs * rhs.conjugate()),
        _ => {}
    }
}

fn quaternion_quaternion(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_quaternion();
    let rhs = mem.pop_quaternion();
    match op {
        Instruction::Add => mem.push_quaternion(lhs + rhs),
        Instruction::Sub => mem.push_quaternion(lhs - rhs),
        Instruction::Mul => mem.push_quaternion(lhs * rhs),
        Instruction::Div => mem.push_quaternion(lhs * rhs.conjugate()),
        Instruction::Eq => mem.push_i32(bool_int(lhs == rhs)),
        Instruction::Neq => mem.push_i32(bool_int(lhs != rhs)),
        _ => {}
    }
}

// ==================== Strings and keys ====================

fn string_string(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_ref();
    let rhs = mem.pop_ref();
    if op == Instruction::Add {
        let joined = mem.concat_strings(lhs, rhs);
        mem.push_ref(joined);
    } else {
        compare_strings(mem, op, lhs, rhs);
    }
}

/// Any mix of strings and keys: equality only.
fn string_compare(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_ref();
    let rhs = mem.pop_ref();
    compare_strings(mem, op, lhs, rhs);
}

fn compare_strings(mem: &mut Memory, op: Instruction, lhs: HeapRef, rhs: HeapRef) {
    match op {
        Instruction::Eq => {
            let cmp = mem.compare_strings(lhs, rhs);
            mem.push_i32(bool_int(cmp == 0));
        }
        Instruction::Neq => {
            let cmp = mem.compare_strings(lhs, rhs);
            mem.push_i32(cmp);
        }
        _ => {
            lhs.release(mem);
            rhs.release(mem);
        }
    }
}

// ==================== Lists ====================

/// Pops one value of type `ty` as a list element. Strings and keys are read
/// off the heap and released; a key always comes back as a key.
fn pop_element(mem: &mut Memory, ty: LslType) -> Option<LslValue> {
    match ty {
        LslType::Integer => Some(LslValue::Integer(mem.pop_i32())),
        LslType::Float => Some(LslValue::Float(mem.pop_f32())),
        LslType::Vector => Some(LslValue::Vector(mem.pop_vector())),
        LslType::Quaternion => Some(LslValue::Quaternion(mem.pop_quaternion())),
        LslType::String => {
            let value = mem.pop_ref();
            mem.take_value(value)
        }
        LslType::Key => {
            let value = mem.pop_ref();
            mem.take_value(value).map(|v| match v {
                LslValue::String(s) => LslValue::Key(s),
                other => other,
            })
        }
        LslType::Null | LslType::List | LslType::Undefined => None,
    }
}

/// `scalar + list` prepends. `LEFT` is the scalar's type code.
fn scalar_list<const LEFT: u8>(mem: &mut Memory, op: Instruction) {
    let value = pop_element(mem, LslType::from_nibble(LEFT));
    let list = mem.pop_ref();
    match (op, value) {
        (Instruction::Add, Some(value)) => {
            let combined = mem.prepend_to_list(value, list);
            mem.push_ref(combined);
        }
        _ => list.release(mem),
    }
}

/// `list + scalar` appends. `RIGHT` is the scalar's type code.
fn list_scalar<const RIGHT: u8>(mem: &mut Memory, op: Instruction) {
    let list = mem.pop_ref();
    let value = pop_element(mem, LslType::from_nibble(RIGHT));
    match (op, value) {
        (Instruction::Add, Some(value)) => {
            let combined = mem.append_to_list(list, value);
            mem.push_ref(combined);
        }
        _ => list.release(mem),
    }
}

fn list_list(mem: &mut Memory, op: Instruction) {
    let lhs = mem.pop_ref();
    let rhs = mem.pop_ref();
    match op {
        Instruction::Add => {
            let joined = mem.concat_lists(lhs, rhs);
            mem.push_ref(joined);
        }
        Instruction::Eq => {
            let cmp = mem.compare_lists(lhs, rhs);
            mem.push_i32(bool_int(cmp == 0));
        }
        // Lists compare by length first, so `!=` yields the length difference.
        Instruction::Neq => {
            let cmp = mem.compare_lists(lhs, rhs);
            mem.push_i32(cmp);
        }
        _ => {
            lhs.release(mem);
            rhs.release(mem);
        }
    }
}

// ==================== Unary ====================

fn integer_unary(mem: &mut Memory, op: Instruction) {
    let value = mem.pop_i32();
    let result = match op {
        Instruction::Neg => value.wrapping_neg(),
        Instruction::BitNot => !value,
        Instruction::BoolNot => bool_int(value == 0),
        _ => 0,
    };
    mem.push_i32(result);
}

fn float_unary(mem: &mut Memory, op: Instruction) {
    let value = mem.pop_f32();
    if op == Instruction::Neg {
        mem.push_f32(-value);
    }
}

fn vector_unary(mem: &mut Memory, op: Instruction) {
    let value: Vector = mem.pop_vector();
    if op == Instruction::Neg {
        mem.push_vector(-value);
    }
}

fn quaternion_unary(mem: &mut Memory, op: Instruction) {
    let value: Quaternion = mem.pop_quaternion();
    if op == Instruction::Neg {
        mem.push_quaternion(-value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::memory::tests::scratch_memory;
    use crate::virtual_machine::program::type_pair;
    use crate::virtual_machine::registers::Register;

    fn tables() -> OperationTables {
        OperationTables::new()
    }

    /// Pushes `rhs` then `lhs`, so `lhs` is popped first.
    fn int_op(op: Instruction, lhs: i32, rhs: i32) -> (i32, Option<Fault>) {
        let mut mem = scratch_memory();
        mem.push_i32(rhs);
        mem.push_i32(lhs);
        tables().binary(type_pair(LslType::Integer, LslType::Integer))(&mut mem, op);
        (mem.pop_i32(), mem.fault())
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(int_op(Instruction::Add, 3, 4), (7, None));
        assert_eq!(int_op(Instruction::Add, i32::MAX, 1), (i32::MIN, None));
        assert_eq!(int_op(Instruction::Sub, 3, 4), (-1, None));
        assert_eq!(int_op(Instruction::Mul, -6, 7), (-42, None));
        assert_eq!(int_op(Instruction::Shl, 1, 33), (2, None));
        assert_eq!(int_op(Instruction::Shr, -8, 1), (-4, None));
    }

    #[test]
    fn integer_division_edge_cases() {
        assert_eq!(int_op(Instruction::Div, 7, 2), (3, None));
        assert_eq!(int_op(Instruction::Div, i32::MIN, -1), (i32::MIN, None));
        assert_eq!(int_op(Instruction::Div, 5, 0), (0, Some(Fault::Math)));
        assert_eq!(int_op(Instruction::Mod, 7, 3), (1, None));
        assert_eq!(int_op(Instruction::Mod, i32::MIN, -1), (0, None));
        assert_eq!(int_op(Instruction::Mod, 7, 0), (0, Some(Fault::Math)));
    }

    #[test]
    fn integer_logic() {
        assert_eq!(int_op(Instruction::Less, 1, 2).0, 1);
        assert_eq!(int_op(Instruction::Geq, 1, 2).0, 0);
        assert_eq!(int_op(Instruction::BitXor, 0b1100, 0b1010).0, 0b0110);
        assert_eq!(int_op(Instruction::BoolAnd, 5, 0).0, 0);
        assert_eq!(int_op(Instruction::BoolOr, 5, 0).0, 1);
    }

    #[test]
    fn mixed_int_float_yields_float() {
        let mut mem = scratch_memory();
        mem.push_f32(4.0);
        mem.push_i32(3);
        tables().binary(type_pair(LslType::Integer, LslType::Float))(&mut mem, Instruction::Add);
        assert_eq!(mem.pop_f32(), 7.0);

        mem.push_i32(0);
        mem.push_f32(1.0);
        tables().binary(type_pair(LslType::Float, LslType::Integer))(&mut mem, Instruction::Div);
        assert_eq!(mem.pop_f32(), 0.0);
        assert_eq!(mem.fault(), Some(Fault::Math));
    }

    #[test]
    fn float_comparison_pushes_integer() {
        let mut mem = scratch_memory();
        let top = mem.register(Register::Sp);
        mem.push_f32(2.0);
        mem.push_f32(1.5);
        tables().binary(type_pair(LslType::Float, LslType::Float))(&mut mem, Instruction::Less);
        assert_eq!(mem.pop_i32(), 1);
        assert_eq!(mem.register(Register::Sp), top);
    }

    #[test]
    fn vector_products() {
        let mut mem = scratch_memory();
        let x = Vector::new(1.0, 0.0, 0.0);
        let y = Vector::new(0.0, 1.0, 0.0);
        mem.push_vector(y);
        mem.push_vector(x);
        tables().binary(type_pair(LslType::Vector, LslType::Vector))(&mut mem, Instruction::Mod);
        assert_eq!(mem.pop_vector(), Vector::new(0.0, 0.0, 1.0));

        mem.push_vector(y);
        mem.push_vector(x);
        tables().binary(type_pair(LslType::Vector, LslType::Vector))(&mut mem, Instruction::Mul);
        assert_eq!(mem.pop_f32(), 0.0);

        mem.push_i32(2);
        mem.push_vector(Vector::new(2.0, 4.0, 6.0));
        tables().binary(type_pair(LslType::Vector, LslType::Integer))(&mut mem, Instruction::Div);
        assert_eq!(mem.pop_vector(), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn vector_divided_by_zero_keeps_value() {
        let mut mem = scratch_memory();
        mem.push_f32(0.0);
        mem.push_vector(Vector::new(1.0, 2.0, 3.0));
        tables().binary(type_pair(LslType::Vector, LslType::Float))(&mut mem, Instruction::Div);
        assert_eq!(mem.pop_vector(), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(mem.fault(), Some(Fault::Math));
    }

    #[test]
    fn quaternion_equality_is_exact() {
        let mut mem = scratch_memory();
        mem.push_quaternion(Quaternion::IDENTITY);
        mem.push_quaternion(Quaternion::IDENTITY);
        tables().binary(type_pair(LslType::Quaternion, LslType::Quaternion))(&mut mem, Instruction::Eq);
        assert_eq!(mem.pop_i32(), 1);
    }

    #[test]
    fn unknown_pair_leaves_stack_alone() {
        let mut mem = scratch_memory();
        mem.push_i32(1);
        mem.push_i32(2);
        let sp = mem.register(Register::Sp);
        tables().binary(0x9f)(&mut mem, Instruction::Add);
        tables().binary(type_pair(LslType::Quaternion, LslType::Integer))(&mut mem, Instruction::Add);
        assert_eq!(mem.register(Register::Sp), sp);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn unsupported_opcode_pops_without_pushing() {
        let mut mem = scratch_memory();
        let top = mem.register(Register::Sp);
        mem.push_vector(Vector::ZERO);
        mem.push_i32(3);
        tables().binary(type_pair(LslType::Integer, LslType::Vector))(&mut mem, Instruction::Add);
        assert_eq!(mem.register(Register::Sp), top);
    }

    #[test]
    fn unary_operations() {
        let t = tables();
        let mut mem = scratch_memory();
        mem.push_i32(5);
        t.unary(LslType::Integer as u8)(&mut mem, Instruction::Neg);
        assert_eq!(mem.pop_i32(), -5);

        mem.push_i32(0);
        t.unary(LslType::Integer as u8)(&mut mem, Instruction::BoolNot);
        assert_eq!(mem.pop_i32(), 1);

        mem.push_i32(0);
        t.unary(LslType::Integer as u8)(&mut mem, Instruction::BitNot);
        assert_eq!(mem.pop_i32(), -1);

        mem.push_quaternion(Quaternion::new(1.0, 2.0, 3.0, 4.0));
        t.unary(LslType::Quaternion as u8)(&mut mem, Instruction::Neg);
        assert_eq!(mem.pop_quaternion(), Quaternion::new(-1.0, -2.0, -3.0, -4.0));

        let sp = mem.register(Register::Sp);
        t.unary(LslType::String as u8)(&mut mem, Instruction::Neg);
        assert_eq!(mem.register(Register::Sp), sp);
    }
}
