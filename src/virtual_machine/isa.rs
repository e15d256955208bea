//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the LSL2 instruction set. The [`for_each_instruction!`](crate::for_each_instruction)
//! macro holds the canonical instruction definitions and invokes a callback
//! macro for code generation, so the interpreter, the image builder and the
//! ISA hash check all work from one list.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonics and operand layouts
//!
//! See [`program`](super::program) for the generated `CodeBuilder` emitters.
//!
//! # Bytecode Format
//!
//! Instructions use variable-length encoding, all multi-byte operands big-endian:
//! - Opcode: 1 byte
//! - `U8` / `U16` / `I32` / `F32`: 1, 2, 4 and 4 bytes
//! - `Type`: 1 byte; binary operations put the left type in the high nibble
//! - `Str`: NUL-terminated bytes
//! - `Vec3`: 3 floats stored Z, Y, X
//! - `Quat`: 4 floats stored S, Z, Y, X

use thiserror::Error;

/// Invokes a callback macro with the complete instruction definition list.
///
/// Each entry is `Variant = opcode, "MNEMONIC", builder_method => [operands]`.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack
            // =========================
            /// NOOP
            Noop = 0x00, "NOOP", noop => [],
            /// POP ; drop 4 bytes
            Pop = 0x01, "POP", pop => [],
            /// POPS ; drop a string address, releasing it
            Pops = 0x02, "POPS", pops => [],
            /// POPL ; drop a list address, releasing it
            Popl = 0x03, "POPL", popl => [],
            /// POPV ; drop a vector
            Popv = 0x04, "POPV", popv => [],
            /// POPQ ; drop a quaternion
            Popq = 0x05, "POPQ", popq => [],
            /// POPARG size ; drop `size` bytes
            PopArg = 0x06, "POPARG", pop_arg => [size: I32],
            /// POPIP ; IP = pop
            PopIp = 0x07, "POPIP", pop_ip => [],
            /// POPBP ; BP = pop
            PopBp = 0x08, "POPBP", pop_bp => [],
            /// POPSP ; SP = pop
            PopSp = 0x09, "POPSP", pop_sp => [],
            /// POPSLR ; sleep register = pop
            PopSlr = 0x0a, "POPSLR", pop_slr => [],
            // =========================
            // Duplicate
            // =========================
            /// DUP ; push a copy of the top integer or float
            Dup = 0x20, "DUP", dup => [],
            /// DUPS ; push the top string address, adding a reference
            Dups = 0x21, "DUPS", dups => [],
            /// DUPL ; push the top list address, adding a reference
            Dupl = 0x22, "DUPL", dupl => [],
            /// DUPV
            Dupv = 0x23, "DUPV", dupv => [],
            /// DUPQ
            Dupq = 0x24, "DUPQ", dupq => [],
            // =========================
            // Store (top of stack stays)
            // =========================
            /// STORE local ; local = top
            Store = 0x30, "STORE", store => [address: I32],
            Stores = 0x31, "STORES", stores => [address: I32],
            Storel = 0x32, "STOREL", storel => [address: I32],
            Storev = 0x33, "STOREV", storev => [address: I32],
            Storeq = 0x34, "STOREQ", storeq => [address: I32],
            /// STOREG global ; global = top
            StoreG = 0x35, "STOREG", store_g => [address: I32],
            StoreGs = 0x36, "STOREGS", store_gs => [address: I32],
            StoreGl = 0x37, "STOREGL", store_gl => [address: I32],
            StoreGv = 0x38, "STOREGV", store_gv => [address: I32],
            StoreGq = 0x39, "STOREGQ", store_gq => [address: I32],
            // =========================
            // Load (top of stack is popped)
            // =========================
            /// LOADP local ; local = pop
            LoadP = 0x3a, "LOADP", load_p => [address: I32],
            LoadSp = 0x3b, "LOADSP", load_sp => [address: I32],
            LoadLp = 0x3c, "LOADLP", load_lp => [address: I32],
            LoadVp = 0x3d, "LOADVP", load_vp => [address: I32],
            LoadQp = 0x3e, "LOADQP", load_qp => [address: I32],
            /// LOADGP global ; global = pop
            LoadGp = 0x3f, "LOADGP", load_gp => [address: I32],
            LoadGsp = 0x40, "LOADGSP", load_gsp => [address: I32],
            LoadGlp = 0x41, "LOADGLP", load_glp => [address: I32],
            LoadGvp = 0x42, "LOADGVP", load_gvp => [address: I32],
            LoadGqp = 0x43, "LOADGQP", load_gqp => [address: I32],
            // =========================
            // Push
            // =========================
            /// PUSH local ; push local
            Push = 0x50, "PUSH", push => [address: I32],
            PushS = 0x51, "PUSHS", push_s => [address: I32],
            PushL = 0x52, "PUSHL", push_l => [address: I32],
            PushV = 0x53, "PUSHV", push_v => [address: I32],
            PushQ = 0x54, "PUSHQ", push_q => [address: I32],
            /// PUSHG global ; push global
            PushG = 0x55, "PUSHG", push_g => [address: I32],
            PushGs = 0x56, "PUSHGS", push_gs => [address: I32],
            PushGl = 0x57, "PUSHGL", push_gl => [address: I32],
            PushGv = 0x58, "PUSHGV", push_gv => [address: I32],
            PushGq = 0x59, "PUSHGQ", push_gq => [address: I32],
            /// PUSHIP ; push the address of the next instruction
            PushIp = 0x5a, "PUSHIP", push_ip => [],
            PushBp = 0x5b, "PUSHBP", push_bp => [],
            PushSp = 0x5c, "PUSHSP", push_sp => [],
            /// PUSHARGB byte ; push one byte
            PushArgB = 0x5d, "PUSHARGB", push_arg_b => [value: U8],
            PushArgI = 0x5e, "PUSHARGI", push_arg_i => [value: I32],
            PushArgF = 0x5f, "PUSHARGF", push_arg_f => [value: F32],
            /// PUSHARGS "text" ; allocate a string and push its address
            PushArgS = 0x60, "PUSHARGS", push_arg_s => [value: Str],
            PushArgV = 0x61, "PUSHARGV", push_arg_v => [value: Vec3],
            PushArgQ = 0x62, "PUSHARGQ", push_arg_q => [value: Quat],
            /// PUSHE ; push 4 zero bytes
            PushE = 0x63, "PUSHE", push_e => [],
            PushEv = 0x64, "PUSHEV", push_ev => [],
            PushEq = 0x65, "PUSHEQ", push_eq => [],
            /// PUSHARGE size ; push `size` zero bytes
            PushArgE = 0x66, "PUSHARGE", push_arg_e => [size: I32],
            // =========================
            // Arithmetic (typed)
            // =========================
            /// ADD left:right
            Add = 0x70, "ADD", add => [types: Type],
            Sub = 0x71, "SUB", sub => [types: Type],
            Mul = 0x72, "MUL", mul => [types: Type],
            Div = 0x73, "DIV", div => [types: Type],
            Mod = 0x74, "MOD", modulo => [types: Type],
            Eq = 0x75, "EQ", eq => [types: Type],
            Neq = 0x76, "NEQ", neq => [types: Type],
            Leq = 0x77, "LEQ", leq => [types: Type],
            Geq = 0x78, "GEQ", geq => [types: Type],
            Less = 0x79, "LESS", less => [types: Type],
            Greater = 0x7a, "GREATER", greater => [types: Type],
            // =========================
            // Integer logic
            // =========================
            BitAnd = 0x7b, "BITAND", bit_and => [],
            BitOr = 0x7c, "BITOR", bit_or => [],
            BitXor = 0x7d, "BITXOR", bit_xor => [],
            BoolAnd = 0x7e, "BOOLAND", bool_and => [],
            BoolOr = 0x7f, "BOOLOR", bool_or => [],
            /// NEG type
            Neg = 0x80, "NEG", neg => [ty: Type],
            BitNot = 0x81, "BITNOT", bit_not => [],
            BoolNot = 0x82, "BOOLNOT", bool_not => [],
            // =========================
            // Control flow
            // =========================
            /// JUMP offset ; relative to the next instruction
            Jump = 0x90, "JUMP", jump => [offset: I32],
            /// JUMPIF type, offset ; jump if the popped value is true
            JumpIf = 0x91, "JUMPIF", jump_if => [ty: Type, offset: I32],
            /// JUMPNIF type, offset ; jump if the popped value is false
            JumpNif = 0x92, "JUMPNIF", jump_nif => [ty: Type, offset: I32],
            /// STATE index ; leave the handler and request a state change
            State = 0x93, "STATE", state => [state: I32],
            /// CALL index ; call a global function
            Call = 0x94, "CALL", call => [function: I32],
            /// RETURN ; SP = BP, pop BP, pop IP
            Return = 0x95, "RETURN", ret => [],
            // =========================
            // Conversions and output
            // =========================
            /// CAST from:to
            Cast = 0xa0, "CAST", cast => [types: Type],
            /// STACKTOS ; pop a length and that many bytes into a new string
            StackToS = 0xb0, "STACKTOS", stack_to_s => [],
            /// STACKTOL count ; pop `count` typed values into a new list
            StackToL = 0xb1, "STACKTOL", stack_to_l => [count: I32],
            /// PRINT type ; pop and print
            Print = 0xc0, "PRINT", print => [ty: Type],
            /// CALLLIB index ; call a library function
            CallLib = 0xd0, "CALLLIB", call_lib => [index: U8],
            CallLibTwoByte = 0xd1, "CALLLIB_TWO_BYTE", call_lib_two_byte => [index: U16],
            // =========================
            // Shifts
            // =========================
            Shl = 0xe0, "SHL", shl => [],
            Shr = 0xe1, "SHR", shr => [],
        }
    };
}

/// Operand encodings used in the instruction stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperandKind {
    U8,
    U16,
    I32,
    F32,
    Type,
    Str,
    Vec3,
    Quat,
}

impl OperandKind {
    /// Encoded width, or `None` for variable-length operands.
    pub const fn size(self) -> Option<usize> {
        match self {
            OperandKind::U8 | OperandKind::Type => Some(1),
            OperandKind::U16 => Some(2),
            OperandKind::I32 | OperandKind::F32 => Some(4),
            OperandKind::Vec3 => Some(12),
            OperandKind::Quat => Some(16),
            OperandKind::Str => None,
        }
    }
}

/// A byte that names no instruction.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("unknown opcode 0x{0:02x}")]
pub struct UnknownOpcode(pub u8);

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal, $builder:ident => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = UnknownOpcode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(UnknownOpcode(value)),
                }
            }
        }

        impl Instruction {
            pub const ALL: &'static [Instruction] = &[$( Instruction::$name, )*];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Operand encodings following the opcode byte, in stream order.
            pub const fn operands(&self) -> &'static [OperandKind] {
                match self {
                    $( Instruction::$name => &[$( OperandKind::$kind, )*], )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl Instruction {
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Decodes an opcode byte. Bytes that name no instruction run as `NOOP`.
    pub fn decode(byte: u8) -> Instruction {
        Instruction::try_from(byte).unwrap_or(Instruction::Noop)
    }

    /// Encoded length including the opcode, if all operands are fixed-width.
    pub fn fixed_size(self) -> Option<usize> {
        self.operands()
            .iter()
            .try_fold(1, |acc, kind| Some(acc + kind.size()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        assert_eq!(Instruction::try_from(0xFF), Err(UnknownOpcode(0xFF)));
        assert_eq!(Instruction::try_from(0x0b), Err(UnknownOpcode(0x0b)));
    }

    #[test]
    fn unknown_bytes_decode_as_noop() {
        assert_eq!(Instruction::decode(0x44), Instruction::Noop);
        assert_eq!(Instruction::decode(0x95), Instruction::Return);
    }

    #[test]
    fn opcodes_round_trip() {
        for instr in Instruction::ALL {
            assert_eq!(Instruction::try_from(instr.opcode()), Ok(*instr));
        }
        assert_eq!(Instruction::ALL.len(), 90);
    }

    #[test]
    fn operand_layouts() {
        assert_eq!(Instruction::Pop.fixed_size(), Some(1));
        assert_eq!(Instruction::PushArgI.fixed_size(), Some(5));
        assert_eq!(Instruction::JumpIf.fixed_size(), Some(6));
        assert_eq!(Instruction::PushArgQ.fixed_size(), Some(17));
        assert_eq!(Instruction::CallLibTwoByte.fixed_size(), Some(3));
        assert_eq!(Instruction::PushArgS.fixed_size(), None);
        assert_eq!(Instruction::CallLibTwoByte.mnemonic(), "CALLLIB_TWO_BYTE");
    }
}
