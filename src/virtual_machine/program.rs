//! Building well-formed script images without a compiler.
//!
//! [`CodeBuilder`] emits bytecode with one method per instruction (generated
//! from the ISA table) plus label-based jumps. [`ImageBuilder`] lays a complete
//! memory image out around that code:
//!
//! ```text
//! 0      register block
//! GVR    global variables
//! GFR    function table: [count][offset]*, then function records and code
//! SR     state table: [count][offset][events]*, then states, jump tables,
//!        event records and code
//! HR     heap, starting as one free block
//! ```
//!
//! The stack starts empty just below the top of memory.

use crate::types::math::{Quaternion, Vector};
use crate::virtual_machine::events::EventType;
use crate::virtual_machine::heap::HEAP_ENTRY_SIZE;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::layout::Layout;
use crate::virtual_machine::registers::{
    LSL2_VERSION_NUMBER, REGISTER_BLOCK_SIZE, Register, TOP_OF_MEMORY,
};
use crate::virtual_machine::value::LslType;
use crate::warn;
use std::collections::{BTreeMap, HashMap};

/// Packs the type byte of a binary operation or cast: left (or source) type
/// in the high nibble, right (or target) type in the low nibble.
pub const fn type_pair(left: LslType, right: LslType) -> u8 {
    ((left as u8) << 4) | (right as u8 & 0x0f)
}

/// Rust type accepted by the emitter for each operand kind.
macro_rules! operand_type {
    (U8) => { u8 };
    (U16) => { u16 };
    (I32) => { i32 };
    (F32) => { f32 };
    (Type) => { u8 };
    (Str) => { &str };
    (Vec3) => { Vector };
    (Quat) => { Quaternion };
}

macro_rules! emit_operand {
    ($code:expr, U8, $v:expr) => { $code.push($v) };
    ($code:expr, Type, $v:expr) => { $code.push($v) };
    ($code:expr, U16, $v:expr) => { $code.extend_from_slice(&$v.to_be_bytes()) };
    ($code:expr, I32, $v:expr) => { $code.extend_from_slice(&$v.to_be_bytes()) };
    ($code:expr, F32, $v:expr) => { $code.extend_from_slice(&$v.to_bits().to_be_bytes()) };
    ($code:expr, Str, $v:expr) => {{
        $code.extend(c_string($v));
    }};
    ($code:expr, Vec3, $v:expr) => {{
        for f in [$v.z, $v.y, $v.x] {
            $code.extend_from_slice(&f.to_bits().to_be_bytes());
        }
    }};
    ($code:expr, Quat, $v:expr) => {{
        for f in [$v.s, $v.z, $v.y, $v.x] {
            $code.extend_from_slice(&f.to_bits().to_be_bytes());
        }
    }};
}

macro_rules! define_emitters {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal, $builder:ident => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        impl CodeBuilder {
            $(
                #[doc = concat!("Emits `", $mnemonic, "`.")]
                pub fn $builder(mut self, $( $field: operand_type!($kind) ),*) -> Self {
                    self.code.push(Instruction::$name.opcode());
                    $( emit_operand!(self.code, $kind, $field); )*
                    self
                }
            )*
        }
    };
}

/// NUL-terminated bytes of `s`, cut at any interior NUL.
fn c_string(s: &str) -> impl Iterator<Item = u8> + '_ {
    s.bytes().take_while(|&b| b != 0).chain(std::iter::once(0))
}

/// A forward or backward jump whose offset is patched once labels are known.
#[derive(Clone, Debug)]
struct Fixup {
    /// Offset of the i32 operand.
    operand: usize,
    /// Offset just past the instruction; jumps are relative to it.
    next: usize,
    label: String,
}

/// Bytecode for one handler or function.
#[derive(Clone, Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
}

crate::for_each_instruction!(define_emitters);

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Marks the current position as a jump target.
    pub fn label(mut self, name: &str) -> Self {
        self.labels.insert(name.to_string(), self.code.len());
        self
    }

    fn jump_with(mut self, prefix: &[u8], label: &str) -> Self {
        self.code.extend_from_slice(prefix);
        let operand = self.code.len();
        self.code.extend_from_slice(&0i32.to_be_bytes());
        self.fixups.push(Fixup {
            operand,
            next: self.code.len(),
            label: label.to_string(),
        });
        self
    }

    /// `JUMP` to a label.
    pub fn jump_to(self, label: &str) -> Self {
        self.jump_with(&[Instruction::Jump.opcode()], label)
    }

    /// `JUMPIF` to a label.
    pub fn jump_if_to(self, ty: LslType, label: &str) -> Self {
        self.jump_with(&[Instruction::JumpIf.opcode(), ty as u8], label)
    }

    /// `JUMPNIF` to a label.
    pub fn jump_nif_to(self, ty: LslType, label: &str) -> Self {
        self.jump_with(&[Instruction::JumpNif.opcode(), ty as u8], label)
    }

    /// Appends raw bytes, for images that must hold malformed code.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Opens a call frame: a return slot sized for `ret`, the return-IP slot
    /// and the saved BP, then the arguments pushed by `args` (`arg_size`
    /// bytes in total). BP is left pointing at the saved BP, ready for
    /// `CALL` or `CALLLIB`.
    pub fn frame(
        self,
        ret: Option<LslType>,
        arg_size: i32,
        args: impl FnOnce(CodeBuilder) -> CodeBuilder,
    ) -> Self {
        let builder = match ret {
            None => self,
            Some(LslType::Vector) => self.push_ev(),
            Some(LslType::Quaternion) => self.push_eq(),
            Some(_) => self.push_e(),
        };
        let builder = args(builder.push_e().push_bp());
        builder
            .push_sp()
            .push_arg_i(arg_size)
            .add(type_pair(LslType::Integer, LslType::Integer))
            .pop_bp()
    }

    /// Resolves label jumps and returns the bytecode. Jumps to unknown labels
    /// keep a zero offset.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut code = self.code;
        for fixup in &self.fixups {
            let Some(&target) = self.labels.get(&fixup.label) else {
                warn!("jump to undefined label '{}'", fixup.label);
                continue;
            };
            let offset = target as i32 - fixup.next as i32;
            code[fixup.operand..fixup.operand + 4].copy_from_slice(&offset.to_be_bytes());
        }
        code
    }
}

#[derive(Clone, Debug)]
struct FunctionDef {
    name: String,
    code: Vec<u8>,
}

#[derive(Clone, Debug)]
struct HandlerDef {
    stack_size: i32,
    code: Vec<u8>,
}

#[derive(Clone, Debug)]
struct StateDef {
    name: String,
    handlers: BTreeMap<u8, HandlerDef>,
}

impl StateDef {
    fn handled_events(&self) -> u64 {
        self.handlers
            .keys()
            .filter_map(|&code| EventType::from_code(code))
            .fold(0, |bits, event| bits | event.bit())
    }
}

/// Lays out a complete script image for either format version.
#[derive(Clone, Debug)]
pub struct ImageBuilder {
    version: i32,
    globals: Vec<u8>,
    functions: Vec<FunctionDef>,
    states: Vec<StateDef>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new(LSL2_VERSION_NUMBER)
    }
}

impl ImageBuilder {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            globals: Vec::new(),
            functions: Vec::new(),
            states: Vec::new(),
        }
    }

    fn layout(&self) -> Layout {
        Layout::from_version(self.version).unwrap_or(Layout::V2)
    }

    fn add_global(&mut self, bytes: &[u8]) -> i32 {
        let address = self.globals.len() as i32;
        self.globals.extend_from_slice(bytes);
        address
    }

    /// Reserves a zeroed global of `size` bytes and returns its address.
    pub fn global(&mut self, size: i32) -> i32 {
        self.add_global(&vec![0u8; size.max(0) as usize])
    }

    pub fn global_int(&mut self, value: i32) -> i32 {
        self.add_global(&value.to_be_bytes())
    }

    pub fn global_float(&mut self, value: f32) -> i32 {
        self.add_global(&value.to_bits().to_be_bytes())
    }

    pub fn global_vector(&mut self, value: Vector) -> i32 {
        let mut bytes = Vec::with_capacity(12);
        emit_operand!(bytes, Vec3, value);
        self.add_global(&bytes)
    }

    pub fn global_quaternion(&mut self, value: Quaternion) -> i32 {
        let mut bytes = Vec::with_capacity(16);
        emit_operand!(bytes, Quat, value);
        self.add_global(&bytes)
    }

    /// Adds a global function and returns its `CALL` index.
    pub fn function(&mut self, name: &str, code: CodeBuilder) -> i32 {
        self.functions.push(FunctionDef {
            name: name.to_string(),
            code: code.into_bytes(),
        });
        self.functions.len() as i32 - 1
    }

    /// Adds a state and returns its index. The first state is `default`.
    pub fn state(&mut self, name: &str) -> i32 {
        self.states.push(StateDef {
            name: name.to_string(),
            handlers: BTreeMap::new(),
        });
        self.states.len() as i32 - 1
    }

    /// Installs the handler for `event` in `state`. `stack_size` is the local
    /// frame the scheduler reserves, event arguments included.
    pub fn handler(&mut self, state: i32, event: EventType, stack_size: i32, code: CodeBuilder) {
        match self.states.get_mut(state as usize) {
            Some(def) => {
                def.handlers.insert(
                    event.code(),
                    HandlerDef {
                        stack_size,
                        code: code.into_bytes(),
                    },
                );
            }
            None => warn!("handler for unknown state {}", state),
        }
    }

    fn function_table(&self) -> Vec<u8> {
        let mut table = Vec::new();
        table.extend_from_slice(&(self.functions.len() as i32).to_be_bytes());
        let mut records = Vec::new();
        let header = 4 + 4 * self.functions.len();
        for function in &self.functions {
            let record_offset = (header + records.len()) as i32;
            table.extend_from_slice(&record_offset.to_be_bytes());

            let name: Vec<u8> = c_string(&function.name).collect();
            let code_offset = 4 + name.len() as i32;
            records.extend_from_slice(&code_offset.to_be_bytes());
            records.extend(name);
            records.extend_from_slice(&function.code);
        }
        table.extend(records);
        table
    }

    fn state_table(&self) -> Vec<u8> {
        let layout = self.layout();
        let stride = layout.state_stride() as usize;
        let mut table = Vec::new();
        table.extend_from_slice(&(self.states.len() as i32).to_be_bytes());
        let mut records = Vec::new();
        let header = 4 + stride * self.states.len();
        for state in &self.states {
            let state_offset = (header + records.len()) as i32;
            table.extend_from_slice(&state_offset.to_be_bytes());
            match layout {
                Layout::V1 => table.extend_from_slice(&(state.handled_events() as u32).to_be_bytes()),
                Layout::V2 => table.extend_from_slice(&state.handled_events().to_be_bytes()),
            }

            // State record: [jump table offset][name], then the jump table.
            let name: Vec<u8> = c_string(&state.name).collect();
            let jump_table_offset = 4 + name.len();
            let mut record = Vec::new();
            record.extend_from_slice(&(jump_table_offset as i32).to_be_bytes());
            record.extend(name);

            let mut events = Vec::new();
            let jump_table_size = 8 * state.handlers.len();
            let mut jump_table = Vec::with_capacity(jump_table_size);
            for (&code, handler) in &state.handlers {
                let event_offset = (jump_table_size + events.len()) as i32;
                jump_table.extend_from_slice(&event_offset.to_be_bytes());
                jump_table.extend_from_slice(&handler.stack_size.to_be_bytes());

                // Event record: [code offset][handler name], then the code.
                let name: Vec<u8> = EventType::from_code(code)
                    .map(|event| c_string(event.handler_name()).collect())
                    .unwrap_or_else(|| vec![0]);
                events.extend_from_slice(&(4 + name.len() as i32).to_be_bytes());
                events.extend(name);
                events.extend_from_slice(&handler.code);
            }
            record.extend(jump_table);
            record.extend(events);
            records.extend(record);
        }
        table.extend(records);
        table
    }

    /// Produces the image: registers, globals, tables and code, and the
    /// header of the initial free heap block. Everything above the image is
    /// zero when loaded.
    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout();
        let gvr = REGISTER_BLOCK_SIZE;
        let gfr = gvr + self.globals.len() as i32;
        let functions = self.function_table();
        let sr = gfr + functions.len() as i32;
        let states = self.state_table();
        let hr = sr + states.len() as i32;
        let hp = hr + HEAP_ENTRY_SIZE;
        let sp = TOP_OF_MEMORY - 4;

        let mut image = vec![0u8; hp as usize];
        let mut put = |reg: Register, value: i32| {
            let at = reg.offset() as usize;
            image[at..at + 4].copy_from_slice(&value.to_be_bytes());
        };
        put(Register::Invalid, hp);
        put(Register::Vn, self.version);
        put(Register::Bp, sp);
        put(Register::Sp, sp);
        put(Register::Hr, hr);
        put(Register::Hp, hp);
        put(Register::Gvr, gvr);
        put(Register::Gfr, gfr);
        put(Register::Sr, sr);
        put(Register::Tm, TOP_OF_MEMORY);

        let entry = EventType::StateEntry.bit();
        let handled = self.states.first().map_or(0, StateDef::handled_events);
        let mut put64 = |reg: Register, value: u64| {
            let at = reg.offset() as usize;
            match layout {
                Layout::V1 => image[at..at + 4].copy_from_slice(&(value as u32).to_be_bytes()),
                Layout::V2 => image[at..at + 8].copy_from_slice(&value.to_be_bytes()),
            }
        };
        let (ce, er) = match layout {
            Layout::V1 => (Register::Ce, Register::Er),
            Layout::V2 => (Register::Nce, Register::Ner),
        };
        put64(ce, entry);
        put64(er, handled);

        let mut at = gvr as usize;
        for section in [&self.globals, &functions, &states] {
            image[at..at + section.len()].copy_from_slice(section);
            at += section.len();
        }

        // One free block spanning the heap up to the stack.
        let free = sp - hr - HEAP_ENTRY_SIZE;
        image[hr as usize..hr as usize + 4].copy_from_slice(&free.to_be_bytes());
        image
    }
}
