//! Stack interpreter for LSL2 script images.
//!
//! A [`ScriptVm`] owns one script's memory: the register block, bytecode,
//! globals, heap and stack all live in a single 16 KiB buffer. Handlers are
//! entered by the event scheduler and run one opcode per
//! [`run_instructions`](ScriptVm::run_instructions) call, so a host can
//! interleave many scripts on one thread.
//!
//! Script errors never unwind: they latch a [`Fault`] in the fault register
//! and every later primitive degrades to a no-op until the script is reset.

mod cast;
mod context;
pub mod operations;
mod scheduler;
mod snapshot;

pub use context::ExecContext;

use crate::types::math::{Quaternion, Vector};
use crate::virtual_machine::config::VmConfig;
use crate::virtual_machine::errors::{Fault, VMError};
use crate::virtual_machine::events::{EventQueue, EventType, ScriptEvent, first_event};
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::layout::Layout;
use crate::virtual_machine::library::Library;
use crate::virtual_machine::memory::Memory;
use crate::virtual_machine::registers::{EventRegister, Register};
use crate::virtual_machine::value::{LslType, LslValue};
use crate::{debug, info};
use operations::OperationTables;
use std::sync::Arc;
use uuid::Uuid;

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        cursor = $cursor:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    exec_vm!(@call $vm, $cursor, $instr, $handler, $args)
                }
            ),*
        }
    }};

    // Handler that moves the instruction cursor (semicolon separator)
    (@call $vm:ident, $cursor:ident, $instr:ident, $handler:ident,
        (cursor; $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $cursor, $kind); )*
        $vm.$handler($instr, $cursor, $( $field ),*)
    }};

    // Handler that only reads its operands
    (@call $vm:ident, $cursor:ident, $instr:ident, $handler:ident,
        ( $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $cursor, $kind); )*
        $vm.$handler($instr, $( $field ),*)
    }};

    (@read $vm:ident, $cursor:ident, U8) => {{ $vm.mem.fetch_u8($cursor) }};
    (@read $vm:ident, $cursor:ident, U16) => {{ $vm.mem.fetch_u16($cursor) }};
    (@read $vm:ident, $cursor:ident, I32) => {{ $vm.mem.fetch_i32($cursor) }};
    (@read $vm:ident, $cursor:ident, F32) => {{ $vm.mem.fetch_f32($cursor) }};
    // Type bytes: one type code, or left/right codes in the high/low nibbles
    (@read $vm:ident, $cursor:ident, Type) => {{ $vm.mem.fetch_u8($cursor) }};
    (@read $vm:ident, $cursor:ident, Str) => {{ $vm.mem.fetch_cstr($cursor) }};
    (@read $vm:ident, $cursor:ident, Vec3) => {{ $vm.mem.fetch_vector($cursor) }};
    (@read $vm:ident, $cursor:ident, Quat) => {{ $vm.mem.fetch_quaternion($cursor) }};
}

/// Tables shared by every script: the operation matrices and the library.
///
/// Built once and handed to each [`ScriptVm`] behind an [`Arc`].
#[derive(Debug)]
pub struct Runtime {
    pub operations: OperationTables,
    pub library: Library,
}

impl Runtime {
    pub fn new(library: Library) -> Self {
        Self {
            operations: OperationTables::new(),
            library,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Library::builtin())
    }
}

/// One loaded script and its pending events.
pub struct ScriptVm {
    mem: Memory,
    layout: Layout,
    /// Image as loaded, restored by [`reset`](ScriptVm::reset).
    image: Vec<u8>,
    runtime: Arc<Runtime>,
    config: VmConfig,
    queue: EventQueue,
    ctx: ExecContext,
    instruction_count: u64,
    reset_pending: bool,
    output: Vec<String>,
}

impl ScriptVm {
    /// Loads `image` at offset 0 of a fresh script memory.
    ///
    /// Returns [`VMError::ImageTooLarge`] or [`VMError::ImageTooSmall`] when the
    /// image cannot be loaded. An unknown version number is not an error here;
    /// it faults on the first tick.
    pub fn new(image: &[u8], runtime: Arc<Runtime>, config: VmConfig) -> Result<Self, VMError> {
        let mem = Memory::from_image(image)?;
        let mut vm = Self {
            mem,
            layout: Layout::V2,
            image: image.to_vec(),
            runtime,
            queue: EventQueue::new(config.max_queued_events),
            config,
            ctx: ExecContext::default(),
            instruction_count: 0,
            reset_pending: false,
            output: Vec::new(),
        };
        vm.refresh_layout();
        Ok(vm)
    }

    pub fn with_context(mut self, ctx: ExecContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Re-reads the version register. Unknown versions keep the 64-bit layout.
    fn refresh_layout(&mut self) {
        self.layout = Layout::from_version(self.mem.register(Register::Vn)).unwrap_or(Layout::V2);
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn script_id(&self) -> &Uuid {
        &self.ctx.script_id
    }

    // ==================== Host API ====================

    pub fn sleep(&self) -> f32 {
        self.mem.register_f32(Register::Slr)
    }

    pub fn set_sleep(&mut self, seconds: f32) {
        self.mem.set_register_f32(Register::Slr, seconds);
    }

    pub fn energy(&self) -> f32 {
        self.mem.register_f32(Register::Esr)
    }

    pub fn set_energy(&mut self, energy: f32) {
        self.mem.set_register_f32(Register::Esr, energy);
    }

    /// Start parameter handed to the script by whatever rezzed it.
    pub fn parameter(&self) -> i32 {
        self.mem.register(Register::Pr)
    }

    pub fn set_parameter(&mut self, parameter: i32) {
        self.mem.set_register(Register::Pr, parameter);
    }

    /// Bytes left between the heap and the stack.
    pub fn free_memory(&self) -> i32 {
        self.mem.register(Register::Sp) - self.mem.register(Register::Hp)
    }

    pub fn used_memory(&self) -> usize {
        self.image.len()
    }

    /// Event whose handler is running, if any.
    pub fn current_handler(&self) -> Option<EventType> {
        first_event(self.layout.event_register(&self.mem, EventRegister::InHandler))
    }

    /// Raised events not yet delivered, as a bit set.
    pub fn current_events(&self) -> u64 {
        self.layout.event_register(&self.mem, EventRegister::Current)
    }

    pub fn current_state(&self) -> i32 {
        self.mem.register(Register::Cs)
    }

    pub fn is_finished(&self) -> bool {
        self.mem.register(Register::Ip) == 0
    }

    pub fn is_state_change_pending(&self) -> bool {
        self.mem.register(Register::Ns) != self.mem.register(Register::Cs)
    }

    pub fn fault(&self) -> Option<Fault> {
        self.mem.fault()
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Asks the scheduler to yield so the host can call [`reset`](ScriptVm::reset).
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn is_reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Lines written by `PRINT` since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    // ==================== Event API ====================

    /// Queues an event with the arguments its handler receives.
    /// Returns false if the queue is full and the event was dropped.
    pub fn add_event(&mut self, event_type: EventType, args: Vec<LslValue>) -> bool {
        self.queue.push(ScriptEvent::new(event_type, args))
    }

    pub fn remove_events_of_type(&mut self, event_type: EventType) {
        self.queue.remove_type(event_type);
    }

    pub fn remove_all_events(&mut self) {
        self.queue.clear();
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Raises an argument-less event in the current events register.
    pub fn raise_event(&mut self, event_type: EventType) {
        let events = self.current_events() | event_type.bit();
        self.layout
            .set_event_register(&mut self.mem, EventRegister::Current, events);
    }

    // ==================== Execution ====================

    /// Executes the instruction at IP.
    fn step(&mut self) {
        self.instruction_count += 1;
        let ip = self.mem.register(Register::Ip);
        let mut cursor = ip;
        let opcode = self.mem.fetch_u8(&mut cursor);
        if self.mem.fault().is_some() {
            return;
        }
        let instr = Instruction::decode(opcode);
        debug!("[{:#06x}] {}", ip, instr.mnemonic());

        self.exec(instr, &mut cursor);

        self.mem.set_ip(cursor);
        if cursor == 0 {
            self.layout
                .set_event_register(&mut self.mem, EventRegister::InHandler, 0);
        }
        self.mem
            .add_register_f32(Register::Esr, -self.config.energy_decay);
    }

    /// Executes a single instruction whose opcode has been read. `cursor`
    /// points past the opcode and ends at the next instruction to run.
    fn exec(&mut self, instr: Instruction, cursor: &mut i32) {
        exec_vm! {
            vm = self,
            cursor = cursor,
            instr = instr,
            {
                // Stack
                Noop => op_noop(),
                Pop => op_discard(),
                Pops => op_pop_ref(),
                Popl => op_pop_ref(),
                Popv => op_discard(),
                Popq => op_discard(),
                PopArg => op_pop_arg(size: I32),
                PopIp => op_pop_ip(cursor;),
                PopBp => op_pop_bp(),
                PopSp => op_pop_sp(),
                PopSlr => op_pop_slr(),
                // Duplicate
                Dup => op_dup(),
                Dups => op_dup_ref(),
                Dupl => op_dup_ref(),
                Dupv => op_dup_vector(),
                Dupq => op_dup_quaternion(),
                // Store, leaving the value on the stack
                Store => op_store(address: I32),
                Stores => op_store_ref(address: I32),
                Storel => op_store_ref(address: I32),
                Storev => op_store_vector(address: I32),
                Storeq => op_store_quaternion(address: I32),
                StoreG => op_store_global(address: I32),
                StoreGs => op_store_global_ref(address: I32),
                StoreGl => op_store_global_ref(address: I32),
                StoreGv => op_store_global_vector(address: I32),
                StoreGq => op_store_global_quaternion(address: I32),
                // Store and pop
                LoadP => op_load(address: I32),
                LoadSp => op_load_ref(address: I32),
                LoadLp => op_load_ref(address: I32),
                LoadVp => op_load_vector(address: I32),
                LoadQp => op_load_quaternion(address: I32),
                LoadGp => op_load_global(address: I32),
                LoadGsp => op_load_global_ref(address: I32),
                LoadGlp => op_load_global_ref(address: I32),
                LoadGvp => op_load_global_vector(address: I32),
                LoadGqp => op_load_global_quaternion(address: I32),
                // Push
                Push => op_push(address: I32),
                PushS => op_push_ref(address: I32),
                PushL => op_push_ref(address: I32),
                PushV => op_push_vector(address: I32),
                PushQ => op_push_quaternion(address: I32),
                PushG => op_push_global(address: I32),
                PushGs => op_push_global_ref(address: I32),
                PushGl => op_push_global_ref(address: I32),
                PushGv => op_push_global_vector(address: I32),
                PushGq => op_push_global_quaternion(address: I32),
                PushIp => op_push_ip(cursor;),
                PushBp => op_push_bp(),
                PushSp => op_push_sp(),
                PushArgB => op_push_arg_b(value: U8),
                PushArgI => op_push_arg_i(value: I32),
                PushArgF => op_push_arg_f(value: F32),
                PushArgS => op_push_arg_s(value: Str),
                PushArgV => op_push_arg_v(value: Vec3),
                PushArgQ => op_push_arg_q(value: Quat),
                PushE => op_push_empty(),
                PushEv => op_push_empty(),
                PushEq => op_push_empty(),
                PushArgE => op_push_arg_e(size: I32),
                // Arithmetic
                Add => op_binary(types: Type),
                Sub => op_binary(types: Type),
                Mul => op_binary(types: Type),
                Div => op_binary(types: Type),
                Mod => op_binary(types: Type),
                Eq => op_binary(types: Type),
                Neq => op_binary(types: Type),
                Leq => op_binary(types: Type),
                Geq => op_binary(types: Type),
                Less => op_binary(types: Type),
                Greater => op_binary(types: Type),
                BitAnd => op_integer(),
                BitOr => op_integer(),
                BitXor => op_integer(),
                BoolAnd => op_integer(),
                BoolOr => op_integer(),
                Neg => op_unary(ty: Type),
                BitNot => op_integer_unary(),
                BoolNot => op_integer_unary(),
                // Control flow
                Jump => op_jump(cursor; offset: I32),
                JumpIf => op_jump_if(cursor; ty: Type, offset: I32),
                JumpNif => op_jump_if(cursor; ty: Type, offset: I32),
                State => op_state(cursor; state: I32),
                Call => op_call(cursor; function: I32),
                Return => op_return(cursor;),
                // Conversions and library
                Cast => op_cast(types: Type),
                StackToS => op_stack_to_s(),
                StackToL => op_stack_to_l(count: I32),
                Print => op_print(ty: Type),
                CallLib => op_call_lib(index: U8),
                CallLibTwoByte => op_call_lib_two_byte(index: U16),
                Shl => op_integer(),
                Shr => op_integer(),
            }
        }
    }

    /// Counts one more reference to a string or list address read from a slot.
    /// Null addresses hold no record and are left alone.
    fn share_address(&mut self, address: i32) {
        if address != 0 {
            self.mem.increase_ref_count(address);
        }
    }

    fn release_address(&mut self, address: i32) {
        if address != 0 {
            self.mem.decrease_ref_count(address);
        }
    }

    // ==================== Stack ====================

    fn op_noop(&mut self, _instr: Instruction) {}

    fn op_discard(&mut self, instr: Instruction) {
        let size = match instr {
            Instruction::Popv => LslType::Vector.data_size(),
            Instruction::Popq => LslType::Quaternion.data_size(),
            _ => 4,
        };
        self.mem.poparg(size);
    }

    fn op_pop_ref(&mut self, _instr: Instruction) {
        let value = self.mem.pop_ref();
        value.release(&mut self.mem);
    }

    fn op_pop_arg(&mut self, _instr: Instruction, size: i32) {
        self.mem.poparg(size);
    }

    fn op_pop_ip(&mut self, _instr: Instruction, cursor: &mut i32) {
        *cursor = self.mem.pop_i32();
    }

    fn op_pop_bp(&mut self, _instr: Instruction) {
        let bp = self.mem.pop_i32();
        self.mem.set_bp(bp);
    }

    fn op_pop_sp(&mut self, _instr: Instruction) {
        let sp = self.mem.pop_i32();
        self.mem.set_sp(sp);
    }

    fn op_pop_slr(&mut self, _instr: Instruction) {
        let value = self.mem.pop_i32();
        self.mem.set_register(Register::Slr, value);
    }

    // ==================== Duplicate ====================

    fn op_dup(&mut self, _instr: Instruction) {
        let value = self.mem.peek_i32();
        self.mem.push_i32(value);
    }

    fn op_dup_ref(&mut self, _instr: Instruction) {
        let value = self.mem.peek_i32();
        self.mem.push_i32(value);
        self.share_address(value);
    }

    fn op_dup_vector(&mut self, _instr: Instruction) {
        let value = self.mem.peek_vector();
        self.mem.push_vector(value);
    }

    fn op_dup_quaternion(&mut self, _instr: Instruction) {
        let value = self.mem.peek_quaternion();
        self.mem.push_quaternion(value);
    }

    // ==================== Store ====================

    fn op_store(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_i32();
        self.mem.set_local_i32(address, value);
    }

    fn op_store_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_i32();
        let old = self.mem.local_i32(address);
        self.mem.set_local_i32(address, value);
        self.share_address(value);
        self.release_address(old);
    }

    fn op_store_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_vector();
        self.mem.set_local_vector(address, value);
    }

    fn op_store_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_quaternion();
        self.mem.set_local_quaternion(address, value);
    }

    fn op_store_global(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_i32();
        self.mem.set_global_i32(address, value);
    }

    fn op_store_global_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_i32();
        let old = self.mem.global_i32(address);
        self.mem.set_global_i32(address, value);
        self.share_address(value);
        self.release_address(old);
    }

    fn op_store_global_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_vector();
        self.mem.set_global_vector(address, value);
    }

    fn op_store_global_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.peek_quaternion();
        self.mem.set_global_quaternion(address, value);
    }

    // ==================== Load ====================

    fn op_load(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_i32();
        self.mem.set_local_i32(address, value);
    }

    /// The popped reference moves into the slot; the slot's old record is released.
    fn op_load_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_i32();
        let old = self.mem.local_i32(address);
        self.release_address(old);
        self.mem.set_local_i32(address, value);
    }

    fn op_load_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_vector();
        self.mem.set_local_vector(address, value);
    }

    fn op_load_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_quaternion();
        self.mem.set_local_quaternion(address, value);
    }

    fn op_load_global(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_i32();
        self.mem.set_global_i32(address, value);
    }

    fn op_load_global_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_i32();
        let old = self.mem.global_i32(address);
        self.release_address(old);
        self.mem.set_global_i32(address, value);
    }

    fn op_load_global_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_vector();
        self.mem.set_global_vector(address, value);
    }

    fn op_load_global_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.pop_quaternion();
        self.mem.set_global_quaternion(address, value);
    }

    // ==================== Push ====================

    fn op_push(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.local_i32(address);
        self.mem.push_i32(value);
    }

    fn op_push_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.local_i32(address);
        self.mem.push_i32(value);
        self.share_address(value);
    }

    fn op_push_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.local_vector(address);
        self.mem.push_vector(value);
    }

    fn op_push_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.local_quaternion(address);
        self.mem.push_quaternion(value);
    }

    fn op_push_global(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.global_i32(address);
        self.mem.push_i32(value);
    }

    fn op_push_global_ref(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.global_i32(address);
        self.mem.push_i32(value);
        self.share_address(value);
    }

    fn op_push_global_vector(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.global_vector(address);
        self.mem.push_vector(value);
    }

    fn op_push_global_quaternion(&mut self, _instr: Instruction, address: i32) {
        let value = self.mem.global_quaternion(address);
        self.mem.push_quaternion(value);
    }

    fn op_push_ip(&mut self, _instr: Instruction, cursor: &mut i32) {
        let next = *cursor;
        self.mem.push_i32(next);
    }

    fn op_push_bp(&mut self, _instr: Instruction) {
        let bp = self.mem.register(Register::Bp);
        self.mem.push_i32(bp);
    }

    fn op_push_sp(&mut self, _instr: Instruction) {
        let sp = self.mem.register(Register::Sp);
        self.mem.push_i32(sp);
    }

    fn op_push_arg_b(&mut self, _instr: Instruction, value: u8) {
        self.mem.push_u8(value);
    }

    fn op_push_arg_i(&mut self, _instr: Instruction, value: i32) {
        self.mem.push_i32(value);
    }

    fn op_push_arg_f(&mut self, _instr: Instruction, value: f32) {
        self.mem.push_f32(value);
    }

    fn op_push_arg_s(&mut self, _instr: Instruction, value: Vec<u8>) {
        let text = String::from_utf8_lossy(&value).into_owned();
        let record = self.mem.allocate(&LslValue::String(text));
        self.mem.push_ref(record);
    }

    fn op_push_arg_v(&mut self, _instr: Instruction, value: Vector) {
        self.mem.push_vector(value);
    }

    fn op_push_arg_q(&mut self, _instr: Instruction, value: Quaternion) {
        self.mem.push_quaternion(value);
    }

    fn op_push_empty(&mut self, instr: Instruction) {
        let size = match instr {
            Instruction::PushEv => LslType::Vector.data_size(),
            Instruction::PushEq => LslType::Quaternion.data_size(),
            _ => 4,
        };
        self.mem.pusharge(size);
    }

    fn op_push_arg_e(&mut self, _instr: Instruction, size: i32) {
        self.mem.pusharge(size);
    }

    // ==================== Arithmetic ====================

    fn op_binary(&mut self, instr: Instruction, types: u8) {
        let operation = self.runtime.operations.binary(types);
        operation(&mut self.mem, instr);
    }

    fn op_integer(&mut self, instr: Instruction) {
        let operation = self.runtime.operations.integer();
        operation(&mut self.mem, instr);
    }

    fn op_unary(&mut self, instr: Instruction, ty: u8) {
        let operation = self.runtime.operations.unary(ty);
        operation(&mut self.mem, instr);
    }

    fn op_integer_unary(&mut self, instr: Instruction) {
        let operation = self.runtime.operations.unary(LslType::Integer as u8);
        operation(&mut self.mem, instr);
    }

    // ==================== Control flow ====================

    fn op_jump(&mut self, _instr: Instruction, cursor: &mut i32, offset: i32) {
        *cursor = cursor.wrapping_add(offset);
    }

    /// `JUMPIF` jumps when the popped condition holds, `JUMPNIF` when it does not.
    fn op_jump_if(&mut self, instr: Instruction, cursor: &mut i32, ty: u8, offset: i32) {
        let Some(condition) = self.pop_condition(ty) else {
            return;
        };
        if condition == matches!(instr, Instruction::JumpIf) {
            *cursor = cursor.wrapping_add(offset);
        }
    }

    /// Pops a value of type `ty` and reports whether it counts as true.
    /// `None` for null heap addresses and unknown types, which never jump.
    fn pop_condition(&mut self, ty: u8) -> Option<bool> {
        let ty = LslType::from_u8(ty)?;
        let condition = match ty {
            LslType::Integer => self.mem.pop_i32() != 0,
            LslType::Float => self.mem.pop_f32() != 0.0,
            LslType::Vector => self.mem.pop_vector() != Vector::ZERO,
            LslType::Quaternion => self.mem.pop_quaternion() != Quaternion::IDENTITY,
            LslType::String | LslType::Key | LslType::List => {
                let value = self.mem.pop_ref();
                if value.is_null() {
                    return None;
                }
                match (ty, self.mem.take_value(value)?) {
                    (_, LslValue::List(items)) => !items.is_empty(),
                    (LslType::Key, value) => value.as_str().is_some_and(is_valid_key),
                    (_, value) => value.as_str().is_some_and(|s| !s.is_empty()),
                }
            }
            LslType::Null | LslType::Undefined => return None,
        };
        Some(condition)
    }

    /// Leaves the running handler and switches to `state` once it has finished.
    fn op_state(&mut self, _instr: Instruction, cursor: &mut i32, state: i32) {
        let bp = self.mem.pop_i32();
        self.mem.set_bp(bp);
        *cursor = self.mem.pop_i32();
        if state != self.mem.register(Register::Cs) {
            let events = self.current_events() | EventType::StateExit.bit();
            self.layout
                .set_event_register(&mut self.mem, EventRegister::Current, events);
        }
        self.mem.set_register(Register::Ns, state);
    }

    /// Enters global function `function`. The caller has built the frame; the
    /// return offset goes into its IP slot.
    fn op_call(&mut self, _instr: Instruction, cursor: &mut i32, function: i32) {
        self.mem.set_local_i32(-8, *cursor);

        let gfr = self.mem.register(Register::Gfr);
        let lookup = gfr
            .wrapping_add(function.wrapping_mul(4))
            .wrapping_add(4);
        if lookup < gfr || lookup >= self.mem.register(Register::Sr) {
            self.mem.set_fault(Fault::BoundCheck);
            return;
        }
        let mut at = lookup;
        let record = gfr.wrapping_add(self.mem.read_i32(&mut at));
        let mut at = record;
        *cursor = record.wrapping_add(self.mem.read_i32(&mut at));
    }

    fn op_return(&mut self, _instr: Instruction, cursor: &mut i32) {
        let bp = self.mem.register(Register::Bp);
        self.mem.set_sp(bp);
        let bp = self.mem.pop_i32();
        self.mem.set_bp(bp);
        *cursor = self.mem.pop_i32();
    }

    // ==================== Conversions ====================

    fn op_cast(&mut self, _instr: Instruction, types: u8) {
        cast::cast(&mut self.mem, types);
    }

    /// Builds a string from `length` bytes on the stack, the last byte on top.
    fn op_stack_to_s(&mut self, _instr: Instruction) {
        let length = self.mem.pop_i32();
        let depth = self
            .mem
            .register(Register::Tm)
            .saturating_sub(self.mem.register(Register::Sp));
        if length > depth {
            self.mem.set_fault(Fault::BoundCheck);
            self.mem.push_i32(0);
            return;
        }
        let mut bytes = vec![0u8; usize::try_from(length).unwrap_or(0)];
        for byte in bytes.iter_mut().rev() {
            if self.mem.fault().is_some() {
                break;
            }
            *byte = self.mem.pop_u8();
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let record = self.mem.allocate(&LslValue::String(text));
        self.mem.push_ref(record);
    }

    /// Builds a list from `count` type-tagged values. The element popped
    /// first becomes the last element.
    fn op_stack_to_l(&mut self, _instr: Instruction, count: i32) {
        let mut items = Vec::new();
        for _ in 0..count.max(0) {
            if self.mem.fault().is_some() {
                break;
            }
            let ty = self.mem.pop_u8();
            if let Some(item) = self.pop_list_element(ty) {
                items.push(item);
            }
        }
        items.reverse();
        let record = self.mem.allocate(&LslValue::List(items));
        self.mem.push_ref(record);
    }

    fn pop_list_element(&mut self, ty: u8) -> Option<LslValue> {
        let ty = LslType::from_u8(ty)?;
        match ty {
            LslType::Integer => Some(LslValue::Integer(self.mem.pop_i32())),
            LslType::Float => Some(LslValue::Float(self.mem.pop_f32())),
            LslType::Vector => Some(LslValue::Vector(self.mem.pop_vector())),
            LslType::Quaternion => Some(LslValue::Quaternion(self.mem.pop_quaternion())),
            LslType::String | LslType::Key | LslType::List => Some(self.pop_heap_value(ty)),
            LslType::Null | LslType::Undefined => None,
        }
    }

    /// Pops a string, key or list address and takes its value as type `ty`.
    /// Null addresses read as the empty value.
    fn pop_heap_value(&mut self, ty: LslType) -> LslValue {
        let value = self.mem.pop_ref();
        let data = if value.is_null() {
            None
        } else {
            self.mem.take_value(value)
        };
        match (ty, data) {
            (LslType::Key, Some(LslValue::String(s))) => LslValue::Key(s),
            (LslType::String, Some(LslValue::Key(s))) => LslValue::String(s),
            (_, Some(value)) => value,
            (LslType::String, None) => LslValue::String(String::new()),
            (LslType::Key, None) => LslValue::Key(String::new()),
            (_, None) => LslValue::List(Vec::new()),
        }
    }

    fn op_print(&mut self, _instr: Instruction, ty: u8) {
        let value = match LslType::from_u8(ty) {
            Some(LslType::Integer) => LslValue::Integer(self.mem.pop_i32()),
            Some(LslType::Float) => LslValue::Float(self.mem.pop_f32()),
            Some(LslType::Vector) => LslValue::Vector(self.mem.pop_vector()),
            Some(LslType::Quaternion) => LslValue::Quaternion(self.mem.pop_quaternion()),
            Some(ty @ (LslType::String | LslType::Key | LslType::List)) => self.pop_heap_value(ty),
            _ => return,
        };
        let line = value.to_string();
        info!("[{}] {}", self.ctx.script_id, line);
        self.output.push(line);
    }

    // ==================== Library ====================

    fn op_call_lib(&mut self, _instr: Instruction, index: u8) {
        self.call_library(usize::from(index));
    }

    fn op_call_lib_two_byte(&mut self, _instr: Instruction, index: u16) {
        self.call_library(usize::from(index));
    }

    /// Pops the arguments of library function `index`, runs it and stores its
    /// result in the caller's return slot, then tears down the call frame.
    fn call_library(&mut self, index: usize) {
        let runtime = Arc::clone(&self.runtime);
        let Some(function) = runtime.library.get(index) else {
            self.mem.set_fault(Fault::BoundCheck);
            return;
        };
        debug!("calling library function {}", function.name);

        let mut args: Vec<LslValue> = function
            .args
            .iter()
            .rev()
            .map(|&ty| self.pop_argument(ty))
            .collect();
        args.reverse();

        let result = function.call(&args, &self.ctx.script_id);
        self.mem.add_register_f32(Register::Esr, -function.energy);
        self.mem.add_register_f32(Register::Slr, function.sleep);

        match result {
            Some(LslValue::Integer(i)) => self.mem.set_local_i32(-12, i),
            Some(LslValue::Float(f)) => self.mem.set_local_f32(-12, f),
            Some(LslValue::Vector(v)) => self.mem.set_local_vector(-20, v),
            Some(LslValue::Quaternion(q)) => self.mem.set_local_quaternion(-24, q),
            Some(value) => {
                let record = self.mem.allocate(&value);
                self.mem.set_local_i32(-12, record.into_raw());
            }
            None => {}
        }

        let bp = self.mem.pop_i32();
        self.mem.set_bp(bp);
        self.mem.poparg(4);
    }

    fn pop_argument(&mut self, ty: LslType) -> LslValue {
        match ty {
            LslType::Integer => LslValue::Integer(self.mem.pop_i32()),
            LslType::Float => LslValue::Float(self.mem.pop_f32()),
            LslType::Vector => LslValue::Vector(self.mem.pop_vector()),
            LslType::Quaternion => LslValue::Quaternion(self.mem.pop_quaternion()),
            other => self.pop_heap_value(other),
        }
    }
}

/// A key is true when it names a real, non-nil id.
fn is_valid_key(text: &str) -> bool {
    !text.is_empty() && Uuid::parse_str(text).is_ok_and(|id| !id.is_nil())
}
