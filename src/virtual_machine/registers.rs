//! Register block at the head of every script image.
//!
//! Registers live at fixed offsets inside the image itself, so saving the first
//! segment of memory saves the machine state along with it.

/// Size of script memory in bytes. Images are loaded at offset 0.
pub const TOP_OF_MEMORY: i32 = 16384;

/// Version number of images with 32-bit event registers.
pub const LSL2_VERSION1_END_NUMBER: i32 = 0x0101;

/// Version number of images with 64-bit event registers.
pub const LSL2_VERSION_NUMBER: i32 = 0x0200;

/// Bytes occupied by the register block.
pub const REGISTER_BLOCK_SIZE: i32 = 104;

/// Named register slots and their byte offsets in the image.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    /// Image size as written by the compiler.
    Invalid = 0,
    /// Instruction pointer. Zero when no handler is running.
    Ip = 4,
    /// Bytecode version number.
    Vn = 8,
    /// Base pointer of the current frame.
    Bp = 12,
    /// Stack pointer.
    Sp = 16,
    /// First byte of the heap.
    Hr = 20,
    /// First byte past the used heap.
    Hp = 24,
    /// Current state.
    Cs = 28,
    /// Next state.
    Ns = 32,
    /// Current events, 32-bit layout.
    Ce = 36,
    /// Running handler bit, 32-bit layout.
    Ie = 40,
    /// Handled events of the current state, 32-bit layout.
    Er = 44,
    /// Latched fault code.
    Fr = 48,
    /// Sleep time in seconds (float).
    Slr = 52,
    /// Start of the global variables.
    Gvr = 56,
    /// Start of the global function table.
    Gfr = 60,
    /// Start of the state table.
    Sr = 64,
    /// Top of memory.
    Tm = 68,
    /// Parameter passed in from the rezzing object.
    Pr = 72,
    /// Energy (float).
    Esr = 76,
    /// Current events, 64-bit layout.
    Nce = 80,
    /// Running handler bit, 64-bit layout.
    Nie = 88,
    /// Handled events of the current state, 64-bit layout.
    Ner = 96,
}

impl Register {
    pub const fn offset(self) -> i32 {
        self as i32
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Register::Invalid => "INVALID",
            Register::Ip => "IP",
            Register::Vn => "VN",
            Register::Bp => "BP",
            Register::Sp => "SP",
            Register::Hr => "HR",
            Register::Hp => "HP",
            Register::Cs => "CS",
            Register::Ns => "NS",
            Register::Ce => "CE",
            Register::Ie => "IE",
            Register::Er => "ER",
            Register::Fr => "FR",
            Register::Slr => "SLR",
            Register::Gvr => "GVR",
            Register::Gfr => "GFR",
            Register::Sr => "SR",
            Register::Tm => "TM",
            Register::Pr => "PR",
            Register::Esr => "ESR",
            Register::Nce => "NCE",
            Register::Nie => "NIE",
            Register::Ner => "NER",
        }
    }
}

/// The three event registers, resolved to a concrete slot by the image layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventRegister {
    /// Events raised but not yet handled.
    Current,
    /// Bit of the handler currently running.
    InHandler,
    /// Events handled by the current state.
    Handled,
}
