//! Interpreter for compiled LSL2 script images.
//!
//! A script image is one contiguous big-endian memory: the register block,
//! globals, function and state tables, bytecode, heap and stack. The
//! interpreter runs it in place.
//!
//! # Modules
//!
//! - [`config`]: Scheduling knobs (quantum, queue capacity, energy decay)
//! - [`errors`]: Script faults and host-level errors
//! - [`events`]: Event types and the pending-event queue
//! - [`heap`]: Reference-counted heap allocator and value codec
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`layout`]: Version 1 and version 2 image format differences
//! - [`library`]: Built-in library function table
//! - [`memory`]: Bounds-checked script memory and register access
//! - [`program`]: Builders for well-formed images
//! - [`registers`]: Register block offsets and image constants
//! - [`value`]: LSL types and values
//! - [`vm`]: The interpreter, scheduler and state snapshots

pub mod config;
pub mod errors;
pub mod events;
pub mod heap;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod layout;
pub mod library;
pub mod memory;
pub mod program;
pub mod registers;
pub mod value;
pub mod vm;
