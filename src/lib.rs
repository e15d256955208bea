//! LSL2 script interpreter.
//!
//! Loads compiled script images, delivers events to their handlers and runs
//! them in time-sliced quanta.

pub mod types;
pub mod utils;
pub mod virtual_machine;
