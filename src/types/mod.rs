//! Core value types shared by the interpreter and its host-facing formats.
//!
//! - `encoding`: big-endian `Encode`/`Decode` traits used by the state snapshot format
//! - `math`: the `Vector` and `Quaternion` types backing LSL geometric values

pub mod encoding;
pub mod math;
