//! Binary encoding and decoding traits for the script state format.
//!
//! Everything the script runtime persists uses big-endian byte order, matching
//! the in-memory image. Byte buffers are written with a 4-byte length prefix,
//! which is the segment framing of a serialized script state.
//!
//! # Binary Format
//!
//! - Integers: big-endian, fixed-width
//! - `f32`: IEEE754 bits as a big-endian `u32`
//! - `Vec<u8>`: 4-byte big-endian length prefix followed by the bytes
//!
//! # Example
//!
//! ```ignore
//! use crate::types::encoding::{Encode, Decode};
//!
//! let value: u32 = 42;
//! let bytes = value.to_bytes();
//! assert_eq!(bytes, vec![0, 0, 0, 42]);
//! assert_eq!(u32::from_bytes(&bytes).unwrap(), value);
//! ```

use thiserror::Error;

/// Sink for writing encoded bytes.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    #[error("invalid value")]
    InvalidValue,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
pub fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

/// Reads exactly `N` bytes into an array, advancing the slice.
fn read_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(input, N)?);
    Ok(out)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let [byte] = read_array::<1>(input)?;
        Ok(byte)
    }
}

// Macro for fixed-size integer types
macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_be_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    Ok(<$t>::from_be_bytes(read_array(input)?))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, i16, i32);

impl Encode for f32 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.to_bits().encode(out);
    }
}

impl Decode for f32 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(f32::from_bits(u32::decode(input)?))
    }
}

// Length-prefixed byte runs
impl Encode for [u8] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.len() as u32).encode(out);
        out.write(self);
    }
}

impl Encode for Vec<u8> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_slice().encode(out);
    }
}

impl Decode for Vec<u8> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u32::decode(input)? as usize;
        Ok(read_bytes(input, len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        counter.write(&[1, 2, 3]);
        counter.write(&[4]);
        assert_eq!(counter.len(), 4);
    }

    #[test]
    fn to_bytes_writes_length_prefix() {
        let bytes = vec![7u8; 10].to_bytes();
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..4], &[0, 0, 0, 10]);
    }

    #[test]
    fn u32_big_endian() {
        assert_eq!(0x0102_0304u32.to_bytes(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn i32_negative_values() {
        let bytes = (-2i32).to_bytes();
        assert_eq!(bytes, vec![0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(i32::from_bytes(&bytes).unwrap(), -2);
    }

    #[test]
    fn u64_big_endian() {
        assert_eq!(1u64.to_bytes(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn f32_uses_ieee_bits() {
        assert_eq!(1.0f32.to_bytes(), vec![0x3f, 0x80, 0, 0]);
        assert_eq!(f32::from_bytes(&[0xc0, 0, 0, 0]).unwrap(), -2.0);
    }

    #[test]
    fn byte_run_has_u32_prefix() {
        let bytes = vec![9u8, 8, 7].to_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 3, 9, 8, 7]);
        assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn empty_byte_run() {
        let bytes = Vec::<u8>::new().to_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(Vec::<u8>::from_bytes(&bytes).unwrap().is_empty());
    }

    #[test]
    fn byte_run_shorter_than_prefix() {
        assert_eq!(
            Vec::<u8>::from_bytes(&[0, 0, 0, 5, 1, 2]),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn unexpected_eof_partial_input() {
        assert_eq!(u32::from_bytes(&[1, 2]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn trailing_bytes_error() {
        assert_eq!(u16::from_bytes(&[0, 1, 2]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn decode_advances_input() {
        let data = [0u8, 0, 0, 1, 0, 2];
        let mut input: &[u8] = &data;
        assert_eq!(i32::decode(&mut input).unwrap(), 1);
        assert_eq!(u16::decode(&mut input).unwrap(), 2);
        assert!(input.is_empty());
    }
}
