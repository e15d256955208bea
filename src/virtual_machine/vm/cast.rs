//! `CAST` conversions and the C-style number scanners they rely on.

use crate::types::math::{Quaternion, Vector};
use crate::virtual_machine::memory::Memory;
use crate::virtual_machine::value::{LslType, LslValue};

/// Converts the value on top of the stack. `types` holds the source type in
/// the high nibble and the target type in the low nibble.
pub(super) fn cast(mem: &mut Memory, types: u8) {
    let from = LslType::from_nibble(types >> 4);
    let to = LslType::from_nibble(types & 0x0f);
    match (from, to) {
        (LslType::Integer, LslType::Float) => {
            let value = mem.pop_i32();
            mem.push_f32(value as f32);
        }
        (LslType::Integer, LslType::String) => {
            let value = mem.pop_i32();
            push_string(mem, value.to_string());
        }
        (LslType::Integer, LslType::List) => {
            let value = mem.pop_i32();
            push_list(mem, LslValue::Integer(value));
        }
        (LslType::Float, LslType::Integer) => {
            let value = mem.pop_f32();
            mem.push_i32(value as i32);
        }
        (LslType::Float, LslType::String) => {
            let value = mem.pop_f32();
            push_string(mem, format!("{value:.6}"));
        }
        (LslType::Float, LslType::List) => {
            let value = mem.pop_f32();
            push_list(mem, LslValue::Float(value));
        }
        (LslType::String, LslType::Integer) => {
            if let Some(text) = pop_text(mem) {
                mem.push_i32(strtoul(&text));
            }
        }
        (LslType::String, LslType::Float) => {
            if let Some(text) = pop_text(mem) {
                mem.push_f32(atof(&text));
            }
        }
        (LslType::String, LslType::Vector) => {
            if let Some(text) = pop_text(mem) {
                let v = match scan_floats::<3>(&text) {
                    Some([x, y, z]) => Vector::new(x, y, z),
                    None => Vector::ZERO,
                };
                mem.push_vector(v);
            }
        }
        (LslType::String, LslType::Quaternion) => {
            if let Some(text) = pop_text(mem) {
                let q = match scan_floats::<4>(&text) {
                    Some([x, y, z, s]) => Quaternion::new(x, y, z, s),
                    None => Quaternion::IDENTITY,
                };
                mem.push_quaternion(q);
            }
        }
        (LslType::String | LslType::Key, LslType::List) => {
            let value = mem.pop_ref();
            if let Some(value) = mem.take_value(value) {
                push_list(mem, value);
            }
        }
        (LslType::Vector, LslType::String) => {
            let v = mem.pop_vector();
            push_string(mem, format_vector(v));
        }
        (LslType::Vector, LslType::List) => {
            let v = mem.pop_vector();
            push_list(mem, LslValue::Vector(v));
        }
        (LslType::Quaternion, LslType::String) => {
            let q = mem.pop_quaternion();
            push_string(mem, format_quaternion(q));
        }
        (LslType::Quaternion, LslType::List) => {
            let q = mem.pop_quaternion();
            push_list(mem, LslValue::Quaternion(q));
        }
        (LslType::List, LslType::String) => {
            let list = mem.pop_ref();
            if let Some(value) = mem.take_value(list) {
                push_string(mem, value.to_string());
            }
        }
        _ => {}
    }
}

fn push_string(mem: &mut Memory, text: String) {
    let value = mem.allocate(&LslValue::String(text));
    mem.push_ref(value);
}

fn push_list(mem: &mut Memory, element: LslValue) {
    let value = mem.allocate(&LslValue::List(vec![element]));
    mem.push_ref(value);
}

/// Pops a string reference and returns its text, releasing the reference.
fn pop_text(mem: &mut Memory) -> Option<String> {
    let value = mem.pop_ref();
    match mem.take_value(value)? {
        LslValue::String(s) | LslValue::Key(s) => Some(s),
        _ => None,
    }
}

pub(crate) fn format_vector(v: Vector) -> String {
    format!("<{:.5}, {:.5}, {:.5}>", v.x, v.y, v.z)
}

pub(crate) fn format_quaternion(q: Quaternion) -> String {
    format!("<{:.5}, {:.5}, {:.5}, {:.5}>", q.x, q.y, q.z, q.s)
}

/// Integer conversion with `strtoul` rules: leading whitespace, an optional
/// sign, hexadecimal after a leading `0x`, and 32-bit wraparound.
pub(crate) fn strtoul(text: &str) -> i32 {
    let bytes = text.as_bytes();
    let base: u64 = if bytes.len() > 1 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'X') {
        16
    } else {
        10
    };

    let mut rest = text.trim_start().as_bytes();
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    if base == 16 && rest.len() > 1 && rest[0] == b'0' && matches!(rest[1], b'x' | b'X') {
        rest = &rest[2..];
    }

    let mut value: u64 = 0;
    for &b in rest {
        let Some(digit) = (b as char).to_digit(base as u32) else {
            break;
        };
        value = value.saturating_mul(base).saturating_add(digit as u64);
    }
    let value = if negative { value.wrapping_neg() } else { value };
    value as u32 as i32
}

/// Length of the longest prefix of `text` that reads as a C float literal.
fn float_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let lower = text[i..].to_ascii_lowercase();
    for word in ["infinity", "inf", "nan"] {
        if lower.starts_with(word) {
            return i + word.len();
        }
    }

    let digits = |from: usize| bytes[from..].iter().take_while(|b| b.is_ascii_digit()).count();
    let int_digits = digits(i);
    i += int_digits;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        frac_digits = digits(i + 1);
        if int_digits > 0 || frac_digits > 0 {
            i += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return 0;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = digits(j);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    i
}

/// Parses a leading float after optional whitespace. Returns the value and
/// the bytes consumed, or `None` if no number is present.
fn scan_float(text: &str) -> Option<(f32, usize)> {
    let skipped = text.len() - text.trim_start().len();
    let rest = &text[skipped..];
    let len = float_prefix_len(rest);
    if len == 0 {
        return None;
    }
    let literal = &rest[..len];
    let value = match literal.trim_start_matches(['+', '-']).to_ascii_lowercase().as_str() {
        "inf" | "infinity" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => literal.trim_start_matches('+').parse::<f64>().ok()?,
    };
    let value = if literal.starts_with('-') && !value.is_sign_negative() {
        -value
    } else {
        value
    };
    Some((value as f32, skipped + len))
}

/// `atof`: the leading float of `text`, or 0 when there is none.
pub(crate) fn atof(text: &str) -> f32 {
    scan_float(text).map_or(0.0, |(value, _)| value)
}

/// Reads `<f, f, ...>` with `sscanf` matching: the `<` must come first, each
/// number may be preceded by whitespace, and each separator comma must follow
/// its number directly. Missing trailing `>` is accepted.
pub(crate) fn scan_floats<const N: usize>(text: &str) -> Option<[f32; N]> {
    let mut rest = text.strip_prefix('<')?;
    let mut out = [0.0f32; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let (value, used) = scan_float(rest)?;
        *slot = value;
        rest = &rest[used..];
        if i + 1 < N {
            rest = rest.strip_prefix(',')?;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::memory::tests::scratch_memory;
    use crate::virtual_machine::program::type_pair;

    fn cast_string(text: &str, to: LslType) -> Memory {
        let mut mem = scratch_memory();
        let value = mem.allocate(&LslValue::String(text.into()));
        mem.push_ref(value);
        cast(&mut mem, type_pair(LslType::String, to));
        mem
    }

    fn pop_string(mem: &mut Memory) -> String {
        let value = mem.pop_ref();
        match mem.take_value(value) {
            Some(LslValue::String(s)) => s,
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn strtoul_matches_c() {
        assert_eq!(strtoul("42"), 42);
        assert_eq!(strtoul("  -17abc"), -17);
        assert_eq!(strtoul("+8"), 8);
        assert_eq!(strtoul("0x1F"), 31);
        assert_eq!(strtoul("0XfF"), 255);
        assert_eq!(strtoul(" 0x10"), 0);
        assert_eq!(strtoul("abc"), 0);
        assert_eq!(strtoul("4294967295"), -1);
        assert_eq!(strtoul("99999999999999999999"), -1);
    }

    #[test]
    fn atof_reads_prefix() {
        assert_eq!(atof("3.5"), 3.5);
        assert_eq!(atof("  -2.25e1xyz"), -22.5);
        assert_eq!(atof(".5"), 0.5);
        assert_eq!(atof("7."), 7.0);
        assert_eq!(atof("1e"), 1.0);
        assert_eq!(atof("nope"), 0.0);
        assert_eq!(atof("."), 0.0);
        assert!(atof("-inf").is_infinite());
        assert!(atof("nan").is_nan());
    }

    #[test]
    fn scan_vectors() {
        assert_eq!(scan_floats::<3>("<1, 2.5, -3>"), Some([1.0, 2.5, -3.0]));
        assert_eq!(scan_floats::<3>("<1,2,3"), Some([1.0, 2.0, 3.0]));
        assert_eq!(scan_floats::<3>(" <1, 2, 3>"), None);
        assert_eq!(scan_floats::<3>("<1 , 2, 3>"), None);
        assert_eq!(scan_floats::<3>("<1, 2>"), None);
        assert_eq!(scan_floats::<4>("<0, 0, 0, 1>"), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn numbers_to_strings() {
        let mut mem = scratch_memory();
        mem.push_i32(-12);
        cast(&mut mem, type_pair(LslType::Integer, LslType::String));
        assert_eq!(pop_string(&mut mem), "-12");

        mem.push_f32(1.5);
        cast(&mut mem, type_pair(LslType::Float, LslType::String));
        assert_eq!(pop_string(&mut mem), "1.500000");

        mem.push_vector(Vector::new(1.0, 2.0, 3.0));
        cast(&mut mem, type_pair(LslType::Vector, LslType::String));
        assert_eq!(pop_string(&mut mem), "<1.00000, 2.00000, 3.00000>");

        mem.push_quaternion(Quaternion::IDENTITY);
        cast(&mut mem, type_pair(LslType::Quaternion, LslType::String));
        assert_eq!(pop_string(&mut mem), "<0.00000, 0.00000, 0.00000, 1.00000>");
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn float_to_integer_truncates() {
        let mut mem = scratch_memory();
        mem.push_f32(-2.9);
        cast(&mut mem, type_pair(LslType::Float, LslType::Integer));
        assert_eq!(mem.pop_i32(), -2);
    }

    #[test]
    fn strings_to_numbers() {
        let mut mem = cast_string("0x20", LslType::Integer);
        assert_eq!(mem.pop_i32(), 32);

        let mut mem = cast_string("2.5", LslType::Float);
        assert_eq!(mem.pop_f32(), 2.5);

        let mut mem = cast_string("<1, 2, 3>", LslType::Vector);
        assert_eq!(mem.pop_vector(), Vector::new(1.0, 2.0, 3.0));

        let mut mem = cast_string("garbage", LslType::Vector);
        assert_eq!(mem.pop_vector(), Vector::ZERO);

        let mut mem = cast_string("<1, 2, 3>", LslType::Quaternion);
        assert_eq!(mem.pop_quaternion(), Quaternion::IDENTITY);
        assert_eq!(mem.fault(), None);
    }

    #[test]
    fn scalar_to_list_and_back() {
        let mut mem = scratch_memory();
        mem.push_i32(7);
        cast(&mut mem, type_pair(LslType::Integer, LslType::List));
        cast(&mut mem, type_pair(LslType::List, LslType::String));
        assert_eq!(pop_string(&mut mem), "7");

        let mut mem = cast_string("abc", LslType::List);
        let list = mem.pop_ref();
        assert_eq!(
            mem.take_value(list),
            Some(LslValue::List(vec![LslValue::String("abc".into())]))
        );
        assert!(mem.heap_blocks().iter().all(|b| b.is_free()));
    }

    #[test]
    fn identity_and_unknown_casts_are_noops() {
        let mut mem = scratch_memory();
        mem.push_i32(5);
        cast(&mut mem, type_pair(LslType::Integer, LslType::Integer));
        cast(&mut mem, 0x9f);
        assert_eq!(mem.pop_i32(), 5);
    }
}
