//! Script value types and their in-memory sizes.

use crate::types::math::{Quaternion, Vector};
use std::fmt;

/// Type codes used in type bytes, heap record headers and list elements.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LslType {
    Null = 0,
    Integer = 1,
    Float = 2,
    String = 3,
    Key = 4,
    Vector = 5,
    Quaternion = 6,
    List = 7,
    Undefined = 8,
}

impl LslType {
    /// Number of type codes, and the dimension of the operation tables.
    pub const COUNT: usize = 9;

    pub const ALL: [LslType; LslType::COUNT] = [
        LslType::Null,
        LslType::Integer,
        LslType::Float,
        LslType::String,
        LslType::Key,
        LslType::Vector,
        LslType::Quaternion,
        LslType::List,
        LslType::Undefined,
    ];

    pub fn from_u8(code: u8) -> Option<LslType> {
        LslType::ALL.get(code as usize).copied()
    }

    /// Maps an untrusted type nibble onto a table index. Unknown codes become `Null`.
    pub fn from_nibble(code: u8) -> LslType {
        LslType::from_u8(code).unwrap_or(LslType::Null)
    }

    /// Bytes a value of this type occupies on the stack or in a variable slot.
    /// Strings, keys and lists are heap addresses.
    pub const fn data_size(self) -> i32 {
        match self {
            LslType::Null | LslType::Undefined => 0,
            LslType::Integer
            | LslType::Float
            | LslType::String
            | LslType::Key
            | LslType::List => 4,
            LslType::Vector => 12,
            LslType::Quaternion => 16,
        }
    }

    /// Type named by a library signature character.
    pub fn from_signature(c: char) -> Option<LslType> {
        match c {
            'i' => Some(LslType::Integer),
            'f' => Some(LslType::Float),
            's' => Some(LslType::String),
            'k' => Some(LslType::Key),
            'v' => Some(LslType::Vector),
            'q' => Some(LslType::Quaternion),
            'l' => Some(LslType::List),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            LslType::Null => "null",
            LslType::Integer => "integer",
            LslType::Float => "float",
            LslType::String => "string",
            LslType::Key => "key",
            LslType::Vector => "vector",
            LslType::Quaternion => "quaternion",
            LslType::List => "list",
            LslType::Undefined => "undefined",
        }
    }
}

/// A materialized script value, as passed to library functions and events.
#[derive(Clone, Debug, PartialEq)]
pub enum LslValue {
    Integer(i32),
    Float(f32),
    String(String),
    Key(String),
    Vector(Vector),
    Quaternion(Quaternion),
    List(Vec<LslValue>),
}

impl LslValue {
    pub fn lsl_type(&self) -> LslType {
        match self {
            LslValue::Integer(_) => LslType::Integer,
            LslValue::Float(_) => LslType::Float,
            LslValue::String(_) => LslType::String,
            LslValue::Key(_) => LslType::Key,
            LslValue::Vector(_) => LslType::Vector,
            LslValue::Quaternion(_) => LslType::Quaternion,
            LslValue::List(_) => LslType::List,
        }
    }

    /// Zero value of a type. `None` for types with no script representation.
    pub fn default_for(ty: LslType) -> Option<LslValue> {
        match ty {
            LslType::Integer => Some(LslValue::Integer(0)),
            LslType::Float => Some(LslValue::Float(0.0)),
            LslType::String => Some(LslValue::String(String::new())),
            LslType::Key => Some(LslValue::Key(String::new())),
            LslType::Vector => Some(LslValue::Vector(Vector::ZERO)),
            LslType::Quaternion => Some(LslValue::Quaternion(Quaternion::IDENTITY)),
            LslType::List => Some(LslValue::List(Vec::new())),
            LslType::Null | LslType::Undefined => None,
        }
    }

    /// Text of a string or key value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LslValue::String(s) | LslValue::Key(s) => Some(s),
            _ => None,
        }
    }

    /// Element-wise ordering used by list comparison. Elements of different types
    /// order by type code; equal values compare as 0.
    pub(crate) fn compare(&self, other: &LslValue) -> i32 {
        use std::cmp::Ordering;

        fn sign(ord: Option<Ordering>) -> i32 {
            match ord {
                Some(Ordering::Less) => -1,
                Some(Ordering::Greater) => 1,
                Some(Ordering::Equal) => 0,
                None => 1,
            }
        }

        match (self, other) {
            (LslValue::Integer(a), LslValue::Integer(b)) => sign(a.partial_cmp(b)),
            (LslValue::Float(a), LslValue::Float(b)) => sign(a.partial_cmp(b)),
            (LslValue::String(a), LslValue::String(b)) | (LslValue::Key(a), LslValue::Key(b)) => {
                compare_bytes(a.as_bytes(), b.as_bytes())
            }
            (LslValue::Vector(a), LslValue::Vector(b)) => {
                i32::from(a != b)
            }
            (LslValue::Quaternion(a), LslValue::Quaternion(b)) => {
                i32::from(a != b)
            }
            (LslValue::List(a), LslValue::List(b)) => {
                let by_len = a.len() as i32 - b.len() as i32;
                if by_len != 0 {
                    return by_len;
                }
                a.iter()
                    .zip(b)
                    .map(|(x, y)| x.compare(y))
                    .find(|c| *c != 0)
                    .unwrap_or(0)
            }
            _ => self.lsl_type() as i32 - other.lsl_type() as i32,
        }
    }
}

/// String comparison: a length difference decides first, then raw bytes.
pub(crate) fn compare_bytes(a: &[u8], b: &[u8]) -> i32 {
    if a.len() != b.len() {
        return if a.len() < b.len() { -1 } else { 1 };
    }
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Print form used by `PRINT` and by list-to-string casts.
impl fmt::Display for LslValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LslValue::Integer(i) => write!(f, "{i}"),
            LslValue::Float(v) => write!(f, "{v:.6}"),
            LslValue::String(s) | LslValue::Key(s) => f.write_str(s),
            LslValue::Vector(v) => write!(f, "<{:.6}, {:.6}, {:.6}>", v.x, v.y, v.z),
            LslValue::Quaternion(q) => {
                write!(f, "<{:.6}, {:.6}, {:.6}, {:.6}>", q.x, q.y, q.z, q.s)
            }
            LslValue::List(items) => items.iter().try_for_each(|item| write!(f, "{item}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_sizes_match_image_format() {
        let sizes: Vec<i32> = LslType::ALL.iter().map(|t| t.data_size()).collect();
        assert_eq!(sizes, vec![0, 4, 4, 4, 4, 12, 16, 4, 0]);
    }

    #[test]
    fn bad_nibbles_map_to_null() {
        assert_eq!(LslType::from_nibble(1), LslType::Integer);
        assert_eq!(LslType::from_nibble(9), LslType::Null);
        assert_eq!(LslType::from_nibble(15), LslType::Null);
    }

    #[test]
    fn signature_characters() {
        let parsed: Vec<_> = "ifskvql".chars().filter_map(LslType::from_signature).collect();
        assert_eq!(
            parsed,
            vec![
                LslType::Integer,
                LslType::Float,
                LslType::String,
                LslType::Key,
                LslType::Vector,
                LslType::Quaternion,
                LslType::List,
            ]
        );
        assert_eq!(LslType::from_signature('x'), None);
    }

    #[test]
    fn print_forms() {
        assert_eq!(LslValue::Integer(-3).to_string(), "-3");
        assert_eq!(LslValue::Float(1.5).to_string(), "1.500000");
        assert_eq!(
            LslValue::Vector(Vector::new(1.0, 2.0, 3.0)).to_string(),
            "<1.000000, 2.000000, 3.000000>"
        );
        let list = LslValue::List(vec![
            LslValue::Integer(1),
            LslValue::String("a".into()),
            LslValue::Float(0.5),
        ]);
        assert_eq!(list.to_string(), "1a0.500000");
    }

    #[test]
    fn string_comparison_checks_length_first() {
        assert_eq!(compare_bytes(b"abc", b"abc"), 0);
        assert_eq!(compare_bytes(b"zz", b"aaa"), -1);
        assert_eq!(compare_bytes(b"abd", b"abc"), 1);
    }

    #[test]
    fn list_comparison_is_structural() {
        let a = LslValue::List(vec![LslValue::Integer(1), LslValue::String("x".into())]);
        let b = LslValue::List(vec![LslValue::Integer(1), LslValue::String("x".into())]);
        let c = LslValue::List(vec![LslValue::Integer(1), LslValue::Key("x".into())]);
        assert_eq!(a.compare(&b), 0);
        assert_ne!(a.compare(&c), 0);
    }
}
