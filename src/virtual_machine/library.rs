//! Host library table called through `CALLLIB`.
//!
//! Scripts name library functions by their index in the table, so the order
//! of a [`Library`] is part of the contract between compiler and runtime.
//! Each entry declares its argument and return types with the signature
//! characters `i f s k v q l`; the interpreter pops and pushes accordingly.

use crate::info;
use crate::types::math::Vector;
use crate::virtual_machine::value::{LslType, LslValue};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Callback implementing a library function.
///
/// Receives the arguments in declaration order and the id of the calling
/// script. Returning `None` (or a value of the wrong type) stores the default
/// value of the declared return type.
pub type LibraryExec = Arc<dyn Fn(&[LslValue], &Uuid) -> Option<LslValue> + Send + Sync>;

#[derive(Clone)]
pub struct LibraryFunction {
    pub name: String,
    /// Energy taken from the energy register per call.
    pub energy: f32,
    /// Seconds added to the sleep register per call.
    pub sleep: f32,
    pub return_type: Option<LslType>,
    pub args: Vec<LslType>,
    /// Restricted to privileged scripts. The interpreter does not enforce it.
    pub god_only: bool,
    exec: LibraryExec,
}

impl LibraryFunction {
    /// Creates an entry from signature strings. `return_sig` is empty for
    /// functions without a result; unknown characters are ignored.
    pub fn new<F>(name: &str, energy: f32, sleep: f32, return_sig: &str, arg_sig: &str, exec: F) -> Self
    where
        F: Fn(&[LslValue], &Uuid) -> Option<LslValue> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            energy,
            sleep,
            return_type: return_sig.chars().next().and_then(LslType::from_signature),
            args: arg_sig.chars().filter_map(LslType::from_signature).collect(),
            god_only: false,
            exec: Arc::new(exec),
        }
    }

    pub fn god_only(mut self) -> Self {
        self.god_only = true;
        self
    }

    /// Runs the function and coerces its result to the declared return type.
    pub fn call(&self, args: &[LslValue], script_id: &Uuid) -> Option<LslValue> {
        let ret = self.return_type?;
        match (self.exec)(args, script_id) {
            Some(value) if value.lsl_type() == ret => Some(value),
            _ => LslValue::default_for(ret),
        }
    }
}

impl fmt::Debug for LibraryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryFunction")
            .field("name", &self.name)
            .field("energy", &self.energy)
            .field("sleep", &self.sleep)
            .field("return_type", &self.return_type)
            .field("args", &self.args)
            .field("god_only", &self.god_only)
            .finish_non_exhaustive()
    }
}

/// Ordered table of library functions.
#[derive(Clone, Debug, Default)]
pub struct Library {
    functions: Vec<LibraryFunction>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a function and returns its call index.
    pub fn add(&mut self, function: LibraryFunction) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&LibraryFunction> {
        self.functions.get(index)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Math and string functions with their standard costs, in call-index order.
    pub fn builtin() -> Self {
        let mut lib = Library::new();
        lib.add(float_fn("llSin", f32::sin));
        lib.add(float_fn("llCos", f32::cos));
        lib.add(float_fn("llTan", f32::tan));
        lib.add(LibraryFunction::new("llAtan2", 10.0, 0.0, "f", "ff", |args, _| {
            let (y, x) = (float_arg(args, 0), float_arg(args, 1));
            Some(LslValue::Float(y.atan2(x)))
        }));
        lib.add(float_fn("llSqrt", f32::sqrt));
        lib.add(LibraryFunction::new("llPow", 10.0, 0.0, "f", "ff", |args, _| {
            Some(LslValue::Float(float_arg(args, 0).powf(float_arg(args, 1))))
        }));
        lib.add(LibraryFunction::new("llAbs", 10.0, 0.0, "i", "i", |args, _| {
            Some(LslValue::Integer(int_arg(args, 0).wrapping_abs()))
        }));
        lib.add(float_fn("llFabs", f32::abs));
        lib.add(float_fn("llFrand", |mag| {
            mag * rand::thread_rng().r#gen::<f32>()
        }));
        lib.add(rounding_fn("llFloor", f32::floor));
        lib.add(rounding_fn("llCeil", f32::ceil));
        lib.add(rounding_fn("llRound", |v| (v + 0.5).floor()));
        lib.add(LibraryFunction::new("llVecMag", 10.0, 0.0, "f", "v", |args, _| {
            Some(LslValue::Float(vector_arg(args, 0).magnitude()))
        }));
        lib.add(LibraryFunction::new("llVecNorm", 10.0, 0.0, "v", "v", |args, _| {
            let v = vector_arg(args, 0);
            let mag = v.magnitude();
            let norm = if mag > 0.0 { v.scale(1.0 / mag) } else { Vector::ZERO };
            Some(LslValue::Vector(norm))
        }));
        lib.add(LibraryFunction::new("llVecDist", 10.0, 0.0, "f", "vv", |args, _| {
            let d = vector_arg(args, 0) - vector_arg(args, 1);
            Some(LslValue::Float(d.magnitude()))
        }));
        lib.add(LibraryFunction::new("llStringLength", 10.0, 0.0, "i", "s", |args, _| {
            let len = args.first().and_then(LslValue::as_str).map_or(0, |s| s.chars().count());
            Some(LslValue::Integer(len as i32))
        }));
        lib.add(LibraryFunction::new("llToUpper", 10.0, 0.0, "s", "s", |args, _| {
            let s = args.first().and_then(LslValue::as_str).unwrap_or_default();
            Some(LslValue::String(s.to_uppercase()))
        }));
        lib.add(LibraryFunction::new("llToLower", 10.0, 0.0, "s", "s", |args, _| {
            let s = args.first().and_then(LslValue::as_str).unwrap_or_default();
            Some(LslValue::String(s.to_lowercase()))
        }));
        lib.add(LibraryFunction::new("llGetListLength", 10.0, 0.0, "i", "l", |args, _| {
            match args.first() {
                Some(LslValue::List(items)) => Some(LslValue::Integer(items.len() as i32)),
                _ => None,
            }
        }));
        lib.add(LibraryFunction::new("llOwnerSay", 10.0, 0.0, "", "s", |args, id| {
            let text = args.first().and_then(LslValue::as_str).unwrap_or_default();
            info!("[{}] {}", id, text);
            None
        }));
        lib
    }
}

fn int_arg(args: &[LslValue], index: usize) -> i32 {
    match args.get(index) {
        Some(LslValue::Integer(i)) => *i,
        _ => 0,
    }
}

fn float_arg(args: &[LslValue], index: usize) -> f32 {
    match args.get(index) {
        Some(LslValue::Float(f)) => *f,
        _ => 0.0,
    }
}

fn vector_arg(args: &[LslValue], index: usize) -> Vector {
    match args.get(index) {
        Some(LslValue::Vector(v)) => *v,
        _ => Vector::ZERO,
    }
}

fn float_fn(name: &str, f: fn(f32) -> f32) -> LibraryFunction {
    LibraryFunction::new(name, 10.0, 0.0, "f", "f", move |args, _| {
        Some(LslValue::Float(f(float_arg(args, 0))))
    })
}

fn rounding_fn(name: &str, f: fn(f32) -> f32) -> LibraryFunction {
    LibraryFunction::new(name, 10.0, 0.0, "i", "f", move |args, _| {
        Some(LslValue::Integer(f(float_arg(args, 0)) as i32))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(lib: &Library, name: &str, args: &[LslValue]) -> Option<LslValue> {
        let index = lib.index_of(name).unwrap();
        lib.get(index).unwrap().call(args, &Uuid::nil())
    }

    #[test]
    fn builtin_order_is_stable() {
        let lib = Library::builtin();
        assert_eq!(lib.index_of("llSin"), Some(0));
        assert_eq!(lib.index_of("llAbs"), Some(6));
        assert_eq!(lib.index_of("llVecDist"), Some(14));
        assert_eq!(lib.index_of("llGetListLength"), Some(18));
        assert_eq!(lib.index_of("llNope"), None);
    }

    #[test]
    fn signatures_are_parsed() {
        let lib = Library::builtin();
        let dist = lib.get(lib.index_of("llVecDist").unwrap()).unwrap();
        assert_eq!(dist.args, vec![LslType::Vector, LslType::Vector]);
        assert_eq!(dist.return_type, Some(LslType::Float));
        let say = lib.get(lib.index_of("llOwnerSay").unwrap()).unwrap();
        assert_eq!(say.return_type, None);
        assert_eq!(say.energy, 10.0);
    }

    #[test]
    fn math_functions() {
        let lib = Library::builtin();
        assert_eq!(call(&lib, "llAbs", &[LslValue::Integer(-3)]), Some(LslValue::Integer(3)));
        assert_eq!(call(&lib, "llSqrt", &[LslValue::Float(9.0)]), Some(LslValue::Float(3.0)));
        assert_eq!(call(&lib, "llFloor", &[LslValue::Float(-1.5)]), Some(LslValue::Integer(-2)));
        assert_eq!(call(&lib, "llRound", &[LslValue::Float(2.5)]), Some(LslValue::Integer(3)));
        assert_eq!(
            call(
                &lib,
                "llVecDist",
                &[
                    LslValue::Vector(Vector::new(1.0, 2.0, 3.0)),
                    LslValue::Vector(Vector::new(1.0, 2.0, 7.0)),
                ]
            ),
            Some(LslValue::Float(4.0))
        );
    }

    #[test]
    fn frand_stays_in_range() {
        let lib = Library::builtin();
        for _ in 0..50 {
            match call(&lib, "llFrand", &[LslValue::Float(2.0)]) {
                Some(LslValue::Float(v)) => assert!((0.0..2.0).contains(&v)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn string_and_list_functions() {
        let lib = Library::builtin();
        assert_eq!(
            call(&lib, "llStringLength", &[LslValue::String("hello".into())]),
            Some(LslValue::Integer(5))
        );
        assert_eq!(
            call(&lib, "llToUpper", &[LslValue::String("abC".into())]),
            Some(LslValue::String("ABC".into()))
        );
        let list = LslValue::List(vec![LslValue::Integer(1), LslValue::Float(2.0)]);
        assert_eq!(call(&lib, "llGetListLength", &[list]), Some(LslValue::Integer(2)));
    }

    #[test]
    fn wrong_result_type_becomes_default() {
        let mut lib = Library::new();
        let index = lib.add(LibraryFunction::new("bad", 1.0, 0.0, "v", "", |_, _| {
            Some(LslValue::Integer(1))
        }));
        let f = lib.get(index).unwrap();
        assert_eq!(f.call(&[], &Uuid::nil()), Some(LslValue::Vector(Vector::ZERO)));
    }

    #[test]
    fn god_only_flag() {
        let f = LibraryFunction::new("llGodLikeRezObject", 10.0, 0.0, "", "kv", |_, _| None).god_only();
        assert!(f.god_only);
        assert_eq!(f.args, vec![LslType::Key, LslType::Vector]);
        assert_eq!(f.call(&[], &Uuid::nil()), None);
    }
}
