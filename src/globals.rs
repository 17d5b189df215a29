//! The global variable table shared by the compiler and the VM.
//!
//! The compiler turns every global name into a stable index the first time
//! it sees it; the VM reads and writes a directly indexed value array.
//! Unassigned slots hold [`Value::Undefined`], and only the VM decides
//! whether touching one is an error.

use std::collections::HashMap;

use crate::gc::ObjRef;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Globals {
    indices: HashMap<String, usize>,
    /// Reverse mapping, for diagnostics.
    names: Vec<String>,
    values: Vec<Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `name`, registering it (as undefined) on first sight.
    pub fn resolve(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.indices.get(name) {
            return idx;
        }
        let idx = self.names.len();
        self.indices.insert(name.to_string(), idx);
        self.names.push(name.to_string());
        self.values.push(Value::Undefined);
        idx
    }

    /// Index for `name` if it was ever registered.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    /// Current value at `idx`; `Undefined` for unknown indices.
    #[inline]
    pub fn get(&self, idx: usize) -> Value {
        self.values.get(idx).copied().unwrap_or(Value::Undefined)
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: Value) {
        if idx >= self.values.len() {
            self.values.resize(idx + 1, Value::Undefined);
        }
        self.values[idx] = value;
    }

    /// Register `name` and assign it in one step.
    pub fn define(&mut self, name: &str, value: Value) -> usize {
        let idx = self.resolve(name);
        self.set(idx, value);
        idx
    }

    /// Value of the global called `name`, if it is defined.
    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        self.lookup(name)
            .map(|idx| self.get(idx))
            .filter(|v| !v.is_undefined())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Heap handles held by global values (collector roots).
    pub fn roots(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.values.iter().filter_map(|v| v.as_obj())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_stable() {
        let mut globals = Globals::new();
        let a = globals.resolve("a");
        let b = globals.resolve("b");
        assert_eq!(globals.resolve("a"), a);
        assert_ne!(a, b);
        assert_eq!(globals.name(b), Some("b"));
        assert_eq!(globals.len(), 2);
    }

    #[test]
    fn test_unassigned_is_undefined() {
        let mut globals = Globals::new();
        let idx = globals.resolve("later");
        assert!(globals.get(idx).is_undefined());
        assert!(globals.get(999).is_undefined());
        assert_eq!(globals.get_by_name("later"), None);

        globals.set(idx, Value::Nil);
        assert_eq!(globals.get_by_name("later"), Some(Value::Nil));
    }

    #[test]
    fn test_define() {
        let mut globals = Globals::new();
        let idx = globals.define("x", Value::Number(3.0));
        assert_eq!(globals.lookup("x"), Some(idx));
        assert_eq!(globals.get(idx), Value::Number(3.0));
        assert_eq!(globals.roots().count(), 0);
    }
}
