//! Handle-arena heap with a stop-the-world mark-and-sweep collector.
//!
//! # Architecture
//!
//! Every heap object lives in a slot of one `Vec`, addressed by an
//! [`ObjRef`] handle.  Handles are plain indices: `Copy`, hashable, and
//! compared by identity.  The arena never moves an object after allocation,
//! and a freed slot is recycled through a free list.
//!
//! 1. **Mark**: starting from the roots the VM hands to [`Heap::collect`]
//!    (operand stack, globals, open upvalues, frame closures), every
//!    reachable object is marked through its [`GcTrace`] implementation using
//!    an explicit gray worklist.
//! 2. **Sweep**: unmarked slots are emptied and pushed on the free list;
//!    dead entries are pruned from the string-intern table.
//!
//! Collection only happens when the VM asks for it between instructions,
//! so a handle held in a Rust local during one instruction can never dangle.
//! Dropping the heap releases every object at once.
//!
//! # Strings
//!
//! Strings are interned: [`Heap::intern`] returns the existing handle for
//! equal content, so string equality is handle equality.

use std::collections::HashMap;
use std::fmt;

use crate::value::{Function, Object};

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// A handle to a heap object.  Identity is the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GcTrace trait
// ─────────────────────────────────────────────────────────────────────────────

/// Implemented by everything that can hold handles to other heap objects.
pub trait GcTrace {
    /// Push every handle directly reachable from `self` onto `gray`.
    fn trace(&self, gray: &mut Vec<ObjRef>);

    /// Approximate bytes owned by this object beyond its slot.
    fn heap_size(&self) -> usize {
        0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heap
// ─────────────────────────────────────────────────────────────────────────────

struct Slot {
    marked: bool,
    /// `None` while the slot sits on the free list.
    object: Option<Object>,
}

/// The object heap.  One per VM instance.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Interned string content → handle.  Weak: pruned during sweep.
    strings: HashMap<Box<str>, ObjRef>,
    /// Approximate bytes currently allocated.
    bytes_allocated: usize,
    /// Collect once `bytes_allocated` reaches this.
    next_gc: usize,
    /// Floor for `next_gc` after a cycle.
    min_threshold: usize,
    /// Collect at every opportunity (tests and `--gc-stress`).
    stress: bool,
    /// Number of completed collection cycles.
    pub cycles: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Initial collection threshold (1 MiB).
    pub const INITIAL_THRESHOLD: usize = 1024 * 1024;
    /// Threshold multiplier applied to the surviving size after each cycle.
    const GROW_FACTOR: usize = 2;

    pub fn new() -> Self {
        Self::with_threshold(Self::INITIAL_THRESHOLD)
    }

    /// Create a heap that first collects after `threshold` bytes.
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: HashMap::new(),
            bytes_allocated: 0,
            next_gc: threshold,
            min_threshold: threshold,
            stress: false,
            cycles: 0,
        }
    }

    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    // ── Allocation ───────────────────────────────────────────────────────────

    /// Move `object` into the heap and return its handle.
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        self.bytes_allocated += Self::footprint(&object);
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.marked = false;
            slot.object = Some(object);
            return ObjRef(idx);
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            marked: false,
            object: Some(object),
        });
        ObjRef(idx)
    }

    /// Return the canonical string object for `s`, allocating it if needed.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        if let Some(&r) = self.strings.get(s) {
            return r;
        }
        let r = self.alloc(Object::String(s.into()));
        self.strings.insert(s.into(), r);
        r
    }

    /// Like [`Heap::intern`] but takes ownership of a freshly built string.
    pub fn intern_owned(&mut self, s: String) -> ObjRef {
        if let Some(&r) = self.strings.get(s.as_str()) {
            return r;
        }
        let content: Box<str> = s.into_boxed_str();
        let r = self.alloc(Object::String(content.clone()));
        self.strings.insert(content, r);
        r
    }

    // ── Access ───────────────────────────────────────────────────────────────

    /// Borrow the object behind `r`.
    ///
    /// # Panics
    ///
    /// If `r` refers to a freed slot.  Handles reachable from VM roots are
    /// never freed, so this indicates a missing root.
    pub fn get(&self, r: ObjRef) -> &Object {
        match self.slots.get(r.index()).and_then(|s| s.object.as_ref()) {
            Some(object) => object,
            None => panic!("dangling object handle {r}"),
        }
    }

    /// Mutable counterpart of [`Heap::get`].
    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        match self.slots.get_mut(r.index()).and_then(|s| s.object.as_mut()) {
            Some(object) => object,
            None => panic!("dangling object handle {r}"),
        }
    }

    /// `true` if `r` still refers to a live object.
    pub fn contains(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.index())
            .is_some_and(|s| s.object.is_some())
    }

    pub fn as_str(&self, r: ObjRef) -> Option<&str> {
        match self.get(r) {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self, r: ObjRef) -> Option<&Function> {
        match self.get(r) {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    // ── Collection ───────────────────────────────────────────────────────────

    /// Return `true` if a collection should run now.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated >= self.next_gc
    }

    /// Run a full cycle.  `mark_roots` pushes every root handle onto the
    /// worklist it is given.  Returns the number of objects freed.
    pub fn collect<F>(&mut self, mark_roots: F) -> usize
    where
        F: FnOnce(&mut Vec<ObjRef>),
    {
        let before = self.bytes_allocated;

        let mut gray = Vec::new();
        mark_roots(&mut gray);
        self.mark(gray);

        let freed = self.sweep();

        self.next_gc = (self.bytes_allocated * Self::GROW_FACTOR).max(self.min_threshold);
        self.cycles += 1;
        tracing::debug!(
            cycle = self.cycles,
            freed,
            before,
            after = self.bytes_allocated,
            next = self.next_gc,
            "gc cycle finished"
        );
        freed
    }

    fn mark(&mut self, mut gray: Vec<ObjRef>) {
        while let Some(r) = gray.pop() {
            let Some(slot) = self.slots.get_mut(r.index()) else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            if let Some(object) = &slot.object {
                object.trace(&mut gray);
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let slots = &self.slots;
        self.strings
            .retain(|_, r| slots.get(r.index()).is_some_and(|s| s.marked));

        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked {
                slot.marked = false;
                continue;
            }
            if let Some(object) = slot.object.take() {
                self.bytes_allocated = self
                    .bytes_allocated
                    .saturating_sub(Self::footprint(&object));
                self.free.push(idx as u32);
                freed += 1;
            }
        }
        freed
    }

    fn footprint(object: &Object) -> usize {
        std::mem::size_of::<Slot>() + object.heap_size()
    }

    // ── Metrics ──────────────────────────────────────────────────────────────

    #[inline]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of distinct interned strings.
    pub fn interned_strings(&self) -> usize {
        self.strings.len()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live_objects", &self.live_objects())
            .field("bytes_allocated", &self.bytes_allocated)
            .field("next_gc", &self.next_gc)
            .field("cycles", &self.cycles)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Upvalue, Value};

    #[test]
    fn test_intern_returns_same_handle() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern_owned(String::from("hello"));
        let d = heap.intern("world");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert_eq!(heap.as_str(a), Some("hello"));
        assert_eq!(heap.interned_strings(), 2);
    }

    #[test]
    fn test_gc_collects_unreachable() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        let dropped = heap.intern("dropped");
        assert_eq!(heap.live_objects(), 2);

        let freed = heap.collect(|gray| gray.push(kept));

        assert_eq!(freed, 1);
        assert_eq!(heap.cycles, 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
        assert_eq!(heap.interned_strings(), 1);
        assert_eq!(heap.as_str(kept), Some("kept"));
    }

    #[test]
    fn test_gc_traces_children() {
        let mut heap = Heap::new();
        let s = heap.intern("inside");
        let cell = heap.alloc(Object::Upvalue(Upvalue::Closed(Value::Obj(s))));

        heap.collect(|gray| gray.push(cell));

        assert!(heap.contains(cell));
        assert!(heap.contains(s), "closed upvalue keeps its value alive");
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = Heap::new();
        let first = heap.intern("a");
        heap.collect(|_| {});
        assert!(!heap.contains(first));
        let second = heap.intern("b");
        assert_eq!(first.index(), second.index());
        assert_eq!(heap.as_str(second), Some("b"));
    }

    #[test]
    fn test_reinterning_after_collection() {
        let mut heap = Heap::new();
        heap.intern("gone");
        heap.collect(|_| {});
        let again = heap.intern("gone");
        assert_eq!(heap.as_str(again), Some("gone"));
        assert_eq!(heap.interned_strings(), 1);
    }

    #[test]
    fn test_threshold_and_stress() {
        let mut heap = Heap::with_threshold(usize::MAX);
        heap.intern("x");
        assert!(!heap.should_collect());
        heap.set_stress(true);
        assert!(heap.should_collect());
    }
}
