//! A minimal in-process stand-in for the embedding runtime, used by this
//! crate's own unit tests and available to integration tests via the
//! `mock_test` feature. Mirrors the teacher crate's own `test_private`/
//! `mock_test`-gated mock VM bindings (`vm::MockVM` and friends), which
//! exist for exactly this reason: exercising the collector end-to-end
//! without a real embedding runtime on hand.

use std::collections::HashMap;
use std::sync::atomic::AtomicU8;
use std::sync::Mutex;

use crate::util::address::Address;
use crate::util::opaque::{ObjectReference, RawPtr};
use crate::vm::{BlockDescriptor, Field, HeapPredicate, ObjectTag, ObjectVisitor, PauseController, PauseReason};

/// A hand-rolled object graph: every address the mock knows about carries an
/// [`ObjectTag`], an optional field list, and (for pointer arrays) a slot
/// vector. Anything not explicitly configured defaults to a childless
/// `Constructor`, which is enough for most liveness tests.
pub struct MockRuntime {
    roots: Mutex<Vec<RawPtr>>,
    tags: Mutex<HashMap<Address, ObjectTag>>,
    fields: Mutex<HashMap<Address, Vec<Field>>>,
    arrays: Mutex<HashMap<Address, Vec<RawPtr>>>,
    statics: Mutex<Vec<Address>>,
    stack_dirty: Mutex<HashMap<Address, &'static AtomicU8>>,
    capability_count: usize,
}

impl MockRuntime {
    pub fn new() -> Self {
        MockRuntime {
            roots: Mutex::new(Vec::new()),
            tags: Mutex::new(HashMap::new()),
            fields: Mutex::new(HashMap::new()),
            arrays: Mutex::new(HashMap::new()),
            statics: Mutex::new(Vec::new()),
            stack_dirty: Mutex::new(HashMap::new()),
            capability_count: 1,
        }
    }

    pub fn add_root(&self, p: RawPtr) {
        self.roots.lock().unwrap().push(p);
    }

    pub fn set_tag(&self, addr: Address, tag: ObjectTag) {
        self.tags.lock().unwrap().insert(addr, tag);
    }

    pub fn set_fields(&self, addr: Address, fields: Vec<Field>) {
        self.fields.lock().unwrap().insert(addr, fields);
    }

    pub fn set_array(&self, addr: Address, slots: Vec<RawPtr>) {
        self.arrays.lock().unwrap().insert(addr, slots);
    }

    pub fn mark_static(&self, addr: Address) {
        self.statics.lock().unwrap().push(addr);
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapPredicate for MockRuntime {
    fn is_heap_allocated(&self, p: RawPtr) -> bool {
        !p.is_null()
    }

    fn is_non_moving(&self, _p: RawPtr) -> bool {
        true
    }

    fn is_static(&self, p: RawPtr) -> bool {
        self.statics.lock().unwrap().contains(&p.address())
    }

    fn block_descriptor(&self, p: RawPtr) -> BlockDescriptor {
        BlockDescriptor {
            non_moving: self.is_heap_allocated(p),
        }
    }
}

impl PauseController for MockRuntime {
    fn stop_all_mutators(&self, reason: PauseReason) {
        log::trace!("mock runtime: stop-the-world requested ({reason:?})");
    }

    fn release_all_mutators(&self) {
        log::trace!("mock runtime: mutators released");
    }

    fn capability_count(&self) -> usize {
        self.capability_count
    }

    fn for_each_root(&self, visit: &mut dyn FnMut(RawPtr)) {
        for &p in self.roots.lock().unwrap().iter() {
            visit(p);
        }
    }
}

impl ObjectVisitor for MockRuntime {
    fn tag_of(&self, obj: ObjectReference) -> ObjectTag {
        self.tags
            .lock()
            .unwrap()
            .get(&obj.to_raw_address())
            .copied()
            .unwrap_or(ObjectTag::Constructor)
    }

    fn for_each_pointer_field(&self, obj: ObjectReference, visit: &mut dyn FnMut(Field)) {
        if let Some(fields) = self.fields.lock().unwrap().get(&obj.to_raw_address()) {
            for &f in fields {
                visit(f);
            }
        }
    }

    fn stack_dirty_flags(&self, obj: ObjectReference) -> &AtomicU8 {
        let mut map = self.stack_dirty.lock().unwrap();
        map.entry(obj.to_raw_address())
            .or_insert_with(|| Box::leak(Box::new(AtomicU8::new(0))))
    }

    fn array_length(&self, array: ObjectReference) -> usize {
        self.arrays
            .lock()
            .unwrap()
            .get(&array.to_raw_address())
            .map_or(0, |s| s.len())
    }

    fn array_slot(&self, array: ObjectReference, index: usize) -> RawPtr {
        self.arrays
            .lock()
            .unwrap()
            .get(&array.to_raw_address())
            .map_or(RawPtr::NULL, |s| s[index])
    }
}
