//! Slot arena for heap-allocated values with per-slot reference counts.
//!
//! Strings, arrays, sets, records, and function pointers follow plain
//! counted ownership: evaluator temporaries own references and release them
//! when dropped. Object instances are different: their slot count is the
//! *language-visible* reference count, moved only by assignment into
//! variables, fields, parameters, and interface wrappers — temporaries never
//! touch it, so an object that is constructed and never stored anywhere is
//! simply leaked rather than destroyed (matching the language semantics).
//!
//! Releasing data can require running user code (object destructors) and
//! tearing down captured scope chains, neither of which the heap can do
//! itself. `dec_ref` therefore cascades only through pure data and records
//! everything else in a [`ReleaseQueue`] for the evaluator to drain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    namespace::ScopeId,
    resource::{ResourceError, ResourceTracker},
    types::{ArrayObj, FuncPtrObj, Instance, RecordObj, SetObj},
    value::Value,
};

/// Index of a slot in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct HeapId(u32);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Data stored in a heap slot.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum HeapData {
    Str(String),
    Array(ArrayObj),
    Set(SetObj),
    Record(RecordObj),
    Object(Instance),
    FuncPtr(FuncPtrObj),
}

impl HeapData {
    /// Static variant name, used for heap statistics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::Array(_) => "Array",
            Self::Set(_) => "Set",
            Self::Record(_) => "Record",
            Self::Object(_) => "Object",
            Self::FuncPtr(_) => "FuncPtr",
        }
    }
}

/// Rough per-allocation size estimate for resource tracking.
fn data_size(data: &HeapData) -> usize {
    std::mem::size_of::<HeapData>()
        + match data {
            HeapData::Str(s) => s.len(),
            HeapData::Array(arr) => arr.values.len() * std::mem::size_of::<Value>(),
            HeapData::Set(_) => 64,
            HeapData::Record(rec) => rec.fields.len() * (std::mem::size_of::<Value>() + 8),
            HeapData::Object(inst) => inst.fields.len() * (std::mem::size_of::<Value>() + 8),
            HeapData::FuncPtr(_) => 0,
        }
}

/// Deferred releases produced while freeing heap data.
///
/// `objects` holds one entry per released *reference* to an object (the
/// evaluator decrements the object's count and may run its destructor);
/// `scopes` holds captured scope chains released by freed function pointers.
#[derive(Debug, Default)]
pub(crate) struct ReleaseQueue {
    pub objects: Vec<HeapId>,
    pub scopes: Vec<ScopeId>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.scopes.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Slot {
    data: Option<HeapData>,
    refs: u32,
}

/// Snapshot of heap state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live slots.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live slots by data variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// The heap arena.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    slots: Vec<Slot>,
    free: Vec<HeapId>,
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            slots: Vec::with_capacity(64),
            free: Vec::new(),
            tracker,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a slot for `data`.
    ///
    /// Non-object data starts with one reference owned by the returned
    /// handle. Objects start at zero: their count moves only on assignment.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data_size(&data))?;
        let refs = if matches!(data, HeapData::Object(_)) { 0 } else { 1 };
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.index()];
            debug_assert!(slot.data.is_none());
            slot.data = Some(data);
            slot.refs = refs;
            Ok(id)
        } else {
            let id = HeapId(u32::try_from(self.slots.len()).expect("heap overflow"));
            self.slots.push(Slot { data: Some(data), refs });
            Ok(id)
        }
    }

    /// Returns the data in a live slot.
    ///
    /// # Panics
    /// Panics if the slot has been freed; that is an evaluator bug, not a
    /// script error.
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()].data.as_ref().expect("access to freed heap slot")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()].data.as_mut().expect("access to freed heap slot")
    }

    /// Current reference count of a slot.
    pub fn refs(&self, id: HeapId) -> u32 {
        self.slots[id.index()].refs
    }

    pub fn is_object(&self, id: HeapId) -> bool {
        matches!(self.slots[id.index()].data, Some(HeapData::Object(_)))
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        self.slots[id.index()].refs += 1;
    }

    /// Decrements an *object* slot's count without freeing; returns the new
    /// count. Destructor invocation and slot reclamation are the evaluator's
    /// job.
    pub fn dec_object_ref(&mut self, id: HeapId) -> u32 {
        let slot = &mut self.slots[id.index()];
        debug_assert!(matches!(slot.data, Some(HeapData::Object(_))));
        debug_assert!(slot.refs > 0, "object refcount underflow");
        slot.refs -= 1;
        slot.refs
    }

    /// Takes an object's data out of its slot and recycles the slot.
    ///
    /// Called by the evaluator once the destructor has run and the count has
    /// reached zero.
    pub fn free_object(&mut self, id: HeapId) -> Instance {
        let slot = &mut self.slots[id.index()];
        let data = slot.data.take().expect("double free of object slot");
        self.tracker.on_free(|| data_size(&data));
        self.free.push(id);
        match data {
            HeapData::Object(inst) => inst,
            other => panic!("free_object on non-object slot {}", other.type_name()),
        }
    }

    /// Releases one reference to a non-object slot, cascading through freed
    /// data. Object references and captured scopes encountered along the way
    /// are deferred into `queue`.
    pub fn dec_ref(&mut self, id: HeapId, queue: &mut ReleaseQueue) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let slot = &mut self.slots[id.index()];
            debug_assert!(
                !matches!(slot.data, Some(HeapData::Object(_))),
                "object references are released through dec_object_ref"
            );
            debug_assert!(slot.refs > 0, "refcount underflow");
            slot.refs -= 1;
            if slot.refs > 0 {
                continue;
            }
            let data = slot.data.take().expect("double free");
            self.tracker.on_free(|| data_size(&data));
            self.free.push(id);
            match data {
                HeapData::Str(_) | HeapData::Set(_) => {}
                HeapData::Array(arr) => {
                    for value in arr.values {
                        self.classify(value, &mut work, queue);
                    }
                }
                HeapData::Record(rec) => {
                    for (_, value) in rec.fields {
                        self.classify(value, &mut work, queue);
                    }
                }
                HeapData::Object(_) => unreachable!("checked above"),
                HeapData::FuncPtr(fp) => {
                    if let Some(obj) = fp.bound_self {
                        queue.objects.push(obj);
                    }
                    if let Some(env) = fp.env {
                        queue.scopes.push(env);
                    }
                }
            }
        }
    }

    /// Routes a value owned by freed data to the right release path.
    fn classify(&self, value: Value, work: &mut Vec<HeapId>, queue: &mut ReleaseQueue) {
        match value {
            Value::Ref(id) => {
                if self.is_object(id) {
                    queue.objects.push(id);
                } else {
                    work.push(id);
                }
            }
            Value::Interface { obj, .. } => queue.objects.push(obj),
            _ => {}
        }
    }

    /// Produces a snapshot of current heap occupancy.
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live = 0usize;
        for slot in &self.slots {
            if let Some(data) = &slot.data {
                live += 1;
                *objects_by_type.entry(data.type_name()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects: live,
            free_slots: self.free.len(),
            total_slots: self.slots.len(),
            objects_by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resource::NoLimitTracker, typereg::TypeId};

    #[test]
    fn alloc_and_release_string() {
        let mut heap = Heap::new(NoLimitTracker::new());
        let id = heap.allocate(HeapData::Str("hi".into())).unwrap();
        assert_eq!(heap.refs(id), 1);
        heap.inc_ref(id);
        let mut queue = ReleaseQueue::new();
        heap.dec_ref(id, &mut queue);
        assert_eq!(heap.refs(id), 1);
        heap.dec_ref(id, &mut queue);
        assert!(queue.is_empty());
        assert_eq!(heap.stats().live_objects, 0);
        assert_eq!(heap.stats().free_slots, 1);
    }

    #[test]
    fn freeing_array_cascades_to_elements() {
        let mut heap = Heap::new(NoLimitTracker::new());
        let s = heap.allocate(HeapData::Str("elem".into())).unwrap();
        let arr = heap
            .allocate(HeapData::Array(ArrayObj::dynamic(TypeId::STRING, vec![Value::Ref(s)])))
            .unwrap();
        let mut queue = ReleaseQueue::new();
        heap.dec_ref(arr, &mut queue);
        assert!(queue.is_empty());
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new(NoLimitTracker::new());
        let a = heap.allocate(HeapData::Str("a".into())).unwrap();
        let mut queue = ReleaseQueue::new();
        heap.dec_ref(a, &mut queue);
        let b = heap.allocate(HeapData::Str("b".into())).unwrap();
        assert_eq!(a, b);
    }
}
