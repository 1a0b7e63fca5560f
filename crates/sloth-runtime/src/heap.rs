//! Managed heap
//!
//! Closures live in a concurrent map keyed by object id. Ids come from a
//! process-wide counter and are never reused, so a [`BoxedValue`] kept past
//! a collection or a runtime shutdown is detected as dangling instead of
//! silently naming some other object.

use crate::closure::{Closure, Thunk};
use crate::scheduler::TsoId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a heap closure
///
/// Boxed values are plain copyable handles. They stay valid while the
/// runtime that issued them is running and the object is reachable from
/// a root (see [`Rts::perform_gc`](crate::Rts::perform_gc)).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxedValue(u64);

impl BoxedValue {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        BoxedValue(id)
    }
}

impl fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxedValue(#{})", self.0)
    }
}

impl fmt::Display for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocation counters for the current runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: u64,
    pub freed: u64,
    pub peak_live: u64,
}

impl HeapStats {
    pub fn live(&self) -> u64 {
        self.allocated - self.freed
    }
}

/// Outcome of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub live: usize,
    pub freed: usize,
}

/// Result of entering a closure for evaluation
pub(crate) enum Entered {
    /// Already a value (indirections followed)
    Value(BoxedValue),
    /// A thunk, now black-holed on behalf of the entering thread
    Thunk { id: BoxedValue, thunk: Thunk },
    /// Under evaluation by `owner`
    BlackHole { id: BoxedValue, owner: TsoId },
}

pub(crate) struct Heap {
    objects: DashMap<u64, Closure>,
    allocated: AtomicU64,
    freed: AtomicU64,
    peak_live: AtomicU64,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            objects: DashMap::new(),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            peak_live: AtomicU64::new(0),
        }
    }

    pub(crate) fn alloc(&self, closure: Closure) -> BoxedValue {
        let id = NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(id, closure);

        let allocated = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        let live = allocated - self.freed.load(Ordering::Relaxed);
        self.peak_live.fetch_max(live, Ordering::Relaxed);
        BoxedValue(id)
    }

    /// Abort unless `obj` names a live object
    pub(crate) fn check(&self, obj: BoxedValue) {
        if !self.objects.contains_key(&obj.0) {
            dangling(obj);
        }
    }

    /// Inspect a closure without following indirections
    pub(crate) fn with<T>(&self, obj: BoxedValue, f: impl FnOnce(&Closure) -> T) -> T {
        match self.objects.get(&obj.0) {
            Some(entry) => f(entry.value()),
            None => dangling(obj),
        }
    }

    /// Follow indirections to the closure they end at
    pub(crate) fn resolve(&self, mut obj: BoxedValue) -> BoxedValue {
        loop {
            match self.with(obj, |c| match c {
                Closure::Ind(next) => Some(*next),
                _ => None,
            }) {
                Some(next) => obj = next,
                None => return obj,
            }
        }
    }

    /// The value `obj` evaluates to, if it has been evaluated already
    pub(crate) fn evaluated(&self, obj: BoxedValue) -> Option<BoxedValue> {
        let target = self.resolve(obj);
        self.with(target, Closure::is_value).then_some(target)
    }

    /// Enter a closure, black-holing it if it is a thunk
    ///
    /// The swap from thunk to black hole happens under the entry lock, so
    /// exactly one thread wins the right to evaluate a given thunk.
    pub(crate) fn enter(&self, obj: BoxedValue, owner: TsoId) -> Entered {
        let mut id = obj;
        loop {
            let Some(mut entry) = self.objects.get_mut(&id.0) else {
                dangling(id);
            };
            let closure = entry.value_mut();
            match closure {
                Closure::Ind(next) => id = *next,
                Closure::BlackHole { owner: holder, .. } => {
                    return Entered::BlackHole { id, owner: *holder };
                }
                Closure::Thunk(_) => {
                    let hole = Closure::BlackHole {
                        owner,
                        waited: false,
                    };
                    if let Closure::Thunk(thunk) = std::mem::replace(closure, hole) {
                        return Entered::Thunk { id, thunk };
                    }
                }
                _ => return Entered::Value(id),
            }
        }
    }

    /// Overwrite a black hole with its result (or its restored thunk)
    ///
    /// Returns whether another thread was waiting on the black hole.
    pub(crate) fn update(&self, obj: BoxedValue, closure: Closure) -> bool {
        match self.objects.get_mut(&obj.0) {
            Some(mut entry) => {
                let old = std::mem::replace(entry.value_mut(), closure);
                matches!(old, Closure::BlackHole { waited: true, .. })
            }
            None => false,
        }
    }

    /// Register interest in a black hole
    ///
    /// Returns false once the black hole has been updated.
    pub(crate) fn await_blackhole(&self, obj: BoxedValue) -> bool {
        match self.objects.get_mut(&obj.0) {
            Some(mut entry) => match entry.value_mut() {
                Closure::BlackHole { waited, .. } => {
                    *waited = true;
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Free every object not reachable from `roots`
    ///
    /// Objects allocated after the collection starts are never freed by it.
    pub(crate) fn collect(&self, roots: impl IntoIterator<Item = BoxedValue>) -> GcStats {
        let watermark = NEXT_OBJECT_ID.load(Ordering::SeqCst);
        let mut marked: HashSet<u64> = HashSet::new();
        let mut pending: Vec<BoxedValue> = roots.into_iter().collect();

        while let Some(obj) = pending.pop() {
            if !marked.insert(obj.0) {
                continue;
            }
            if let Some(entry) = self.objects.get(&obj.0) {
                entry.value().for_each_ref(|r| pending.push(r));
            }
        }

        let before = self.objects.len();
        self.objects
            .retain(|id, _| *id >= watermark || marked.contains(id));
        let live = self.objects.len();
        let freed = before.saturating_sub(live);
        self.freed.fetch_add(freed as u64, Ordering::Relaxed);

        GcStats { live, freed }
    }

    /// Drop every object
    pub(crate) fn clear(&self) {
        let freed = self.objects.len() as u64;
        self.objects.clear();
        self.freed.fetch_add(freed, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> HeapStats {
        HeapStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            peak_live: self.peak_live.load(Ordering::Relaxed),
        }
    }
}

fn dangling(obj: BoxedValue) -> ! {
    contract_violation!(
        "dangling boxed value {obj}: collected, or issued by a runtime that has shut down"
    )
}
