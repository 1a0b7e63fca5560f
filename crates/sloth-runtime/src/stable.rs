//! Stable pointers
//!
//! A stable pointer is an integer token native code can hold on to. It keeps
//! its boxed value alive across collections until it is freed, and it can be
//! stored inside the heap itself as a `StablePtr` primitive.

use crate::heap::BoxedValue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Token keeping a boxed value alive
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StablePtr(u64);

impl StablePtr {
    /// Raw token, for passing through C
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Rebuild a token received from C
    pub fn from_raw(raw: u64) -> Self {
        StablePtr(raw)
    }
}

/// Table of stable pointers, indexed by token
pub(crate) struct StablePtrTable {
    entries: DashMap<u64, BoxedValue>,
}

impl StablePtrTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, obj: BoxedValue) -> StablePtr {
        let id = NEXT_STABLE_ID.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, obj);
        StablePtr(id)
    }

    pub(crate) fn get(&self, ptr: StablePtr) -> Option<BoxedValue> {
        self.entries.get(&ptr.0).map(|entry| *entry.value())
    }

    pub(crate) fn remove(&self, ptr: StablePtr) -> Option<BoxedValue> {
        self.entries.remove(&ptr.0).map(|(_, obj)| obj)
    }

    /// Every boxed value held by a live stable pointer
    pub(crate) fn roots(&self) -> Vec<BoxedValue> {
        self.entries.iter().map(|entry| *entry.value()).collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
