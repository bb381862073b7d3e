//! Atomic reference counter with a release hook.
//!
//! Every device node carries one of these. The count starts at one (the
//! creator's reference); whoever drops the last reference runs the release
//! hook, exactly once.

use core::sync::atomic::{AtomicUsize, Ordering, fence};

/// Reference counter for a shared object.
///
/// Releasing more references than were acquired is a caller bug. It trips a
/// debug assertion; release builds log it and leave the count at zero.
pub struct Kref {
    refcount: AtomicUsize,
}

impl Kref {
    /// Creates a counter holding one reference.
    pub const fn new() -> Self {
        Self {
            refcount: AtomicUsize::new(1),
        }
    }

    /// Current number of references.
    #[inline]
    pub fn read(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Acquires one more reference.
    ///
    /// The caller must already own a reference.
    #[inline]
    pub fn get(&self) {
        let old = self.refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old != 0, "Kref::get on a released object");
    }

    /// Acquires a reference unless the object is already on its way out.
    ///
    /// Returns `false` if the count had dropped to zero.
    pub fn get_unless_zero(&self) -> bool {
        let mut current = self.refcount.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.refcount.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops one reference, calling `release` if it was the last one.
    ///
    /// Returns `true` if `release` ran.
    pub fn put<F: FnOnce()>(&self, release: F) -> bool {
        let mut current = self.refcount.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                debug_assert!(false, "Kref::put underflow");
                error!("kref: put on an object with no references left");
                return false;
            }
            match self.refcount.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current != 1 {
            return false;
        }

        // Pairs with the Release decrements of other owners.
        fence(Ordering::Acquire);
        release();
        true
    }
}

impl Default for Kref {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Kref {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Kref").field(&self.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kref_release_once() {
        let released = AtomicUsize::new(0);
        let kref = Kref::new();
        kref.get();
        assert_eq!(kref.read(), 2);

        assert!(!kref.put(|| {
            released.fetch_add(1, Ordering::Relaxed);
        }));
        assert!(kref.put(|| {
            released.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(released.load(Ordering::Relaxed), 1);
        assert_eq!(kref.read(), 0);
    }

    #[test]
    fn test_kref_get_unless_zero() {
        let kref = Kref::new();
        assert!(kref.get_unless_zero());
        kref.put(|| {});
        kref.put(|| {});
        assert!(!kref.get_unless_zero());
        assert_eq!(kref.read(), 0);
    }
}
