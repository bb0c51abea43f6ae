//! At-most-one-in-flight latch
//!
//! A caller that finds the latch taken gets `None` and must treat its request
//! as a no-op; nothing is queued. The latch is released when the guard drops,
//! including on early return, `?` propagation and future cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

/// Boolean latch guarding a fetch
#[derive(Debug, Default)]
pub struct FetchLatch {
    busy: AtomicBool,
}

impl FetchLatch {
    /// Create an open latch
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the latch, or `None` if a fetch is already in flight
    #[inline]
    #[must_use]
    pub fn try_acquire(&self) -> Option<LatchGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LatchGuard { latch: self })
    }

    /// Whether a fetch is in flight
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the latch on drop
#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a FetchLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let latch = FetchLatch::new();
        let guard = latch.try_acquire();
        assert!(guard.is_some());
        assert!(latch.is_held());
        assert!(latch.try_acquire().is_none());
        drop(guard);
        assert!(!latch.is_held());
        assert!(latch.try_acquire().is_some());
    }

    #[test]
    fn released_on_error_path() {
        fn failing(latch: &FetchLatch) -> Result<(), &'static str> {
            let _guard = latch.try_acquire().ok_or("busy")?;
            Err("boom")
        }

        let latch = FetchLatch::new();
        assert_eq!(failing(&latch), Err("boom"));
        assert!(!latch.is_held());
    }
}
