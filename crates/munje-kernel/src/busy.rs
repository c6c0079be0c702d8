//! Single-flight guard flags.
//!
//! In-flight network calls cannot be cancelled, so overlapping effects are
//! prevented up front: whoever wins [`BusyFlag::try_begin`] holds a guard
//! until it drops, and everyone else sees the flag set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "operation in flight" flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag; `None` if someone else holds it.
    pub fn try_begin(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases its [`BusyFlag`] on drop.
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
