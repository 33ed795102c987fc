use std::sync::atomic::{AtomicUsize, Ordering};

/// Remaining number of endpoints the run still needs.
///
/// One authoritative counter shared by every probe. `commit` is a single
/// compare-and-decrement, so two probes can never both take the last slot.
#[derive(Debug)]
pub struct Quota {
    target: usize,
    remaining: AtomicUsize,
}

impl Quota {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            remaining: AtomicUsize::new(target),
        }
    }

    /// Whether a probe may start. Only reads the counter.
    pub fn try_reserve(&self) -> bool {
        self.remaining() > 0
    }

    /// Take one slot after a confirmed success. Returns false (and leaves the
    /// counter at zero) when the quota was already used up.
    pub fn commit(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Give back a slot taken by `commit` whose result could not be kept.
    /// Never raises the counter above the target.
    pub fn release(&self) {
        let target = self.target;
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < target).then_some(n + 1));
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn filled(&self) -> usize {
        self.target - self.remaining()
    }
}
