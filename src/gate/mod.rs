//! Concurrency gate in front of the rendering service.
//!
//! A process-local counter of in-flight render calls. Requests arriving while
//! the counter is at the ceiling are shed immediately instead of queued. With
//! several instances running, the effective global ceiling is
//! `ceiling × instances`.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Load-shedding admission counter.
///
/// # Examples
///
/// ```
/// use frontdoor::gate::ConcurrencyGate;
///
/// let gate = ConcurrencyGate::new(1);
/// let permit = gate.try_acquire().expect("first caller is admitted");
/// assert!(gate.try_acquire().is_none());
/// drop(permit);
/// assert_eq!(gate.in_flight(), 0);
/// ```
#[derive(Debug)]
pub struct ConcurrencyGate {
    in_flight: AtomicUsize,
    ceiling: usize,
}

/// Proof of admission. Dropping it releases the slot, whatever happened to
/// the call it guarded.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit<'a> {
    gate: &'a ConcurrencyGate,
}

impl ConcurrencyGate {
    pub fn new(ceiling: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            ceiling,
        }
    }

    /// Takes a slot, or returns `None` without touching the counter when the
    /// gate is already at its ceiling.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.ceiling).then_some(n + 1)
            })
            .ok()
            .map(|_| GatePermit { gate: self })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
