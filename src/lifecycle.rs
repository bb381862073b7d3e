//! Probe tracking with an atomic gate.
//!
//! Forced consumer unbinding and the shutdown walk must wait until no driver
//! probe is running, and shutdown must also stop new probes from starting.
//! Both facts (gate open/blocked, probes in flight) sit in a single
//! `AtomicU32`, so checking the gate and counting a new probe happen in one
//! CAS and cannot race with `block()`.
//!
//! Layout: `[state(8 bits) | in_flight(24 bits)]`

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Whether new probes may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    /// Probes may start.
    Open = 0,
    /// New probes are refused (deferred).
    Blocked = 1,
}

/// Gate state and in-flight probe count in one atomic word.
#[derive(Default)]
struct StateAndCount(AtomicU32);

impl StateAndCount {
    const STATE_SHIFT: u32 = 24;
    const COUNT_MASK: u32 = (1 << Self::STATE_SHIFT) - 1;
    const STATE_OPEN: u32 = 0;
    const STATE_BLOCKED: u32 = 1;

    const fn new() -> Self {
        Self(AtomicU32::new(Self::STATE_OPEN << Self::STATE_SHIFT))
    }

    #[inline]
    fn state(&self) -> GateState {
        match self.0.load(Ordering::Acquire) >> Self::STATE_SHIFT {
            Self::STATE_OPEN => GateState::Open,
            _ => GateState::Blocked,
        }
    }

    #[inline]
    fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire) & Self::COUNT_MASK
    }

    /// Counts one more probe, only while the gate is open.
    fn try_acquire(&self) -> Result<(), GateState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >> Self::STATE_SHIFT != Self::STATE_OPEN {
                return Err(GateState::Blocked);
            }
            let count = current & Self::COUNT_MASK;
            if count == Self::COUNT_MASK {
                return Err(GateState::Open);
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops one probe and returns how many are left.
    fn release(&self) -> u32 {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & Self::COUNT_MASK != 0, "probe count underflow");
        (prev & Self::COUNT_MASK).saturating_sub(1)
    }

    fn set_state(&self, state: GateState) {
        let bits = match state {
            GateState::Open => Self::STATE_OPEN,
            GateState::Blocked => Self::STATE_BLOCKED,
        };
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some((bits << Self::STATE_SHIFT) | (current & Self::COUNT_MASK))
        });
    }
}

/// Wait queue for `wait_idle`, so waiters do not hammer the counter.
struct WaitQueue {
    waiters: AtomicUsize,
    notified: AtomicBool,
}

impl WaitQueue {
    const fn new() -> Self {
        Self {
            waiters: AtomicUsize::new(0),
            notified: AtomicBool::new(false),
        }
    }

    /// Spins until `condition` holds. There is no timeout.
    fn wait_until<F: FnMut() -> bool>(&self, mut condition: F) {
        if condition() {
            return;
        }

        self.waiters.fetch_add(1, Ordering::AcqRel);
        while !condition() {
            if self.notified.swap(false, Ordering::AcqRel) {
                continue;
            }
            for _ in 0..100 {
                core::hint::spin_loop();
            }
        }
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }

    fn notify_all(&self) {
        if self.waiters.load(Ordering::Acquire) > 0 {
            self.notified.store(true, Ordering::Release);
        }
    }
}

/// Tracks driver probes in flight.
///
/// # State Transitions
///
/// ```text
/// ┌──────┐    block()    ┌─────────┐
/// │ Open │ ────────────> │ Blocked │
/// └──────┘ <──────────── └─────────┘
///             unblock()
/// ```
///
/// The in-flight count is independent of the state: blocking the gate only
/// refuses new probes, running ones finish normally.
pub struct ProbeGate {
    state_count: StateAndCount,
    idle_waiters: WaitQueue,
}

impl ProbeGate {
    /// Creates an open gate with no probes in flight.
    pub const fn new() -> Self {
        Self {
            state_count: StateAndCount::new(),
            idle_waiters: WaitQueue::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> GateState {
        self.state_count.state()
    }

    /// Number of probes currently running.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.state_count.count() as usize
    }

    /// Registers a probe. Returns `None` while the gate is blocked.
    ///
    /// The probe counts as in flight until the returned guard is dropped.
    pub fn try_begin(&self) -> Option<ProbeGuard<'_>> {
        self.state_count
            .try_acquire()
            .ok()
            .map(|()| ProbeGuard { gate: self })
    }

    fn end(&self) {
        if self.state_count.release() == 0 {
            self.idle_waiters.notify_all();
        }
    }

    /// Waits until no probe is in flight.
    pub fn wait_idle(&self) {
        self.idle_waiters.wait_until(|| self.state_count.count() == 0);
    }

    /// Refuses new probes from now on.
    pub fn block(&self) {
        self.state_count.set_state(GateState::Blocked);
    }

    /// Lets probes start again.
    pub fn unblock(&self) {
        self.state_count.set_state(GateState::Open);
    }
}

impl Default for ProbeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ProbeGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProbeGate")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// An in-flight probe. Dropping it ends the probe.
#[must_use]
pub struct ProbeGuard<'a> {
    gate: &'a ProbeGate,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.gate.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_initial_state() {
        let gate = ProbeGate::new();
        assert_eq!(gate.state(), GateState::Open);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_gate_counts_probes() {
        let gate = ProbeGate::new();

        let first = gate.try_begin().unwrap();
        let second = gate.try_begin().unwrap();
        assert_eq!(gate.in_flight(), 2);

        drop(first);
        assert_eq!(gate.in_flight(), 1);
        drop(second);
        assert_eq!(gate.in_flight(), 0);

        // Nothing running, returns at once.
        gate.wait_idle();
    }

    #[test]
    fn test_gate_block_keeps_running_probes() {
        let gate = ProbeGate::new();
        let running = gate.try_begin().unwrap();

        gate.block();
        assert_eq!(gate.state(), GateState::Blocked);
        assert!(gate.try_begin().is_none());
        assert_eq!(gate.in_flight(), 1);

        drop(running);
        gate.wait_idle();
        assert_eq!(gate.in_flight(), 0);

        gate.unblock();
        assert!(gate.try_begin().is_some());
    }
}
