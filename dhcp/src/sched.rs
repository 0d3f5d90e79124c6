//! Scheduler interface consumed by the client and server.
//!
//! Both endpoints are driven by a host-owned discrete-event scheduler. An
//! endpoint arms a timer by scheduling one of the named [`Timer`] tokens and
//! later receives it back through its `handle_timer` method. Each named timer
//! has at most one scheduled instance; [`TimerSlot`] enforces that by
//! cancelling the previous instance on re-arm.

use core::time::Duration;

/// Handle to a scheduled timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

/// The named timers of the protocol machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Client: retransmit the DISCOVER of the current cycle.
    Discover,
    /// Client: the offer collection window closed.
    Collect,
    /// Client: retransmit the outstanding REQUEST.
    Request,
    /// Client: T1 reached, renew the lease with the issuing server.
    Renew,
    /// Client: T2 reached, rebind with any reachable server.
    Rebind,
    /// Client: hard lease expiry.
    Expire,
    /// Server: periodic lease aging sweep.
    Sweep,
}

/// Host scheduler: monotonic clock plus one-shot timers.
pub trait Scheduler {
    /// Time elapsed since the host started.
    fn now(&self) -> Duration;

    /// Arm a one-shot timer that fires `delay` from now.
    fn schedule(&mut self, delay: Duration, timer: Timer) -> EventId;

    /// Cancel a previously scheduled timer. Cancelling an already-fired
    /// timer is a no-op.
    fn cancel(&mut self, event: EventId);
}

/// A named timer slot holding at most one scheduled instance.
#[derive(Debug, Default)]
pub struct TimerSlot(Option<EventId>);

impl TimerSlot {
    pub const fn new() -> Self {
        TimerSlot(None)
    }

    /// Arm the slot, cancelling any previously armed instance.
    pub fn arm<S: Scheduler + ?Sized>(&mut self, sched: &mut S, delay: Duration, timer: Timer) {
        if let Some(id) = self.0.take() {
            sched.cancel(id);
        }
        self.0 = Some(sched.schedule(delay, timer));
    }

    /// Cancel the armed instance, if any.
    pub fn cancel<S: Scheduler + ?Sized>(&mut self, sched: &mut S) {
        if let Some(id) = self.0.take() {
            sched.cancel(id);
        }
    }

    /// Forget the armed instance without cancelling it. Called when the
    /// timer has fired.
    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}
