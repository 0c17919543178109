//! Timer bookkeeping for sync requests.
//!
//! The scheduler never spawns anything itself: [`UpdateScheduler::plan`]
//! decides whether a timer must be armed and the session spawns it. Each
//! armed timer gets a fresh id; a timer that fires with an id the scheduler
//! no longer holds was superseded or cancelled and must do nothing.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct PendingTimer {
    id: u64,
    fire_at: Instant,
    quick: bool,
    abort: Option<AbortHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plan {
    /// An existing timer already covers the request.
    Unchanged,
    Arm { id: u64, delay: Duration, quick: bool },
}

#[derive(Debug)]
pub struct UpdateScheduler {
    max_normal_interval: Duration,
    pending: Option<PendingTimer>,
    next_id: u64,
    in_flight: bool,
    needs_followup: bool,
    last_sync: Option<Instant>,
}

impl UpdateScheduler {
    pub fn new(max_normal_interval: Duration) -> Self {
        Self {
            max_normal_interval,
            pending: None,
            next_id: 0,
            in_flight: false,
            needs_followup: false,
            last_sync: None,
        }
    }

    pub fn plan(&mut self, quick: bool, requested: Duration, now: Instant) -> Plan {
        if quick {
            if let Some(pending) = &self.pending {
                if pending.quick || pending.fire_at <= now {
                    return Plan::Unchanged;
                }
            }
            self.cancel();
            return self.arm(Duration::ZERO, true, now);
        }

        if self.pending.is_some() {
            return Plan::Unchanged;
        }
        let delay = self.normal_delay(requested, now);
        self.arm(delay, false, now)
    }

    /// Wait for a normal request: the requested delay, stretched so that
    /// requests stay `max_normal_interval` apart.
    pub fn normal_delay(&self, requested: Duration, now: Instant) -> Duration {
        let Some(last) = self.last_sync else {
            return requested;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.max_normal_interval {
            requested.max(self.max_normal_interval - elapsed)
        } else {
            requested
        }
    }

    /// Attaches the spawned task so `cancel` can abort it. Ignored when the
    /// timer was already replaced.
    pub fn set_abort(&mut self, id: u64, abort: AbortHandle) {
        match &mut self.pending {
            Some(pending) if pending.id == id => pending.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    /// Claims the pending timer. Returns whether it was quick, or `None`
    /// when `id` is stale.
    pub fn fire(&mut self, id: u64) -> Option<bool> {
        if !self.pending.as_ref().is_some_and(|pending| pending.id == id) {
            return None;
        }
        self.pending.take().map(|pending| pending.quick)
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            if let Some(abort) = pending.abort {
                abort.abort();
            }
        }
    }

    /// Marks a request in flight. When one already is, records that a
    /// follow-up is owed and returns false.
    pub fn begin_request(&mut self) -> bool {
        if self.in_flight {
            self.needs_followup = true;
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Clears in-flight state and stamps the sync time. Returns true when a
    /// follow-up was recorded while the request was out.
    pub fn finish_request(&mut self, now: Instant) -> bool {
        self.in_flight = false;
        self.last_sync = Some(now);
        std::mem::take(&mut self.needs_followup)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_is_quick(&self) -> bool {
        self.pending.as_ref().is_some_and(|pending| pending.quick)
    }

    pub fn last_sync(&self) -> Option<Instant> {
        self.last_sync
    }

    fn arm(&mut self, delay: Duration, quick: bool, now: Instant) -> Plan {
        self.next_id += 1;
        let id = self.next_id;
        self.pending = Some(PendingTimer {
            id,
            fire_at: now + delay,
            quick,
            abort: None,
        });
        Plan::Arm { id, delay, quick }
    }
}
