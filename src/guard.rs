use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{
    command::{Operation, Outcome},
    error::LedgerError,
    wallet::RequestId,
};

enum SlotState {
    InFlight,
    /// Terminal outcome, replayed to every later caller.
    Recorded { outcome: Outcome, at: Instant },
    /// Transient failure. Handed to callers that were already waiting, but
    /// the request id itself is free to run again.
    Released(Outcome),
}

struct Slot {
    operation: Operation,
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// Deduplicates operations by request id.
///
/// The first caller of a request id runs the operation; every other caller,
/// including concurrent ones, gets the recorded outcome without running it.
pub struct IdempotencyGuard {
    slots: Mutex<HashMap<RequestId, Arc<Slot>>>,
    in_flight_wait: Duration,
    ttl: Option<Duration>,
}

impl IdempotencyGuard {
    pub fn new(in_flight_wait: Duration, ttl: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            in_flight_wait,
            ttl,
        }
    }

    pub fn execute(
        &self,
        request_id: &RequestId,
        operation: &Operation,
        run: impl FnOnce() -> Outcome,
    ) -> Outcome {
        let (slot, owner) = self.claim(request_id, operation);
        if owner {
            let mut token = InFlight {
                guard: self,
                request_id,
                slot: &slot,
                finished: false,
            };
            let outcome = run();
            token.finish(outcome.clone());
            return outcome;
        }

        if slot.operation != *operation {
            warn!(
                request_id = %request_id,
                recorded = slot.operation.name(),
                requested = operation.name(),
                "request id reused with a different operation, replaying recorded outcome"
            );
        }
        self.wait_for(request_id, &slot)
    }

    /// Number of request ids currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every recorded outcome older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| !self.is_expired(slot));
        before - slots.len()
    }

    fn claim(&self, request_id: &RequestId, operation: &Operation) -> (Arc<Slot>, bool) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(request_id) {
            if !self.is_expired(slot) {
                return (slot.clone(), false);
            }
            debug!(request_id = %request_id, "recorded outcome expired");
        }
        let slot = Arc::new(Slot {
            operation: operation.clone(),
            state: Mutex::new(SlotState::InFlight),
            ready: Condvar::new(),
        });
        slots.insert(request_id.clone(), slot.clone());
        (slot, true)
    }

    fn wait_for(&self, request_id: &RequestId, slot: &Slot) -> Outcome {
        let deadline = Instant::now() + self.in_flight_wait;
        let mut state = slot.state.lock();
        loop {
            if let SlotState::Recorded { outcome, .. } | SlotState::Released(outcome) = &*state {
                debug!(request_id = %request_id, "replaying outcome of duplicate request");
                return outcome.clone();
            }
            if slot.ready.wait_until(&mut state, deadline).timed_out()
                && matches!(*state, SlotState::InFlight)
            {
                return Err(LedgerError::RequestInFlight(request_id.to_string()));
            }
        }
    }

    fn is_expired(&self, slot: &Slot) -> bool {
        match (self.ttl, &*slot.state.lock()) {
            (Some(ttl), SlotState::Recorded { at, .. }) => at.elapsed() > ttl,
            _ => false,
        }
    }

    fn release(&self, request_id: &RequestId, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slots
            .get(request_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(request_id);
        }
    }
}

/// Owner side of an in-flight request. Releases the request id if the
/// operation unwinds before recording an outcome.
struct InFlight<'a> {
    guard: &'a IdempotencyGuard,
    request_id: &'a RequestId,
    slot: &'a Arc<Slot>,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.finished = true;
        let retryable = matches!(&outcome, Err(err) if err.is_retryable());
        if retryable {
            self.guard.release(self.request_id, self.slot);
            *self.slot.state.lock() = SlotState::Released(outcome);
        } else {
            *self.slot.state.lock() = SlotState::Recorded {
                outcome,
                at: Instant::now(),
            };
        }
        self.slot.ready.notify_all();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.release(self.request_id, self.slot);
            *self.slot.state.lock() = SlotState::Released(Err(LedgerError::ConcurrencyConflict(
                format!("request `{}` was abandoned", self.request_id),
            )));
            self.slot.ready.notify_all();
        }
    }
}
