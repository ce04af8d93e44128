// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Connection Broker (spec.md 4.H).
//!
//! Process-global admission policy: accept/release a client slot subject
//! to a hard cap. Also emits `Connect(delta)` into the event queue for
//! hysteresis-based signalling (soft cap), the way `RouterHandle` reports
//! its own running/stopped state through an atomic flag plus a side
//! channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::events::{EventHandle, EventMsg};

/// Global admission gate with a hard connection cap.
pub struct Broker {
    count: AtomicU32,
    cap: u32,
    events: Option<EventHandle>,
}

impl Broker {
    pub fn new(cap: u32) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU32::new(0),
            cap,
            events: None,
        })
    }

    pub fn with_events(cap: u32, events: EventHandle) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU32::new(0),
            cap,
            events: Some(events),
        })
    }

    /// Try to admit one more connection. `id` is opaque bookkeeping only.
    pub fn accept(&self, id: u64) -> bool {
        let accepted = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c < self.cap {
                    Some(c + 1)
                } else {
                    None
                }
            })
            .is_ok();

        if accepted {
            tracing::debug!(event = "connection_accepted", id);
            self.notify(1);
        } else {
            tracing::warn!(event = "pool_full", id, cap = self.cap);
        }
        accepted
    }

    /// Release a previously accepted slot.
    pub fn release(&self, id: u64) {
        self.count.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(event = "connection_released", id);
        self.notify(-1);
    }

    pub fn current(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    fn notify(&self, delta: i64) {
        if let Some(ref events) = self.events {
            events.notify_best_effort(EventMsg::Connect(delta));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_cap_then_refuses() {
        let broker = Broker::new(2);
        assert!(broker.accept(1));
        assert!(broker.accept(2));
        assert!(!broker.accept(3));
        assert_eq!(broker.current(), 2);
    }

    #[test]
    fn release_frees_a_slot_for_reuse() {
        let broker = Broker::new(1);
        assert!(broker.accept(1));
        assert!(!broker.accept(2));
        broker.release(1);
        assert!(broker.accept(2));
    }
}
