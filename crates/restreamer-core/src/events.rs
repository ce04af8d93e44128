// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Event Queue (spec.md 4.I).
//!
//! Single-task consumer behind a bounded queue. Registration is only
//! legal before `start()`; hysteresis turns a raw connection-count delta
//! stream into strictly-one-crossing `LimitHit`/`LimitMiss` events.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy)]
pub enum EventMsg {
    Connect(i64),
    Heartbeat(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LimitHit,
    LimitMiss,
    Heartbeat,
}

pub type Handler = Arc<dyn Fn(EventKind, Option<Instant>) + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    limit_hit: Vec<Handler>,
    limit_miss: Vec<Handler>,
    heartbeat: Vec<Handler>,
}

/// Owns the consumer task and the (pre-start-only) handler registry.
pub struct EventQueue {
    tx: mpsc::Sender<EventMsg>,
    rx: Option<mpsc::Receiver<EventMsg>>,
    running: Arc<AtomicBool>,
    handlers: HandlerTable,
    limit: i64,
    count: Arc<AtomicI64>,
}

/// Cloneable handle for producers and for observing current state.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventMsg>,
    running: Arc<AtomicBool>,
}

impl EventHandle {
    /// Best-effort notify: drops silently if the queue is full or the
    /// queue has already shut down, per spec.md's saturation policy.
    pub fn notify_best_effort(&self, msg: EventMsg) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.tx.try_send(msg).is_err() {
            tracing::warn!(event = "event_queue_full");
        }
    }
}

impl EventQueue {
    pub fn new(limit: i64) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            tx,
            rx: Some(rx),
            running: Arc::new(AtomicBool::new(false)),
            handlers: HandlerTable::default(),
            limit,
            count: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn handle(&self) -> EventHandle {
        EventHandle {
            tx: self.tx.clone(),
            running: self.running.clone(),
        }
    }

    /// Register a handler for `kind`. Rejected (logged, ignored) once the
    /// queue has started.
    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        if self.running.load(Ordering::SeqCst) {
            tracing::error!(event = "late_registration", ?kind);
            return;
        }
        match kind {
            EventKind::LimitHit => self.handlers.limit_hit.push(handler),
            EventKind::LimitMiss => self.handlers.limit_miss.push(handler),
            EventKind::Heartbeat => self.handlers.heartbeat.push(handler),
        }
    }

    /// Start the consumer task. Idempotent: a second call logs and no-ops.
    ///
    /// `shutdown` is the process-wide shutdown signal (spec.md 4.I's
    /// "Shutdown() closes the shutdown signal"): once it fires, the task
    /// drains whatever is already queued, marks the queue not running,
    /// and exits. Pair the returned handle with [`EventQueue::shutdown`].
    pub fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::error!(event = "double_start");
            return None;
        }
        let mut rx = self.rx.take()?;
        let handlers = std::mem::take(&mut self.handlers);
        let limit = self.limit;
        let count = self.count.clone();
        let running = self.running.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(msg) => dispatch(&count, limit, &handlers, msg),
                            None => break,
                        }
                    }
                }
            }
            while let Ok(msg) = rx.try_recv() {
                dispatch(&count, limit, &handlers, msg);
            }
            running.store(false, Ordering::SeqCst);
        }))
    }

    /// Waits for a consumer task previously returned by [`EventQueue::start`]
    /// to observe the shared shutdown signal, drain, and mark itself not
    /// running. `NotifyConnect`/`NotifyHeartbeat` (here,
    /// [`EventHandle::notify_best_effort`]) must not be called after this
    /// returns.
    pub async fn shutdown(task: JoinHandle<()>) {
        let _ = task.await;
    }
}

fn dispatch(count: &AtomicI64, limit: i64, handlers: &HandlerTable, msg: EventMsg) {
    match msg {
        EventMsg::Connect(delta) => handle_connect(count, limit, delta, handlers),
        EventMsg::Heartbeat(when) => {
            for h in &handlers.heartbeat {
                h(EventKind::Heartbeat, Some(when));
            }
        }
    }
}

fn handle_connect(count: &AtomicI64, limit: i64, delta: i64, handlers: &HandlerTable) {
    let before = count.load(Ordering::SeqCst);
    let raw_new = before + delta;
    let new = raw_new.clamp(0, i32::MAX as i64);
    if raw_new < 0 {
        tracing::warn!(event = "connect_count_underflow", before, delta);
    } else if raw_new > i32::MAX as i64 {
        tracing::warn!(event = "connect_count_overflow", before, delta);
    }

    if limit > 0 {
        if before < limit && limit <= new {
            for h in &handlers.limit_hit {
                h(EventKind::LimitHit, None);
            }
        } else if before >= limit && limit > new {
            for h in &handlers.limit_miss {
                h(EventKind::LimitMiss, None);
            }
        }
    }

    count.store(new, Ordering::SeqCst);
}

/// Periodic heartbeat source: ticks at `interval` and pushes
/// `EventMsg::Heartbeat(now)` into the queue from its own task. Exits as
/// soon as `shutdown` fires, the same shared signal `EventQueue::start`
/// and every other long-lived task polls.
pub fn spawn_heartbeat(
    handle: EventHandle,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    handle.notify_best_effort(EventMsg::Heartbeat(Instant::now()));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn counting_handler(counter: Arc<AtomicI64>) -> Handler {
        Arc::new(move |_kind, _when| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn hysteresis_fires_exact_crossing_counts() {
        let mut queue = EventQueue::new(10);
        let hits = Arc::new(AtomicI64::new(0));
        let misses = Arc::new(AtomicI64::new(0));
        queue.register(EventKind::LimitHit, counting_handler(hits.clone()));
        queue.register(EventKind::LimitMiss, counting_handler(misses.clone()));
        let handle = queue.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = queue.start(shutdown_rx).unwrap();

        for delta in [10, -1, -2, 4, 1, -2, -1, 1] {
            handle.notify_best_effort(EventMsg::Connect(delta));
        }

        // Drain: give the consumer task a chance to process everything.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
        EventQueue::shutdown(task).await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(misses.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn messages_are_handled_in_enqueue_order() {
        let mut queue = EventQueue::new(0);
        let seen: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        queue.register(
            EventKind::Heartbeat,
            Arc::new(move |_kind, when| {
                seen_clone.lock().unwrap().push(when.unwrap());
            }),
        );
        let handle = queue.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = queue.start(shutdown_rx).unwrap();

        let stamps: Vec<Instant> = (0..5)
            .map(|_| {
                let now = Instant::now();
                handle.notify_best_effort(EventMsg::Heartbeat(now));
                now
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
        EventQueue::shutdown(task).await;

        assert_eq!(*seen.lock().unwrap(), stamps);
    }

    #[test]
    fn registration_after_start_is_rejected() {
        let mut queue = EventQueue::new(0);
        queue.running.store(true, Ordering::SeqCst);
        let counter = Arc::new(AtomicI64::new(0));
        queue.register(EventKind::Heartbeat, counting_handler(counter.clone()));
        assert_eq!(queue.handlers.heartbeat.len(), 0);
    }

    #[tokio::test]
    async fn double_start_is_a_noop() {
        let mut queue = EventQueue::new(0);
        let (_tx, rx) = watch::channel(false);
        assert!(queue.start(rx.clone()).is_some());
        assert!(queue.start(rx).is_none());
    }

    #[tokio::test]
    async fn shutdown_drains_queued_messages_then_marks_not_running() {
        let mut queue = EventQueue::new(0);
        let seen = Arc::new(AtomicI64::new(0));
        queue.register(EventKind::Heartbeat, counting_handler(seen.clone()));
        let handle = queue.handle();
        let running = queue.running.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = queue.start(shutdown_rx).unwrap();

        // Queue a message and signal shutdown back to back: the consumer
        // must still drain it before exiting.
        handle.notify_best_effort(EventMsg::Heartbeat(Instant::now()));
        let _ = shutdown_tx.send(true);
        EventQueue::shutdown(task).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!running.load(Ordering::SeqCst));
    }
}
