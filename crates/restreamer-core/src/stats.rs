// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Statistics Collector (spec.md 4.J).
//!
//! Per-stream and synthesised global counters, with a 1 Hz sampler
//! deriving per-second rates from diffs -- the shape of
//! `hdds::engine::router::RouterMetrics` (all-atomics counter struct)
//! plus the interval-tick reporting task from `hdds-router::main`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Monotonic counters for one stream.
#[derive(Debug, Default)]
pub struct Counters {
    pub connections: AtomicU64,
    pub max_connections: AtomicU64,
    pub full_connections: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub connected: AtomicBool,
}

/// A point-in-time snapshot, including derived per-second rates.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StreamStatsSnapshot {
    pub connections: u64,
    pub max_connections: u64,
    pub full_connections: u64,
    pub total_packets_received: u64,
    pub total_packets_sent: u64,
    pub total_packets_dropped: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_dropped: u64,
    pub packets_per_second_received: f64,
    pub packets_per_second_sent: f64,
    pub bytes_per_second_received: f64,
    pub connected: bool,
}

struct RatePrev {
    at: Instant,
    packets_received: u64,
    packets_sent: u64,
    bytes_received: u64,
}

/// One stream's counters plus the derived-rate state the sampler owns.
pub struct StreamStats {
    counters: Arc<Counters>,
    prev: Mutex<RatePrev>,
    rates: Mutex<(f64, f64, f64)>,
}

impl StreamStats {
    pub fn new(max_connections: u64, full_connections: u64) -> Self {
        let counters = Arc::new(Counters::default());
        counters
            .max_connections
            .store(max_connections, Ordering::Relaxed);
        counters
            .full_connections
            .store(full_connections, Ordering::Relaxed);
        Self {
            counters,
            prev: Mutex::new(RatePrev {
                at: Instant::now(),
                packets_received: 0,
                packets_sent: 0,
                bytes_received: 0,
            }),
            rates: Mutex::new((0.0, 0.0, 0.0)),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    pub fn packet_received(&self, bytes: u64) {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, bytes: u64) {
        self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self, bytes: u64) {
        self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_dropped
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn connection_added(&self) {
        self.counters.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_removed(&self) {
        self.counters
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .ok();
    }

    pub fn source_connected(&self) {
        self.counters.connected.store(true, Ordering::Relaxed);
    }

    pub fn source_disconnected(&self) {
        self.counters.connected.store(false, Ordering::Relaxed);
    }

    /// Recompute per-second rates from the diff since the last sample.
    fn sample(&self) {
        let now = Instant::now();
        let received = self.counters.packets_received.load(Ordering::Relaxed);
        let sent = self.counters.packets_sent.load(Ordering::Relaxed);
        let bytes_received = self.counters.bytes_received.load(Ordering::Relaxed);

        let mut prev = self.prev.lock();
        let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
        if elapsed > 0.0 {
            let mut rates = self.rates.lock();
            rates.0 = (received.saturating_sub(prev.packets_received)) as f64 / elapsed;
            rates.1 = (sent.saturating_sub(prev.packets_sent)) as f64 / elapsed;
            rates.2 = (bytes_received.saturating_sub(prev.bytes_received)) as f64 / elapsed;
        }
        prev.at = now;
        prev.packets_received = received;
        prev.packets_sent = sent;
        prev.bytes_received = bytes_received;
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        let rates = *self.rates.lock();
        StreamStatsSnapshot {
            connections: self.counters.connections.load(Ordering::Relaxed),
            max_connections: self.counters.max_connections.load(Ordering::Relaxed),
            full_connections: self.counters.full_connections.load(Ordering::Relaxed),
            total_packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            total_packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            total_packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
            total_bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            total_bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            total_bytes_dropped: self.counters.bytes_dropped.load(Ordering::Relaxed),
            packets_per_second_received: rates.0,
            packets_per_second_sent: rates.1,
            bytes_per_second_received: rates.2,
            connected: self.counters.connected.load(Ordering::Relaxed),
        }
    }
}

/// Owns every stream's [`StreamStats`] plus the synthesised global record.
pub struct StatsCollector {
    streams: HashMap<String, Arc<StreamStats>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    pub fn register_stream(&mut self, name: impl Into<String>, stats: Arc<StreamStats>) {
        self.streams.insert(name.into(), stats);
    }

    pub fn stream(&self, name: &str) -> Option<Arc<StreamStats>> {
        self.streams.get(name).cloned()
    }

    /// All per-stream snapshots plus a `global` synthesised from the sum.
    pub fn snapshot_all(&self) -> HashMap<String, StreamStatsSnapshot> {
        let mut out = HashMap::with_capacity(self.streams.len() + 1);
        let mut global = StreamStatsSnapshot {
            connections: 0,
            max_connections: 0,
            full_connections: 0,
            total_packets_received: 0,
            total_packets_sent: 0,
            total_packets_dropped: 0,
            total_bytes_received: 0,
            total_bytes_sent: 0,
            total_bytes_dropped: 0,
            packets_per_second_received: 0.0,
            packets_per_second_sent: 0.0,
            bytes_per_second_received: 0.0,
            connected: false,
        };
        for (name, stats) in &self.streams {
            let snap = stats.snapshot();
            global.connections += snap.connections;
            global.max_connections += snap.max_connections;
            global.full_connections += snap.full_connections;
            global.total_packets_received += snap.total_packets_received;
            global.total_packets_sent += snap.total_packets_sent;
            global.total_packets_dropped += snap.total_packets_dropped;
            global.total_bytes_received += snap.total_bytes_received;
            global.total_bytes_sent += snap.total_bytes_sent;
            global.total_bytes_dropped += snap.total_bytes_dropped;
            global.packets_per_second_received += snap.packets_per_second_received;
            global.packets_per_second_sent += snap.packets_per_second_sent;
            global.bytes_per_second_received += snap.bytes_per_second_received;
            global.connected |= snap.connected;
            out.insert(name.clone(), snap);
        }
        out.insert("global".to_string(), global);
        out
    }

}

/// Launch the 1 Hz sampler task over every stream registered in `collector`.
pub fn start_sampler(collector: Arc<Mutex<StatsCollector>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let streams: Vec<_> = collector.lock().streams.values().cloned().collect();
            for s in streams {
                s.sample();
            }
        }
    })
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_and_never_negative() {
        let stats = StreamStats::new(10, 0);
        stats.packet_received(188);
        stats.packet_sent(188);
        stats.packet_dropped(188);
        stats.connection_added();
        stats.connection_removed();
        stats.connection_removed(); // underflow guarded by saturating_sub

        let snap = stats.snapshot();
        assert_eq!(snap.total_packets_received, 1);
        assert_eq!(snap.total_packets_sent, 1);
        assert_eq!(snap.total_packets_dropped, 1);
        assert_eq!(snap.connections, 0);
    }

    #[tokio::test]
    async fn sampling_computes_packets_per_second() {
        let stats = StreamStats::new(10, 0);
        for _ in 0..1000 {
            stats.packet_received(188);
        }
        // Force elapsed > 0 deterministically rather than sleeping a full
        // second in a test.
        {
            let mut prev = stats.prev.lock();
            prev.at = Instant::now() - Duration::from_secs(1);
        }
        stats.sample();
        let snap = stats.snapshot();
        assert!((snap.packets_per_second_received - 1000.0).abs() < 5.0);
    }

    #[test]
    fn global_snapshot_sums_all_streams() {
        let mut collector = StatsCollector::new();
        let a = Arc::new(StreamStats::new(5, 0));
        let b = Arc::new(StreamStats::new(5, 0));
        a.packet_sent(100);
        b.packet_sent(200);
        collector.register_stream("a", a);
        collector.register_stream("b", b);

        let snaps = collector.snapshot_all();
        assert_eq!(snaps["global"].total_packets_sent, 2);
        assert_eq!(snaps["global"].total_bytes_sent, 300);
    }
}
