// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Distributor (spec.md 4.G) -- the hot path.
//!
//! Single producer pulls TS packets from the input channel in a dedicated
//! task; for each packet it iterates the current connection set under a
//! read lock and tries a non-blocking send into every connection's bounded
//! channel. A full channel counts a drop for that consumer only and never
//! blocks the producer -- the separation between the hot dispatch loop and
//! a side counters struct follows `hdds::engine::router`'s
//! `RouterMetrics` split.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::packet::TsPacket;
use crate::stats::StreamStats;

struct ConnectionEntry {
    tx: mpsc::Sender<TsPacket>,
    #[allow(dead_code)]
    remote: SocketAddr,
}

/// Shared fan-out state: connection set plus admission/stats hookups.
pub struct Distributor {
    connections: Arc<RwLock<HashMap<u64, ConnectionEntry>>>,
    next_id: AtomicU64,
    output_buffer: usize,
    broker: Arc<Broker>,
    stats: Arc<StreamStats>,
}

/// Owns a live connection's receiving half; on drop, removes the
/// connection from the distributor, releases the broker slot and updates
/// stats -- the single place "remove + release + notify" happens, so
/// every exit path (write error, client hangup) gets it for free.
pub struct ConnectionGuard {
    id: u64,
    connections: Arc<RwLock<HashMap<u64, ConnectionEntry>>>,
    broker: Arc<Broker>,
    stats: Arc<StreamStats>,
    rx: mpsc::Receiver<TsPacket>,
}

impl ConnectionGuard {
    pub async fn recv(&mut self) -> Option<TsPacket> {
        self.rx.recv().await
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.write().remove(&self.id);
        // Broker::release already notifies the event queue of the count
        // delta; this drop only needs to update local bookkeeping.
        self.broker.release(self.id);
        self.stats.connection_removed();
        tracing::info!(event = "connection_removed", id = self.id);
    }
}

impl Distributor {
    pub fn new(output_buffer: usize, broker: Arc<Broker>, stats: Arc<StreamStats>) -> Arc<Self> {
        Arc::new(Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            output_buffer,
            broker,
            stats,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Admission (spec.md 4.G.1-2): ask the broker, then create and
    /// register a Connection under the exclusive lock.
    pub fn serve_client(&self, remote: SocketAddr) -> Option<ConnectionGuard> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.broker.accept(id) {
            return None;
        }

        let (tx, rx) = mpsc::channel(self.output_buffer.max(1));
        self.connections
            .write()
            .insert(id, ConnectionEntry { tx, remote });
        self.stats.connection_added();

        Some(ConnectionGuard {
            id,
            connections: self.connections.clone(),
            broker: self.broker.clone(),
            stats: self.stats.clone(),
            rx,
        })
    }

    /// Run the producer task: drain `input`, fan each packet out, never
    /// block on a slow consumer. Exits when `input` closes or `shutdown`
    /// fires.
    pub fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<TsPacket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    packet = input.recv() => {
                        match packet {
                            Some(packet) => self.dispatch(&packet),
                            None => break,
                        }
                    }
                }
            }
        })
    }

    fn dispatch(&self, packet: &TsPacket) {
        let connections = self.connections.read();
        for entry in connections.values() {
            match entry.tx.try_send(packet.clone()) {
                Ok(()) => self.stats.packet_sent(packet.as_bytes().len() as u64),
                Err(_) => self.stats.packet_dropped(packet.as_bytes().len() as u64),
            }
        }
    }
}
