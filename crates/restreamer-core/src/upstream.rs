// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Upstream Client (spec.md 4.F).
//!
//! One `tokio` task per configured stream, driving the explicit
//! `Idle -> Connecting -> Streaming -> Backoff -> Closed` state machine.
//! URLs are tried round-robin on every reconnect; framed TS packets are
//! written into a bounded channel and dropped (counted) if the channel
//! is ever full. Grounded on `hdds-router::Router::run`'s task-plus-handle
//! structure (an atomic state flag observable from outside the task) and
//! `hdds-gateway::AdminClient`'s lazy-reconnect-on-demand pattern,
//! generalized here to unconditional retry with backoff.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::datagram::DatagramSource;
use crate::fork::ForkReader;
use crate::framer::read_ts_packet_async;
use crate::packet::{TsPacket, TS_PACKET_LEN, TS_SYNC_BYTE};
use crate::rtp;
use crate::rtp_bridge::RtpBridge;
use crate::stats::StreamStats;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("no upstream URLs configured")]
    NoUrls,
    #[error("invalid upstream URL {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("read timed out")]
    ReadTimeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("fork failed: {0}")]
    Fork(#[from] crate::fork::ForkError),
}

/// Explicit states from spec.md 4.F's diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Closed,
}

fn encode(state: UpstreamState) -> u8 {
    match state {
        UpstreamState::Idle => 0,
        UpstreamState::Connecting => 1,
        UpstreamState::Streaming => 2,
        UpstreamState::Backoff => 3,
        UpstreamState::Closed => 4,
    }
}

fn decode(code: u8) -> UpstreamState {
    match code {
        1 => UpstreamState::Connecting,
        2 => UpstreamState::Streaming,
        3 => UpstreamState::Backoff,
        4 => UpstreamState::Closed,
        _ => UpstreamState::Idle,
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Remote URLs, tried round-robin on every reconnect.
    pub urls: Vec<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Capacity of the channel this client feeds (spec's `InputBuffer`).
    pub input_buffer: usize,
    /// Datagram size for `udp://` sources.
    pub udp_datagram_size: usize,
    /// Reorder window for `udp://` sources carrying RTP.
    pub rtp_lookahead: usize,
}

enum StreamEnd {
    Shutdown,
    Eof,
}

/// Drives one upstream connection's state machine and feeds a bounded
/// `TsPacket` channel. `Connected()` (here, [`UpstreamClient::connected`])
/// reflects whether the client is currently in `Streaming`.
pub struct UpstreamClient {
    config: UpstreamConfig,
    state: AtomicU8,
    stats: Arc<StreamStats>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig, stats: Arc<StreamStats>) -> Result<Arc<Self>, UpstreamError> {
        if config.urls.is_empty() {
            return Err(UpstreamError::NoUrls);
        }
        Ok(Arc::new(Self {
            config,
            state: AtomicU8::new(encode(UpstreamState::Idle)),
            stats,
        }))
    }

    pub fn state(&self) -> UpstreamState {
        decode(self.state.load(Ordering::Relaxed))
    }

    /// `Connected()` from spec.md 4.F: true only while Streaming.
    pub fn connected(&self) -> bool {
        self.state() == UpstreamState::Streaming
    }

    fn set_state(&self, state: UpstreamState) {
        self.state.store(encode(state), Ordering::Relaxed);
    }

    /// Spawn the client's run loop. Returns the receiving half of its
    /// output channel plus the task handle.
    pub fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<TsPacket>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.input_buffer.max(1));

        let handle = tokio::spawn(async move {
            let mut next_url = 0usize;
            loop {
                if *shutdown.borrow() {
                    self.set_state(UpstreamState::Closed);
                    break;
                }

                self.set_state(UpstreamState::Connecting);
                let url = self.config.urls[next_url % self.config.urls.len()].clone();
                next_url = next_url.wrapping_add(1);
                tracing::info!(event = "upstream_connecting", url = %url);

                let outcome = self.connect_and_stream(&url, &tx, &mut shutdown).await;
                self.stats.source_disconnected();

                match outcome {
                    Ok(StreamEnd::Shutdown) => {
                        self.set_state(UpstreamState::Closed);
                        break;
                    }
                    Ok(StreamEnd::Eof) => {
                        tracing::warn!(event = "upstream_eof", url = %url);
                    }
                    Err(e) => {
                        tracing::warn!(event = "upstream_error", url = %url, error = %e);
                    }
                }

                self.set_state(UpstreamState::Backoff);
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            self.set_state(UpstreamState::Closed);
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                }
            }
        });

        (rx, handle)
    }

    async fn connect_and_stream(
        &self,
        url: &str,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        let parsed =
            Url::parse(url).map_err(|e| UpstreamError::InvalidUrl(url.to_string(), e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => self.stream_http(url, tx, shutdown).await,
            "udp" => self.stream_udp(&parsed, tx, shutdown).await,
            "file" => self.stream_file(&parsed, tx, shutdown).await,
            "fork" => self.stream_fork(&parsed, tx, shutdown).await,
            other => Err(UpstreamError::UnsupportedScheme(other.to_string())),
        }
    }

    /// `http[s]://` — GET, response body is the TS byte stream.
    async fn stream_http(
        &self,
        url: &str,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()?;
        let response = tokio::time::timeout(self.config.connect_timeout, client.get(url).send())
            .await
            .map_err(|_| UpstreamError::ConnectTimeout)??
            .error_for_status()?;

        let body = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let reader = tokio_util_compat(body);
        self.pump_framed(reader, tx, shutdown).await
    }

    /// `file:///path` — read once from start to EOF.
    async fn stream_file(
        &self,
        parsed: &Url,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        let path = parsed
            .to_file_path()
            .map_err(|_| UpstreamError::InvalidUrl(parsed.to_string(), "not a file path".into()))?;
        let file = tokio::fs::File::open(&path).await?;
        self.pump_framed(file, tx, shutdown).await
    }

    /// `fork:///absolute/bin?arg=...` — argv via repeated `arg` query params.
    async fn stream_fork(
        &self,
        parsed: &Url,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        let program = parsed.path().to_string();
        let mut argv = vec![program];
        for (key, value) in parsed.query_pairs() {
            if key == "arg" {
                argv.push(value.into_owned());
            }
        }

        let mut reader = ForkReader::spawn(&argv)?;
        let mut stdout = reader.take_stdout().ok_or(crate::fork::ForkError::NoStdout)?;

        self.set_state(UpstreamState::Streaming);
        self.stats.source_connected();

        let mut result = Ok(StreamEnd::Eof);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        result = Ok(StreamEnd::Shutdown);
                        break;
                    }
                }
                exit = reader.wait() => {
                    tracing::info!(event = "fork_exit", code = ?exit.code);
                    break;
                }
                read = tokio::time::timeout(self.config.read_timeout, read_ts_packet_async(&mut stdout)) => {
                    match read {
                        Err(_) => { result = Err(UpstreamError::ReadTimeout); break; }
                        Ok(Ok(Some(packet))) => self.deliver(packet, tx),
                        Ok(Ok(None)) => {}
                        // Stdout closing is how a dying child surfaces here;
                        // spec.md 4.F treats child exit as upstream EOF.
                        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Ok(Err(e)) => { result = Err(e.into()); break; }
                    }
                }
            }
        }

        reader.close().await;
        result
    }

    /// `udp://host:port` — datagrams, raw TS if the first byte is the
    /// sync byte, else RTP (payload type 33) run through C and D. `host`
    /// is only consulted to join a multicast group; the socket binds on
    /// `port` across all interfaces and accepts datagrams from anyone, the
    /// way a passive stream receiver must.
    async fn stream_udp(
        &self,
        parsed: &Url,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        let host = parsed
            .host_str()
            .ok_or_else(|| UpstreamError::InvalidUrl(parsed.to_string(), "missing host".into()))?;
        let port = parsed
            .port()
            .ok_or_else(|| UpstreamError::InvalidUrl(parsed.to_string(), "missing port".into()))?;

        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        if let Ok(std::net::IpAddr::V4(group)) = host.parse() {
            if group.is_multicast() {
                socket.join_multicast_v4(group, std::net::Ipv4Addr::UNSPECIFIED)?;
            }
        }

        self.set_state(UpstreamState::Streaming);
        self.stats.source_connected();

        let mut buf = vec![0u8; self.config.udp_datagram_size.max(TS_PACKET_LEN)];
        let mut raw_mode: Option<bool> = None;
        let mut bridge = RtpBridge::new(self.config.rtp_lookahead.max(1));

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(StreamEnd::Shutdown);
                    }
                }
                recv = tokio::time::timeout(self.config.read_timeout, socket.recv(&mut buf)) => {
                    let n = recv.map_err(|_| UpstreamError::ReadTimeout)??;
                    if n == 0 {
                        continue;
                    }
                    let datagram = &buf[..n];
                    let raw = *raw_mode.get_or_insert(datagram[0] == TS_SYNC_BYTE);

                    if raw {
                        if let Some(packet) = TsPacket::from_vec(datagram.to_vec()) {
                            self.deliver(packet, tx);
                        } else {
                            tracing::warn!(event = "udp_raw_ts_malformed", len = n);
                        }
                        continue;
                    }

                    match rtp::parse(datagram) {
                        Ok(pkt) => {
                            for event in bridge.push(&pkt) {
                                log_bridge_event(event);
                            }
                            while bridge.advance().is_ok() {}
                            while bridge.available() >= TS_PACKET_LEN {
                                let mut out = [0u8; TS_PACKET_LEN];
                                bridge.read(&mut out);
                                self.deliver(TsPacket::new(out), tx);
                            }
                        }
                        Err(e) => tracing::warn!(event = "rtp_parse_error", error = %e),
                    }
                }
            }
        }
    }

    /// Drain a synchronous-shaped `AsyncRead` source via the framer until
    /// EOF, an I/O error, a read timeout, or shutdown.
    async fn pump_framed<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        tx: &mpsc::Sender<TsPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, UpstreamError> {
        self.set_state(UpstreamState::Streaming);
        self.stats.source_connected();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(StreamEnd::Shutdown);
                    }
                }
                read = tokio::time::timeout(self.config.read_timeout, read_ts_packet_async(&mut reader)) => {
                    match read {
                        Err(_) => return Err(UpstreamError::ReadTimeout),
                        Ok(Ok(Some(packet))) => self.deliver(packet, tx),
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            return Ok(StreamEnd::Eof);
                        }
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Count one received packet, then try to hand it to the distributor's
    /// input queue; a full queue counts a drop rather than blocking.
    fn deliver(&self, packet: TsPacket, tx: &mpsc::Sender<TsPacket>) {
        let len = packet.as_bytes().len() as u64;
        self.stats.packet_received(len);
        if tx.try_send(packet).is_err() {
            self.stats.packet_dropped(len);
            tracing::warn!(event = "upstream_input_queue_full");
        }
    }
}

fn log_bridge_event(event: crate::rtp_bridge::BridgeEvent) {
    use crate::rtp_bridge::BridgeEvent;
    match event {
        BridgeEvent::Drop { sequence_number } => {
            tracing::warn!(event = "rtp_drop", seq = sequence_number)
        }
        BridgeEvent::Dup { sequence_number } => {
            tracing::debug!(event = "rtp_dup", seq = sequence_number)
        }
        BridgeEvent::Rejected {
            sequence_number,
            reason,
        } => {
            tracing::warn!(event = "rtp_rejected", seq = sequence_number, ?reason)
        }
    }
}

/// Adapts a `Stream<Item = io::Result<Bytes>>` (reqwest's response body)
/// into `AsyncRead`, the shape [`read_ts_packet_async`] expects.
fn tokio_util_compat(
    stream: impl futures_util::Stream<Item = std::io::Result<bytes::Bytes>> + Send + 'static,
) -> impl AsyncRead + Unpin {
    tokio_util::io::StreamReader::new(stream)
}

/// A `DatagramSource` over a connected `UdpSocket`, for reuse of
/// [`DatagramReader`] outside this module's inline raw-TS fast path (e.g.
/// by tests exercising C -> D -> A end to end over a socket).
pub struct UdpDatagramSource {
    socket: UdpSocket,
}

impl UdpDatagramSource {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl DatagramSource for UdpDatagramSource {
    fn recv(&mut self, max_len: usize) -> std::io::Result<Vec<u8>> {
        // `DatagramSource` is the synchronous shape B expects; bridging to
        // a real async socket belongs to the blocking-thread adapters
        // integration tests build around this type, not to the hot path
        // above which talks to `UdpSocket` directly.
        let mut buf = vec![0u8; max_len];
        let n = self.socket.try_recv(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}
