// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wires one configured [`StreamConfig`] to a running pipeline: an
//! [`UpstreamClient`], a [`Distributor`] fed from it, and the
//! [`Broker`]/[`StreamStats`] pair that gate and observe it. One
//! `StreamRuntime` per configured stream, held in [`crate::AppState`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use restreamer_core::broker::Broker;
use restreamer_core::distributor::Distributor;
use restreamer_core::events::EventHandle;
use restreamer_core::stats::StreamStats;
use restreamer_core::upstream::{UpstreamClient, UpstreamConfig, UpstreamError};

use crate::config::StreamConfig;

/// A single stream's live pipeline plus the routing metadata the HTTP
/// layer needs to serve it.
pub struct StreamRuntime {
    pub config: StreamConfig,
    pub upstream: Arc<UpstreamClient>,
    pub distributor: Arc<Distributor>,
    pub stats: Arc<StreamStats>,
    #[allow(dead_code)]
    tasks: Vec<JoinHandle<()>>,
}

impl StreamRuntime {
    /// Build and start the pipeline for one stream: construct the
    /// upstream client, spawn it, spawn the distributor's producer task
    /// wired to the upstream's output.
    pub fn spawn(
        config: StreamConfig,
        events: Option<EventHandle>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, UpstreamError> {
        let stats = Arc::new(StreamStats::new(
            config.max_connections as u64,
            config.full_connections as u64,
        ));

        let upstream_config = UpstreamConfig {
            urls: config.urls.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            input_buffer: config.input_buffer,
            udp_datagram_size: config.udp_datagram_size,
            rtp_lookahead: config.rtp_lookahead,
        };
        let upstream = UpstreamClient::new(upstream_config, stats.clone())?;
        let (input_rx, upstream_task) = upstream.clone().run(shutdown.clone());

        let broker = match events {
            Some(events) => Broker::with_events(config.max_connections, events),
            None => Broker::new(config.max_connections),
        };
        let distributor = Distributor::new(config.output_buffer, broker, stats.clone());
        let dispatch_task = distributor.clone().run(input_rx, shutdown);

        Ok(Self {
            config,
            upstream,
            distributor,
            stats,
            tasks: vec![upstream_task, dispatch_task],
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StreamConfig;

    use super::*;

    fn stream_config(urls: Vec<&str>) -> StreamConfig {
        StreamConfig {
            name: "main".into(),
            urls: urls.into_iter().map(String::from).collect(),
            serve_path: "/stream".into(),
            health_path: "/health".into(),
            check_path: "/check".into(),
            max_connections: 10,
            full_connections: 0,
            output_buffer: 16,
            input_buffer: 16,
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
            reconnect_delay_ms: 100,
            udp_datagram_size: 1500,
            rtp_lookahead: 16,
            auth: None,
        }
    }

    #[test]
    fn spawn_rejects_a_stream_with_no_urls() {
        let (_tx, rx) = watch::channel(false);
        let err = StreamRuntime::spawn(stream_config(Vec::new()), None, rx).unwrap_err();
        assert!(matches!(err, UpstreamError::NoUrls));
    }
}
