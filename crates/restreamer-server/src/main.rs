// SPDX-License-Identifier: Apache-2.0 OR MIT

//! restreamer-server — HTTP front end for the MPEG-TS stream multiplier.
//!
//! Wires `restreamer-core`'s ingest -> packetise -> fan-out pipeline to
//! `axum`: one serve/health/check route set per configured stream, plus
//! a server-level statistics endpoint, an event queue with an optional
//! HTTP notification callback, and graceful shutdown on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! restreamer-server --config restreamer.json
//! restreamer-server --config restreamer.json --port 9000
//! ```

mod auth;
mod config;
mod handlers;
mod routes;
mod stream;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use restreamer_core::events::{spawn_heartbeat, EventKind, EventQueue, Handler};
use restreamer_core::stats::{start_sampler, StatsCollector};

use config::{ConfigError, ServerConfig};
use stream::StreamRuntime;

/// restreamer-server: MPEG-TS stream multiplier HTTP front end
#[derive(Parser, Debug)]
#[command(name = "restreamer-server")]
#[command(about = "MPEG-TS ingest-and-fan-out HTTP server")]
#[command(version)]
struct Args {
    /// JSON configuration file path (required: streams are declared here)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

/// Shared application state: every configured stream's live pipeline
/// plus the process-wide statistics collector, named and structured
/// after `hdds-gateway::AppState`.
pub struct AppState {
    streams: HashMap<String, Arc<StreamRuntime>>,
    stats_collector: Arc<Mutex<StatsCollector>>,
    stats_path: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    let filter = config.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut event_queue = EventQueue::new(config.event_limit);
    let event_handle = event_queue.handle();
    if let Some(notify_url) = config.notify_url.clone() {
        let handler = notify_handler(notify_url);
        event_queue.register(EventKind::LimitHit, handler.clone());
        event_queue.register(EventKind::LimitMiss, handler.clone());
        event_queue.register(EventKind::Heartbeat, handler);
    }
    let event_task = event_queue.start(shutdown_rx.clone());
    let heartbeat_task = spawn_heartbeat(
        event_handle.clone(),
        Duration::from_secs(config.heartbeat_interval_secs),
        shutdown_rx.clone(),
    );

    let mut stats_collector = StatsCollector::new();
    let mut streams = HashMap::with_capacity(config.streams.len());
    for stream_config in config.streams.clone() {
        let name = stream_config.name.clone();
        let runtime = StreamRuntime::spawn(
            stream_config,
            Some(event_handle.clone()),
            shutdown_rx.clone(),
        )?;
        stats_collector.register_stream(name.clone(), runtime.stats.clone());
        streams.insert(name, Arc::new(runtime));
    }

    let state = Arc::new(AppState {
        streams,
        stats_collector: Arc::new(Mutex::new(stats_collector)),
        stats_path: config.stats_path.clone(),
    });
    start_sampler(state.stats_collector.clone());

    let app = routes::build_routes(&state)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("restreamer-server v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);
    for name in config.streams.iter().map(|s| &s.name) {
        info!(stream = %name, "stream configured");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        let _ = shutdown_tx.send(true);
    })
    .await?;

    if let Some(task) = event_task {
        EventQueue::shutdown(task).await;
    }
    let _ = heartbeat_task.await;

    Ok(())
}

/// File-or-flags precedence: the config file is the only source of the
/// stream list; CLI flags, when present, override the file's
/// bind/port/log-level, mirroring `hdds-router::build_config`'s
/// file-over-flags loading with flag overlays.
fn build_config(args: &Args) -> Result<ServerConfig, ConfigError> {
    let Some(path) = &args.config else {
        return Err(ConfigError::Invalid(
            "missing --config <path>: streams must be declared in a JSON config file".into(),
        ));
    };
    let mut config = ServerConfig::from_file(path)?;

    if let Some(ref bind) = args.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref log_level) = args.log_level {
        config.log_level = log_level.clone();
    }

    Ok(config)
}

/// Builds the event-notification callback (spec.md §6): a best-effort
/// HTTP GET, failures logged and discarded, dispatched off the event
/// queue's consumer task so a slow or dead endpoint never stalls it.
fn notify_handler(url: String) -> Handler {
    let client = reqwest::Client::new();
    Arc::new(move |kind, _when| {
        let client = client.clone();
        let url = url.clone();
        tokio::spawn(async move {
            if let Err(e) = client.get(&url).send().await {
                tracing::warn!(event = "notify_callback_failed", ?kind, error = %e);
            }
        });
    })
}
