// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Route definitions: per-stream serve/health/check paths plus one
//! server-level statistics path, mounted over a shared [`AppState`] the
//! way `hdds-gateway::routes::api_routes()` mounts its handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::AppState;

pub fn build_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let mut router = Router::new().route(
        &state.stats_path,
        get(|State(state): State<Arc<AppState>>| async move { handlers::statistics(state).await }),
    );

    for runtime in state.streams.values() {
        let cfg = &runtime.config;

        let serve_name = cfg.name.clone();
        router = router.route(
            &cfg.serve_path,
            get(
                move |State(state): State<Arc<AppState>>,
                      ConnectInfo(remote): ConnectInfo<SocketAddr>,
                      headers: HeaderMap| {
                    let name = serve_name.clone();
                    async move { handlers::serve_stream(state, name, remote, headers).await }
                },
            ),
        );

        let health_name = cfg.name.clone();
        router = router.route(
            &cfg.health_path,
            get(move |State(state): State<Arc<AppState>>| {
                let name = health_name.clone();
                async move { handlers::health(state, name).await }
            }),
        );

        let check_name = cfg.name.clone();
        router = router.route(
            &cfg.check_path,
            get(move |State(state): State<Arc<AppState>>| {
                let name = check_name.clone();
                async move { handlers::check(state, name).await }
            }),
        );
    }

    router
}
