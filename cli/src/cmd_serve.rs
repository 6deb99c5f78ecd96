//! `wsbus serve`: run the demo server.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::time::Instant;
use wsbus_core::{BusConfig, RequestOptions, WsBus};
use wsbus_server::ServerConfig;

use crate::catalog::{Catalog, ConfigRequest, ConfigResponse, Status};

pub async fn run(bus_config: BusConfig, server: ServerConfig, poll: Duration) -> Result<()> {
    let bus = WsBus::new(bus_config);
    let catalog = Catalog::link(&bus).context("linking catalog")?;

    let settings: HashMap<String, String> = HashMap::from([
        ("theme".to_string(), "dark".to_string()),
        ("locale".to_string(), "en-US".to_string()),
    ]);
    catalog.config.handle(move |request: ConfigRequest| {
        let value = settings.get(&request.key).cloned();
        async move {
            ConfigResponse {
                key: request.key,
                value,
            }
        }
    });
    catalog.ping.handle(|ping| {
        tracing::info!(message = %ping.message, sent_at_ms = ping.sent_at_ms, "ping");
    });

    let listener = TcpListener::bind(&server.bind)
        .await
        .with_context(|| format!("binding {}", server.bind))?;
    let poller = tokio::spawn(poll_clients(bus.clone(), catalog, poll));

    let result = tokio::select! {
        served = wsbus_server::serve(listener, bus, &server.path) => served.context("server failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    };
    poller.abort();
    result
}

/// Every `poll`, push a status update and ask each client for its user agent.
/// Each connection's answer is logged on its own.
async fn poll_clients(bus: WsBus, catalog: Catalog, poll: Duration) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(poll);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        catalog.status.push(Status {
            connections: bus.server().connection_count(),
            uptime_secs: started.elapsed().as_secs(),
        });

        for call in catalog.user_agent.request_with((), RequestOptions::timeout(poll)) {
            tokio::spawn(async move {
                let conn_id = call.connection();
                match call.await {
                    Ok(agent) => tracing::info!(
                        ?conn_id,
                        name = %agent.name,
                        version = %agent.version,
                        platform = %agent.platform,
                        "user agent"
                    ),
                    Err(e) => tracing::warn!(?conn_id, error = %e, "user agent request failed"),
                }
            });
        }
    }
}
