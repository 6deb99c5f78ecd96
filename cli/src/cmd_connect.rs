//! `wsbus connect`: run the demo client.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use wsbus_client::{BusClient, ClientConfig};
use wsbus_core::{BusConfig, WsBus};

use crate::catalog::{Catalog, ConfigRequest, Ping, Status, UserAgent};

const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(bus_config: BusConfig, client_config: ClientConfig) -> Result<()> {
    let bus = WsBus::new(bus_config);
    let catalog = Catalog::link(&bus).context("linking catalog")?;

    catalog.user_agent.handle(|()| async { UserAgent::current() });
    catalog.status.handle(|status: Status| {
        tracing::info!(
            connections = status.connections,
            uptime_secs = status.uptime_secs,
            "status"
        );
    });

    let url = client_config.url.clone();
    let client = BusClient::connect(bus, client_config);
    client
        .wait_open(OPEN_TIMEOUT)
        .await
        .with_context(|| format!("connecting to {url}"))?;

    let sent_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    catalog.ping.push(Ping {
        message: "hello".into(),
        sent_at_ms,
    });

    let response = catalog
        .config
        .request(ConfigRequest {
            key: "theme".into(),
        })
        .await
        .context("config request failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    tracing::info!(%url, "connected; press Ctrl-C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    client.close();
    Ok(())
}
