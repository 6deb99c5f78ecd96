//! `--config <file.json>` loading. Every section is optional.
//!
//! ```json
//! {
//!   "bus":    { "request_timeout_ms": 300000 },
//!   "client": { "url": "ws://127.0.0.1:45626/ws",
//!               "backoff": { "base_ms": 1000, "max_delay_ms": 8000, "max_attempts": null } },
//!   "server": { "bind": "127.0.0.1:45626", "path": "/ws" },
//!   "log":    { "level": "info", "components": { "wsbus-client": "debug" }, "json": false }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use wsbus_client::ClientConfig;
use wsbus_core::BusConfig;
use wsbus_server::ServerConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.bus.request_timeout_ms, 300_000);
        assert_eq!(config.client.url, "ws://127.0.0.1:45626/ws");
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"{ "client": { "backoff": { "max_attempts": 3 } }, "server": { "bind": "0.0.0.0:9000" } }"#,
        )
        .unwrap();
        assert_eq!(config.client.backoff.max_attempts, Some(3));
        assert_eq!(config.client.backoff.base_ms, 1_000);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.path, "/ws");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/wsbus.json"))).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }
}
