//! Binds a [`WsBus`] client end to a reconnecting socket.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wsbus_core::{BackoffConfig, BusError, ClientSide, ReadyState, WsBus};

use crate::dialer::{Dialer, TungsteniteDialer};
use crate::reconnect::{ReconnectingWebSocket, SocketEvent};

/// Configuration for the client transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_url() -> String { "ws://127.0.0.1:45626/ws".into() }

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// A bus whose client end runs over a [`ReconnectingWebSocket`].
///
/// Inbound frames are fed to the bus in socket order; every `Close` rejects
/// the outstanding client-initiated requests. Dropping the client closes the
/// socket.
pub struct BusClient {
    bus: WsBus,
    socket: ReconnectingWebSocket,
    events: JoinHandle<()>,
}

impl BusClient {
    /// Bind `bus` to a tungstenite socket for `config.url` and start connecting.
    pub fn connect(bus: WsBus, config: ClientConfig) -> Self {
        Self::with_dialer(bus, config, Arc::new(TungsteniteDialer))
    }

    pub fn with_dialer(bus: WsBus, config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        let socket = ReconnectingWebSocket::new(config.url, config.backoff, dialer);
        let events = socket.subscribe();
        bus.client().bind(Arc::new(socket.clone()));
        let events = tokio::spawn(forward_events(bus.client(), events));
        socket.connect();
        Self {
            bus,
            socket,
            events,
        }
    }

    pub fn bus(&self) -> &WsBus {
        &self.bus
    }

    pub fn socket(&self) -> &ReconnectingWebSocket {
        &self.socket
    }

    /// Wait until the socket is open, or fail with `RequestTimeout` after
    /// `timeout` / `ConnectionClosed` if the socket was closed for good.
    pub async fn wait_open(&self, timeout: Duration) -> Result<(), BusError> {
        let mut events = self.socket.subscribe();
        if self.socket.ready_state() == ReadyState::Open {
            return Ok(());
        }
        let opened = async {
            while let Some(event) = events.recv().await {
                if event == SocketEvent::Open {
                    return Ok(());
                }
            }
            Err(BusError::ConnectionClosed)
        };
        tokio::time::timeout(timeout, opened)
            .await
            .map_err(|_| BusError::RequestTimeout {
                ms: timeout.as_millis() as u64,
            })?
    }

    /// Close the socket and stop reconnecting.
    pub fn close(&self) {
        self.socket.close();
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.socket.close();
        let client = self.bus.client();
        client.unbind();
        client.on_close();
        self.events.abort();
    }
}

async fn forward_events(client: ClientSide, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Message(frame) => client.on_frame(&frame),
            SocketEvent::Close => {
                client.on_close();
            }
            SocketEvent::Open => {}
            SocketEvent::Error(error) => tracing::debug!(%error, "socket error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;

    use crate::dialer::{FrameSink, FrameStream};

    struct Refused;

    #[async_trait]
    impl Dialer for Refused {
        async fn dial(&self, _url: &str) -> Result<(FrameSink, FrameStream), BusError> {
            Err(BusError::WebSocket("connection refused".into()))
        }
    }

    #[test]
    fn config_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.url, "ws://127.0.0.1:45626/ws");
        assert_eq!(config.backoff.base_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_fail_fast_while_disconnected() {
        let bus = WsBus::default();
        let config = bus.client().link_request::<(), String>("config").unwrap();
        let client = BusClient::with_dialer(bus.clone(), ClientConfig::default(), Arc::new(Refused));

        let result = config.request(()).now_or_never().expect("settled on first poll");
        assert!(result.unwrap_err().is_connection_closed());

        let err = client.wait_open(Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_closes_socket_and_unbinds() {
        let bus = WsBus::default();
        let client = BusClient::with_dialer(bus.clone(), ClientConfig::default(), Arc::new(Refused));
        let socket = client.socket().clone();
        drop(client);
        assert_eq!(socket.ready_state(), ReadyState::Closed);
        assert!(!bus.client().is_open());
    }
}
