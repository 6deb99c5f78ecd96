//! Transport factory for the reconnecting socket.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use wsbus_core::BusError;

/// Outbound half of a dialed socket: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = BusError> + Send>>;

/// Inbound half of a dialed socket: yields text frames until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, BusError>> + Send>>;

/// Opens one socket to `url`.
///
/// The reconnect machine calls this once per connection cycle. Implementations
/// other than [`TungsteniteDialer`] exist mainly for tests.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, url: &str) -> Result<(FrameSink, FrameStream), BusError>;
}

/// Dials with `tokio-tungstenite`. Text frames only; binary, ping and pong
/// frames are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<(FrameSink, FrameStream), BusError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| BusError::WebSocket(e.to_string()))?;
        let (sink, stream) = ws_stream.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(frame.into()))))
            .sink_map_err(|e| BusError::WebSocket(e.to_string()));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(_) => None,
                Err(e) => Some(Err(BusError::WebSocket(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
