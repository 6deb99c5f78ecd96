//! Auto-reconnecting WebSocket.
//!
//! A background driver owns the live socket. It dials, pumps frames in both
//! directions, and on failure or disconnect waits out the backoff delay before
//! dialing again. `close()` stops it for good (until the next `connect()`):
//! it cancels the driver's token and bumps the generation, so a driver that
//! was mid-sleep or mid-dial can never reopen a socket the caller closed.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wsbus_core::{Backoff, BackoffConfig, Connection, ReadyState};

use crate::dialer::{Dialer, FrameSink, FrameStream, TungsteniteDialer};

/// Lifecycle and traffic events, delivered to every subscriber in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Close,
    Message(String),
    Error(String),
}

struct State {
    ready_state: ReadyState,
    manual_close: bool,
    backoff: Backoff,
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: Option<CancellationToken>,
    generation: u64,
}

struct Shared {
    url: String,
    dialer: Arc<dyn Dialer>,
    state: Mutex<State>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<SocketEvent>>>,
}

impl Shared {
    fn emit(&self, event: SocketEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    /// Whether the driver started as `generation` still owns the socket.
    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && !state.manual_close
    }
}

/// A WebSocket that reconnects with exponential backoff.
///
/// Cloning is cheap; clones control the same socket.
#[derive(Clone)]
pub struct ReconnectingWebSocket {
    shared: Arc<Shared>,
}

impl ReconnectingWebSocket {
    pub fn new(url: impl Into<String>, backoff: BackoffConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                dialer,
                state: Mutex::new(State {
                    ready_state: ReadyState::Closed,
                    manual_close: false,
                    backoff: Backoff::new(backoff),
                    outbound: None,
                    cancel: None,
                    generation: 0,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Dial with `tokio-tungstenite`.
    pub fn tungstenite(url: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self::new(url, backoff, Arc::new(TungsteniteDialer))
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.lock().ready_state
    }

    /// Consecutive failed cycles since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.state.lock().backoff.attempt()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SocketEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().push(tx);
        rx
    }

    /// Start connecting with a fresh backoff schedule. No-op while
    /// connecting or open.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let (generation, token) = {
            let mut state = self.shared.state.lock();
            if matches!(state.ready_state, ReadyState::Connecting | ReadyState::Open) {
                return;
            }
            state.manual_close = false;
            state.ready_state = ReadyState::Connecting;
            state.backoff.reset();
            state.generation += 1;
            if let Some(stale) = state.cancel.take() {
                stale.cancel();
            }
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            (state.generation, token)
        };
        tracing::info!(url = %self.shared.url, "connecting");
        tokio::spawn(drive(Arc::clone(&self.shared), generation, token));
    }

    /// Close the socket and stop reconnecting. Emits `Close` if a socket was
    /// open or being dialed.
    pub fn close(&self) {
        let previous = {
            let mut state = self.shared.state.lock();
            state.manual_close = true;
            state.generation += 1;
            state.outbound = None;
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            std::mem::replace(&mut state.ready_state, ReadyState::Closed)
        };
        if previous != ReadyState::Closed {
            tracing::info!(url = %self.shared.url, "closed by caller");
            self.shared.emit(SocketEvent::Close);
        }
    }

    /// Queue a text frame. Returns `false` (and drops the frame) unless the
    /// socket is open.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        let state = self.shared.state.lock();
        match (&state.outbound, state.ready_state) {
            (Some(outbound), ReadyState::Open) => outbound.send(frame.into()).is_ok(),
            _ => {
                tracing::trace!(url = %self.shared.url, state = %state.ready_state, "socket not open, dropping frame");
                false
            }
        }
    }
}

impl Connection for ReconnectingWebSocket {
    fn send(&self, frame: String) {
        ReconnectingWebSocket::send(self, frame);
    }

    fn ready_state(&self) -> ReadyState {
        ReconnectingWebSocket::ready_state(self)
    }
}

impl std::fmt::Debug for ReconnectingWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingWebSocket")
            .field("url", &self.shared.url)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// How one open socket ended.
enum Ended {
    /// `close()` or a newer `connect()` took over.
    Cancelled,
    /// The peer went away or the socket failed.
    Lost(Option<String>),
}

async fn drive(shared: Arc<Shared>, generation: u64, token: CancellationToken) {
    loop {
        let dialed = tokio::select! {
            _ = token.cancelled() => return,
            dialed = shared.dialer.dial(&shared.url) => dialed,
        };

        let was_open = match dialed {
            Ok((sink, stream)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut state = shared.state.lock();
                    if state.generation != generation || state.manual_close {
                        return;
                    }
                    state.ready_state = ReadyState::Open;
                    state.backoff.reset();
                    state.outbound = Some(tx);
                }
                tracing::info!(url = %shared.url, "connected");
                shared.emit(SocketEvent::Open);

                match pump(&shared, sink, stream, rx, &token).await {
                    Ended::Cancelled => return,
                    Ended::Lost(Some(error)) => shared.emit(SocketEvent::Error(error)),
                    Ended::Lost(None) => {}
                }
                true
            }
            Err(e) => {
                if !shared.is_current(generation) {
                    return;
                }
                tracing::debug!(url = %shared.url, error = %e, "dial failed");
                shared.emit(SocketEvent::Error(e.to_string()));
                false
            }
        };

        let delay = {
            let mut state = shared.state.lock();
            if state.generation != generation || state.manual_close {
                return;
            }
            state.ready_state = ReadyState::Closed;
            state.outbound = None;
            state.backoff.next_delay().map(|delay| (delay, state.backoff.attempt()))
        };
        if was_open {
            tracing::warn!(url = %shared.url, "disconnected");
        }
        shared.emit(SocketEvent::Close);

        let Some((delay, attempt)) = delay else {
            tracing::warn!(url = %shared.url, "reconnect attempts exhausted, giving up");
            return;
        };
        tracing::debug!(
            url = %shared.url,
            delay_ms = delay.as_millis() as u64,
            attempt,
            "reconnecting"
        );

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        {
            let mut state = shared.state.lock();
            if state.generation != generation || state.manual_close {
                return;
            }
            state.ready_state = ReadyState::Connecting;
        }
        tracing::debug!(url = %shared.url, attempt, "redialing");
    }
}

async fn pump(
    shared: &Shared,
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    token: &CancellationToken,
) -> Ended {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.close().await;
                return Ended::Cancelled;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    tracing::trace!(url = %shared.url, "sending frame");
                    if let Err(e) = sink.send(frame).await {
                        return Ended::Lost(Some(e.to_string()));
                    }
                }
                // Only `close()` drops the sender while we are open.
                None => {
                    let _ = sink.close().await;
                    return Ended::Cancelled;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => {
                    tracing::trace!(url = %shared.url, "received frame");
                    shared.emit(SocketEvent::Message(frame));
                }
                Some(Err(e)) => return Ended::Lost(Some(e.to_string())),
                None => return Ended::Lost(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use tokio::time::Instant;
    use wsbus_core::BusError;

    /// The test's end of a dialed socket.
    struct Remote {
        /// Frames the socket sent.
        sent: fmpsc::UnboundedReceiver<String>,
        /// Frames to deliver to the socket. Dropping it closes the socket.
        inbound: fmpsc::UnboundedSender<String>,
    }

    #[derive(Default)]
    struct MockDialer {
        dials: Mutex<Vec<Instant>>,
        /// `true` opens a socket; exhausted script fails every dial.
        script: Mutex<VecDeque<bool>>,
        remotes: Mutex<Vec<Remote>>,
    }

    impl MockDialer {
        fn scripted(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                ..Default::default()
            })
        }

        fn dial_count(&self) -> usize {
            self.dials.lock().len()
        }

        fn gaps_ms(&self) -> Vec<u64> {
            self.dials
                .lock()
                .windows(2)
                .map(|w| (w[1] - w[0]).as_millis() as u64)
                .collect()
        }

        fn take_remote(&self) -> Remote {
            self.remotes.lock().remove(0)
        }
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self, _url: &str) -> Result<(FrameSink, FrameStream), BusError> {
            self.dials.lock().push(Instant::now());
            if !self.script.lock().pop_front().unwrap_or(false) {
                return Err(BusError::WebSocket("connection refused".into()));
            }
            let (sent_tx, sent_rx) = fmpsc::unbounded::<String>();
            let (inbound_tx, inbound_rx) = fmpsc::unbounded::<String>();
            self.remotes.lock().push(Remote {
                sent: sent_rx,
                inbound: inbound_tx,
            });
            let sink = sent_tx.sink_map_err(|e| BusError::WebSocket(e.to_string()));
            let stream = inbound_rx.map(Ok::<String, BusError>);
            Ok((Box::pin(sink), Box::pin(stream)))
        }
    }

    fn socket(dialer: &Arc<MockDialer>, max_attempts: Option<u32>) -> ReconnectingWebSocket {
        let config = BackoffConfig {
            base_ms: 1_000,
            max_delay_ms: 8_000,
            max_attempts,
        };
        ReconnectingWebSocket::new("ws://test/ws", config, dialer.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_caps() {
        let dialer = MockDialer::scripted(&[]);
        let ws = socket(&dialer, None);
        ws.connect();

        tokio::time::sleep(Duration::from_secs(30)).await;
        ws.close();

        assert_eq!(dialer.dial_count(), 6);
        assert_eq!(dialer.gaps_ms(), vec![1_000, 2_000, 4_000, 8_000, 8_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let dialer = MockDialer::scripted(&[]);
        let ws = socket(&dialer, Some(2));
        ws.connect();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(dialer.dial_count(), 3);
        assert_eq!(ws.ready_state(), ReadyState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_pending_reconnect_stops_dialing() {
        let dialer = MockDialer::scripted(&[]);
        let ws = socket(&dialer, None);
        ws.connect();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dialer.dial_count(), 1);
        ws.close();
        ws.close();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(ws.ready_state(), ReadyState::Closed);

        // A later connect() starts over.
        ws.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dialer.dial_count(), 2);
        ws.close();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_noop_while_connecting_or_open() {
        let dialer = MockDialer::scripted(&[true]);
        let ws = socket(&dialer, None);
        let mut events = ws.subscribe();
        ws.connect();
        ws.connect();
        assert_eq!(events.recv().await, Some(SocketEvent::Open));
        ws.connect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dialer.dial_count(), 1);
        ws.close();
    }

    #[tokio::test(start_paused = true)]
    async fn open_socket_carries_frames_both_ways() {
        let dialer = MockDialer::scripted(&[true]);
        let ws = socket(&dialer, None);
        let mut events = ws.subscribe();
        ws.connect();
        assert_eq!(events.recv().await, Some(SocketEvent::Open));
        assert_eq!(ws.ready_state(), ReadyState::Open);

        let mut remote = dialer.take_remote();
        assert!(ws.send("hello"));
        assert_eq!(remote.sent.next().await.as_deref(), Some("hello"));

        remote.inbound.unbounded_send("world".into()).unwrap();
        assert_eq!(
            events.recv().await,
            Some(SocketEvent::Message("world".into()))
        );
        ws.close();
        assert_eq!(events.recv().await, Some(SocketEvent::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_socket_reconnects_from_base_delay() {
        let dialer = MockDialer::scripted(&[false, true, true]);
        let ws = socket(&dialer, None);
        let mut events = ws.subscribe();
        ws.connect();

        assert!(matches!(events.recv().await, Some(SocketEvent::Error(_))));
        assert_eq!(events.recv().await, Some(SocketEvent::Close));
        assert_eq!(events.recv().await, Some(SocketEvent::Open));
        assert_eq!(ws.attempt(), 0);

        // Peer goes away: the next retry waits `base` again.
        drop(dialer.take_remote());
        assert_eq!(events.recv().await, Some(SocketEvent::Close));
        assert_eq!(ws.ready_state(), ReadyState::Closed);
        assert_eq!(events.recv().await, Some(SocketEvent::Open));
        assert_eq!(dialer.gaps_ms(), vec![1_000, 1_000]);
        ws.close();
    }

    #[tokio::test]
    async fn send_is_dropped_unless_open() {
        let dialer = MockDialer::scripted(&[]);
        let ws = socket(&dialer, None);
        assert_eq!(ws.ready_state(), ReadyState::Closed);
        assert!(!ws.send("lost"));
        assert!(!ws.is_open());
    }
}
