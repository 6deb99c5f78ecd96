//! wsbus-client: WebSocket client transport for wsbus.
//!
//! # Features
//! - Auto-reconnect on disconnect (exponential backoff, optional attempt cap)
//! - Lifecycle events (`Open`, `Close`, `Message`, `Error`) for any number of
//!   subscribers
//! - Frames dropped, never queued, while the socket is down
//! - [`BusClient`] binds a `WsBus` client end to the socket

pub mod client;
pub mod dialer;
pub mod reconnect;

pub use client::{BusClient, ClientConfig};
pub use dialer::{Dialer, FrameSink, FrameStream, TungsteniteDialer};
pub use reconnect::{ReconnectingWebSocket, SocketEvent};
