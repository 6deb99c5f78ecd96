//! wsbus-core: envelope codec, channel registries and correlation layer.
//!
//! # Overview
//!
//! wsbus multiplexes typed messages over a single WebSocket connection per
//! client. Messages carry a string tag and travel in one of four channels:
//!
//! - client → server push
//! - server → client push
//! - client-initiated request, answered by the server
//! - server-initiated request, broadcast to every client and answered by each
//!
//! The core crate is transport-agnostic. It defines:
//!
//! - [`WsBus`]: the bus, with its [`ClientSide`] and [`ServerSide`] views
//! - [`PushLink`] / [`RequestLink`] / [`BroadcastLink`]: typed per-tag handles
//! - [`Envelope`]: the JSON wire format
//! - [`Connection`]: the frame sink both transports implement
//! - [`PendingResponse`]: the settle-once future behind every request
//! - [`BusError`]: structured error type
//! - [`policy`] module: reconnect backoff

pub mod bus;
pub mod connection;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod link;
pub mod pending;
pub mod policy;
pub mod registry;

pub use bus::{BusConfig, ClientSide, ServerSide, WsBus};
pub use connection::{Connection, ConnectionId, ConnectionSet, ReadyState};
pub use correlation::CorrelationId;
pub use envelope::{Envelope, EnvelopeData, Kind};
pub use error::{BusError, ChannelKind, ErrorKind};
pub use link::{BroadcastLink, PushLink, RequestLink, RequestOptions};
pub use pending::{PendingCallTable, PendingKey, PendingResponse, Settle};
pub use policy::{Backoff, BackoffConfig};
pub use registry::{ChannelRegistry, PushHandler, Registration, RequestHandler};
