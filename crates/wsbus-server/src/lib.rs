//! wsbus-server: axum WebSocket endpoint for the server end of a `WsBus`.
//!
//! Each upgraded socket is registered with the bus for its lifetime: inbound
//! text frames go to `ServerSide::on_frame`, outbound frames are queued on a
//! per-connection channel, and the connection is removed (rejecting its
//! outstanding broadcast calls) when the socket closes.

pub mod server;

pub use server::{bind_and_serve, handle_socket, router, serve, ServerConfig};
