//! The central bus: four channel registries, two pending-call tables and the
//! connection bindings for both ends.
//!
//! A process normally drives only one end. The client end binds a single
//! connection ([`ClientSide::bind`]); the server end tracks a set of them
//! ([`ServerSide::add`] / [`ServerSide::remove`]). Inbound frames enter through
//! `on_frame` on the matching side and are dispatched onto the mirror-image
//! registry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{Connection, ConnectionId, ConnectionSet};
use crate::envelope::{Envelope, Kind};
use crate::error::{BusError, ChannelKind};
use crate::link::{BroadcastLink, PushLink, RequestLink};
use crate::pending::{PendingCallTable, PendingKey, Settle};
use crate::registry::{ChannelRegistry, PushHandler, RequestHandler};

/// Bus-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default request timeout in milliseconds (5 minutes).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 { 5 * 60 * 1_000 }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Client,
    Server,
}

pub(crate) struct BusInner {
    pub(crate) config: BusConfig,
    pub(crate) client_push: Arc<ChannelRegistry<PushHandler>>,
    pub(crate) server_push: Arc<ChannelRegistry<PushHandler>>,
    pub(crate) client_request: Arc<ChannelRegistry<RequestHandler>>,
    pub(crate) server_request: Arc<ChannelRegistry<RequestHandler>>,
    /// Client-initiated calls awaiting a server response.
    pub(crate) client_calls: PendingCallTable,
    /// Broadcast calls awaiting per-connection client responses.
    pub(crate) server_calls: PendingCallTable,
    client_conn: RwLock<Option<Arc<dyn Connection>>>,
    pub(crate) server_conns: ConnectionSet,
}

impl BusInner {
    pub(crate) fn push_registry(&self, side: Side) -> &Arc<ChannelRegistry<PushHandler>> {
        match side {
            Side::Client => &self.client_push,
            Side::Server => &self.server_push,
        }
    }

    pub(crate) fn client_connection(&self) -> Option<Arc<dyn Connection>> {
        self.client_conn.read().clone()
    }

    /// Send a frame on every open connection reachable from `side`.
    pub(crate) fn forward(&self, side: Side, frame: String) {
        match side {
            Side::Client => match self.client_connection() {
                Some(conn) if conn.is_open() => conn.send(frame),
                _ => tracing::trace!("client connection not open, dropping frame"),
            },
            Side::Server => {
                for (id, conn) in self.server_conns.snapshot() {
                    if conn.is_open() {
                        conn.send(frame.clone());
                    } else {
                        tracing::trace!(conn_id = %id, "connection not open, skipping");
                    }
                }
            }
        }
    }
}

/// A typed multiplexer over one logical connection (client end) or a set of
/// connections (server end).
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct WsBus {
    inner: Arc<BusInner>,
}

impl Default for WsBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl WsBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                client_push: Arc::new(ChannelRegistry::new(ChannelKind::ClientPush)),
                server_push: Arc::new(ChannelRegistry::new(ChannelKind::ServerPush)),
                client_request: Arc::new(ChannelRegistry::new(ChannelKind::ClientRequest)),
                server_request: Arc::new(ChannelRegistry::new(ChannelKind::ServerRequest)),
                client_calls: PendingCallTable::new(),
                server_calls: PendingCallTable::new(),
                client_conn: RwLock::new(None),
                server_conns: ConnectionSet::new(),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Client-originated channels (client push, client request) plus the
    /// client end's bound connection.
    pub fn client(&self) -> ClientSide {
        ClientSide {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Server-originated channels (server push, broadcast request) plus the
    /// server end's live-connection set.
    pub fn server(&self) -> ServerSide {
        ServerSide {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Client-originated half of a [`WsBus`].
#[derive(Clone)]
pub struct ClientSide {
    inner: Arc<BusInner>,
}

impl ClientSide {
    /// Link a client → server push tag.
    pub fn link_push<T>(&self, tag: impl Into<String>) -> Result<PushLink<T>, BusError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        self.inner.client_push.link(&tag)?;
        Ok(PushLink::new(Arc::clone(&self.inner), Side::Client, tag))
    }

    /// Link a client-initiated request tag.
    pub fn link_request<Req, Res>(
        &self,
        tag: impl Into<String>,
    ) -> Result<RequestLink<Req, Res>, BusError>
    where
        Req: Serialize + DeserializeOwned + Send + 'static,
        Res: Serialize + DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        self.inner.client_request.link(&tag)?;
        Ok(RequestLink::new(Arc::clone(&self.inner), tag))
    }

    /// Bind the connection all client-end traffic goes through.
    pub fn bind(&self, connection: Arc<dyn Connection>) {
        *self.inner.client_conn.write() = Some(connection);
    }

    /// Drop the bound connection; client-end sends fail until the next bind.
    pub fn unbind(&self) -> Option<Arc<dyn Connection>> {
        self.inner.client_conn.write().take()
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .client_connection()
            .map_or(false, |conn| conn.is_open())
    }

    /// Feed one inbound text frame received from the server.
    pub fn on_frame(&self, frame: &str) {
        let Some(envelope) = Envelope::decode(frame) else {
            return;
        };
        tracing::trace!(kind = %envelope.kind, tag = %envelope.tag, "client received frame");
        match envelope.kind {
            Kind::Push => dispatch_push(&self.inner.server_push, envelope),
            Kind::Request => {
                let inner = Arc::clone(&self.inner);
                dispatch_request(&self.inner.server_request, envelope, move |frame| {
                    inner.forward(Side::Client, frame)
                });
            }
            Kind::Response => {
                let key = PendingKey::new(envelope.tag, envelope.data.correlation_id, None);
                settle_response(&self.inner.client_calls, &key, envelope.data.payload);
            }
        }
    }

    /// The bound connection closed: every outstanding client-initiated call
    /// fails with `ConnectionClosed`. Returns how many were rejected.
    pub fn on_close(&self) -> usize {
        let rejected = self.inner.client_calls.reject_all();
        if rejected > 0 {
            tracing::debug!(rejected, "connection closed, rejected outstanding requests");
        }
        rejected
    }

    /// Number of client-initiated calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.client_calls.len()
    }
}

/// Server-originated half of a [`WsBus`].
#[derive(Clone)]
pub struct ServerSide {
    inner: Arc<BusInner>,
}

impl ServerSide {
    /// Link a server → client push tag.
    pub fn link_push<T>(&self, tag: impl Into<String>) -> Result<PushLink<T>, BusError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        self.inner.server_push.link(&tag)?;
        Ok(PushLink::new(Arc::clone(&self.inner), Side::Server, tag))
    }

    /// Link a server-initiated broadcast request tag.
    pub fn link_request<Req, Res>(
        &self,
        tag: impl Into<String>,
    ) -> Result<BroadcastLink<Req, Res>, BusError>
    where
        Req: Serialize + DeserializeOwned + Send + 'static,
        Res: Serialize + DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        self.inner.server_request.link(&tag)?;
        Ok(BroadcastLink::new(Arc::clone(&self.inner), tag))
    }

    /// Register a newly opened connection.
    pub fn add(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = self.inner.server_conns.insert(connection);
        tracing::debug!(conn_id = %id, total = self.inner.server_conns.len(), "connection added");
        id
    }

    /// Forget a closed connection; broadcast calls still waiting on it fail
    /// with `ConnectionClosed`.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.inner.server_conns.remove(id);
        let rejected = self.inner.server_calls.reject_connection(id);
        tracing::debug!(conn_id = %id, rejected, "connection removed");
        removed
    }

    /// Feed one inbound text frame received on connection `from`.
    pub fn on_frame(&self, frame: &str, from: ConnectionId) {
        let Some(envelope) = Envelope::decode(frame) else {
            return;
        };
        tracing::trace!(
            kind = %envelope.kind,
            tag = %envelope.tag,
            conn_id = %from,
            "server received frame"
        );
        match envelope.kind {
            Kind::Push => dispatch_push(&self.inner.client_push, envelope),
            Kind::Request => {
                let inner = Arc::clone(&self.inner);
                dispatch_request(&self.inner.client_request, envelope, move |frame| {
                    match inner.server_conns.get(from) {
                        Some(conn) if conn.is_open() => conn.send(frame),
                        _ => tracing::debug!(conn_id = %from, "requester gone, dropping response"),
                    }
                });
            }
            Kind::Response => {
                let key = PendingKey::new(envelope.tag, envelope.data.correlation_id, Some(from));
                settle_response(&self.inner.server_calls, &key, envelope.data.payload);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.server_conns.len()
    }

    /// Number of broadcast calls awaiting a per-connection response.
    pub fn pending_count(&self) -> usize {
        self.inner.server_calls.len()
    }
}

fn dispatch_push(registry: &ChannelRegistry<PushHandler>, envelope: Envelope) {
    if !registry.is_linked(&envelope.tag) {
        tracing::debug!(channel = %registry.channel(), tag = %envelope.tag, "dropping push for unknown tag");
        return;
    }
    for handler in registry.handlers(&envelope.tag) {
        handler(envelope.data.payload.clone());
    }
}

/// Run every handler for the request on its own task and send each result
/// back through `reply`. Handlers never block dispatch of other frames.
fn dispatch_request<F>(registry: &ChannelRegistry<RequestHandler>, envelope: Envelope, reply: F)
where
    F: Fn(String) + Clone + Send + Sync + 'static,
{
    if !registry.is_linked(&envelope.tag) {
        tracing::debug!(channel = %registry.channel(), tag = %envelope.tag, "dropping request for unknown tag");
        return;
    }
    let Envelope { tag, data, .. } = envelope;
    for handler in registry.handlers(&tag) {
        let response = handler(data.payload.clone());
        let tag = tag.clone();
        let correlation_id = data.correlation_id.clone();
        let reply = reply.clone();
        tokio::spawn(async move {
            let Some(payload) = response.await else {
                return;
            };
            match Envelope::response(tag.as_str(), correlation_id, payload).encode() {
                Ok(frame) => reply(frame),
                Err(e) => tracing::warn!(tag = %tag, error = %e, "failed to encode response"),
            }
        });
    }
}

fn settle_response(table: &PendingCallTable, key: &PendingKey, payload: Value) {
    if table.resolve(key, payload) == Settle::AlreadySettled {
        tracing::debug!(
            tag = %key.tag,
            correlation_id = %key.correlation_id,
            "dropping response with no waiting request"
        );
    }
}
