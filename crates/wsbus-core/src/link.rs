//! Typed links: the per-tag handles returned by `link_push` / `link_request`.
//!
//! | link              | emitting half                      | handling half          |
//! |-------------------|------------------------------------|------------------------|
//! | [`PushLink`]      | local handlers + peer(s)           | inbound pushes         |
//! | [`RequestLink`]   | client → server, one response      | server answers         |
//! | [`BroadcastLink`] | server → every client, one per conn| client answers         |

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bus::{BusInner, Side};
use crate::correlation::CorrelationId;
use crate::envelope::Envelope;
use crate::error::BusError;
use crate::pending::{PendingKey, PendingResponse};
use crate::registry::{PushHandler, Registration, RequestHandler};

/// Per-call overrides for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Overrides [`BusConfig::request_timeout_ms`](crate::BusConfig).
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

fn encode_request<Req: Serialize>(
    tag: &str,
    correlation_id: CorrelationId,
    payload: &Req,
) -> Result<String, BusError> {
    Envelope::request(tag, correlation_id, serde_json::to_value(payload)?).encode()
}

/// Wrap a typed request handler as a raw one. Requests whose payload does not
/// decode as `Req` are dropped without a response.
fn erase_request_handler<Req, Res, F, Fut>(tag: Arc<str>, handler: F) -> RequestHandler
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Res> + Send + 'static,
{
    Arc::new(move |value: Value| -> BoxFuture<'static, Option<Value>> {
        let request = match serde_json::from_value::<Req>(value) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(tag = %tag, error = %e, "dropping request with unexpected payload");
                return Box::pin(async { None });
            }
        };
        let response = handler(request);
        let tag = Arc::clone(&tag);
        Box::pin(async move {
            match serde_json::to_value(response.await) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "failed to serialize response");
                    None
                }
            }
        })
    })
}

// ─── PushLink ────────────────────────────────────────────────────────────────

/// Fire-and-forget messages on one tag.
///
/// `push` runs local handlers for the tag first, then forwards the envelope to
/// the peer (client end) or to every open connection (server end).
pub struct PushLink<T> {
    inner: Arc<BusInner>,
    side: Side,
    tag: Arc<str>,
    _payload: PhantomData<fn(T) -> T>,
}

impl<T> Clone for PushLink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            side: self.side,
            tag: Arc::clone(&self.tag),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for PushLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushLink")
            .field("tag", &self.tag)
            .field("side", &self.side)
            .finish()
    }
}

impl<T> PushLink<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(inner: Arc<BusInner>, side: Side, tag: String) -> Self {
        Self {
            inner,
            side,
            tag: Arc::from(tag),
            _payload: PhantomData,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Emit a push. Never fails: with no open peer the frame is simply not
    /// sent. Returns the correlation id stamped on the envelope.
    pub fn push(&self, payload: T) -> CorrelationId {
        let correlation_id = CorrelationId::mint();
        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tag = %self.tag, error = %e, "failed to serialize push");
                return correlation_id;
            }
        };

        for handler in self.inner.push_registry(self.side).handlers(&self.tag) {
            handler(value.clone());
        }

        match Envelope::push(&*self.tag, correlation_id.clone(), value).encode() {
            Ok(frame) => {
                tracing::trace!(tag = %self.tag, correlation_id = %correlation_id, "push");
                self.inner.forward(self.side, frame);
            }
            Err(e) => tracing::warn!(tag = %self.tag, error = %e, "failed to encode push"),
        }
        correlation_id
    }

    /// Run `handler` for every push on this tag, local or inbound.
    pub fn handle<F>(&self, handler: F) -> Registration
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let tag = Arc::clone(&self.tag);
        let erased: PushHandler = Arc::new(move |value: Value| match serde_json::from_value::<T>(value) {
            Ok(payload) => handler(payload),
            Err(e) => tracing::debug!(tag = %tag, error = %e, "dropping push with unexpected payload"),
        });
        self.inner
            .push_registry(self.side)
            .add_handler(&self.tag, erased)
    }
}

// ─── RequestLink ─────────────────────────────────────────────────────────────

/// Client-initiated request/response on one tag.
pub struct RequestLink<Req, Res> {
    inner: Arc<BusInner>,
    tag: Arc<str>,
    _types: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> Clone for RequestLink<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            tag: Arc::clone(&self.tag),
            _types: PhantomData,
        }
    }
}

impl<Req, Res> std::fmt::Debug for RequestLink<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLink")
            .field("tag", &self.tag)
            .finish()
    }
}

impl<Req, Res> RequestLink<Req, Res>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Res: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(inner: Arc<BusInner>, tag: String) -> Self {
        Self {
            inner,
            tag: Arc::from(tag),
            _types: PhantomData,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Send a request with the bus default timeout.
    pub fn request(&self, payload: Req) -> PendingResponse<Res> {
        self.request_with(payload, RequestOptions::default())
    }

    /// Send a request. If the connection is not open the returned future
    /// fails with `ConnectionClosed` on first poll, without waiting.
    pub fn request_with(&self, payload: Req, options: RequestOptions) -> PendingResponse<Res> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.request_timeout());
        let correlation_id = CorrelationId::mint();
        let key = PendingKey::new(&*self.tag, correlation_id.clone(), None);
        let calls = &self.inner.client_calls;
        let pending = calls.register(key.clone(), timeout);

        let frame = match encode_request(&self.tag, correlation_id, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                calls.reject(&key, e);
                return pending;
            }
        };

        match self.inner.client_connection() {
            Some(conn) if conn.is_open() => {
                tracing::trace!(tag = %self.tag, correlation_id = %key.correlation_id, "request");
                conn.send(frame);
            }
            _ => {
                tracing::debug!(tag = %self.tag, "connection not open, rejecting request");
                calls.reject(&key, BusError::ConnectionClosed);
            }
        }
        pending
    }

    /// Answer requests on this tag (server end). Each request runs on its
    /// own task; the response goes back to the connection that asked.
    pub fn handle<F, Fut>(&self, handler: F) -> Registration
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Res> + Send + 'static,
    {
        let erased = erase_request_handler(Arc::clone(&self.tag), handler);
        self.inner.client_request.add_handler(&self.tag, erased)
    }
}

// ─── BroadcastLink ───────────────────────────────────────────────────────────

/// Server-initiated request fanned out to every live connection.
pub struct BroadcastLink<Req, Res> {
    inner: Arc<BusInner>,
    tag: Arc<str>,
    _types: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> Clone for BroadcastLink<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            tag: Arc::clone(&self.tag),
            _types: PhantomData,
        }
    }
}

impl<Req, Res> std::fmt::Debug for BroadcastLink<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastLink")
            .field("tag", &self.tag)
            .finish()
    }
}

impl<Req, Res> BroadcastLink<Req, Res>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Res: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(inner: Arc<BusInner>, tag: String) -> Self {
        Self {
            inner,
            tag: Arc::from(tag),
            _types: PhantomData,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Broadcast with the bus default timeout.
    pub fn request(&self, payload: Req) -> Vec<PendingResponse<Res>> {
        self.request_with(payload, RequestOptions::default())
    }

    /// Send the request to every connection live right now, each with a
    /// fresh correlation id. One future per connection, in arrival order; each
    /// settles independently. An empty set yields an empty vec.
    pub fn request_with(&self, payload: Req, options: RequestOptions) -> Vec<PendingResponse<Res>> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.request_timeout());
        let calls = &self.inner.server_calls;
        let snapshot = self.inner.server_conns.snapshot();
        tracing::trace!(tag = %self.tag, connections = snapshot.len(), "broadcast request");

        snapshot
            .into_iter()
            .map(|(conn_id, conn)| {
                let correlation_id = CorrelationId::mint();
                let key = PendingKey::new(&*self.tag, correlation_id.clone(), Some(conn_id));
                let pending = calls.register(key.clone(), timeout);
                match encode_request(&self.tag, correlation_id, &payload) {
                    Ok(frame) if conn.is_open() => conn.send(frame),
                    Ok(_) => {
                        tracing::debug!(tag = %self.tag, conn_id = %conn_id, "connection not open, rejecting request");
                        calls.reject(&key, BusError::ConnectionClosed);
                    }
                    Err(e) => {
                        calls.reject(&key, e);
                    }
                }
                pending
            })
            .collect()
    }

    /// Answer broadcasts on this tag (client end).
    pub fn handle<F, Fut>(&self, handler: F) -> Registration
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Res> + Send + 'static,
    {
        let erased = erase_request_handler(Arc::clone(&self.tag), handler);
        self.inner.server_request.add_handler(&self.tag, erased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_options_default_has_no_override() {
        assert_eq!(RequestOptions::default().timeout, None);
        assert_eq!(
            RequestOptions::timeout(Duration::from_millis(50)).timeout,
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn links_debug_shows_tag() {
        let bus = crate::WsBus::default();
        let ping = bus.client().link_push::<()>("ping").unwrap();
        let config = bus.client().link_request::<(), String>("config").unwrap();
        let agent = bus.server().link_request::<(), String>("user_agent").unwrap();
        assert!(format!("{ping:?}").contains("\"ping\""));
        assert!(format!("{config:?}").starts_with("RequestLink"));
        assert!(format!("{agent:?}").contains("\"user_agent\""));
    }
}
