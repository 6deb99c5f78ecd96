//! Pending-call table: one-shot waiters for outstanding requests.
//!
//! Every outstanding request owns exactly one entry, keyed by
//! `(tag, correlation id, connection)`. Settlement removes the entry under
//! the table lock, so of the three completion paths (response, classified
//! error, timeout) only the first one to reach the table has any effect.
//! The deadline lives in the entry and is armed at registration, so it fires
//! whether or not anyone is polling the caller's future.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::connection::ConnectionId;
use crate::correlation::CorrelationId;
use crate::error::BusError;

type Outcome = Result<Value, BusError>;

/// Identity of one outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub tag: String,
    pub correlation_id: CorrelationId,
    /// Set for server-initiated calls: the connection that must answer.
    pub connection: Option<ConnectionId>,
}

impl PendingKey {
    pub fn new(
        tag: impl Into<String>,
        correlation_id: CorrelationId,
        connection: Option<ConnectionId>,
    ) -> Self {
        Self {
            tag: tag.into(),
            correlation_id,
            connection,
        }
    }
}

/// Result of an attempt to settle a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// This attempt settled the call.
    Settled,
    /// The call was already settled (or never existed); nothing happened.
    AlreadySettled,
}

struct Entry {
    tx: oneshot::Sender<Outcome>,
    deadline: Instant,
    timeout: Duration,
    timer: Option<AbortHandle>,
}

impl Entry {
    fn timed_out(&self) -> BusError {
        BusError::RequestTimeout {
            ms: self.timeout.as_millis() as u64,
        }
    }

    fn finish(self, outcome: Outcome) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The receiver may have been dropped; the call is settled either way.
        let _ = self.tx.send(outcome);
    }
}

/// Shared table of outstanding calls.
#[derive(Clone, Default)]
pub struct PendingCallTable {
    calls: Arc<Mutex<HashMap<PendingKey, Entry>>>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the future that settles it.
    ///
    /// The deadline is fixed now, not at first poll, and a timer task rejects
    /// the call with `RequestTimeout` when it passes. Must be called from
    /// within a Tokio runtime.
    pub fn register<T: DeserializeOwned>(
        &self,
        key: PendingKey,
        timeout: Duration,
    ) -> PendingResponse<T> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.calls.lock().insert(
            key.clone(),
            Entry {
                tx,
                deadline,
                timeout,
                timer: None,
            },
        );

        let table = self.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            table.expire(&timer_key);
        })
        .abort_handle();
        match self.calls.lock().get_mut(&key) {
            Some(entry) => entry.timer = Some(timer),
            // Settled before the timer was stored.
            None => timer.abort(),
        }

        PendingResponse {
            key,
            rx,
            timeout,
            table: self.clone(),
            finished: false,
            _payload: PhantomData,
        }
    }

    /// Settle a call with a successful payload.
    pub fn resolve(&self, key: &PendingKey, payload: Value) -> Settle {
        self.settle(key, Ok(payload))
    }

    /// Settle a call with an error.
    pub fn reject(&self, key: &PendingKey, error: BusError) -> Settle {
        self.settle(key, Err(error))
    }

    /// Reject every call waiting on `connection` with `ConnectionClosed`.
    pub fn reject_connection(&self, connection: ConnectionId) -> usize {
        self.reject_where(|key| key.connection == Some(connection))
    }

    /// Reject every outstanding call with `ConnectionClosed`.
    pub fn reject_all(&self) -> usize {
        self.reject_where(|_| true)
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        self.calls.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Any settlement at or past the deadline is a timeout, even if the
    /// timer task has not run yet.
    fn settle(&self, key: &PendingKey, outcome: Outcome) -> Settle {
        let entry = self.calls.lock().remove(key);
        match entry {
            Some(entry) => {
                let outcome = if Instant::now() >= entry.deadline {
                    tracing::debug!(tag = %key.tag, correlation_id = %key.correlation_id, "settled past deadline");
                    Err(entry.timed_out())
                } else {
                    outcome
                };
                entry.finish(outcome);
                Settle::Settled
            }
            None => Settle::AlreadySettled,
        }
    }

    fn expire(&self, key: &PendingKey) {
        let entry = self.calls.lock().remove(key);
        if let Some(mut entry) = entry {
            tracing::debug!(
                tag = %key.tag,
                correlation_id = %key.correlation_id,
                timeout_ms = entry.timeout.as_millis() as u64,
                "request timed out"
            );
            // Running inside the timer task; aborting it here is pointless.
            entry.timer = None;
            let error = entry.timed_out();
            entry.finish(Err(error));
        }
    }

    fn reject_where(&self, matches: impl Fn(&PendingKey) -> bool) -> usize {
        let removed: Vec<Entry> = {
            let mut calls = self.calls.lock();
            let keys: Vec<PendingKey> = calls.keys().filter(|k| matches(k)).cloned().collect();
            keys.iter().filter_map(|key| calls.remove(key)).collect()
        };
        let count = removed.len();
        for entry in removed {
            entry.finish(Err(BusError::ConnectionClosed));
        }
        count
    }

    fn take(&self, key: &PendingKey) {
        let entry = self.calls.lock().remove(key);
        if let Some(Entry {
            timer: Some(timer), ..
        }) = entry
        {
            timer.abort();
        }
    }
}

/// Future settling one outstanding request.
///
/// Resolves to the decoded response payload, or to `ConnectionClosed` /
/// `RequestTimeout`. Dropping it abandons the call and frees its entry; a
/// response arriving afterwards is ignored.
pub struct PendingResponse<T> {
    key: PendingKey,
    rx: oneshot::Receiver<Outcome>,
    timeout: Duration,
    table: PendingCallTable,
    finished: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> PendingResponse<T> {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.key.correlation_id
    }

    /// The connection this call was sent to (broadcast requests only).
    pub fn connection(&self) -> Option<ConnectionId> {
        self.key.connection
    }

    pub fn tag(&self) -> &str {
        &self.key.tag
    }
}

fn decode<T: DeserializeOwned>(outcome: Outcome) -> Result<T, BusError> {
    Ok(serde_json::from_value(outcome?)?)
}

impl<T: DeserializeOwned> Future for PendingResponse<T> {
    type Output = Result<T, BusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(received) => {
                this.finished = true;
                // A dropped sender means the table itself went away.
                let outcome = received.unwrap_or(Err(BusError::ConnectionClosed));
                Poll::Ready(decode(outcome))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.table.take(&self.key);
        }
    }
}

impl<T> std::fmt::Debug for PendingResponse<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .field("finished", &self.finished)
            .finish()
    }
}
