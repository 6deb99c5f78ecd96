//! Channel registries: named-event hubs keyed by message tag.
//!
//! A bus owns four of them (client push, server push, client request, server
//! request). Each tag is linked at most once per registry; handlers are
//! attached to linked tags and dispatched from snapshots, so a handler may
//! unregister itself (or others) while a dispatch is in flight.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{BusError, ChannelKind};

/// Callback invoked with the raw payload of a push.
pub type PushHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback invoked with the raw payload of a request. Resolves to the raw
/// response payload, or `None` when the request could not be served (the
/// caller then times out).
pub type RequestHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HandlerId(u64);

/// One channel's tag table and handler lists.
pub struct ChannelRegistry<H> {
    channel: ChannelKind,
    linked: Mutex<HashSet<String>>,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, H)>>>,
    next_id: AtomicU64,
}

impl<H: Clone + Send + Sync + 'static> ChannelRegistry<H> {
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            linked: Mutex::new(HashSet::new()),
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Claim `tag` on this channel. Fails if it was already linked.
    pub fn link(&self, tag: &str) -> Result<(), BusError> {
        if !self.linked.lock().insert(tag.to_string()) {
            return Err(BusError::DuplicateTag {
                channel: self.channel,
                tag: tag.to_string(),
            });
        }
        tracing::trace!(channel = %self.channel, tag, "linked tag");
        Ok(())
    }

    pub fn is_linked(&self, tag: &str) -> bool {
        self.linked.lock().contains(tag)
    }

    /// Snapshot of the handlers attached to `tag`.
    pub fn handlers(&self, tag: &str) -> Vec<H> {
        self.handlers
            .read()
            .get(tag)
            .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, tag: &str) -> usize {
        self.handlers.read().get(tag).map_or(0, Vec::len)
    }

    /// Attach a handler; the returned [`Registration`] detaches it.
    pub fn add_handler(self: &Arc<Self>, tag: &str, handler: H) -> Registration {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(tag.to_string())
            .or_default()
            .push((id, handler));

        let registry = Arc::downgrade(self);
        let tag = tag.to_string();
        Registration {
            remove: Some(Box::new(move || {
                registry
                    .upgrade()
                    .map_or(false, |registry| registry.remove_handler(&tag, id))
            })),
        }
    }

    fn remove_handler(&self, tag: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(tag) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(tag);
        }
        removed
    }
}

/// Detaches a handler when [`unregister`](Registration::unregister) is
/// called. Dropping it leaves the handler attached.
pub struct Registration {
    remove: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl Registration {
    /// Detach the handler. Returns `false` if it was already gone.
    pub fn unregister(mut self) -> bool {
        self.remove.take().map_or(false, |remove| remove())
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
