//! Demo message catalog shared by `wsbus serve` and `wsbus connect`.
//!
//! Both ends link the same tags; each then uses the emitting or handling half
//! of every link as appropriate.

use serde::{Deserialize, Serialize};
use wsbus_core::{BroadcastLink, BusError, PushLink, RequestLink, WsBus};

pub const PING: &str = "ping";
pub const STATUS: &str = "status";
pub const CONFIG: &str = "config";
pub const USER_AGENT: &str = "user_agent";

/// Client → server heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub message: String,
    pub sent_at_ms: u64,
}

/// Server → client status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub connections: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub key: String,
    pub value: Option<String>,
}

/// Each client's answer to the `user_agent` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub name: String,
    pub version: String,
    pub platform: String,
}

impl UserAgent {
    pub fn current() -> Self {
        Self {
            name: "wsbus".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: std::env::consts::OS.into(),
        }
    }
}

#[derive(Clone)]
pub struct Catalog {
    pub ping: PushLink<Ping>,
    pub status: PushLink<Status>,
    pub config: RequestLink<ConfigRequest, ConfigResponse>,
    pub user_agent: BroadcastLink<(), UserAgent>,
}

impl Catalog {
    /// Link every demo tag on `bus`. Fails if any tag is already linked.
    pub fn link(bus: &WsBus) -> Result<Self, BusError> {
        Ok(Self {
            ping: bus.client().link_push(PING)?,
            status: bus.server().link_push(STATUS)?,
            config: bus.client().link_request(CONFIG)?,
            user_agent: bus.server().link_request(USER_AGENT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsbus_core::ChannelKind;

    #[test]
    fn linking_twice_fails() {
        let bus = WsBus::default();
        Catalog::link(&bus).unwrap();
        let err = Catalog::link(&bus).err().expect("duplicate tags");
        assert!(matches!(
            err,
            BusError::DuplicateTag { channel: ChannelKind::ClientPush, .. }
        ));
    }

    #[test]
    fn separate_buses_link_independently() {
        let (a, b) = (WsBus::default(), WsBus::default());
        let catalog = Catalog::link(&a).unwrap();
        Catalog::link(&b).unwrap();
        assert_eq!(catalog.ping.tag(), PING);
        assert_eq!(catalog.user_agent.tag(), USER_AGENT);
    }
}
