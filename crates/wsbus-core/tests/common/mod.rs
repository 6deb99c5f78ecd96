//! In-memory loopback connections for driving two buses without sockets.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use wsbus_core::{Connection, ConnectionId, Envelope, ReadyState, WsBus};

/// A connection that records every frame it sends and hands it to `deliver`.
pub struct MemoryConnection {
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    deliver: Box<dyn Fn(String) + Send + Sync>,
}

impl MemoryConnection {
    pub fn new(deliver: impl Fn(String) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReadyState::Open),
            sent: Mutex::new(Vec::new()),
            deliver: Box::new(deliver),
        })
    }

    /// Open, but nothing on the other side ever answers.
    pub fn sink() -> Arc<Self> {
        Self::new(|_| {})
    }

    pub fn closed() -> Arc<Self> {
        let conn = Self::sink();
        conn.close();
        conn
    }

    pub fn close(&self) {
        *self.state.lock() = ReadyState::Closed;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent()
            .iter()
            .map(|frame| Envelope::decode(frame).expect("well-formed frame"))
            .collect()
    }
}

impl Connection for MemoryConnection {
    fn send(&self, frame: String) {
        if *self.state.lock() != ReadyState::Open {
            return;
        }
        self.sent.lock().push(frame.clone());
        (self.deliver)(frame);
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }
}

/// A client bus wired to a server bus through a pair of memory connections.
pub struct Pair {
    /// The client's connection (client → server).
    pub client_end: Arc<MemoryConnection>,
    /// The server's connection for this client (server → client).
    pub server_end: Arc<MemoryConnection>,
    pub id: ConnectionId,
}

impl Pair {
    /// Close both ends and notify both buses.
    pub fn disconnect(&self, client: &WsBus, server: &WsBus) {
        self.client_end.close();
        self.server_end.close();
        client.client().on_close();
        server.server().remove(self.id);
    }
}

pub fn connect(client: &WsBus, server: &WsBus) -> Pair {
    let slot: Arc<OnceLock<ConnectionId>> = Arc::default();

    let server_side = server.server();
    let inbound_id = Arc::clone(&slot);
    let client_end = MemoryConnection::new(move |frame| {
        if let Some(id) = inbound_id.get() {
            server_side.on_frame(&frame, *id);
        }
    });

    let client_side = client.client();
    let server_end = MemoryConnection::new(move |frame| client_side.on_frame(&frame));

    let id = server.server().add(server_end.clone());
    slot.set(id).expect("id set once");
    client.client().bind(client_end.clone());

    Pair {
        client_end,
        server_end,
        id,
    }
}
