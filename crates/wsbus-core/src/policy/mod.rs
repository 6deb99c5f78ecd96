//! Reliability policies applied by transports.
//!
//! Only reconnect backoff lives here; request timeouts are enforced by the
//! correlation layer ([`crate::pending`]).

pub mod backoff;

pub use backoff::{Backoff, BackoffConfig};
