//! Realtime event delivery client for the restaurant dashboard.
//!
//! Keeps independent UI surfaces (kitchen board, waiter panel, notification
//! center, staff-call alerts) synchronized with server-side changes over an
//! unreliable, at-least-once transport.
//!
//! # Architecture
//!
//! - **Cursor store**: persists the last-seen position with its write time so
//!   a restarted client resumes instead of replaying history.
//! - **Deduplicator**: bounded cache suppressing re-handling of events already
//!   seen in this session.
//! - **Reconnect policy**: exponential backoff with a ceiling.
//! - **Transports**: Cursor-Poll (HTTP fetch keyed by an opaque cursor) and
//!   Push (server-sent events), selected by configuration.
//! - **Event bus**: per-channel fan-out with a wildcard `all` channel and
//!   per-listener failure isolation.
//! - **Realtime client**: the orchestrator; starts the transport with the
//!   first subscriber and stops it with the last.
//!
//! Delivery is best effort: deduplication reduces duplicate handling, not
//! duplicate transmission.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime::RealtimeClient;
//! use service::config::Config;
//!
//! let client = RealtimeClient::from_config(&Config::new())?;
//! let subscription = client.subscribe_to("orders.new", |event| {
//!     println!("new order: {:?}", event.payload);
//! });
//! // ...
//! subscription.unsubscribe();
//! ```

pub mod bus;
pub mod client;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod reconnect;
pub mod storage;
pub mod transport;

pub use client::{ConnectionState, RealtimeClient, Subscription};
pub use error::{Error, ErrorKind};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
