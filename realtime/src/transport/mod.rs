//! Interchangeable strategies that obtain new events from the server.
//!
//! A transport performs exactly one unit of work per call: one HTTP request
//! (Cursor-Poll) or one inbound message (Push). Scheduling between calls,
//! backoff and cursor bookkeeping belong to [`crate::client::RealtimeClient`],
//! whose single driver task is the only caller, so requests never overlap.

mod poll;
mod push;

pub use poll::{PollOptions, PollTransport};
pub use push::PushTransport;

use crate::error::Error;
use async_trait::async_trait;
use events::Event;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Cursor-keyed fetches; enables the cursor store.
    Poll,
    /// Persistent connection; no cursor semantics.
    Push,
}

/// Events received in one unit of work, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub events: Vec<Event>,
    /// New resume position reported by the server, if any.
    pub cursor: Option<String>,
}

#[async_trait]
pub trait Transport: Send {
    fn mode(&self) -> TransportMode;

    /// Establishes the underlying connection. Success means the transport is ready.
    async fn open(&mut self) -> Result<(), Error>;

    /// Waits for the next batch of events after `cursor`.
    async fn next_batch(&mut self, cursor: &str) -> Result<Batch, Error>;

    /// Delay to wait after a successful batch before asking for the next one.
    fn interval(&self) -> Option<Duration> {
        None
    }

    /// Drops the underlying connection, if any.
    fn close(&mut self) {}
}

/// Parses a list of raw JSON events, dropping (and logging) malformed entries.
pub(crate) fn parse_events(raw: Vec<serde_json::Value>) -> Vec<Event> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Event>(value) {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("Dropping malformed event: {e}");
                None
            }
        })
        .collect()
}
