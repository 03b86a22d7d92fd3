//! Push strategy: a persistent server-sent events connection.
//!
//! Each inbound message is a JSON-encoded event delivered as a one-event
//! batch. The library's own reconnect loop is disabled; reconnects are paced
//! by the client's reconnect policy.

use super::{parse_events, Batch, Transport, TransportMode};
use crate::error::{transport_error, Error, TransportErrorKind};
use async_trait::async_trait;
use eventsource_client::{self as es, Client as _};
use events::Event;
use futures_util::stream::{BoxStream, StreamExt};
use log::*;
use serde_json::Value;

type SseStream = BoxStream<'static, Result<es::SSE, es::Error>>;

pub struct PushTransport {
    url: String,
    auth_token: Option<String>,
    stream: Option<SseStream>,
    // Event that arrived while the connection was being opened.
    pending: Option<Event>,
}

impl PushTransport {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
            stream: None,
            pending: None,
        }
    }

    fn connect(&self) -> Result<SseStream, Error> {
        let mut builder = es::ClientBuilder::for_url(&self.url)?
            .reconnect(es::ReconnectOptions::reconnect(false).build());

        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", &format!("Bearer {token}"))?;
        }

        Ok(builder.build().stream().boxed())
    }
}

/// Parses one SSE message body into an event.
///
/// Messages whose JSON carries no `type` take the SSE event name instead.
/// Returns `None` (after logging) for malformed messages.
fn parse_message(sse_event_type: &str, data: &str) -> Option<Event> {
    let mut value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed push message ({sse_event_type}): {e}");
            return None;
        }
    };

    if let Value::Object(fields) = &mut value {
        if !fields.contains_key("type") && !sse_event_type.is_empty() {
            fields.insert("type".to_string(), Value::from(sse_event_type));
        }
    }

    parse_events(vec![value]).pop()
}

#[async_trait]
impl Transport for PushTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }

    async fn open(&mut self) -> Result<(), Error> {
        self.close();
        let mut stream = self.connect()?;

        match stream.next().await {
            Some(Ok(es::SSE::Event(event))) => {
                self.pending = parse_message(&event.event_type, &event.data);
            }
            // Connection acknowledgements and keep-alive comments.
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(transport_error(
                    TransportErrorKind::Network,
                    "event stream closed before it opened",
                ))
            }
        }

        debug!("Push connection to {} opened", self.url);
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_batch(&mut self, _cursor: &str) -> Result<Batch, Error> {
        if let Some(event) = self.pending.take() {
            return Ok(Batch {
                events: vec![event],
                cursor: None,
            });
        }

        let stream = self.stream.as_mut().ok_or_else(|| {
            transport_error(TransportErrorKind::Network, "push connection is not open")
        })?;

        loop {
            match stream.next().await {
                Some(Ok(es::SSE::Event(event))) => {
                    if let Some(event) = parse_message(&event.event_type, &event.data) {
                        return Ok(Batch {
                            events: vec![event],
                            cursor: None,
                        });
                    }
                }
                Some(Ok(_)) => {
                    // Ignore comments (keep-alive)
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(transport_error(
                        TransportErrorKind::Network,
                        "event stream ended",
                    ))
                }
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Push connection to {} closed", self.url);
        }
        self.pending = None;
    }
}
