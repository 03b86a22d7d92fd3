//! Cursor-Poll strategy: `GET <endpoint>?after_id=<cursor>&limit=<n>`.

use super::{parse_events, Batch, Transport, TransportMode};
use crate::error::{transport_error, Error, TransportErrorKind};
use async_trait::async_trait;
use log::*;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub endpoint: String,
    pub batch_limit: u32,
    /// Idle delay between two successful polls.
    pub interval: Duration,
    pub auth_token: Option<String>,
}

impl PollOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            batch_limit: 50,
            interval: Duration::from_millis(1000),
            auth_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    last_id: Option<Value>,
}

pub struct PollTransport {
    client: Client,
    options: PollOptions,
}

impl PollTransport {
    pub fn new(options: PollOptions) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(format!("restaurant-realtime/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, options })
    }
}

/// Reads the opaque cursor token; servers send it as a string or a number.
fn cursor_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Poll
    }

    async fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn next_batch(&mut self, cursor: &str) -> Result<Batch, Error> {
        let limit = self.options.batch_limit.to_string();
        let mut request = self
            .client
            .get(&self.options.endpoint)
            .query(&[("after_id", cursor), ("limit", limit.as_str())]);

        if let Some(token) = &self.options.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(transport_error(
                TransportErrorKind::Unauthorized(status.as_u16()),
                "events endpoint rejected credentials",
            ));
        }

        if !status.is_success() {
            return Err(transport_error(
                TransportErrorKind::Network,
                &format!("unexpected status {status} from events endpoint"),
            ));
        }

        // Decode failures surface as InvalidResponse.
        let body: PollResponse = response.json().await?;

        let events = parse_events(body.events);

        let reported = body.last_id.as_ref().and_then(cursor_token);
        let cursor = reported.or_else(|| {
            let fallback = events
                .iter()
                .rev()
                .map(|event| event.server_id.clone())
                .find(|id| !id.is_empty());
            if let Some(id) = &fallback {
                debug!("Response carried no last_id, advancing to last event id {id}");
            }
            fallback
        });

        trace!("Poll returned {} event(s), cursor {cursor:?}", events.len());

        Ok(Batch { events, cursor })
    }

    fn interval(&self) -> Option<Duration> {
        Some(self.options.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    async fn setup_test_server() -> ServerGuard {
        Server::new_async().await
    }

    fn transport_for(server: &ServerGuard) -> PollTransport {
        PollTransport::new(PollOptions::new(format!("{}/realtime/events", server.url()))).unwrap()
    }

    fn query(after_id: &str, limit: &str) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("after_id".into(), after_id.into()),
            Matcher::UrlEncoded("limit".into(), limit.into()),
        ])
    }

    #[tokio::test]
    async fn test_parses_events_and_reported_cursor() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(query("0", "50"))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "events": [
                        { "type": "orders.new", "payload": { "order_id": 7 }, "timestamp": "100", "id": "4-0" },
                        { "type": "orders.status", "payload": { "status": "ready" }, "timestamp": "101", "id": "5-0" }
                    ],
                    "last_id": "5-0"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut transport = transport_for(&server);
        let batch = transport.next_batch("0").await.unwrap();

        assert_eq!(batch.cursor.as_deref(), Some("5-0"));
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].event_type, "orders.new");
        assert_eq!(batch.events[1].payload["status"], json!("ready"));
    }

    #[tokio::test]
    async fn test_empty_batch_still_reports_cursor() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(query("5-0", "50"))
            .with_status(200)
            .with_body(r#"{ "events": [], "last_id": "5-0" }"#)
            .create_async()
            .await;

        let batch = transport_for(&server).next_batch("5-0").await.unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.cursor.as_deref(), Some("5-0"));
    }

    #[tokio::test]
    async fn test_numeric_cursor_is_read_as_text() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "events": [], "last_id": 17 }"#)
            .create_async()
            .await;

        let batch = transport_for(&server).next_batch("16").await.unwrap();
        assert_eq!(batch.cursor.as_deref(), Some("17"));
    }

    #[tokio::test]
    async fn test_missing_cursor_falls_back_to_last_event_id() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "events": [
                        { "type": "staff.call", "timestamp": "200", "id": "8-0" },
                        { "type": "staff.call", "timestamp": "201" }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let batch = transport_for(&server).next_batch("7-0").await.unwrap();
        assert_eq!(batch.cursor.as_deref(), Some("8-0"));
    }

    #[tokio::test]
    async fn test_missing_cursor_without_ids_keeps_position() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{ "events": [] }"#)
            .create_async()
            .await;

        let batch = transport_for(&server).next_batch("7-0").await.unwrap();
        assert_eq!(batch.cursor, None);
    }

    #[tokio::test]
    async fn test_malformed_events_are_dropped() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "events": [
                        { "payload": { "missing": "type" } },
                        "not an object",
                        { "type": "orders.new", "timestamp": "300" }
                    ],
                    "last_id": "9-0"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let batch = transport_for(&server).next_batch("8-0").await.unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].event_type, "orders.new");
        assert_eq!(batch.cursor.as_deref(), Some("9-0"));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_unauthorized() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{ "events": [{ "type": "ignored" }] }"#)
            .create_async()
            .await;

        let err = transport_for(&server).next_batch("0").await.unwrap_err();
        assert_eq!(err.unauthorized_status(), Some(403));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_unauthorized() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = transport_for(&server).next_batch("0").await.unwrap_err();
        assert_eq!(err.unauthorized_status(), Some(401));
    }

    #[tokio::test]
    async fn test_server_error_is_network_failure() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let err = transport_for(&server).next_batch("0").await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::Network)
        );
    }

    #[tokio::test]
    async fn test_unparsable_body_is_invalid_response() {
        let mut server = setup_test_server().await;
        let _mock = server
            .mock("GET", "/realtime/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let err = transport_for(&server).next_batch("0").await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::InvalidResponse)
        );
    }

    #[tokio::test]
    async fn test_sends_bearer_token_and_batch_limit() {
        let mut server = setup_test_server().await;
        let mock = server
            .mock("GET", "/realtime/events")
            .match_query(query("0", "10"))
            .match_header("authorization", "Bearer kitchen-token")
            .with_status(200)
            .with_body(r#"{ "events": [], "last_id": "0" }"#)
            .create_async()
            .await;

        let mut options = PollOptions::new(format!("{}/realtime/events", server.url()));
        options.batch_limit = 10;
        options.auth_token = Some("kitchen-token".to_string());

        let mut transport = PollTransport::new(options).unwrap();
        transport.next_batch("0").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let server = setup_test_server().await;
        let url = format!("{}/realtime/events", server.url());
        drop(server);

        let mut transport = PollTransport::new(PollOptions::new(url)).unwrap();
        let err = transport.next_batch("0").await.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::Network)
        );
    }

    #[test]
    fn test_reports_poll_mode_and_interval() {
        let mut options = PollOptions::new("http://localhost/events");
        options.interval = Duration::from_millis(2500);
        let transport = PollTransport::new(options).unwrap();

        assert_eq!(transport.mode(), TransportMode::Poll);
        assert_eq!(transport.interval(), Some(Duration::from_millis(2500)));
    }
}
