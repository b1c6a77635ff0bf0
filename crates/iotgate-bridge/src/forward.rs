//! CloudEvents forwarding
//!
//! Messages on topics whose leaf segment names a business event type are
//! forwarded to an HTTP events sink (typically a Knative broker ingress) as
//! CloudEvents v1.0 in binary content mode: the event attributes travel as
//! `Ce-*` headers and the JSON payload is the HTTP body.

use crate::error::{BridgeError, Result};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info};

/// Leaf topic segments that mark a message as a business event
pub const BUSINESS_EVENT_TYPES: [&str; 3] = ["shipment", "invoicing", "order"];

/// HTTP timeout for a single forward attempt
const FORWARD_TIMEOUT_SECS: u64 = 10;

/// Classify a topic by its leaf segment.
///
/// Returns the matching business event type, or `None` for plain telemetry
/// topics that are only spooled.
pub fn classify(topic: &str) -> Option<&'static str> {
    let leaf = topic.rsplit('/').next()?;
    BUSINESS_EVENT_TYPES.iter().find(|t| **t == leaf).copied()
}

/// Forwards business events to an HTTP CloudEvents sink
#[derive(Debug, Clone)]
pub struct EventForwarder {
    client: reqwest::Client,
    events_url: String,
}

impl EventForwarder {
    /// Create a forwarder posting to the given sink URL
    pub fn new(events_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FORWARD_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            events_url: events_url.into(),
        })
    }

    /// Sink URL events are posted to
    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    /// POST one event to the sink.
    ///
    /// The payload must be valid JSON; anything else is rejected before a
    /// request goes out. Each delivery gets a fresh UUID event id, so a
    /// duplicate MQTT delivery becomes a distinct CloudEvent, matching
    /// at-least-once semantics end to end. Non-2xx responses are errors.
    pub async fn forward(&self, event_type: &str, topic: &str, payload: &[u8]) -> Result<()> {
        let body: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
            BridgeError::InvalidPayload(format!("event payload is not JSON: {}", e))
        })?;

        let event_id = uuid::Uuid::new_v4().to_string();

        debug!(
            event_type = %event_type,
            topic = %topic,
            id = %event_id,
            "Forwarding business event"
        );

        let response = self
            .client
            .post(&self.events_url)
            .header("Ce-Specversion", "1.0")
            .header("Ce-Type", event_type)
            .header("Ce-Source", topic)
            .header("Ce-Id", &event_id)
            .header("Ce-Time", chrono::Utc::now().to_rfc3339())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::EventRejected {
                status: status.as_u16(),
            });
        }

        info!(event_type = %event_type, topic = %topic, id = %event_id, "Event forwarded");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_classify_business_topics() {
        assert_eq!(classify("devices/line1/shipment"), Some("shipment"));
        assert_eq!(classify("devices/line1/invoicing"), Some("invoicing"));
        assert_eq!(classify("devices/line1/order"), Some("order"));
    }

    #[test]
    fn test_classify_telemetry_topics() {
        assert_eq!(classify("devices/line1/env"), None);
        assert_eq!(classify("devices/line1/rfid"), None);
        assert_eq!(classify("devices/line1/led1"), None);
    }

    #[test]
    fn test_classify_only_matches_leaf() {
        // "order" appears mid-topic but the leaf is telemetry
        assert_eq!(classify("devices/order/env"), None);
        assert_eq!(classify("order"), Some("order"));
    }

    #[tokio::test]
    async fn test_forward_posts_cloudevent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Ce-Specversion", "1.0"))
            .and(header("Ce-Type", "shipment"))
            .and(header("Ce-Source", "devices/line1/shipment"))
            .and(header_exists("Ce-Id"))
            .and(header_exists("Ce-Time"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"box": 42})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder = EventForwarder::new(server.uri()).unwrap();
        forwarder
            .forward("shipment", "devices/line1/shipment", b"{\"box\": 42}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forward_unique_event_ids() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(2)
            .mount(&server)
            .await;

        let forwarder = EventForwarder::new(server.uri()).unwrap();
        forwarder
            .forward("order", "devices/line1/order", b"{\"n\": 1}")
            .await
            .unwrap();
        forwarder
            .forward("order", "devices/line1/order", b"{\"n\": 2}")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let id_a = requests[0].headers.get("Ce-Id").unwrap();
        let id_b = requests[1].headers.get("Ce-Id").unwrap();
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_forward_rejects_non_json_payload_without_posting() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let forwarder = EventForwarder::new(server.uri()).unwrap();
        let err = forwarder
            .forward("order", "devices/line1/order", b"RFID=12345")
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_forward_rejected_by_sink() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let forwarder = EventForwarder::new(server.uri()).unwrap();
        let err = forwarder
            .forward("invoicing", "devices/line1/invoicing", b"{}")
            .await
            .unwrap_err();

        match err {
            BridgeError::EventRejected { status } => assert_eq!(status, 503),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_unreachable_sink() {
        // Port 9 (discard) is almost certainly closed
        let forwarder = EventForwarder::new("http://127.0.0.1:9/events").unwrap();
        let result = forwarder
            .forward("order", "devices/line1/order", b"{}")
            .await;
        assert!(matches!(result, Err(BridgeError::Http(_))));
    }
}
