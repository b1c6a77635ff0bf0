//! One-shot sample publisher for smoke-testing a deployment
//!
//! Publishes a single representative payload to a topic and exits, standing
//! in for real device firmware during development. The payload format mimics
//! common sensor output based on the sensor reference name.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use rumqttc::{AsyncClient, Event, Packet, QoS};
use std::time::Duration;
use tracing::info;

/// Timeout for the publish round trip
const PUBLISH_TIMEOUT_SECS: u64 = 10;

/// Build a representative payload for a sensor reference.
///
/// References containing "env" get an environment sensor reading (sensor id,
/// temperature, humidity, pressure); references containing "rfid" get a tag
/// read; everything else gets a generic test message.
pub fn sample_payload(sensor_ref: &str) -> String {
    if sensor_ref.contains("env") {
        "0xBC;25.0,50.0,900".to_string()
    } else if sensor_ref.contains("rfid") {
        "RFID=12345".to_string()
    } else {
        format!("TestMsg for {}", sensor_ref)
    }
}

/// Publish one sample payload and wait for the broker's acknowledgement
pub async fn publish_sample(config: &BridgeConfig, topic: &str, sensor_ref: &str) -> Result<()> {
    let payload = sample_payload(sensor_ref);

    let options = config.mqtt_options()?;
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    client
        .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
        .await?;

    // Poll until the broker acknowledges the publish
    tokio::time::timeout(Duration::from_secs(PUBLISH_TIMEOUT_SECS), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(BridgeError::Connection(e.to_string())),
            }
        }
    })
    .await
    .map_err(|_| BridgeError::Connection("Timed out waiting for publish ack".into()))??;

    let _ = client.disconnect().await;

    info!(topic = %topic, payload = %payload, "Published sample message");

    Ok(())
}
