//! Bridge configuration and MQTT connection setup

use crate::error::{BridgeError, Result};
use rumqttc::MqttOptions;
use std::time::Duration;

/// Default keep-alive interval for the MQTT connection
const KEEP_ALIVE_SECS: u64 = 60;

/// Maximum MQTT packet size (256 KiB)
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Runtime configuration of a bridge process.
///
/// The operator injects these values through the environment of the bridge
/// pod; a standalone run can supply them on the command line instead.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// MQTT broker URL (e.g. `mqtt://localhost:1883` or `mqtts://broker:8883`)
    pub broker_url: String,

    /// Name of the gateway this bridge serves, used in the client id and as
    /// the CloudEvents source
    pub gateway_name: String,

    /// Fully-qualified topics to subscribe to
    pub topics: Vec<String>,

    /// HTTP sink URL for forwarded CloudEvents
    pub events_url: String,

    /// Directory raw payloads are spooled to
    pub spool_dir: String,
}

impl BridgeConfig {
    /// Validate the configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if self.broker_url.is_empty() {
            return Err(BridgeError::Config("broker URL must not be empty".into()));
        }
        if self.gateway_name.is_empty() {
            return Err(BridgeError::Config("gateway name must not be empty".into()));
        }
        if self.topics.is_empty() {
            return Err(BridgeError::Config(
                "at least one topic is required".into(),
            ));
        }
        parse_broker_url(&self.broker_url)?;
        Ok(())
    }

    /// Build rumqttc options for this configuration
    pub fn mqtt_options(&self) -> Result<MqttOptions> {
        let (host, port, use_tls) = parse_broker_url(&self.broker_url)?;

        let mut options = MqttOptions::new(generate_client_id(&self.gateway_name), host, port);
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        if use_tls {
            // rustls with system root certificates
            options.set_transport(rumqttc::Transport::Tls(Default::default()));
        }

        Ok(options)
    }
}

/// Generate a per-process MQTT client id.
///
/// The random suffix keeps a replaced bridge pod from colliding with its
/// not-yet-disconnected predecessor on the broker.
pub fn generate_client_id(gateway_name: &str) -> String {
    format!("{}-{}", gateway_name, uuid::Uuid::new_v4())
}

/// Parse an MQTT URL into host, port, and TLS flag
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool)> {
    // Handle mqtt://, mqtts://, tcp://, ssl:// schemes
    let (scheme, rest) = if let Some(pos) = url.find("://") {
        (&url[..pos], &url[pos + 3..])
    } else {
        ("mqtt", url)
    };

    let use_tls = matches!(scheme.to_lowercase().as_str(), "mqtts" | "ssl" | "tls");

    if rest.is_empty() {
        return Err(BridgeError::Config(format!(
            "Broker URL has no host: {}",
            url
        )));
    }

    // Parse host:port
    let (host, port) = if let Some(colon_pos) = rest.rfind(':') {
        let host = &rest[..colon_pos];
        let port_str = &rest[colon_pos + 1..];
        let port: u16 = port_str.parse().map_err(|_| {
            BridgeError::Config(format!("Invalid port in broker URL: {}", port_str))
        })?;
        (host.to_string(), port)
    } else {
        // Default ports
        let default_port = if use_tls { 8883 } else { 1883 };
        (rest.to_string(), default_port)
    };

    Ok((host, port, use_tls))
}

/// Split a comma-separated topic list into individual topics.
///
/// Whitespace around entries is trimmed and empty entries are dropped, so a
/// trailing comma in the injected environment value is harmless.
pub fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
