//! Custom Resource Definitions for the iotgate operator
//!
//! This module defines the resource hierarchy describing how MQTT topics are
//! assembled: a namespaced `GatewayDevice` references a cluster-scoped
//! `Device`, which in turn references cluster-scoped `Sensor` and `Actor`
//! resources. The operator resolves that hierarchy into concrete topic
//! strings and keeps one bridge pod alive per `GatewayDevice`.

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// API group shared by the whole resource hierarchy
pub const API_GROUP: &str = "iiot.iotgate.dev";

/// API version of the hierarchy
pub const API_VERSION: &str = "v1alpha1";

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a reference to another resource by name (RFC 1123 subdomain)
fn validate_ref_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("empty_ref")
            .with_message("reference name must not be empty".into()));
    }
    if value.len() > 253 {
        return Err(ValidationError::new("ref_too_long")
            .with_message("reference name exceeds 253 characters".into()));
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_ref").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate a topic segment: non-empty and free of path separators, so the
/// resolved topic is always exactly three `/`-joined segments.
fn validate_topic_segment(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("empty_topic")
            .with_message("topic segment must not be empty".into()));
    }
    if value.contains('/') {
        return Err(ValidationError::new("topic_separator")
            .with_message(format!("topic segment '{}' must not contain '/'", value).into()));
    }
    Ok(())
}

/// GatewayDevice custom resource definition
///
/// Represents one logical IoT gateway. The operator resolves the referenced
/// `Device` hierarchy into a topic list and runs exactly one bridge pod
/// subscribed to those topics.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "iiot.iotgate.dev",
    version = "v1alpha1",
    kind = "GatewayDevice",
    plural = "gatewaydevices",
    shortname = "gwd",
    namespaced,
    status = "GatewayDeviceStatus",
    printcolumn = r#"{"name":"Device", "type":"string", "jsonPath":".spec.deviceRef"}"#,
    printcolumn = r#"{"name":"Broker", "type":"string", "jsonPath":".spec.mqttSettings.broker"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDeviceSpec {
    /// MQTT broker connection settings and root topic
    #[serde(default)]
    #[validate(nested)]
    pub mqtt_settings: MqttSettings,

    /// Name of the cluster-scoped Device resource this gateway exposes
    #[validate(custom(function = validate_ref_name))]
    pub device_ref: String,

    /// Bridge container image (overrides the operator default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// MQTT settings of a gateway device
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MqttSettings {
    /// Broker URL, e.g. `mqtt://cloud.example.com:1883`
    #[serde(default = "default_broker")]
    #[validate(length(min = 1, max = 253, message = "broker URL must be 1-253 characters"))]
    pub broker: String,

    /// Root topic segment all resolved topics are prefixed with
    #[serde(default = "default_root_topic")]
    #[validate(custom(function = validate_topic_segment))]
    pub topic: String,
}

fn default_broker() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_root_topic() -> String {
    "devices".to_string()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            topic: default_root_topic(),
        }
    }
}

/// Device custom resource definition (cluster-scoped)
///
/// Describes one physical device and the sensors/actors attached to it.
/// Referenced by name from `GatewayDevice.spec.deviceRef`.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "iiot.iotgate.dev",
    version = "v1alpha1",
    kind = "Device",
    plural = "devices",
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".spec.topic"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Device topic segment (defaults to the resource's own name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Sensors attached to this device, in declaration order
    #[serde(default)]
    #[validate(nested)]
    pub sensors: Vec<SensorBinding>,

    /// Actors attached to this device, in declaration order
    #[serde(default)]
    #[validate(nested)]
    pub actors: Vec<ActorBinding>,
}

/// Reference to a cluster-scoped Sensor resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SensorBinding {
    /// Name of the Sensor resource
    #[validate(custom(function = validate_ref_name))]
    pub sensor_ref: String,
}

/// Reference to a cluster-scoped Actor resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ActorBinding {
    /// Name of the Actor resource
    #[validate(custom(function = validate_ref_name))]
    pub actor_ref: String,
}

/// Sensor custom resource definition (cluster-scoped)
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "iiot.iotgate.dev",
    version = "v1alpha1",
    kind = "Sensor",
    plural = "sensors",
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".spec.topic"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    /// Leaf topic segment (defaults to the resource's own name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Actor custom resource definition (cluster-scoped)
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "iiot.iotgate.dev",
    version = "v1alpha1",
    kind = "Actor",
    plural = "actors",
    printcolumn = r#"{"name":"Topic", "type":"string", "jsonPath":".spec.topic"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ActorSpec {
    /// Leaf topic segment (defaults to the resource's own name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Lifecycle phase of a GatewayDevice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum GatewayPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// A bridge pod exists for the resolved topology
    Active,
    /// The device reference could not be resolved; no bridge pod runs
    Failed,
}

/// Status subresource of a GatewayDevice
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDeviceStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: GatewayPhase,

    /// Fully-qualified topics the bridge pod is subscribed to
    #[serde(default)]
    pub topics: Vec<String>,

    /// Sensor/actor references that could not be resolved (non-fatal)
    #[serde(default)]
    pub resolution_errors: Vec<String>,

    /// Generation last observed by the controller
    #[serde(default)]
    pub observed_generation: i64,

    /// Human-readable summary of the last reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 timestamp of the last status update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_spec_defaults() {
        let spec: GatewayDeviceSpec = serde_json::from_str(r#"{"deviceRef": "dev1"}"#).unwrap();
        assert_eq!(spec.device_ref, "dev1");
        assert_eq!(spec.mqtt_settings.broker, "mqtt://localhost:1883");
        assert_eq!(spec.mqtt_settings.topic, "devices");
        assert!(spec.image.is_none());
    }

    #[test]
    fn test_gateway_spec_full() {
        let spec: GatewayDeviceSpec = serde_json::from_str(
            r#"{
            "mqttSettings": {"broker": "mqtt://cloud.tbz.ch:1883", "topic": "plant"},
            "deviceRef": "m5stack-core",
            "image": "registry.example.com/iotgate-bridge:1.2.3"
        }"#,
        )
        .unwrap();
        assert_eq!(spec.mqtt_settings.broker, "mqtt://cloud.tbz.ch:1883");
        assert_eq!(spec.mqtt_settings.topic, "plant");
        assert_eq!(spec.device_ref, "m5stack-core");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_device_spec_bindings_keep_order() {
        let spec: DeviceSpec = serde_json::from_str(
            r#"{
            "topic": "line1",
            "sensors": [{"sensorRef": "env1"}, {"sensorRef": "rfid1"}],
            "actors": [{"actorRef": "led1"}]
        }"#,
        )
        .unwrap();
        let sensor_refs: Vec<_> = spec.sensors.iter().map(|s| s.sensor_ref.as_str()).collect();
        assert_eq!(sensor_refs, vec!["env1", "rfid1"]);
        assert_eq!(spec.actors[0].actor_ref, "led1");
    }

    #[test]
    fn test_invalid_device_ref_rejected() {
        let spec: GatewayDeviceSpec =
            serde_json::from_str(r#"{"deviceRef": "Not_Valid!"}"#).unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_device_ref_rejected() {
        let spec: GatewayDeviceSpec = serde_json::from_str(r#"{"deviceRef": ""}"#).unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_root_topic_with_separator_rejected() {
        let spec: GatewayDeviceSpec =
            serde_json::from_str(r#"{"mqttSettings": {"topic": "a/b"}, "deviceRef": "dev1"}"#)
                .unwrap();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_sensor_topic_optional() {
        let spec: SensorSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.topic.is_none());

        let spec: SensorSpec = serde_json::from_str(r#"{"topic": "env"}"#).unwrap();
        assert_eq!(spec.topic.as_deref(), Some("env"));
    }

    #[test]
    fn test_phase_default_is_pending() {
        assert_eq!(GatewayPhase::default(), GatewayPhase::Pending);
    }
}
