//! Topology Resolver
//!
//! Resolves the GatewayDevice → Device → Sensor/Actor hierarchy into the
//! concrete list of MQTT topic strings a bridge pod subscribes to. Resolution
//! is a pure read path: it never mutates cluster state and is safe to re-run
//! on every reconciliation.
//!
//! Failure policy:
//! - a missing Device is **fatal**: resolution aborts with
//!   [`OperatorError::DeviceUnresolvable`] and the controller reports it
//!   through the resource status instead of starting a bridge pod;
//! - a missing Sensor or Actor is **non-fatal**: the reference is skipped,
//!   recorded in [`ResolvedTopology::errors`], and resolution continues.
//!
//! Segment hygiene follows the same split: a `/` inside the device topic is
//! fatal (every topic of the gateway would gain an extra segment), a `/`
//! inside a leaf topic skips just that reference.

use crate::crd::{Actor, Device, GatewayDevice, Sensor};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use kube::api::Api;
use kube::{Client, ResourceExt};
use std::fmt;
use tracing::debug;

/// Kind of a reference that failed to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Device,
    Sensor,
    Actor,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Device => write!(f, "device"),
            RefKind::Sensor => write!(f, "sensor"),
            RefKind::Actor => write!(f, "actor"),
        }
    }
}

/// A single non-fatal resolution failure
#[derive(Debug, Clone)]
pub struct ResolutionError {
    /// Kind of the unresolvable reference
    pub kind: RefKind,
    /// Name the reference pointed at
    pub name: String,
    /// Why the lookup failed
    pub cause: String,
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.name, self.cause)
    }
}

/// The resolved topic set of one GatewayDevice.
///
/// Derived and ephemeral: recomputed on every reconciliation, never persisted.
/// Topics appear in declaration order (sensors first, then actors) and
/// duplicates are preserved, since a device may intentionally bind two references
/// to the same topic.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTopology {
    /// Broker URL taken from the gateway's MQTT settings
    pub broker_url: String,
    /// Fully-qualified `root/device/leaf` topic strings
    pub topics: Vec<String>,
    /// Non-fatal per-leaf resolution failures
    pub errors: Vec<ResolutionError>,
}

impl ResolvedTopology {
    /// Comma-joined topic list, the form handed to the bridge pod
    pub fn joined_topics(&self) -> String {
        self.topics.join(",")
    }
}

/// Read access to the cluster-scoped resource hierarchy.
///
/// The seam that keeps [`resolve`] testable without a live API server: the
/// controller uses [`ClusterLookup`], tests use an in-memory map.
#[async_trait]
pub trait ResourceLookup {
    async fn device(&self, name: &str) -> Result<Option<Device>>;
    async fn sensor(&self, name: &str) -> Result<Option<Sensor>>;
    async fn actor(&self, name: &str) -> Result<Option<Actor>>;
}

/// [`ResourceLookup`] backed by the Kubernetes API
pub struct ClusterLookup {
    client: Client,
}

impl ClusterLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceLookup for ClusterLookup {
    async fn device(&self, name: &str) -> Result<Option<Device>> {
        let api: Api<Device> = Api::all(self.client.clone());
        api.get_opt(name).await.map_err(OperatorError::from)
    }

    async fn sensor(&self, name: &str) -> Result<Option<Sensor>> {
        let api: Api<Sensor> = Api::all(self.client.clone());
        api.get_opt(name).await.map_err(OperatorError::from)
    }

    async fn actor(&self, name: &str) -> Result<Option<Actor>> {
        let api: Api<Actor> = Api::all(self.client.clone());
        api.get_opt(name).await.map_err(OperatorError::from)
    }
}

/// Join the three topic segments. A resolved topic is always exactly
/// `root/device/leaf`.
fn full_topic(root: &str, device: &str, leaf: &str) -> String {
    format!("{}/{}/{}", root, device, leaf)
}

/// Resolve the topic set for one GatewayDevice.
///
/// Transport-level lookup failures propagate as retryable errors; a Device
/// that genuinely does not exist is the fatal
/// [`OperatorError::DeviceUnresolvable`] outcome.
pub async fn resolve<L: ResourceLookup>(
    lookup: &L,
    gateway: &GatewayDevice,
) -> Result<ResolvedTopology> {
    let settings = &gateway.spec.mqtt_settings;
    let device_ref = gateway.spec.device_ref.as_str();

    let device = lookup
        .device(device_ref)
        .await?
        .ok_or_else(|| OperatorError::DeviceUnresolvable {
            name: device_ref.to_string(),
            cause: "not found".to_string(),
        })?;

    let device_topic = device
        .spec
        .topic
        .clone()
        .unwrap_or_else(|| device.name_any());

    // A resolved topic is always exactly three segments; a separator in the
    // device topic would corrupt every topic of this gateway, so it is as
    // fatal as a missing device.
    if device_topic.contains('/') {
        return Err(OperatorError::DeviceUnresolvable {
            name: device_ref.to_string(),
            cause: format!("device topic '{}' contains '/'", device_topic),
        });
    }

    let mut topology = ResolvedTopology {
        broker_url: settings.broker.clone(),
        topics: Vec::new(),
        errors: Vec::new(),
    };

    for binding in &device.spec.sensors {
        match lookup.sensor(&binding.sensor_ref).await {
            Ok(Some(sensor)) => {
                let leaf = sensor.spec.topic.clone().unwrap_or_else(|| sensor.name_any());
                if leaf.contains('/') {
                    topology.errors.push(ResolutionError {
                        kind: RefKind::Sensor,
                        name: binding.sensor_ref.clone(),
                        cause: format!("topic '{}' contains '/'", leaf),
                    });
                    continue;
                }
                let topic = full_topic(&settings.topic, &device_topic, &leaf);
                debug!(topic = %topic, sensor = %binding.sensor_ref, "Resolved sensor topic");
                topology.topics.push(topic);
            }
            Ok(None) => topology.errors.push(ResolutionError {
                kind: RefKind::Sensor,
                name: binding.sensor_ref.clone(),
                cause: "not found".to_string(),
            }),
            Err(e) => topology.errors.push(ResolutionError {
                kind: RefKind::Sensor,
                name: binding.sensor_ref.clone(),
                cause: e.to_string(),
            }),
        }
    }

    for binding in &device.spec.actors {
        match lookup.actor(&binding.actor_ref).await {
            Ok(Some(actor)) => {
                let leaf = actor.spec.topic.clone().unwrap_or_else(|| actor.name_any());
                if leaf.contains('/') {
                    topology.errors.push(ResolutionError {
                        kind: RefKind::Actor,
                        name: binding.actor_ref.clone(),
                        cause: format!("topic '{}' contains '/'", leaf),
                    });
                    continue;
                }
                let topic = full_topic(&settings.topic, &device_topic, &leaf);
                debug!(topic = %topic, actor = %binding.actor_ref, "Resolved actor topic");
                topology.topics.push(topic);
            }
            Ok(None) => topology.errors.push(ResolutionError {
                kind: RefKind::Actor,
                name: binding.actor_ref.clone(),
                cause: "not found".to_string(),
            }),
            Err(e) => topology.errors.push(ResolutionError {
                kind: RefKind::Actor,
                name: binding.actor_ref.clone(),
                cause: e.to_string(),
            }),
        }
    }

    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        ActorBinding, ActorSpec, DeviceSpec, GatewayDeviceSpec, MqttSettings, SensorBinding,
        SensorSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::HashMap;

    /// In-memory hierarchy for resolver tests
    #[derive(Default)]
    struct FakeLookup {
        devices: HashMap<String, Device>,
        sensors: HashMap<String, Sensor>,
        actors: HashMap<String, Actor>,
    }

    #[async_trait]
    impl ResourceLookup for FakeLookup {
        async fn device(&self, name: &str) -> Result<Option<Device>> {
            Ok(self.devices.get(name).cloned())
        }

        async fn sensor(&self, name: &str) -> Result<Option<Sensor>> {
            Ok(self.sensors.get(name).cloned())
        }

        async fn actor(&self, name: &str) -> Result<Option<Actor>> {
            Ok(self.actors.get(name).cloned())
        }
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn gateway(name: &str, root: &str, device_ref: &str) -> GatewayDevice {
        GatewayDevice {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: GatewayDeviceSpec {
                mqtt_settings: MqttSettings {
                    broker: "mqtt://cloud.tbz.ch:1883".to_string(),
                    topic: root.to_string(),
                },
                device_ref: device_ref.to_string(),
                image: None,
            },
            status: None,
        }
    }

    fn device(name: &str, topic: Option<&str>, sensors: &[&str], actors: &[&str]) -> Device {
        Device {
            metadata: meta(name),
            spec: DeviceSpec {
                topic: topic.map(str::to_string),
                sensors: sensors
                    .iter()
                    .map(|s| SensorBinding {
                        sensor_ref: s.to_string(),
                    })
                    .collect(),
                actors: actors
                    .iter()
                    .map(|a| ActorBinding {
                        actor_ref: a.to_string(),
                    })
                    .collect(),
            },
        }
    }

    fn sensor(name: &str, topic: Option<&str>) -> Sensor {
        Sensor {
            metadata: meta(name),
            spec: SensorSpec {
                topic: topic.map(str::to_string),
            },
        }
    }

    fn actor(name: &str, topic: Option<&str>) -> Actor {
        Actor {
            metadata: meta(name),
            spec: ActorSpec {
                topic: topic.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn test_resolves_all_sensors_and_actors() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1"), &["env1", "rfid1"], &["led1"]),
        );
        lookup.sensors.insert("env1".into(), sensor("env1", Some("env")));
        lookup
            .sensors
            .insert("rfid1".into(), sensor("rfid1", Some("rfid")));
        lookup.actors.insert("led1".into(), actor("led1", Some("led")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        assert_eq!(topology.broker_url, "mqtt://cloud.tbz.ch:1883");
        assert_eq!(
            topology.topics,
            vec!["devices/line1/env", "devices/line1/rfid", "devices/line1/led"]
        );
        assert!(topology.errors.is_empty());
        for topic in &topology.topics {
            assert_eq!(topic.split('/').count(), 3);
        }
    }

    #[tokio::test]
    async fn test_missing_device_is_fatal() {
        let lookup = FakeLookup::default();

        let err = resolve(&lookup, &gateway("m5stack", "devices", "ghost"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OperatorError::DeviceUnresolvable { ref name, .. } if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_missing_sensor_is_partial() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1"), &["env1", "ghost", "rfid1"], &[]),
        );
        lookup.sensors.insert("env1".into(), sensor("env1", Some("env")));
        lookup
            .sensors
            .insert("rfid1".into(), sensor("rfid1", Some("rfid")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        assert_eq!(
            topology.topics,
            vec!["devices/line1/env", "devices/line1/rfid"]
        );
        assert_eq!(topology.errors.len(), 1);
        assert_eq!(topology.errors[0].kind, RefKind::Sensor);
        assert_eq!(topology.errors[0].name, "ghost");
    }

    #[tokio::test]
    async fn test_multisegment_device_topic_is_fatal() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1/zone2"), &["env1"], &[]),
        );
        lookup.sensors.insert("env1".into(), sensor("env1", Some("env")));

        let err = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OperatorError::DeviceUnresolvable { ref cause, .. } if cause.contains("line1/zone2")
        ));
    }

    #[tokio::test]
    async fn test_multisegment_leaf_topic_is_skipped() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1"), &["env1", "bad1"], &[]),
        );
        lookup.sensors.insert("env1".into(), sensor("env1", Some("env")));
        lookup
            .sensors
            .insert("bad1".into(), sensor("bad1", Some("a/b")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        assert_eq!(topology.topics, vec!["devices/line1/env"]);
        assert_eq!(topology.errors.len(), 1);
        assert_eq!(topology.errors[0].name, "bad1");
        for topic in &topology.topics {
            assert_eq!(topic.split('/').count(), 3);
        }
    }

    #[tokio::test]
    async fn test_leaf_topic_defaults_to_resource_name() {
        let mut lookup = FakeLookup::default();
        lookup
            .devices
            .insert("dev1".into(), device("dev1", None, &["env1"], &[]));
        lookup.sensors.insert("env1".into(), sensor("env1", None));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        // Both the device and the sensor fall back to their own names.
        assert_eq!(topology.topics, vec!["devices/dev1/env1"]);
    }

    #[tokio::test]
    async fn test_duplicate_topics_are_preserved() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1"), &["env-a", "env-b"], &[]),
        );
        lookup
            .sensors
            .insert("env-a".into(), sensor("env-a", Some("env")));
        lookup
            .sensors
            .insert("env-b".into(), sensor("env-b", Some("env")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        assert_eq!(topology.topics, vec!["devices/line1/env", "devices/line1/env"]);
    }

    #[tokio::test]
    async fn test_sensors_come_before_actors() {
        let mut lookup = FakeLookup::default();
        lookup.devices.insert(
            "dev1".into(),
            device("dev1", Some("line1"), &["s1"], &["a1"]),
        );
        lookup.sensors.insert("s1".into(), sensor("s1", Some("zzz")));
        lookup.actors.insert("a1".into(), actor("a1", Some("aaa")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        // Declaration order, not lexical order.
        assert_eq!(topology.topics, vec!["devices/line1/zzz", "devices/line1/aaa"]);
    }

    #[tokio::test]
    async fn test_m5stack_scenario() {
        let mut lookup = FakeLookup::default();
        lookup
            .devices
            .insert("dev1".into(), device("dev1", Some("line1"), &["env1"], &[]));
        lookup.sensors.insert("env1".into(), sensor("env1", Some("env")));

        let topology = resolve(&lookup, &gateway("m5stack", "devices", "dev1"))
            .await
            .unwrap();

        assert_eq!(topology.topics, vec!["devices/line1/env"]);
        assert_eq!(topology.joined_topics(), "devices/line1/env");
    }

    #[test]
    fn test_resolution_error_display() {
        let err = ResolutionError {
            kind: RefKind::Sensor,
            name: "env1".to_string(),
            cause: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "sensor 'env1': not found");
    }
}
