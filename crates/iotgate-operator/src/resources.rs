//! Bridge Pod Builder
//!
//! Generates the Kubernetes Pod manifest for a bridge process from a
//! GatewayDevice and its resolved topology. One pod per gateway, named
//! deterministically, so lookups and deletes are idempotent no matter which
//! reconciliation performs them.

use crate::crd::{GatewayDevice, API_GROUP, API_VERSION};
use crate::error::{OperatorError, Result};
use crate::topology::ResolvedTopology;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// Annotation carrying the broker URL a bridge pod was launched with
pub const BROKER_ANNOTATION: &str = "iotgate.dev/broker";

/// Annotation carrying the comma-joined topic list a bridge pod was launched with
pub const TOPICS_ANNOTATION: &str = "iotgate.dev/topics";

/// Annotation carrying the container image a bridge pod was launched with
pub const IMAGE_ANNOTATION: &str = "iotgate.dev/image";

/// Default bridge container image
pub const DEFAULT_BRIDGE_IMAGE: &str = "ghcr.io/iotgate/iotgate-bridge:0.1.0";

/// Default event-broker endpoint forwarded business events are posted to
pub const DEFAULT_EVENTS_URL: &str = "http://broker-ingress.knative-eventing/ms-brkr/default";

/// Deterministic bridge pod name for a gateway. The fixed mapping is what
/// makes repeated create/delete operations idempotent across reconciliations.
pub fn bridge_pod_name(gateway_name: &str) -> String {
    format!("bridge-{}", gateway_name)
}

/// Operator-level settings applied to every bridge pod
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Bridge container image (overridable per gateway via `spec.image`)
    pub image: String,
    /// Event-broker URL business events are forwarded to
    pub events_url: String,
    /// Directory inside the pod where raw payloads are spooled
    pub spool_dir: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_BRIDGE_IMAGE.to_string(),
            events_url: DEFAULT_EVENTS_URL.to_string(),
            spool_dir: "/data".to_string(),
        }
    }
}

/// Builder for the bridge pod of one GatewayDevice
pub struct BridgeBuilder<'a> {
    gateway: &'a GatewayDevice,
    settings: &'a BridgeSettings,
    name: String,
    namespace: String,
}

impl<'a> BridgeBuilder<'a> {
    /// Create a new builder
    pub fn new(gateway: &'a GatewayDevice, settings: &'a BridgeSettings) -> Result<Self> {
        let name =
            gateway.metadata.name.clone().ok_or_else(|| {
                OperatorError::InvalidConfig("gateway name is required".to_string())
            })?;

        let namespace = gateway
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            gateway,
            settings,
            name,
            namespace,
        })
    }

    /// Get owner reference for the bridge pod, so the pod is garbage-collected
    /// with its GatewayDevice.
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{}/{}", API_GROUP, API_VERSION),
            kind: "GatewayDevice".to_string(),
            name: self.name.clone(),
            uid: self.gateway.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/name".to_string(),
            "iotgate-bridge".to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "iotgate-operator".to_string(),
        );
        labels.insert("iotgate.dev/gateway".to_string(), self.name.clone());
        labels
    }

    /// Container image the gateway's bridge pod should run, honoring the
    /// per-gateway override.
    pub fn desired_image(&self) -> String {
        self.gateway
            .spec
            .image
            .clone()
            .unwrap_or_else(|| self.settings.image.clone())
    }

    /// Build the bridge pod for a resolved topology.
    ///
    /// The broker URL, topic list, and image are stamped as annotations; the
    /// controller compares them against a live pod to decide whether a full
    /// replacement is due. The topic set is fixed for the pod's lifetime.
    pub fn build_pod(&self, topology: &ResolvedTopology) -> Pod {
        let mut annotations = BTreeMap::new();
        annotations.insert(BROKER_ANNOTATION.to_string(), topology.broker_url.clone());
        annotations.insert(TOPICS_ANNOTATION.to_string(), topology.joined_topics());
        annotations.insert(IMAGE_ANNOTATION.to_string(), self.desired_image());

        let env = vec![
            EnvVar {
                name: "MQTT_BROKER_URL".to_string(),
                value: Some(topology.broker_url.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "GATEWAY_NAME".to_string(),
                value: Some(self.name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "TOPICS".to_string(),
                value: Some(topology.joined_topics()),
                ..Default::default()
            },
            EnvVar {
                name: "EVENTS_URL".to_string(),
                value: Some(self.settings.events_url.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "SPOOL_DIR".to_string(),
                value: Some(self.settings.spool_dir.clone()),
                ..Default::default()
            },
        ];

        let container = Container {
            name: "bridge".to_string(),
            image: Some(self.desired_image()),
            image_pull_policy: Some("Always".to_string()),
            env: Some(env),
            volume_mounts: Some(vec![VolumeMount {
                name: "spool".to_string(),
                mount_path: self.settings.spool_dir.clone(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(bridge_pod_name(&self.name)),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                annotations: Some(annotations),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Always".to_string()),
                automount_service_account_token: Some(false),
                volumes: Some(vec![Volume {
                    name: "spool".to_string(),
                    empty_dir: Some(Default::default()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// Decide whether a live bridge pod must be torn down and recreated for the
/// given topology and image. Any change requires full replacement; nothing
/// about a running bridge is ever updated in place.
pub fn needs_replace(existing: &Pod, topology: &ResolvedTopology, desired_image: &str) -> bool {
    let annotations = existing.metadata.annotations.as_ref();
    let broker = annotations.and_then(|a| a.get(BROKER_ANNOTATION));
    let topics = annotations.and_then(|a| a.get(TOPICS_ANNOTATION));
    let image = annotations.and_then(|a| a.get(IMAGE_ANNOTATION));

    broker.map(String::as_str) != Some(topology.broker_url.as_str())
        || topics.map(String::as_str) != Some(topology.joined_topics().as_str())
        || image.map(String::as_str) != Some(desired_image)
}
