//! # Iotgate Kubernetes Operator
//!
//! Kubernetes operator that connects declaratively modeled IoT device
//! hierarchies to an MQTT broker. Each `GatewayDevice` resource references a
//! cluster-scoped `Device`, which binds `Sensor` and `Actor` resources; the
//! operator resolves that hierarchy into concrete MQTT topic strings and runs
//! exactly one `iotgate-bridge` pod per gateway, subscribed to those topics.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use iotgate_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_controller(client, None, BridgeSettings::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch**: Monitor GatewayDevice resources (and the bridge pods they
//!    own) for changes
//! 2. **Resolve**: Walk the referenced Device/Sensor/Actor hierarchy into a
//!    list of `root/device/leaf` topic strings
//! 3. **Act**: Create, replace, or delete the gateway's bridge pod so it
//!    matches the resolved topology
//! 4. **Status**: Record the phase, resolved topics, and any skipped
//!    references on the GatewayDevice status
//!
//! A missing `Device` is fatal for its gateway (phase `Failed`, no bridge
//! pod); a missing `Sensor` or `Actor` merely drops that one topic and is
//! reported in `status.resolutionErrors`.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`topology`] - Hierarchy resolution into MQTT topic strings
//! - [`controller`] - GatewayDevice reconciliation logic and controller setup
//! - [`resources`] - Bridge pod builder and replace detection
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource Definitions
//!
//! ```yaml
//! apiVersion: iiot.iotgate.dev/v1alpha1
//! kind: GatewayDevice
//! metadata:
//!   name: m5stack
//!   namespace: default
//! spec:
//!   mqttSettings:
//!     broker: mqtt://cloud.example.com:1883
//!     topic: devices
//!   deviceRef: line1
//! ---
//! apiVersion: iiot.iotgate.dev/v1alpha1
//! kind: Device
//! metadata:
//!   name: line1
//! spec:
//!   sensors:
//!     - sensorRef: env1
//!   actors:
//!     - actorRef: led1
//! ```
//!
//! ## Metrics
//!
//! The operator exposes Prometheus metrics:
//!
//! - `iotgate_operator_reconciliations_total` - Total reconciliation attempts
//! - `iotgate_operator_reconciliation_errors_total` - Reconciliation errors
//! - `iotgate_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;
pub mod topology;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::controller::{run_controller, ControllerContext, ControllerMetrics};
    pub use crate::crd::{
        Actor, ActorBinding, ActorSpec, Device, DeviceSpec, GatewayDevice, GatewayDeviceSpec,
        GatewayDeviceStatus, GatewayPhase, MqttSettings, Sensor, SensorBinding, SensorSpec,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::resources::{bridge_pod_name, BridgeBuilder, BridgeSettings};
    pub use crate::topology::{resolve, ClusterLookup, ResolutionError, ResolvedTopology};
}
