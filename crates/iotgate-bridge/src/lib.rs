//! # Iotgate Bridge
//!
//! The per-gateway MQTT bridge process spawned by the iotgate operator.
//!
//! A bridge subscribes to the topics resolved for one `GatewayDevice`,
//! appends every raw payload to a per-topic spool file, and forwards
//! messages on business-event topics (`shipment`, `invoicing`, `order`)
//! to an HTTP sink as CloudEvents v1.0.
//!
//! ## Architecture
//!
//! ```text
//!   MQTT broker ──poll──▶ event loop ──try_send──▶ bounded queue
//!                                                      │
//!                                                   dispatch
//!                                                   ├── spool file append
//!                                                   └── CloudEvents POST
//! ```
//!
//! The event loop never does I/O beyond the broker connection; slow disks or
//! a down events sink cause queued messages to be dropped, not a stalled
//! MQTT session.
//!
//! ## Modules
//!
//! - [`config`] - Runtime configuration and broker URL parsing
//! - [`mqtt`] - Subscription loop and dispatch worker
//! - [`spool`] - Per-topic payload persistence
//! - [`forward`] - Business event classification and CloudEvents forwarding
//! - [`sample`] - One-shot sample publisher for smoke tests
//! - [`error`] - Error types for bridge operations

pub mod config;
pub mod error;
pub mod forward;
pub mod mqtt;
pub mod sample;
pub mod spool;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::{parse_broker_url, parse_topics, BridgeConfig};
    pub use crate::error::{BridgeError, Result};
    pub use crate::forward::{classify, EventForwarder, BUSINESS_EVENT_TYPES};
    pub use crate::mqtt::{Bridge, Delivery};
    pub use crate::spool::Spool;
}
