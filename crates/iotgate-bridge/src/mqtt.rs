//! MQTT subscription loop and message dispatch
//!
//! The bridge runs two halves connected by a bounded queue. The network half
//! polls the rumqttc event loop and does nothing but enqueue incoming
//! publishes, so a slow spool disk or events sink can never stall the MQTT
//! connection. The dispatch half drains the queue, spools every payload, and
//! forwards business events. When the queue is full the oldest-unprocessed
//! messages win: new publishes are dropped with a warning.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::forward::{classify, EventForwarder};
use crate::spool::Spool;
use rumqttc::{AsyncClient, Event, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the bounded dispatch queue
const QUEUE_CAPACITY: usize = 1024;

/// Initial backoff after an event loop error
const BACKOFF_INITIAL_MS: u64 = 500;

/// Maximum backoff between reconnect attempts
const BACKOFF_MAX_MS: u64 = 30_000;

/// One message taken off the wire, pending dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

/// The bridge process: one MQTT connection, one dispatch worker
pub struct Bridge {
    config: BridgeConfig,
    spool: Spool,
    forwarder: EventForwarder,
    shutdown: Arc<AtomicBool>,
}

impl Bridge {
    /// Create a bridge from its configuration
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let spool = Spool::new(&config.spool_dir);
        let forwarder = EventForwarder::new(&config.events_url)?;

        Ok(Self {
            config,
            spool,
            forwarder,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for signalling a graceful shutdown from another task
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run the bridge until shutdown is signalled.
    ///
    /// Subscriptions are (re)established on every ConnAck, so a broker
    /// reconnect transparently restores them. Event loop errors back off
    /// exponentially and never terminate the bridge.
    pub async fn run(&self) -> Result<()> {
        let options = self.config.mqtt_options()?;
        let (client, mut eventloop) = AsyncClient::new(options, QUEUE_CAPACITY);

        let (tx, rx) = mpsc::channel::<Delivery>(QUEUE_CAPACITY);
        let worker = tokio::spawn(dispatch_worker(
            rx,
            self.spool.clone(),
            self.forwarder.clone(),
        ));

        info!(
            broker = %self.config.broker_url,
            topics = ?self.config.topics,
            "Bridge starting"
        );

        let mut backoff_ms = BACKOFF_INITIAL_MS;

        // Every exit breaks out of this loop so the dispatch queue is always
        // drained before run() returns. A refused connection surfaces as a
        // poll error and goes through the backoff arm like any other failure.
        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Bridge shutting down");
                let _ = client.disconnect().await;
                break Ok(());
            }

            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff_ms = BACKOFF_INITIAL_MS;

                    info!(broker = %self.config.broker_url, "Connected to MQTT broker");
                    if let Err(e) = subscribe_all(&client, &self.config.topics).await {
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    backoff_ms = BACKOFF_INITIAL_MS;

                    let delivery = Delivery {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };

                    match tx.try_send(delivery) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(dropped)) => {
                            warn!(
                                topic = %dropped.topic,
                                bytes = dropped.payload.len(),
                                "Dispatch queue full, dropping message"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            break Err(BridgeError::Connection(
                                "Dispatch worker terminated unexpectedly".into(),
                            ));
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker disconnected, will reconnect");
                }
                Ok(event) => {
                    debug!(?event, "MQTT event");
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "MQTT error, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = next_backoff(backoff_ms);
                }
            }
        };

        // Dropping the sender lets the worker drain the queue and exit
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "Dispatch worker panicked");
        }

        result
    }
}

/// Subscribe to every configured topic at QoS 1
async fn subscribe_all(client: &AsyncClient, topics: &[String]) -> Result<()> {
    for topic in topics {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
        info!(topic = %topic, "Subscribed");
    }
    Ok(())
}

/// Double the backoff, capped at the maximum
fn next_backoff(current_ms: u64) -> u64 {
    (current_ms * 2).min(BACKOFF_MAX_MS)
}

/// Drain deliveries: spool every payload, forward business events.
///
/// A failure on one message is logged and never blocks the next; the spool
/// write happens before forwarding so the raw payload is durable even when
/// the sink is down.
pub async fn dispatch_worker(
    mut rx: mpsc::Receiver<Delivery>,
    spool: Spool,
    forwarder: EventForwarder,
) {
    while let Some(delivery) = rx.recv().await {
        if let Err(e) = spool.append(&delivery.topic, &delivery.payload).await {
            warn!(topic = %delivery.topic, error = %e, "Failed to spool payload");
        }

        if let Some(event_type) = classify(&delivery.topic) {
            if let Err(e) = forwarder
                .forward(event_type, &delivery.topic, &delivery.payload)
                .await
            {
                warn!(topic = %delivery.topic, error = %e, "Failed to forward event");
            }
        }
    }

    debug!("Dispatch worker drained");
}
