//! Iotgate Bridge
//!
//! MQTT bridge process for one gateway device: subscribes to the gateway's
//! resolved topics, spools every payload to disk, and forwards business
//! events as CloudEvents. Normally spawned by the iotgate operator with its
//! configuration injected through the environment.

mod config;
mod error;
mod forward;
mod mqtt;
mod sample;
mod spool;

use anyhow::{Context, Result};
use clap::Parser;
use config::BridgeConfig;
use std::sync::atomic::Ordering;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Iotgate Bridge
#[derive(Parser, Debug)]
#[command(name = "iotgate-bridge")]
#[command(about = "MQTT-to-CloudEvents bridge for one gateway device")]
#[command(version)]
struct Args {
    /// MQTT broker URL
    #[arg(long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Name of the gateway this bridge serves
    #[arg(long, env = "GATEWAY_NAME")]
    gateway_name: String,

    /// Comma-separated list of topics to subscribe to
    #[arg(long, env = "TOPICS")]
    topics: String,

    /// HTTP sink URL for forwarded CloudEvents
    #[arg(
        long,
        env = "EVENTS_URL",
        default_value = "http://broker-ingress.knative-eventing/ms-brkr/default"
    )]
    events_url: String,

    /// Directory raw payloads are spooled to
    #[arg(long, env = "SPOOL_DIR", default_value = "/data")]
    spool_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Publish one sample message to this topic and exit
    #[arg(long)]
    sample_topic: Option<String>,

    /// Sensor reference the sample payload is shaped after
    #[arg(long, default_value = "env", requires = "sample_topic")]
    sample_ref: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = BridgeConfig {
        broker_url: args.broker_url,
        gateway_name: args.gateway_name,
        topics: config::parse_topics(&args.topics),
        events_url: args.events_url,
        spool_dir: args.spool_dir,
    };

    // One-shot sample mode for smoke-testing a deployment
    if let Some(topic) = args.sample_topic {
        sample::publish_sample(&config, &topic, &args.sample_ref)
            .await
            .context("Failed to publish sample message")?;
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gateway = %config.gateway_name,
        broker = %config.broker_url,
        "Starting Iotgate Bridge"
    );

    let bridge = mqtt::Bridge::new(config).context("Invalid bridge configuration")?;

    // Flip the shutdown flag on Ctrl-C / SIGTERM; the run loop notices on
    // its next poll and drains the dispatch queue before exiting.
    let shutdown = bridge.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    bridge.run().await.context("Bridge failed")?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
