//! GatewayDevice Controller
//!
//! Implements the reconciliation state machine that keeps exactly one bridge
//! pod alive per GatewayDevice. Each gateway is either Absent (no bridge pod)
//! or Active (one pod parameterized by a resolved topology); every transition
//! is safe to repeat because the pod name is a deterministic function of the
//! gateway name, deletes treat "not found" as success, and the cluster is the
//! only source of truth.

use crate::crd::{GatewayDevice, GatewayDeviceStatus, GatewayPhase};
use crate::error::{OperatorError, Result};
use crate::resources::{bridge_pod_name, needs_replace, BridgeBuilder, BridgeSettings};
use crate::topology::{self, ClusterLookup, ResolvedTopology};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Finalizer name for cleanup operations
pub const FINALIZER_NAME: &str = "iiot.iotgate.dev/gateway-finalizer";

/// Default requeue interval for successful reconciliations
const DEFAULT_REQUEUE_SECONDS: u64 = 300; // 5 minutes

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context passed to the controller
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,
    /// Settings applied to every bridge pod
    pub settings: BridgeSettings,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-gateway error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("iotgate_operator_reconciliations_total"),
            errors: metrics::counter!("iotgate_operator_reconciliation_errors_total"),
            duration: metrics::histogram!("iotgate_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the GatewayDevice controller
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    settings: BridgeSettings,
) -> Result<()> {
    let gateways: Api<GatewayDevice> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(ControllerContext {
        client: client.clone(),
        settings,
        metrics: Some(ControllerMetrics::new()),
        error_counts: dashmap::DashMap::new(),
    });

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting GatewayDevice controller"
    );

    // Watch bridge pods so a killed pod triggers reconciliation of its gateway
    let pods = match &namespace {
        Some(ns) => Api::<Pod>::namespaced(client.clone(), ns),
        None => Api::<Pod>::all(client.clone()),
    };

    Controller::new(gateways.clone(), Config::default())
        .owns(pods, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = %obj.name,
                        namespace = ?obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(gateway, ctx), fields(name = %gateway.name_any(), namespace = ?gateway.namespace()))]
async fn reconcile(gateway: Arc<GatewayDevice>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let namespace = gateway.namespace().unwrap_or_else(|| "default".to_string());
    let gateway_name = gateway.name_any();
    let gateways: Api<GatewayDevice> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&gateways, FINALIZER_NAME, gateway, |event| async {
        match event {
            FinalizerEvent::Apply(gateway) => apply_gateway(gateway, ctx.clone()).await,
            FinalizerEvent::Cleanup(gateway) => cleanup_gateway(gateway, ctx.clone()).await,
        }
    })
    .await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    if result.is_ok() {
        ctx.error_counts.remove(&gateway_name);
    }

    result.map_err(|e| {
        if let Some(ref metrics) = ctx.metrics {
            metrics.errors.increment(1);
        }
        OperatorError::ReconcileFailed(e.to_string())
    })
}

/// Apply (create/replace) the bridge pod for a gateway
#[instrument(skip(gateway, ctx))]
async fn apply_gateway(
    gateway: Arc<GatewayDevice>,
    ctx: Arc<ControllerContext>,
) -> Result<Action> {
    let name = gateway.name_any();
    let namespace = gateway.namespace().unwrap_or_else(|| "default".to_string());

    info!(name = %name, namespace = %namespace, "Reconciling GatewayDevice");

    // Validate the gateway spec before reconciliation
    if let Err(errors) = gateway.spec.validate() {
        let error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {:?}", field, e.message))
            })
            .collect();
        let error_msg = error_messages.join("; ");
        warn!(name = %name, errors = %error_msg, "Gateway spec validation failed");
        return Err(OperatorError::InvalidConfig(error_msg));
    }

    // Resolve the topic hierarchy. A missing Device is reported through the
    // status and leaves the gateway without a bridge pod; transport errors
    // propagate for retry.
    let lookup = ClusterLookup::new(ctx.client.clone());
    let topology = match topology::resolve(&lookup, &gateway).await {
        Ok(topology) => topology,
        Err(fatal @ OperatorError::DeviceUnresolvable { .. }) => {
            warn!(name = %name, error = %fatal, "Topology resolution failed, no bridge pod will run");
            delete_bridge_pod(&ctx.client, &namespace, &name).await?;
            let status = failed_status(&gateway, &fatal);
            update_status(&ctx.client, &namespace, &name, status).await?;
            return Ok(Action::requeue(Duration::from_secs(
                DEFAULT_REQUEUE_SECONDS,
            )));
        }
        Err(e) => return Err(e),
    };

    for err in &topology.errors {
        warn!(name = %name, reference = %err, "Skipping unresolvable leaf reference");
    }

    ensure_bridge_pod(&ctx, &namespace, &gateway, &topology).await?;

    let status = active_status(&gateway, &topology);
    update_status(&ctx.client, &namespace, &name, status).await?;

    info!(name = %name, topics = topology.topics.len(), "Reconciliation complete");

    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_REQUEUE_SECONDS,
    )))
}

/// Converge on exactly one bridge pod parameterized by the given topology.
///
/// A live pod whose broker/topic annotations already match is left alone, so
/// redelivered notifications are no-ops. Any mismatch triggers the full
/// replacement protocol: delete (not-found is success), then create. In-flight
/// state of the old bridge is lost and there is a short window with no active
/// subscriber; incremental subscription diffing is out of scope.
async fn ensure_bridge_pod(
    ctx: &ControllerContext,
    namespace: &str,
    gateway: &GatewayDevice,
    topology: &ResolvedTopology,
) -> Result<()> {
    let name = gateway.name_any();
    let pod_name = bridge_pod_name(&name);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);

    let builder = BridgeBuilder::new(gateway, &ctx.settings)?;

    if let Some(existing) = pods.get_opt(&pod_name).await? {
        if !needs_replace(&existing, topology, &builder.desired_image()) {
            debug!(pod = %pod_name, "Bridge pod is up to date");
            return Ok(());
        }
        info!(pod = %pod_name, "Desired parameterization changed, replacing bridge pod");
        delete_bridge_pod(&ctx.client, namespace, &name).await?;
    }

    let pod = builder.build_pod(topology);

    info!(pod = %pod_name, topics = ?topology.topics, "Creating bridge pod");

    // A 409 here means a previous delete has not finished terminating; the
    // conflict surfaces as a retryable error and the next attempt converges.
    pods.create(&PostParams::default(), &pod)
        .await
        .map_err(OperatorError::from)?;

    Ok(())
}

/// Delete the bridge pod of a gateway, treating "not found" as success
async fn delete_bridge_pod(client: &Client, namespace: &str, gateway_name: &str) -> Result<()> {
    let pod_name = bridge_pod_name(gateway_name);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);

    match pods.delete(&pod_name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(pod = %pod_name, "Deleted bridge pod");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(pod = %pod_name, "Bridge pod already absent");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Cleanup when a gateway is deleted
#[instrument(skip(gateway, ctx))]
async fn cleanup_gateway(
    gateway: Arc<GatewayDevice>,
    ctx: Arc<ControllerContext>,
) -> Result<Action> {
    let name = gateway.name_any();
    let namespace = gateway.namespace().unwrap_or_else(|| "default".to_string());

    info!(name = %name, namespace = %namespace, "Cleaning up GatewayDevice");

    delete_bridge_pod(&ctx.client, &namespace, &name).await?;

    info!(name = %name, "Cleanup complete");

    Ok(Action::await_change())
}

/// Build the Active status for a successfully resolved gateway
fn active_status(gateway: &GatewayDevice, topology: &ResolvedTopology) -> GatewayDeviceStatus {
    let message = if topology.errors.is_empty() {
        format!("bridge subscribed to {} topic(s)", topology.topics.len())
    } else {
        format!(
            "bridge subscribed to {} topic(s), {} reference(s) skipped",
            topology.topics.len(),
            topology.errors.len()
        )
    };

    GatewayDeviceStatus {
        phase: GatewayPhase::Active,
        topics: topology.topics.clone(),
        resolution_errors: topology.errors.iter().map(|e| e.to_string()).collect(),
        observed_generation: gateway.metadata.generation.unwrap_or(0),
        message: Some(message),
        last_updated: Some(Utc::now().to_rfc3339()),
    }
}

/// Build the Failed status for a fatally unresolvable gateway
fn failed_status(gateway: &GatewayDevice, error: &OperatorError) -> GatewayDeviceStatus {
    GatewayDeviceStatus {
        phase: GatewayPhase::Failed,
        topics: vec![],
        resolution_errors: vec![],
        observed_generation: gateway.metadata.generation.unwrap_or(0),
        message: Some(error.to_string()),
        last_updated: Some(Utc::now().to_rfc3339()),
    }
}

/// Update the gateway status subresource
async fn update_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: GatewayDeviceStatus,
) -> Result<()> {
    let api: Api<GatewayDevice> = Api::namespaced(client.clone(), namespace);

    debug!(name = %name, phase = ?status.phase, "Updating gateway status");

    let patch = serde_json::json!({
        "status": status
    });

    let patch_params = PatchParams::default();
    api.patch_status(name, &patch_params, &Patch::Merge(&patch))
        .await
        .map_err(OperatorError::from)?;

    Ok(())
}

/// Error policy for the controller: exponential backoff per resource name.
fn error_policy(
    gateway: Arc<GatewayDevice>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = gateway.name_any();
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    // Use the error's suggested delay OR exponential backoff:
    // 30s → 60s → 120s → 240s → 480s → 600s (capped)
    let delay = error.requeue_delay().unwrap_or_else(|| {
        let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
        let backoff = base * 2u32.saturating_pow((retries - 1).min(5));
        backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
    });

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}
