//! Cyberdesk operator entry point: bootstraps the Kubernetes client and
//! external collaborators, verifies startup preconditions, then runs the
//! reconciler alongside the two independent watchers until shutdown.
//!
//! CRD registration, environment loading beyond this process' own flags, and
//! the gateway/status-store wire formats themselves are out of scope (§1) —
//! this module only wires the pieces together.

mod clone_orchestrator;
mod config;
mod context;
mod crd;
mod deleter;
mod error;
mod expiry;
mod gateway;
mod kubevirt;
mod labels;
mod phase_sync;
mod pool;
mod readiness;
mod reconcile;
mod store;

use clap::Parser;
use config::Opts;
use context::OperatorContext;
use crd::Cyberdesk;
use error::Error;
use futures::StreamExt;
use gateway::GatewayClient;
use kube::api::Api;
use kube::runtime::{watcher, Controller};
use kube::Client;
use kubevirt::{KubevirtResources, VirtualMachineSnapshot};
use shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use store::StatusStoreClient;
use tracing::{error, info, warn};

const WATCH_TIMEOUT: Duration = Duration::from_secs(210);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let tags = utils::tracing_telemetry::default_tracing_tags(utils::raw_version_str(), env!("CARGO_PKG_VERSION"));
    utils::tracing_telemetry::init_tracing("cyberdesk-operator", tags, opts.jaeger.clone());
    utils::print_package_info!();

    if let Err(error) = run(opts).await {
        error!(%error, "operator exited with a fatal error");
        utils::tracing_telemetry::flush_traces();
        return Err(error);
    }

    utils::tracing_telemetry::flush_traces();
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let in_cluster = config::running_in_cluster();
    let k8s = Client::try_default().await?;

    let kubevirt = KubevirtResources::discover(&k8s).await?;
    ensure_golden_snapshot(&k8s, &kubevirt, &opts).await?;

    let status_store_url = opts.status_store_url.clone().ok_or(Error::MissingConfig {
        key: "STATUS_STORE_URL".to_string(),
    })?;
    let status_store_key = opts.status_store_key.clone().ok_or(Error::MissingConfig {
        key: "STATUS_STORE_KEY".to_string(),
    })?;
    let store = StatusStoreClient::new(status_store_url, status_store_key, opts.request_timeout());

    let gateway_base_url = opts.gateway_base_url(in_cluster);
    let gateway = GatewayClient::new(gateway_base_url);

    let ctx = Arc::new(OperatorContext::new(k8s.clone(), kubevirt, store, gateway, opts));

    let shutdown = Shutdown::default();

    let phase_sync_task = tokio::spawn(phase_sync::run(ctx.clone(), shutdown.clone()));
    let readiness_task = tokio::spawn(readiness::run(ctx.clone(), shutdown.clone()));
    let expiry_task = tokio::spawn(expiry::run(ctx.clone(), shutdown.clone()));
    let signal_task = tokio::spawn(shutdown::wait_for_signal());

    info!(namespace = %ctx.config.namespace, "starting Cyberdesk operator");

    let cyberdesks: Api<Cyberdesk> = ctx.cyberdesks();
    let watch_config = watcher::Config::default().timeout(WATCH_TIMEOUT.as_secs() as u32);
    let controller_shutdown = shutdown.clone();

    Controller::new(cyberdesks, watch_config)
        .run(reconcile::reconcile, reconcile::error_policy, ctx.clone())
        .take_until(controller_shutdown.wait())
        .for_each(|result| async move {
            match result {
                Ok(reconciled) => info!(?reconciled, "reconciled"),
                Err(error) => warn!(%error, "reconcile error"),
            }
        })
        .await;

    shutdown.shutdown();
    let _ = tokio::join!(phase_sync_task, readiness_task, expiry_task, signal_task);

    Ok(())
}

/// Startup precondition (§6): the golden snapshot must exist in the target
/// namespace. Missing is a permanent startup failure; a transient lookup
/// error is retried a few times before giving up, since the API server may
/// not be reachable yet immediately after the container starts.
async fn ensure_golden_snapshot(k8s: &Client, kubevirt: &KubevirtResources, opts: &Opts) -> Result<(), Error> {
    let snapshots: Api<VirtualMachineSnapshot> =
        Api::namespaced_with(k8s.clone(), &opts.namespace, &kubevirt.snapshot);

    const MAX_ATTEMPTS: u32 = 5;
    for attempt in 1..=MAX_ATTEMPTS {
        match snapshots.get(&opts.golden_snapshot_name).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                return Err(Error::MissingGoldenSnapshot {
                    name: opts.golden_snapshot_name.clone(),
                    namespace: opts.namespace.clone(),
                });
            }
            Err(source) if attempt < MAX_ATTEMPTS => {
                warn!(%source, attempt, "transient error looking up golden snapshot, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(source) => {
                return Err(Error::GoldenSnapshotLookup {
                    name: opts.golden_snapshot_name.clone(),
                    source,
                })
            }
        }
    }
    Ok(())
}
