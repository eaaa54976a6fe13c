//! Pool Claimer (§4.2): race-free selection and labeling of a warm VM.

use crate::context::OperatorContext;
use crate::error::Error;
use crate::labels::{
    INSTANCE_LABEL, POOL_IN_USE_LABEL, POOL_WARM_CLAIMED, POOL_WARM_LABEL, POOL_WARM_READY,
};
use kube::api::{ListParams, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const WHO_AM_I: &str = "cyberdesk-operator";

/// Attempts to claim one warm VM for `desktop`. Returns `Ok(Some(name))` on
/// success, `Ok(None)` if the pool is empty (fall through to cloning), or a
/// retryable [`Error`] if the list call itself failed or the claimed VM's
/// VMI was not ready.
pub async fn try_claim(ctx: &OperatorContext, desktop: &str) -> Result<Option<String>, Error> {
    let lp = ListParams::default().labels(&format!("{POOL_WARM_LABEL}={POOL_WARM_READY}"));
    let candidates = ctx.vms().list(&lp).await.map_err(|source| Error::PoolList { source })?;

    for vm in candidates.items {
        let name = vm.name_any();

        let in_use = vm
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(POOL_IN_USE_LABEL))
            .map(|v| v == "true")
            .unwrap_or(false);
        if in_use {
            continue;
        }

        let running = vm
            .status
            .as_ref()
            .and_then(|s| s.printable_status.as_deref())
            == Some("Running");
        if !running {
            continue;
        }

        match claim(ctx, &name).await {
            Ok(()) => {
                info!(vm = %name, desktop, "claimed warm pool VM");
            }
            Err(error) => {
                warn!(vm = %name, %error, "failed to claim candidate, trying next");
                continue;
            }
        }

        match readiness_gate(ctx, &name).await {
            Ok(()) => return Ok(Some(name)),
            Err(error) => {
                warn!(vm = %name, %error, "claimed VM failed readiness gate, releasing claim");
                release_claim(ctx, &name).await;
                return Err(Error::PoolVmNotReady { name });
            }
        }
    }

    Ok(None)
}

/// Merge patch that detaches `name` from the pool controller and marks it
/// claimed. Owner references are cleared entirely; all other labels are
/// preserved by virtue of being a merge (not replace) patch.
async fn claim(ctx: &OperatorContext, name: &str) -> Result<(), Error> {
    let patch = json!({
        "metadata": {
            "ownerReferences": serde_json::Value::Null,
            "labels": {
                POOL_IN_USE_LABEL: "true",
                POOL_WARM_LABEL: POOL_WARM_CLAIMED,
            }
        }
    });
    ctx.vms()
        .patch(name, &PatchParams::apply(WHO_AM_I), &Patch::Merge(&patch))
        .await
        .map_err(|source| Error::KubeDuring {
            action: format!("claiming pool VM '{name}'"),
            source,
        })?;
    Ok(())
}

/// Fetches the corresponding VMI and requires it to be `Running` with at
/// least one assigned IP address (§4.2 readiness gate).
async fn readiness_gate(ctx: &OperatorContext, name: &str) -> Result<(), Error> {
    let vmi = ctx
        .vmis()
        .get(name)
        .await
        .map_err(|source| Error::KubeDuring {
            action: format!("fetching VMI for claimed VM '{name}'"),
            source,
        })?;

    let ready = vmi.status.map(|s| s.is_running_with_ip()).unwrap_or(false);
    if ready {
        Ok(())
    } else {
        Err(Error::PoolVmNotReady { name: name.to_string() })
    }
}

/// Releases a claim made on `name` whose readiness gate failed, returning it
/// to the pool so the next reconcile claims a VM that is actually ready
/// instead of abandoning this one (§9 Open Question resolution, decision a).
async fn release_claim(ctx: &OperatorContext, name: &str) {
    let patch = json!({
        "metadata": {
            "labels": {
                POOL_IN_USE_LABEL: serde_json::Value::Null,
                POOL_WARM_LABEL: POOL_WARM_READY,
                INSTANCE_LABEL: serde_json::Value::Null,
            }
        }
    });
    if let Err(error) = ctx
        .vms()
        .patch(name, &PatchParams::apply(WHO_AM_I), &Patch::Merge(&patch))
        .await
    {
        warn!(vm = name, %error, "failed to release claim on unready pool VM, it will leak until manually reclaimed");
    } else {
        debug!(vm = name, "released claim, returned to pool");
    }
}

/// Notifies the gateway that a pool-claimed VM is ready, using the shorter
/// 5-second timeout called for by the second notification site (§4.5).
pub async fn notify_if_already_ready(ctx: &OperatorContext, desktop: &str, vm_name: &str) {
    match ctx.vmis().get(vm_name).await {
        Ok(vmi) => {
            let ready = vmi
                .status
                .as_ref()
                .and_then(|s| s.ready_condition())
                .unwrap_or(false);
            if ready {
                ctx.gateway.notify_ready(desktop, Duration::from_secs(5)).await;
            }
        }
        Err(error) => {
            warn!(vm = vm_name, %error, "failed to check readiness for post-claim notification");
        }
    }
}
