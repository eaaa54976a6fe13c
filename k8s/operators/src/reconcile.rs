//! Reconciler (§4.1): drives a `Cyberdesk` through the state machine derived
//! from its own status. Wired as a `kube::runtime::controller::Controller`
//! whose effects are gated by a finalizer, generalized from a flat enum of
//! CR states to a status-derived dispatch.

use crate::clone_orchestrator;
use crate::context::OperatorContext;
use crate::crd::{Cyberdesk, CyberdeskPhase, CyberdeskState};
use crate::error::Error;
use crate::labels::{self, identity_labels, KUBEVIRT_DOMAIN_LABEL};
use crate::pool;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{self, finalizer, Event as FinalizerEvent};
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const FINALIZER_NAME: &str = "cyberdesk.io/desktop-protection";
const WHO_AM_I: &str = "cyberdesk-operator";

/// Entry point wired to `Controller::run`. Every externally-visible effect
/// below is preceded by a status transition recording the intent (§4.1
/// contract), so any crash mid-step is safe to resume from the top.
pub async fn reconcile(desktop: Arc<Cyberdesk>, ctx: Arc<OperatorContext>) -> Result<Action, Error> {
    let api = ctx.cyberdesks();
    finalizer(&api, FINALIZER_NAME, desktop, |event| async {
        match event {
            FinalizerEvent::Apply(desktop) => reconcile_apply(&desktop, &ctx).await,
            FinalizerEvent::Cleanup(desktop) => crate::deleter::delete(&ctx, &desktop).await,
        }
    })
    .await
    .map_err(|error| match error {
        finalizer::Error::ApplyFailed(error) | finalizer::Error::CleanupFailed(error) => error,
        finalizer::Error::AddFinalizer(source) | finalizer::Error::RemoveFinalizer(source) => {
            Error::FinalizerKube { source }
        }
        _ => Error::UnnamedObject,
    })
}

/// Interprets a handler's outcome for the controller's `error_policy`: a
/// permanent error halts reconciliation until the resource next changes
/// externally, a retryable one re-enqueues after its classified delay.
pub fn error_policy(_desktop: Arc<Cyberdesk>, error: &Error, _ctx: Arc<OperatorContext>) -> Action {
    if error.is_permanent() {
        warn!(%error, "permanent error, halting reconciliation for this resource");
        Action::await_change()
    } else {
        let delay = error.retry_delay();
        warn!(%error, delay = ?delay, "retryable error, scheduling retry");
        Action::requeue(delay)
    }
}

async fn reconcile_apply(desktop: &Cyberdesk, ctx: &OperatorContext) -> Result<Action, Error> {
    let name = desktop.name_any();
    let status = desktop.status.clone().unwrap_or_default();
    let state = status.resolved();

    if state.is_bound() {
        reconcile_bound(ctx, &name, state, status.needs_migration()).await
    } else if state.is_cloning() {
        let resource_version = desktop.resource_version().unwrap_or_default();
        reconcile_cloning(ctx, &name, &resource_version, desktop.spec.timeout_ms).await
    } else {
        reconcile_fresh(ctx, &name, desktop.spec.timeout_ms).await
    }
}

/// Bound steady state (§4.1 step 1): re-apply the VM finalization patch
/// (idempotent) and ensure the migrated nested status shape is written.
async fn reconcile_bound(
    ctx: &OperatorContext,
    name: &str,
    state: CyberdeskState,
    needs_migration: bool,
) -> Result<Action, Error> {
    let vm_ref = state.vm_ref.clone().expect("is_bound() implies vm_ref is set");

    match ctx.vms().get(&vm_ref).await {
        Ok(_) => {
            finalize_binding(ctx, &vm_ref, name).await?;
            if needs_migration {
                patch_status(ctx, name, state).await?;
            }
            Ok(Action::await_change())
        }
        Err(kube::Error::Api(response)) if response.code == 404 => {
            warn!(desktop = name, vm = vm_ref, "bound VM no longer exists, clearing status to re-provision");
            patch_status(ctx, name, CyberdeskState::default()).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        Err(source) => Err(Error::KubeDuring {
            action: format!("looking up bound VM '{vm_ref}'"),
            source,
        }),
    }
}

/// Cloning state (§4.1 step 2): delegate to the clone orchestrator.
async fn reconcile_cloning(
    ctx: &OperatorContext,
    name: &str,
    resource_version: &str,
    timeout_ms: i64,
) -> Result<Action, Error> {
    match clone_orchestrator::step(ctx, name, resource_version, timeout_ms).await {
        Ok(state) => {
            patch_status(ctx, name, state).await?;
            Ok(Action::await_change())
        }
        Err(Error::CloneInProgress { .. }) => Ok(Action::requeue(clone_orchestrator::retry_delay())),
        Err(error @ Error::CloneFailed { .. }) => {
            patch_status(ctx, name, failed_state(CyberdeskPhase::CloneFailed)).await?;
            Err(error)
        }
        Err(error @ Error::CloneTimedOut { .. }) => {
            patch_status(ctx, name, failed_state(CyberdeskPhase::CloneTimeout)).await?;
            Err(error)
        }
        Err(error) => Err(error),
    }
}

fn failed_state(phase: CyberdeskPhase) -> CyberdeskState {
    CyberdeskState {
        phase,
        ..Default::default()
    }
}

/// Fresh state (§4.1 step 3): attempt a pool claim; on success transition
/// straight to `AssignedFromPool`, on an empty pool write the
/// `CloningInitiated` intent without creating the clone object yet, so a
/// crash between this status write and the clone object's creation cannot
/// leak an untracked clone operation (the next pass simply creates it).
async fn reconcile_fresh(ctx: &OperatorContext, name: &str, timeout_ms: i64) -> Result<Action, Error> {
    match pool::try_claim(ctx, name).await? {
        Some(vm_name) => {
            let now = Utc::now();
            let expiry = now + chrono::Duration::milliseconds(timeout_ms);
            let state = CyberdeskState {
                phase: CyberdeskPhase::AssignedFromPool,
                vm_ref: Some(vm_name.clone()),
                clone_op_name: None,
                start_time: Some(now.to_rfc3339()),
                expiry_time: Some(expiry.to_rfc3339()),
            };
            // Status write lands before the VM patch (the externally-visible
            // effect), mirroring the clone path: a crash between the two
            // leaves `vmRef` already pointing at this VM, so the next pass
            // resumes in the bound steady state and simply replays the
            // idempotent finalization patch instead of claiming again.
            patch_status(ctx, name, state).await?;
            finalize_binding(ctx, &vm_name, name).await?;
            pool::notify_if_already_ready(ctx, name, &vm_name).await;
            Ok(Action::await_change())
        }
        None => {
            info!(desktop = name, "warm pool empty, initiating clone");
            let state = CyberdeskState {
                phase: CyberdeskPhase::CloningInitiated,
                clone_op_name: Some(clone_orchestrator::clone_name_for(name)),
                ..Default::default()
            };
            patch_status(ctx, name, state).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }
    }
}

/// Post-bind finalization (§4.1), applied to whichever VM is bound — a
/// pool-claimed VM keeps its own name, a cloned VM's name equals the
/// desktop's. Merge patch only: existing labels are unioned, never dropped.
pub async fn finalize_binding(ctx: &OperatorContext, vm_name: &str, desktop_name: &str) -> Result<(), Error> {
    let vm = ctx.vms().get(vm_name).await.map_err(|source| Error::KubeDuring {
        action: format!("fetching VM '{vm_name}' for finalization"),
        source,
    })?;

    let identity = identity_labels(&ctx.config.system_tag, desktop_name, &ctx.config.managed_by);
    let top_labels = labels::merge(&vm.metadata.labels, &identity);

    let mut template_labels = identity.clone();
    template_labels.insert(KUBEVIRT_DOMAIN_LABEL.to_string(), desktop_name.to_string());
    let existing_template_labels = vm.spec.template.as_ref().and_then(|t| t.metadata.labels.clone());
    let merged_template_labels = labels::merge(&existing_template_labels, &template_labels);

    let patch = json!({
        "metadata": { "labels": top_labels },
        "spec": {
            "runStrategy": "Always",
            "template": {
                "metadata": { "labels": merged_template_labels },
                "spec": { "hostname": desktop_name },
            },
        },
    });

    ctx.vms()
        .patch(vm_name, &PatchParams::apply(WHO_AM_I), &Patch::Merge(&patch))
        .await
        .map_err(|source| Error::KubeDuring {
            action: format!("finalizing bound VM '{vm_name}'"),
            source,
        })?;
    Ok(())
}

/// Writes `state` as the authoritative status, nested under `cyberdeskStatus`
/// per the design note on coexisting with a framework-reserved status key.
/// Every legacy flat field is explicitly nulled out in the same patch, which
/// both clears them on the one-time migration and is a no-op once they are
/// already gone — "any old top-level fields must be migrated" holds on every
/// write, not just the first one.
async fn patch_status(ctx: &OperatorContext, name: &str, state: CyberdeskState) -> Result<(), Error> {
    let patch = json!({
        "status": {
            "cyberdeskStatus": state,
            "phase": serde_json::Value::Null,
            "virtualMachineRef": serde_json::Value::Null,
            "cloneOperationName": serde_json::Value::Null,
            "startTime": serde_json::Value::Null,
            "expiryTime": serde_json::Value::Null,
        }
    });

    ctx.cyberdesks()
        .patch_status(name, &PatchParams::apply(WHO_AM_I), &Patch::Merge(&patch))
        .await
        .map_err(|source| Error::KubeDuring {
            action: format!("patching status of '{name}'"),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clone_failure_resets_to_a_fresh_state() {
        let state = failed_state(CyberdeskPhase::CloneFailed);
        assert!(state.vm_ref.is_none());
        assert!(state.clone_op_name.is_none());
        assert_eq!(state.phase, CyberdeskPhase::CloneFailed);
    }
}
