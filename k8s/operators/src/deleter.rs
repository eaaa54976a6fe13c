//! Deleter (§4.7): cascading teardown, invoked by the reconciler's finalizer
//! `Cleanup` event when a `Cyberdesk` is deleted.

use crate::context::OperatorContext;
use crate::crd::Cyberdesk;
use crate::error::Error;
use kube::api::DeleteParams;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, warn};

pub async fn delete(ctx: &OperatorContext, desktop: &Cyberdesk) -> Result<Action, Error> {
    let name = desktop.name_any();
    let state = desktop.status.clone().unwrap_or_default().resolved();
    ctx.clear_clone_attempts(&name).await;

    if let Some(vm_ref) = &state.vm_ref {
        match ctx.vms().delete(vm_ref, &DeleteParams::default()).await {
            Ok(_) => info!(desktop = %name, vm = %vm_ref, "deleted bound VM"),
            Err(kube::Error::Api(response)) if response.code == 404 || response.code == 410 => {}
            Err(source) => {
                return Err(Error::KubeDuring {
                    action: format!("deleting bound VM '{vm_ref}'"),
                    source,
                })
            }
        }
    } else if let Some(clone_op_name) = &state.clone_op_name {
        // Best-effort: a clone we failed to clean up is harmless orphaned
        // state, not a reason to block the desktop's own deletion.
        match ctx.clones().delete(clone_op_name, &DeleteParams::default()).await {
            Ok(_) => info!(desktop = %name, clone = %clone_op_name, "deleted in-flight clone operation"),
            Err(kube::Error::Api(response)) if response.code == 404 => {}
            Err(error) => warn!(desktop = %name, clone = %clone_op_name, %error, "best-effort clone cleanup failed"),
        }
    }

    Ok(Action::await_change())
}
