//! Phase Synchronizer (§4.4): an independent watcher on VMI `status.phase`
//! that propagates the mapped value into the external status store. Shares
//! no in-process state with the reconciler (§5); grounded on the
//! watcher+`stream::select_all` shape of `btrfs-provisioner`'s controller,
//! reduced to the single resource this operator watches.

use crate::context::OperatorContext;
use crate::kubevirt::VirtualMachineInstance;
use crate::labels::{APP_LABEL, INSTANCE_LABEL, POOL_WARM_LABEL};
use crate::store::{DesktopStatus, StatusStore};
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Watch server timeout (§6), balancing reconnect frequency against idle
/// connection churn.
const WATCH_TIMEOUT: Duration = Duration::from_secs(210);

/// VMI phase → external status mapping (§4.4). `Running` maps to `pending`:
/// readiness is a separate, later signal (§4.5).
fn map_phase(phase: &str) -> DesktopStatus {
    match phase {
        "Pending" | "Scheduling" | "Scheduled" | "Running" => DesktopStatus::Pending,
        "Succeeded" => DesktopStatus::Terminated,
        "Failed" | "Unknown" => DesktopStatus::Error,
        _ => DesktopStatus::Error,
    }
}

pub async fn run(ctx: Arc<OperatorContext>, shutdown: Shutdown) {
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT.as_secs() as u32);
    let stream = watcher::watcher(ctx.vmis(), config).applied_objects();
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                debug!("phase synchronizer shutting down");
                return;
            }
            item = stream.next() => {
                match item {
                    Some(Ok(vmi)) => handle_vmi(&ctx, &vmi).await,
                    Some(Err(error)) => warn!(%error, "phase synchronizer watch error, will reconnect"),
                    None => return,
                }
            }
        }
    }
}

async fn handle_vmi(ctx: &OperatorContext, vmi: &VirtualMachineInstance) {
    let labels = vmi.metadata.labels.clone().unwrap_or_default();
    if labels.get(APP_LABEL) != Some(&ctx.config.system_tag) {
        return;
    }

    let Some(instance) = labels.get(INSTANCE_LABEL) else {
        if labels.contains_key(POOL_WARM_LABEL) {
            debug!(vmi = %vmi.name_any(), "pool member or not yet claimed, ignoring");
        } else {
            warn!(vmi = %vmi.name_any(), "VMI tagged for this operator has neither an instance nor a pool label");
        }
        return;
    };

    let Some(phase) = vmi.status.as_ref().and_then(|s| s.phase.as_deref()) else {
        return;
    };
    let desired = map_phase(phase);

    let current = match ctx.store.get_status(instance).await {
        Ok(current) => current,
        Err(error) => {
            warn!(desktop = instance, %error, "failed to read external status row, will retry on next event");
            return;
        }
    };

    if current == Some(desired) {
        return;
    }

    if let Err(error) = ctx.store.set_status(instance, desired).await {
        warn!(desktop = instance, %error, "failed to update external status row, will retry on next event");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn running_maps_to_pending_not_ready() {
        assert_eq!(map_phase("Running"), DesktopStatus::Pending);
    }

    #[test]
    fn unrecognized_phase_maps_to_error() {
        assert_eq!(map_phase("SomethingNew"), DesktopStatus::Error);
    }

    #[test]
    fn terminal_phases_map_correctly() {
        assert_eq!(map_phase("Succeeded"), DesktopStatus::Terminated);
        assert_eq!(map_phase("Failed"), DesktopStatus::Error);
        assert_eq!(map_phase("Unknown"), DesktopStatus::Error);
    }
}
