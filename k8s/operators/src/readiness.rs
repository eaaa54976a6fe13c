//! Readiness Notifier (§4.5): an independent watcher on VMI
//! `status.conditions` that fires exactly once per transition of the
//! `Ready` condition to `True`. Dedup is tracked against the last `Ready`
//! value this task itself observed for a given VMI name; a process restart
//! re-delivers the current state as a fresh observation, which the gateway
//! is expected to tolerate (§9 Open Question: duplication is acceptable).

use crate::context::OperatorContext;
use crate::kubevirt::VirtualMachineInstance;
use crate::labels::{APP_LABEL, INSTANCE_LABEL};
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use shutdown::Shutdown;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for the gateway POST issued by this watcher (§4.5); shorter than
/// the pool-claim notification site's 5 seconds is not called for here, but
/// the two are deliberately distinct constants per their own call sites.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_TIMEOUT: Duration = Duration::from_secs(210);

pub async fn run(ctx: Arc<OperatorContext>, shutdown: Shutdown) {
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT.as_secs() as u32);
    let stream = watcher::watcher(ctx.vmis(), config).applied_objects();
    tokio::pin!(stream);

    let mut last_ready: HashMap<String, bool> = HashMap::new();

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                debug!("readiness notifier shutting down");
                return;
            }
            item = stream.next() => {
                match item {
                    Some(Ok(vmi)) => handle_vmi(&ctx, &vmi, &mut last_ready).await,
                    Some(Err(error)) => warn!(%error, "readiness notifier watch error, will reconnect"),
                    None => return,
                }
            }
        }
    }
}

async fn handle_vmi(ctx: &OperatorContext, vmi: &VirtualMachineInstance, last_ready: &mut HashMap<String, bool>) {
    let labels = vmi.metadata.labels.clone().unwrap_or_default();
    if labels.get(APP_LABEL) != Some(&ctx.config.system_tag) {
        return;
    }
    let Some(instance) = labels.get(INSTANCE_LABEL) else {
        return;
    };

    let name = vmi.name_any();
    let new_ready = vmi.status.as_ref().and_then(|s| s.ready_condition()).unwrap_or(false);
    let old_ready = last_ready.insert(name.clone(), new_ready).unwrap_or(false);

    if new_ready && !old_ready {
        debug!(desktop = instance, vmi = %name, "Ready condition transitioned to true, notifying gateway");
        ctx.gateway.notify_ready(instance, NOTIFY_TIMEOUT).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_only_on_false_to_true_transition() {
        let mut last_ready = HashMap::new();
        assert_eq!(last_ready.insert("vm-a".to_string(), false), None);
        let old = last_ready.insert("vm-a".to_string(), true).unwrap_or(false);
        assert!(!old, "should have been false before this transition");
    }

    #[test]
    fn does_not_refire_once_already_true() {
        let mut last_ready = HashMap::new();
        last_ready.insert("vm-a".to_string(), true);
        let old = last_ready.insert("vm-a".to_string(), true).unwrap_or(false);
        assert!(old, "already true, should not be treated as a fresh transition");
    }
}
