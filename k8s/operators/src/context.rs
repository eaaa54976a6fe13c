//! Shared dependencies handed to every handler: the Kubernetes client set,
//! the external-store and gateway clients, and the resolved configuration.
//! Constructed once at startup, torn down at shutdown (§9 design note:
//! explicit dependency injection in place of the source's module-level
//! singletons).

use crate::config::Opts;
use crate::crd::Cyberdesk;
use crate::gateway::GatewayClient;
use crate::kubevirt::{KubevirtResources, VirtualMachine, VirtualMachineClone, VirtualMachineInstance};
use crate::store::StatusStoreClient;
use kube::api::Api;
use kube::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Data every handler needs: API handles, external clients, and the
/// resolved configuration. Cheap to clone (an `Arc` internally via
/// `kube::runtime::Controller`'s own `Arc<OperatorContext>` wrapping).
pub struct OperatorContext {
    pub k8s: Client,
    pub kubevirt: KubevirtResources,
    pub store: StatusStoreClient,
    pub gateway: GatewayClient,
    pub config: Opts,
    /// Tracks, per `Cyberdesk` name, how many consecutive reconciles have
    /// observed its clone operation still in-progress at the current
    /// `resourceVersion`. A changed `resourceVersion` (the CRD status was
    /// externally replaced, or the process restarted and this is the first
    /// sighting again) resets the counter.
    inventory: RwLock<HashMap<String, (String, u32)>>,
}

impl OperatorContext {
    pub fn new(
        k8s: Client,
        kubevirt: KubevirtResources,
        store: StatusStoreClient,
        gateway: GatewayClient,
        config: Opts,
    ) -> Self {
        Self {
            k8s,
            kubevirt,
            store,
            gateway,
            config,
            inventory: RwLock::new(HashMap::new()),
        }
    }

    pub fn cyberdesks(&self) -> Api<Cyberdesk> {
        Api::namespaced(self.k8s.clone(), &self.config.namespace)
    }

    pub fn vms(&self) -> Api<VirtualMachine> {
        Api::namespaced_with(self.k8s.clone(), &self.config.namespace, &self.kubevirt.vm)
    }

    pub fn vmis(&self) -> Api<VirtualMachineInstance> {
        Api::namespaced_with(self.k8s.clone(), &self.config.namespace, &self.kubevirt.vmi)
    }

    pub fn clones(&self) -> Api<VirtualMachineClone> {
        Api::namespaced_with(self.k8s.clone(), &self.config.namespace, &self.kubevirt.clone)
    }

    /// Bumps and returns the in-progress attempt count for `name` at
    /// `resource_version`. A `resource_version` that differs from the last
    /// one seen for this name restarts the count at 1.
    pub async fn bump_clone_attempts(&self, name: &str, resource_version: &str) -> u32 {
        let mut inventory = self.inventory.write().await;
        match inventory.get_mut(name) {
            Some((version, count)) if version == resource_version => {
                *count += 1;
                *count
            }
            _ => {
                inventory.insert(name.to_string(), (resource_version.to_string(), 1));
                1
            }
        }
    }

    /// Clears the attempt counter, called whenever a `Cyberdesk` leaves the
    /// cloning state (success, failure, timeout, or deletion).
    pub async fn clear_clone_attempts(&self, name: &str) {
        self.inventory.write().await.remove(name);
    }
}
