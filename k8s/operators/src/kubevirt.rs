//! Typed views onto the externally-owned KubeVirt API group objects.
//!
//! These CRDs are installed and reconciled by KubeVirt itself, not by this
//! operator, so rather than deriving `CustomResource` we model them with
//! `kube::core::Object<Spec, Status>` and resolve their `ApiResource` at
//! startup via API discovery, the same approach used for watching a third
//! party's CRD without vendoring its Rust types.

use anyhow::{anyhow, Context};
use kube::core::{ApiResource, Object};
use kube::discovery;
use kube::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KUBEVIRT_GROUP: &str = "kubevirt.io";
pub const KUBEVIRT_VERSION: &str = "v1";
pub const CLONE_GROUP: &str = "clone.kubevirt.io";
pub const CLONE_VERSION: &str = "v1beta1";
pub const CLONE_KIND: &str = "VirtualMachineClone";
pub const SNAPSHOT_GROUP: &str = "snapshot.kubevirt.io";
pub const SNAPSHOT_VERSION: &str = "v1beta1";
pub const SNAPSHOT_KIND: &str = "VirtualMachineSnapshot";

pub type VirtualMachine = Object<VirtualMachineSpec, VirtualMachineStatus>;
pub type VirtualMachineInstance = Object<VirtualMachineInstanceSpec, VirtualMachineInstanceStatus>;
pub type VirtualMachineClone = Object<VirtualMachineCloneSpec, VirtualMachineCloneStatus>;
/// Referenced by name only (§6); its spec/status content never read.
pub type VirtualMachineSnapshot = Object<serde_json::Value, serde_json::Value>;

/// The subset of `VirtualMachine.spec` this operator reads or patches.
/// Unknown fields round-trip unchanged via `extra`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineSpec {
    #[serde(rename = "runStrategy", default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<VirtualMachineTemplate>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineTemplate {
    #[serde(default)]
    pub metadata: TemplateMetadata,
    #[serde(default)]
    pub spec: VirtualMachineInstanceSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineStatus {
    #[serde(rename = "printableStatus", default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<VmiInterface>,
    #[serde(default)]
    pub conditions: Vec<VmiCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VmiInterface {
    #[serde(rename = "ipAddress", default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VmiCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

impl VirtualMachineInstanceStatus {
    pub fn is_running_with_ip(&self) -> bool {
        self.phase.as_deref() == Some("Running")
            && self.interfaces.iter().any(|i| i.ip_address.is_some())
    }

    pub fn ready_condition(&self) -> Option<bool> {
        self.conditions
            .iter()
            .find(|c| c.type_ == "Ready")
            .map(|c| c.status == "True")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VirtualMachineCloneSpec {
    pub source: CloneTarget,
    pub target: CloneTarget,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CloneTarget {
    #[serde(rename = "apiGroup")]
    pub apigroup: String,
    pub kind: String,
    pub name: String,
    /// Only ever set on `target`: a template patch applied to the cloned VM.
    /// Carries the guest-readiness probe (§4.3) since KubeVirt has nothing
    /// else to base it on until the snapshot restore completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<CloneTargetTemplate>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CloneTargetTemplate {
    pub spec: CloneTargetTemplateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CloneTargetTemplateSpec {
    #[serde(rename = "readinessProbe")]
    pub readiness_probe: ReadinessProbe,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ReadinessProbe {
    pub exec: ExecAction,
    #[serde(rename = "initialDelaySeconds")]
    pub initial_delay_seconds: u32,
    #[serde(rename = "periodSeconds")]
    pub period_seconds: u32,
    #[serde(rename = "failureThreshold")]
    pub failure_threshold: u32,
    #[serde(rename = "successThreshold")]
    pub success_threshold: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExecAction {
    pub command: Vec<String>,
}

/// The exact guest-readiness probe baked into every clone's target template
/// (§4.3): `test -f /var/lib/cloud/instance/boot-finished`, 30s initial
/// delay, 10s period, failure threshold 3, success threshold 1.
pub fn boot_finished_readiness_probe() -> ReadinessProbe {
    ReadinessProbe {
        exec: ExecAction {
            command: vec![
                "test".to_string(),
                "-f".to_string(),
                "/var/lib/cloud/instance/boot-finished".to_string(),
            ],
        },
        initial_delay_seconds: 30,
        period_seconds: 10,
        failure_threshold: 3,
        success_threshold: 1,
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct VirtualMachineCloneStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// The clone phases explicitly named by the state machine; any other string
/// (including an empty/missing phase) is treated as in-progress.
pub enum ClonePhase {
    InProgress,
    Succeeded,
    Failed,
    Unknown,
}

impl VirtualMachineCloneStatus {
    pub fn dispatch(&self) -> ClonePhase {
        match self.phase.as_deref() {
            Some("Succeeded") => ClonePhase::Succeeded,
            Some("Failed") => ClonePhase::Failed,
            Some("Unknown") => ClonePhase::Unknown,
            _ => ClonePhase::InProgress,
        }
    }
}

/// Resolved `ApiResource`s for every externally-owned KubeVirt type this
/// operator touches, discovered once at startup.
#[derive(Clone)]
pub struct KubevirtResources {
    pub vm: ApiResource,
    pub vmi: ApiResource,
    pub clone: ApiResource,
    pub snapshot: ApiResource,
}

impl KubevirtResources {
    pub async fn discover(client: &Client) -> anyhow::Result<Self> {
        let kubevirt = discovery::group(client, KUBEVIRT_GROUP)
            .await
            .with_context(|| format!("failed to discover API group {KUBEVIRT_GROUP}"))?;
        let (vm, _) = kubevirt
            .recommended_kind("VirtualMachine")
            .ok_or_else(|| anyhow!("{KUBEVIRT_GROUP} does not serve the VirtualMachine kind"))?;
        let (vmi, _) = kubevirt.recommended_kind("VirtualMachineInstance").ok_or_else(|| {
            anyhow!("{KUBEVIRT_GROUP} does not serve the VirtualMachineInstance kind")
        })?;

        let clone_group = discovery::group(client, CLONE_GROUP)
            .await
            .with_context(|| format!("failed to discover API group {CLONE_GROUP}"))?;
        let (clone, _) = clone_group
            .recommended_kind(CLONE_KIND)
            .ok_or_else(|| anyhow!("{CLONE_GROUP} does not serve the {CLONE_KIND} kind"))?;

        let snapshot_group = discovery::group(client, SNAPSHOT_GROUP)
            .await
            .with_context(|| format!("failed to discover API group {SNAPSHOT_GROUP}"))?;
        let (snapshot, _) = snapshot_group
            .recommended_kind(SNAPSHOT_KIND)
            .ok_or_else(|| anyhow!("{SNAPSHOT_GROUP} does not serve the {SNAPSHOT_KIND} kind"))?;

        Ok(Self { vm, vmi, clone, snapshot })
    }
}
