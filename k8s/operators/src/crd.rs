//! The `Cyberdesk` custom resource: a user-facing request for a virtual
//! desktop, reconciled by this operator to a bound or cloned KubeVirt VM.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CYBERDESK_GROUP: &str = "cyberdesk.io";
pub const CYBERDESK_VERSION: &str = "v1alpha1";
pub const CYBERDESK_PLURAL: &str = "cyberdesks";

/// Desired state of a virtual desktop. The only user-settable knob is how
/// long the desktop lives once a VM has actually been assigned to it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cyberdesk.io",
    version = "v1alpha1",
    kind = "Cyberdesk",
    plural = "cyberdesks",
    namespaced,
    status = "CyberdeskStatus",
    shortname = "cdesk",
    derive = "PartialEq"
)]
pub struct CyberdeskSpec {
    /// Lifetime, in milliseconds, counted from the moment a VM is first
    /// assigned (not from resource creation). Must be >= 1000.
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: i64,
}

/// Lifecycle phase of the reconciler's own state machine. Distinct from the
/// VMI's runtime phase, which lives in the external status store instead.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CyberdeskPhase {
    #[default]
    #[serde(rename = "")]
    Unset,
    CloningInitiated,
    AssignedFromPool,
    Cloned,
    CloneFailed,
    CloneTimeout,
}

/// Authoritative reconciler state, nested under a single `cyberdeskStatus`
/// key so that it can coexist with status sub-keys a CRD framework may
/// reserve for its own bookkeeping.
///
/// `cyberdesk_status` is optional (rather than required) so that a resource
/// still carrying the legacy flat status shape — captured by `legacy`,
/// never written by this operator — deserializes successfully instead of
/// failing the whole object; [`CyberdeskStatus::resolved`] folds the two
/// together and performs the one-time migration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CyberdeskStatus {
    #[serde(rename = "cyberdeskStatus", default, skip_serializing_if = "Option::is_none")]
    pub cyberdesk_status: Option<CyberdeskState>,
    #[serde(flatten)]
    pub legacy: LegacyCyberdeskStatus,
}

impl CyberdeskStatus {
    /// The effective state for this pass: the nested state if present,
    /// otherwise the legacy flat fields folded into the current shape, or
    /// the default (fresh) state if neither is present.
    pub fn resolved(&self) -> CyberdeskState {
        if let Some(state) = &self.cyberdesk_status {
            return state.clone();
        }
        self.legacy.clone().into()
    }

    /// True if this status still needs its one-time migration written back.
    pub fn needs_migration(&self) -> bool {
        self.cyberdesk_status.is_none() && !self.legacy.is_empty()
    }
}

/// None of these fields use `skip_serializing_if`: every status patch we
/// issue writes the complete object, so that a field going from `Some` to
/// `None` is serialized as an explicit JSON `null` and actually clears the
/// key under Kubernetes' merge-patch semantics, rather than silently
/// leaving the previous value in place.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CyberdeskState {
    #[serde(default)]
    pub phase: CyberdeskPhase,
    /// Name of the bound VM, once any provisioning path has succeeded.
    /// Mutually exclusive with `cloneOpName` in steady state (I1).
    #[serde(rename = "vmRef", default)]
    pub vm_ref: Option<String>,
    /// Name of an in-flight clone operation.
    #[serde(rename = "cloneOpName", default)]
    pub clone_op_name: Option<String>,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<String>,
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: Option<String>,
}

impl CyberdeskState {
    pub fn is_bound(&self) -> bool {
        self.vm_ref.is_some()
            && matches!(
                self.phase,
                CyberdeskPhase::AssignedFromPool | CyberdeskPhase::Cloned
            )
    }

    pub fn is_cloning(&self) -> bool {
        self.clone_op_name.is_some() && self.vm_ref.is_none()
    }

    pub fn is_fresh(&self) -> bool {
        self.clone_op_name.is_none() && self.vm_ref.is_none()
    }
}

/// Legacy flat status fields as produced by the source this operator
/// replaces. Present only to support the one-time migration performed by
/// [`CyberdeskStatus::resolved`]; never written by this operator. Field names
/// match the original flat schema (`virtualMachineRef`, `cloneOperationName`),
/// not the new nested schema's shorter names.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LegacyCyberdeskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<CyberdeskPhase>,
    #[serde(rename = "virtualMachineRef", default, skip_serializing_if = "Option::is_none")]
    pub vm_ref: Option<String>,
    #[serde(rename = "cloneOperationName", default, skip_serializing_if = "Option::is_none")]
    pub clone_op_name: Option<String>,
    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(rename = "expiryTime", default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
}

impl LegacyCyberdeskStatus {
    pub fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.vm_ref.is_none()
            && self.clone_op_name.is_none()
            && self.start_time.is_none()
            && self.expiry_time.is_none()
    }
}

impl From<LegacyCyberdeskStatus> for CyberdeskState {
    fn from(legacy: LegacyCyberdeskStatus) -> Self {
        CyberdeskState {
            phase: legacy.phase.unwrap_or_default(),
            vm_ref: legacy.vm_ref,
            clone_op_name: legacy.clone_op_name,
            start_time: legacy.start_time,
            expiry_time: legacy.expiry_time,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_cyberdesk_has_no_binding() {
        let state = CyberdeskState::default();
        assert!(state.is_fresh());
        assert!(!state.is_bound());
        assert!(!state.is_cloning());
    }

    #[test]
    fn bound_state_requires_vm_ref_and_phase() {
        let mut state = CyberdeskState {
            vm_ref: Some("vm-a".into()),
            phase: CyberdeskPhase::AssignedFromPool,
            ..Default::default()
        };
        assert!(state.is_bound());
        state.phase = CyberdeskPhase::CloningInitiated;
        assert!(!state.is_bound());
    }

    #[test]
    fn legacy_flat_status_resolves_and_needs_migration() {
        let raw = serde_json::json!({
            "phase": "AssignedFromPool",
            "virtualMachineRef": "vm-a",
            "startTime": "2024-01-01T00:00:00Z",
            "expiryTime": "2024-01-01T01:00:00Z",
        });
        let status: CyberdeskStatus = serde_json::from_value(raw).expect("should deserialize");
        assert!(status.needs_migration());
        let resolved = status.resolved();
        assert_eq!(resolved.vm_ref.as_deref(), Some("vm-a"));
        assert_eq!(resolved.phase, CyberdeskPhase::AssignedFromPool);
    }

    #[test]
    fn already_nested_status_is_not_migrated() {
        let raw = serde_json::json!({ "cyberdeskStatus": { "phase": "" } });
        let status: CyberdeskStatus = serde_json::from_value(raw).expect("should deserialize");
        assert!(!status.needs_migration());
    }
}
