//! Label keys shared between the reconciler, the pool claimer, and the two
//! independent watchers. Labels are the only cross-component coordination
//! medium for pool claims (§5); every write here must be a merge patch that
//! preserves unknown keys.

use std::collections::BTreeMap;

pub const APP_LABEL: &str = "app";
pub const INSTANCE_LABEL: &str = "cyberdesk-instance";
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const POOL_WARM_LABEL: &str = "pool/warm";
pub const POOL_IN_USE_LABEL: &str = "pool/in-use";

pub const POOL_WARM_READY: &str = "ready";
pub const POOL_WARM_CLAIMED: &str = "claimed";

/// The domain label KubeVirt itself expects on a VMI template, used so the
/// instance can be selected on by its desktop name from the VM side too.
pub const KUBEVIRT_DOMAIN_LABEL: &str = "kubevirt.io/domain";

/// Builds the identity label set applied to a newly bound VM: `app`,
/// `cyberdesk-instance`, `managed-by` (§4.1 post-bind finalization).
pub fn identity_labels(system_tag: &str, instance: &str, managed_by: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), system_tag.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (MANAGED_BY_LABEL.to_string(), managed_by.to_string()),
    ])
}

/// Merges `incoming` into `existing`, favouring `incoming` on key conflicts.
/// Mirrors the semantics of a Kubernetes JSON merge patch on a map field:
/// existing labels are preserved unless explicitly overwritten.
pub fn merge(existing: &Option<BTreeMap<String, String>>, incoming: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = existing.clone().unwrap_or_default();
    merged.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_preserves_unrelated_keys() {
        let existing = Some(BTreeMap::from([("keep".to_string(), "me".to_string())]));
        let incoming = BTreeMap::from([("app".to_string(), "cyberdesk".to_string())]);
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.get("keep"), Some(&"me".to_string()));
        assert_eq!(merged.get("app"), Some(&"cyberdesk".to_string()));
    }

    #[test]
    fn merge_overwrites_conflicting_keys() {
        let existing = Some(BTreeMap::from([(POOL_WARM_LABEL.to_string(), POOL_WARM_READY.to_string())]));
        let incoming = BTreeMap::from([(POOL_WARM_LABEL.to_string(), POOL_WARM_CLAIMED.to_string())]);
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.get(POOL_WARM_LABEL), Some(&POOL_WARM_CLAIMED.to_string()));
    }
}
