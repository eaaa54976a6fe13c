//! Startup configuration, read once and handed to every handler via
//! [`crate::context::OperatorContext`]. Every knob can be set either on the
//! command line or via the matching environment variable, following the
//! same `.env()` convention as the rest of the control plane's operators.

use clap::Parser;
use std::time::Duration;

const IN_CLUSTER_GATEWAY_DNS: &str = "http://gateway.cyberdesk-system.svc.cluster.local:80";

#[derive(Parser, Debug, Clone)]
#[command(name = utils::package_description!(), version = utils::version_info_str!())]
pub struct Opts {
    /// Namespace the operator watches `Cyberdesk` resources in, and the
    /// namespace VMs/clones/snapshots are assumed to live in.
    #[arg(long, env = "NAMESPACE", default_value = "cyberdesk-system")]
    pub namespace: String,

    /// Value written to the `app` label on every VM this operator binds.
    #[arg(long, env = "SYSTEM_TAG", default_value = "cyberdesk")]
    pub system_tag: String,

    /// Value written to the `managed-by` label on every VM this operator
    /// binds, and used as the Kubernetes event `reportingComponent`.
    #[arg(long, env = "MANAGED_BY", default_value = "cyberdesk-operator")]
    pub managed_by: String,

    /// Name of the `VirtualMachineSnapshot` cloned to create new desktops
    /// when the warm pool is empty.
    #[arg(long, env = "GOLDEN_SNAPSHOT_NAME", default_value = "snapshot-golden-vm")]
    pub golden_snapshot_name: String,

    /// Fixed reconciliation / expiry-check interval.
    #[arg(long, env = "INTERVAL", default_value = utils::CACHE_POLL_PERIOD)]
    pub interval: humantime::Duration,

    /// Timeout applied to outbound HTTP calls to the external status store.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = utils::DEFAULT_REQ_TIMEOUT)]
    pub request_timeout: humantime::Duration,

    /// Maximum number of reconciles a clone operation may spend in progress
    /// before it is torn down and the desktop marked `CloneTimeout`.
    #[arg(long, env = "RETRIES", default_value = "20")]
    pub retries: u32,

    /// Base URL of the external status store's REST API.
    #[arg(long, env = "STATUS_STORE_URL")]
    pub status_store_url: Option<String>,

    /// Bearer key presented to the external status store.
    #[arg(long, env = "STATUS_STORE_KEY")]
    pub status_store_key: Option<String>,

    /// Gateway base URL, used only when running outside a cluster. Inside a
    /// cluster the fixed in-cluster service DNS name is always used instead.
    #[arg(long, env = "GATEWAY_TESTING_URL")]
    pub gateway_testing_url: Option<String>,

    /// Forward traces to this Jaeger agent endpoint instead of stdout only.
    #[arg(long, env = "JAEGER_ENDPOINT")]
    pub jaeger: Option<String>,
}

impl Opts {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.into()
    }

    pub fn interval(&self) -> Duration {
        self.interval.into()
    }

    /// Resolves the gateway base URL per §6: the fixed in-cluster DNS name
    /// when running in-cluster, otherwise `GATEWAY_TESTING_URL`. Returns
    /// `None` out-of-cluster with that variable unset, in which case
    /// notifications are skipped with a warning rather than failing startup.
    pub fn gateway_base_url(&self, in_cluster: bool) -> Option<String> {
        if in_cluster {
            Some(IN_CLUSTER_GATEWAY_DNS.to_string())
        } else {
            self.gateway_testing_url.clone()
        }
    }
}

/// Whether the process is running inside a Kubernetes pod, used to pick the
/// gateway base URL resolution strategy. Mirrors the conventional way
/// in-cluster clients detect their environment.
pub fn running_in_cluster() -> bool {
    std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}
