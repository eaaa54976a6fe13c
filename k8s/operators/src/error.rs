//! Error classification shared by every handler: permanent, retryable or
//! swallowed, per the reconciliation contract.

use snafu::Snafu;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {source}"))]
    Kube { source: kube::Error },

    #[snafu(display("Kubernetes API error while {action}: {source}"))]
    KubeDuring {
        action: String,
        source: kube::Error,
    },

    #[snafu(display("failed to list warm pool candidates: {source}"))]
    PoolList { source: kube::Error },

    #[snafu(display("pool-claimed VM '{name}' is not yet ready"))]
    PoolVmNotReady { name: String },

    #[snafu(display("clone operation '{name}' is still in progress"))]
    CloneInProgress { name: String },

    #[snafu(display("clone operation '{name}' failed"))]
    CloneFailed { name: String },

    #[snafu(display("clone operation '{name}' exceeded its retry budget"))]
    CloneTimedOut { name: String },

    #[snafu(display("required configuration '{key}' is missing"))]
    MissingConfig { key: String },

    #[snafu(display("golden snapshot '{name}' does not exist in namespace '{namespace}'"))]
    MissingGoldenSnapshot { name: String, namespace: String },

    #[snafu(display("failed to look up golden snapshot '{name}': {source}"))]
    GoldenSnapshotLookup { name: String, source: kube::Error },

    #[snafu(display("'{name}' reached its final error state"))]
    Terminal { name: String },

    #[snafu(display("finalizer bookkeeping failed: {source}"))]
    FinalizerKube { source: kube::Error },

    #[snafu(display("object has no name, cannot reconcile"))]
    UnnamedObject,
}

/// The delay before a retryable error's handler is re-invoked, in seconds.
/// Errors not listed here use the 5 second baseline (§7).
impl Error {
    pub fn retry_delay(&self) -> Duration {
        match self {
            Error::CloneInProgress { .. } => Duration::from_secs(5),
            Error::PoolVmNotReady { .. } => Duration::from_secs(5),
            _ => Duration::from_secs(5),
        }
    }

    /// Permanent errors halt reconciliation for the resource until its next
    /// external change; everything else is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::CloneFailed { .. }
                | Error::CloneTimedOut { .. }
                | Error::MissingConfig { .. }
                | Error::MissingGoldenSnapshot { .. }
                | Error::Terminal { .. }
        )
    }
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Error::Kube { source }
    }
}
