//! Package metadata and tracing helpers shared by every Cyberdesk binary.

pub mod tracing_telemetry;

pub use git_version;

/// Label key used on Kubernetes objects we created, so that unrelated
/// controllers can tell apart objects managed by this operator.
pub const CREATED_BY_KEY: &str = "app.kubernetes.io/created-by";
/// Value of [`CREATED_BY_KEY`] set on every object the operator creates.
pub const CYBERDESK_OPERATOR: &str = "cyberdesk-operator";

/// Default value for the periodic reconciliation / expiry-check interval.
pub const CACHE_POLL_PERIOD: &str = "60s";
/// Default timeout applied to outbound HTTP calls (gateway, status store).
pub const DEFAULT_REQ_TIMEOUT: &str = "5s";

/// Returns the raw `git describe`-style version string, falling back to the
/// crate version when not built from a git checkout.
pub fn raw_version_str() -> &'static str {
    git_version::git_version!(fallback = env!("CARGO_PKG_VERSION"))
}

/// Expands to `"$CARGO_PKG_NAME $CARGO_PKG_DESCRIPTION"`, used as the clap
/// application description.
#[macro_export]
macro_rules! package_description {
    () => {
        concat!(env!("CARGO_PKG_NAME"), " - ", env!("CARGO_PKG_DESCRIPTION"))
    };
}

/// Expands to a version string combining the crate version and the raw git
/// describe output, used as the clap `--version` output.
#[macro_export]
macro_rules! version_info_str {
    () => {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (",
            $crate::git_version::git_version!(fallback = "unknown"),
            ")"
        )
    };
}

/// Logs the package name, version and raw git version at startup.
#[macro_export]
macro_rules! print_package_info {
    () => {
        tracing::info!(
            name = env!("CARGO_PKG_NAME"),
            version = env!("CARGO_PKG_VERSION"),
            raw_version = $crate::raw_version_str(),
            "starting"
        );
    };
}
