//! HTTP client for the readiness-notification gateway (§6). Failures here
//! are always swallowed by the caller — the gateway is out of scope for
//! this operator's own correctness and is assumed idempotent.

use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: Option<String>) -> Self {
        if base_url.is_none() {
            warn!("gateway base URL is not configured; readiness notifications will be skipped");
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// `POST <base>/cyberdesk/<instance_id>/ready`. Logs and swallows any
    /// failure; never returns an error to the caller.
    pub async fn notify_ready(&self, instance_id: &str, timeout: Duration) {
        let Some(base_url) = &self.base_url else {
            warn!(instance = instance_id, "skipping readiness notification, no gateway base URL configured");
            return;
        };

        let url = format!("{base_url}/cyberdesk/{instance_id}/ready");
        match self.http.post(&url).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(instance = instance_id, "gateway notified of readiness");
            }
            Ok(response) => {
                warn!(instance = instance_id, status = %response.status(), "gateway returned non-2xx for readiness notification");
            }
            Err(error) => {
                warn!(instance = instance_id, %error, "failed to notify gateway of readiness");
            }
        }
    }
}
