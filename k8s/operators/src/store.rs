//! Client for the external relational status store (§6): one row per
//! desktop name, a single `status` column. Modeled as a small REST client
//! behind an `async_trait`, the same seam this codebase's other storage
//! backends draw between their wire format and the trait callers see.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("status store request error: {source}"))]
    Request { source: reqwest::Error },
    #[snafu(display("status store returned {status} for '{key}'"))]
    Response {
        key: String,
        status: reqwest::StatusCode,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DesktopStatus {
    Pending,
    Running,
    Terminated,
    Error,
}

#[derive(Deserialize)]
struct StatusRow {
    status: DesktopStatus,
}

#[derive(Serialize)]
struct StatusRowWrite<'a> {
    status: &'a DesktopStatus,
}

/// Client for the `cyberdesk_instances`-shaped external store: authenticated
/// REST endpoint, one row per desktop name, single `status` column.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get_status(&self, desktop: &str) -> Result<Option<DesktopStatus>, StoreError>;
    async fn set_status(&self, desktop: &str, status: DesktopStatus) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct StatusStoreClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl StatusStoreClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            timeout,
        }
    }

    fn row_url(&self, desktop: &str) -> String {
        format!("{}/cyberdesk_instances/{desktop}", self.base_url)
    }
}

#[async_trait]
impl StatusStore for StatusStoreClient {
    async fn get_status(&self, desktop: &str) -> Result<Option<DesktopStatus>, StoreError> {
        let response = self
            .http
            .get(self.row_url(desktop))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .context(Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Response {
                key: desktop.to_string(),
                status: response.status(),
            });
        }
        let row: StatusRow = response.json().await.context(Request)?;
        Ok(Some(row.status))
    }

    async fn set_status(&self, desktop: &str, status: DesktopStatus) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.row_url(desktop))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&StatusRowWrite { status: &status })
            .send()
            .await
            .context(Request)?;

        if !response.status().is_success() {
            return Err(StoreError::Response {
                key: desktop.to_string(),
                status: response.status(),
            });
        }
        Ok(())
    }
}
