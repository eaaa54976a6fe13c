//! Expiry Timer (§4.6): periodic sweep that deletes `Cyberdesk` resources
//! past their `expiryTime`. Deletion cascades into the finalizer-driven
//! teardown in `deleter.rs`; this module only decides *when* to delete.

use crate::context::OperatorContext;
use chrono::{DateTime, Utc};
use kube::api::{DeleteParams, ListParams};
use kube::ResourceExt;
use shutdown::Shutdown;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn run(ctx: Arc<OperatorContext>, shutdown: Shutdown) {
    let interval = ctx.config.interval();
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                debug!("expiry timer shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                sweep(&ctx).await;
            }
        }
    }
}

async fn sweep(ctx: &OperatorContext) {
    let desktops = match ctx.cyberdesks().list(&ListParams::default()).await {
        Ok(list) => list,
        Err(error) => {
            warn!(%error, "failed to list Cyberdesks for expiry sweep, will retry next interval");
            return;
        }
    };

    let now = Utc::now();
    for desktop in desktops.items {
        let name = desktop.name_any();
        let state = desktop.status.clone().unwrap_or_default().resolved();
        let Some(expiry_time) = &state.expiry_time else {
            continue;
        };

        let expiry: DateTime<Utc> = match expiry_time.parse() {
            Ok(expiry) => expiry,
            Err(error) => {
                warn!(desktop = %name, %error, "failed to parse expiryTime, skipping");
                continue;
            }
        };

        if now < expiry {
            continue;
        }

        info!(desktop = %name, %expiry, "desktop expired, deleting");
        if let Err(error) = ctx.cyberdesks().delete(&name, &DeleteParams::default()).await {
            if !matches!(&error, kube::Error::Api(response) if response.code == 404) {
                warn!(desktop = %name, %error, "failed to delete expired desktop, will retry next interval");
            }
        }
    }
}
