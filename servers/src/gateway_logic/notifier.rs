//! # Hub Notifier
//!
//! Forwards query progress to the live update hub as `stream_update`
//! envelopes. Delivery is best effort: a slow or absent hub is logged and the
//! query answer is unaffected.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use lib_common::core::envelope::{Envelope, StreamUpdate};
use lib_common::core::hub::BroadcastReport;

#[derive(Clone)]
pub struct HubNotifier {
    client: reqwest::Client,
    url: String,
}

impl HubNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build hub notification client")?;
        Ok(Self { client, url: url.into() })
    }

    /// Posts one update and returns the hub's delivery report.
    pub async fn notify(&self, update: &StreamUpdate, identity: &str) -> Result<BroadcastReport> {
        let envelope = Envelope::stream_update(update).with_identity(identity);
        let response = self
            .client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await
            .with_context(|| format!("hub at {} unreachable", self.url))?;
        if !response.status().is_success() {
            bail!("hub answered {}", response.status());
        }
        let report = response.json::<BroadcastReport>().await.context("unexpected hub answer")?;
        Ok(report)
    }

    /// Runs [`notify`](Self::notify) in the background.
    pub fn spawn_notify(&self, update: StreamUpdate, identity: String) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.notify(&update, &identity).await {
                Ok(report) => debug!(
                    request_id = %update.request_id,
                    delivered = report.delivered,
                    evicted = report.evicted,
                    "query update forwarded to hub"
                ),
                Err(e) => warn!(request_id = %update.request_id, error = %e, "failed to forward query update"),
            }
        });
    }
}
