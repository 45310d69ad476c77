//! Webhook fan-out.
//!
//! After any persisted state change, the supervisors post a payload
//! describing the old and new state to every registered webhook. Delivery
//! is fire-and-forget: errors are logged, never retried, and never block
//! or fail the transition. No ordering is guaranteed between deliveries.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use saturn_model::{WebhookFilter, WebhookPayload};

use crate::error::{ControlError, ControlResult};
use crate::store::Store;

/// Posts state-change payloads to registered webhooks.
#[derive(Debug, Clone)]
pub struct WebhookEmitter {
    client: Client,
}

impl WebhookEmitter {
    /// Create a new emitter with the given per-delivery timeout.
    pub fn new(timeout: Duration) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self { client })
    }

    /// Send the payload to every registered webhook.
    ///
    /// Failures of any kind are logged and swallowed.
    pub async fn send_to_all(&self, store: &dyn Store, payload: &WebhookPayload) {
        let webhooks = match store.get_webhooks(&WebhookFilter::all()).await {
            Ok(webhooks) => webhooks,
            Err(error) => {
                warn!(error = %error, "failed to enumerate webhooks, skipping fan-out");
                return;
            }
        };

        for webhook in webhooks {
            match self.client.post(&webhook.url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        webhook_id = %webhook.id,
                        url = %webhook.url,
                        new_state = %payload.new_state,
                        "delivered webhook"
                    );
                }
                Ok(response) => {
                    warn!(
                        webhook_id = %webhook.id,
                        url = %webhook.url,
                        status = %response.status(),
                        "webhook delivery rejected"
                    );
                }
                Err(error) => {
                    warn!(
                        webhook_id = %webhook.id,
                        url = %webhook.url,
                        error = %error,
                        "webhook delivery failed"
                    );
                }
            }
        }
    }
}
