//! Automation bridge surface — one send per call over HTTP.

use async_trait::async_trait;

use sendloop_core::config::BridgeConfig;
use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::{AutomationSurface, SendOutcome};
use sendloop_core::types::SessionHandle;

/// Drives the local automation bridge process.
pub struct BridgeSurface {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeSurface {
    pub fn new(config: &BridgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AutomationSurface for BridgeSurface {
    async fn send_message(
        &self,
        handle: &SessionHandle,
        phone: &str,
        content: &str,
    ) -> Result<SendOutcome> {
        let url = format!("{}/api/contexts/{}/messages", self.base_url, handle.context_id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "to": phone, "body": content }))
            .send()
            .await
            .map_err(|e| SendloopError::Channel(format!("Bridge send request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // The context evaporated under us (bridge restart, manual close).
            return Err(SendloopError::Channel(format!(
                "Automation context {} lost for user {}",
                handle.context_id, handle.user_id
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SendloopError::Channel(format!("Bridge error {status}: {body}")));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendloopError::Channel(format!("Invalid bridge response: {e}")))?;

        match result["status"].as_str().unwrap_or("") {
            "sent" => {
                let receipt = result["receipt_id"].as_str().unwrap_or("unknown").to_string();
                tracing::debug!("Bridge send ok: {} → {}", receipt, phone);
                Ok(SendOutcome::Delivered { receipt })
            }
            "rejected" => {
                let reason = result["reason"].as_str().unwrap_or("rejected by channel").to_string();
                Ok(SendOutcome::Rejected { reason })
            }
            other => Err(SendloopError::Channel(format!(
                "Unexpected bridge send status: {other:?}"
            ))),
        }
    }

    async fn ping(&self, handle: &SessionHandle) -> Result<()> {
        let url = format!("{}/api/contexts/{}", self.base_url, handle.context_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SendloopError::Channel(format!("Bridge ping failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SendloopError::Channel(format!(
                "Context {} not alive: {}",
                handle.context_id,
                response.status()
            )))
        }
    }
}
