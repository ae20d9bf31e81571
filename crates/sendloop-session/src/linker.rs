//! Session linking against the automation bridge.
//!
//! Linking is the one-time interactive step that pairs a user's messaging
//! account with a browser context on the bridge. Persisted linking state is
//! restored first; only without it (or when the bridge rejects it) does the
//! user have to scan a QR code again.

use std::path::Path;

use async_trait::async_trait;

use sendloop_core::config::BridgeConfig;
use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::SessionLinker;
use sendloop_core::types::SessionHandle;

const SESSION_FILE: &str = "session.json";
const LINK_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Links sessions through the local automation bridge process.
pub struct BridgeLinker {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeLinker {
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

    /// Re-open a context from persisted linking state.
    async fn restore(&self, user_id: &str, state: &str) -> Result<SessionHandle> {
        let resp = self
            .client
            .post(format!("{}/api/contexts/restore", self.base_url))
            .json(&serde_json::json!({ "user_id": user_id, "state": state }))
            .send()
            .await
            .map_err(|e| SendloopError::Channel(format!("Bridge restore request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SendloopError::Channel(format!(
                "Bridge rejected persisted session ({status}): {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SendloopError::Channel(format!("Invalid bridge response: {e}")))?;
        let context_id = body["context_id"]
            .as_str()
            .ok_or_else(|| SendloopError::Channel("Bridge response missing context_id".into()))?;

        Ok(SessionHandle { user_id: user_id.to_string(), context_id: context_id.to_string() })
    }

    /// Fresh interactive linking: open a context, surface the QR code, poll
    /// until the user has scanned it, then persist the linking state.
    ///
    /// The poll loop is unbounded on purpose — the session manager wraps the
    /// whole call in the linking timeout.
    async fn link_interactive(&self, user_id: &str, session_file: &Path) -> Result<SessionHandle> {
        let resp = self
            .client
            .post(format!("{}/api/contexts", self.base_url))
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await
            .map_err(|e| SendloopError::Channel(format!("Bridge context request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(SendloopError::Channel(format!("Bridge context open failed: {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SendloopError::Channel(format!("Invalid bridge response: {e}")))?;
        let context_id = body["context_id"]
            .as_str()
            .ok_or_else(|| SendloopError::Channel("Bridge response missing context_id".into()))?
            .to_string();

        if let Some(qr) = body["qr_code"].as_str() {
            tracing::info!("📱 Link the account for user {user_id}: scan QR {qr}");
        }

        loop {
            tokio::time::sleep(LINK_POLL_INTERVAL).await;

            let status: serde_json::Value = self
                .client
                .get(format!("{}/api/contexts/{}", self.base_url, context_id))
                .send()
                .await
                .map_err(|e| SendloopError::Channel(format!("Bridge status poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| SendloopError::Channel(format!("Invalid bridge response: {e}")))?;

            match status["status"].as_str().unwrap_or("pending") {
                "ready" => {
                    self.persist_state(&context_id, session_file).await;
                    tracing::info!("Linking complete for user {user_id}");
                    return Ok(SessionHandle {
                        user_id: user_id.to_string(),
                        context_id,
                    });
                }
                "failed" => {
                    return Err(SendloopError::Channel(format!(
                        "Linking failed on the bridge for user {user_id}"
                    )));
                }
                other => {
                    tracing::debug!("Linking for {user_id}: {other}");
                }
            }
        }
    }

    /// Best-effort persistence of the context's linking state. A failure
    /// here only costs a re-scan on the next cold start.
    async fn persist_state(&self, context_id: &str, session_file: &Path) {
        let state = self
            .client
            .get(format!("{}/api/contexts/{}/state", self.base_url, context_id))
            .send()
            .await;
        let Ok(resp) = state else {
            tracing::warn!("⚠️ Could not fetch linking state for persistence");
            return;
        };
        match resp.text().await {
            Ok(state) => {
                if let Err(e) = std::fs::write(session_file, state) {
                    tracing::warn!("⚠️ Failed to persist session state: {e}");
                }
            }
            Err(e) => tracing::warn!("⚠️ Could not read linking state: {e}"),
        }
    }
}

#[async_trait]
impl SessionLinker for BridgeLinker {
    async fn link(&self, user_id: &str, data_dir: &Path) -> Result<SessionHandle> {
        let session_file = data_dir.join(SESSION_FILE);

        if session_file.exists() {
            if let Ok(state) = std::fs::read_to_string(&session_file) {
                match self.restore(user_id, &state).await {
                    Ok(handle) => {
                        tracing::info!("Session for user {user_id} restored from persisted state");
                        return Ok(handle);
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ Persisted session for {user_id} not restorable, relinking: {e}");
                    }
                }
            }
        }

        self.link_interactive(user_id, &session_file).await
    }
}
