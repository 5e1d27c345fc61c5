use serde_json::json;
use tracing::{info, warn};

use crate::errors::AppError;

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// What happened to one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// Simulator/dev token; logged instead of sent.
    Simulated,
    /// User has no registered device token.
    Skipped,
}

/// Delivers push notifications. Production device tokens are 64-char hex
/// strings; anything else short-circuits to a logged simulated send so dev
/// clients never hit the push gateway.
pub struct NotificationService {
    client: reqwest::Client,
}

impl NotificationService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn send_push(
        &self,
        push_token: Option<&str>,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<PushOutcome, AppError> {
        let Some(token) = push_token.filter(|t| !t.is_empty()) else {
            info!("No push token registered, skipping delivery");
            return Ok(PushOutcome::Skipped);
        };

        if !is_production_token(token) {
            info!("Simulated push to dev token: {} - {}", title, body);
            return Ok(PushOutcome::Simulated);
        }

        let payload = json!({
            "to": token,
            "title": title,
            "body": body,
            "data": data,
        });

        let response = self
            .client
            .post(EXPO_PUSH_URL)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::External(format!("push delivery failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Push gateway returned {}: {}", status, text);
            return Err(AppError::External(format!(
                "push gateway error {}",
                status
            )));
        }

        Ok(PushOutcome::Sent)
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Production tokens are opaque 64-char hex strings.
pub fn is_production_token(token: &str) -> bool {
    token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit())
}
