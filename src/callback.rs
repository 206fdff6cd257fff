// ABOUTME: Best-effort POSTs of status transitions and batched log lines to the control plane.
// ABOUTME: Callback failures never affect a deploy.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub app_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl StatusPayload {
    pub fn new(app_id: &str, status: impl ToString) -> StatusPayload {
        StatusPayload {
            app_id: app_id.to_string(),
            status: status.to_string(),
            port: None,
            url: None,
            error: None,
            commit_sha: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPayload {
    pub app_id: String,
    pub lines: Vec<String>,
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    api_key: String,
}

/// Retry schedule for status callbacks: immediate, then 2s, then 5s.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(5),
];

impl Client {
    pub fn new(api_key: &str) -> Client {
        Client {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("static client config"),
            api_key: api_key.to_string(),
        }
    }

    /// Deliver a status transition with retries. 4xx is terminal (retrying
    /// won't fix the request); 5xx and transport errors go another round.
    pub async fn send_status(&self, callback_url: &str, payload: StatusPayload) {
        if callback_url.is_empty() {
            return;
        }

        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match self.post(callback_url, &payload).await {
                Ok(status) if status.is_server_error() => {
                    tracing::warn!(url = callback_url, attempt = attempt + 1, %status, "callback: server error");
                }
                Ok(status) => {
                    if status.is_client_error() {
                        tracing::warn!(url = callback_url, %status, "callback: rejected, not retrying");
                    }
                    return;
                }
                Err(err) => {
                    tracing::warn!(url = callback_url, attempt = attempt + 1, %err, "callback: POST failed");
                }
            }
        }

        tracing::warn!(url = callback_url, "callback: giving up after {} attempts", RETRY_DELAYS.len());
    }

    /// Single-shot log batch. Batches flush every few seconds, so a lost one
    /// is tolerable; no retries.
    pub async fn send_logs(&self, logs_url: &str, payload: LogPayload) {
        if logs_url.is_empty() {
            return;
        }
        if let Err(err) = self.post(logs_url, &payload).await {
            tracing::debug!(url = logs_url, %err, "callback: log batch dropped");
        }
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) -> reqwest::Result<reqwest::StatusCode> {
        let mut request = self.http.post(url).json(payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let resp = request.send().await?;
        Ok(resp.status())
    }
}

/// Logs URL that pairs with a status callback URL:
/// `.../status` → `.../logs`, anything else gets `/logs` appended.
pub fn logs_url(callback_url: &str) -> String {
    format!("{}/logs", callback_url.trim_end_matches("/status"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_url_replaces_status_suffix() {
        assert_eq!(
            logs_url("https://api.example.com/apps/pr-1/status"),
            "https://api.example.com/apps/pr-1/logs"
        );
        assert_eq!(
            logs_url("https://api.example.com/apps/pr-1"),
            "https://api.example.com/apps/pr-1/logs"
        );
    }

    #[test]
    fn status_payload_omits_empty_fields() {
        let payload = StatusPayload::new("pr-1", "failed");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["app_id"], "pr-1");
        assert_eq!(json["status"], "failed");
        assert!(json.get("port").is_none());
        assert!(json.get("url").is_none());
    }

    #[tokio::test]
    async fn send_status_to_empty_url_is_a_noop() {
        let client = Client::new("");
        client
            .send_status("", StatusPayload::new("pr-1", "running"))
            .await;
    }
}
