//! Outbound transport for progress events (§4.8 "Transport", §6 "External
//! progress service"). All transport errors are logged and swallowed —
//! they must never abort the pipeline (§5 "Cancellation and timeouts").

use crate::events::ProgressEvent;
use serde_json::json;
use std::time::Duration;

const UPDATE_TIMEOUT: Duration = Duration::from_secs(2);
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(5);

pub trait ProgressTransport: Send + Sync {
    fn send_update(&self, event: &ProgressEvent);
    fn send_complete(&self, session_id: &str, message: &str);
    fn send_error(&self, session_id: &str, message: &str);
    fn send_processed_file(&self, session_id: &str, file_hash: &str, stored_file_name: &str, original_file_name: &str);
}

/// Discards every event. Used when no external progress base URL is
/// configured, or in tests that only care about the local subscriber
/// stream.
pub struct NullTransport;

impl ProgressTransport for NullTransport {
    fn send_update(&self, _event: &ProgressEvent) {}
    fn send_complete(&self, _session_id: &str, _message: &str) {}
    fn send_error(&self, _session_id: &str, _message: &str) {}
    fn send_processed_file(&self, _session_id: &str, _file_hash: &str, _stored_file_name: &str, _original_file_name: &str) {}
}

/// POSTs progress to an external service (§6). Constructed once per
/// process; a one-shot `GET <base>/health` probe at startup decides
/// whether outbound transport is enabled at all (non-200 disables it,
/// falling back to log-only).
pub struct HttpProgressTransport {
    base_url: String,
    client: reqwest::blocking::Client,
    enabled: bool,
}

impl HttpProgressTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(UPDATE_TIMEOUT)
            .build()
            .expect("reqwest client configuration is always valid");
        let enabled = Self::probe_health(&client, &base_url);
        Self { base_url, client, enabled }
    }

    fn probe_health(client: &reqwest::blocking::Client, base_url: &str) -> bool {
        client
            .get(format!("{base_url}/health"))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn post(&self, path: &str, body: serde_json::Value, timeout: Duration) -> Result<(), String> {
        if !self.enabled {
            return Err("outbound progress transport disabled (startup probe failed)".to_string());
        }
        self.client
            .post(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| e.to_string())
            .and_then(|r| {
                if r.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("HTTP {}", r.status()))
                }
            })
    }
}

impl ProgressTransport for HttpProgressTransport {
    fn send_update(&self, event: &ProgressEvent) {
        let body = json!({
            "sessionId": event.session_id,
            "stage": event.stage,
            "progress": event.progress,
            "message": event.message,
            "statusMessage": event.message,
            "totalItems": event.extracted_stats.as_ref().and_then(|s| s.total_items),
            "processedItems": event.extracted_stats.as_ref().and_then(|s| s.processed_items),
            "successfulItems": event.extracted_stats.as_ref().and_then(|s| s.successful_items),
            "failedItems": event.extracted_stats.as_ref().and_then(|s| s.failed_items),
            "currentStage": format!("{:?}", event.stage),
        });
        if let Err(reason) = self.post("/progress/update", body, UPDATE_TIMEOUT) {
            tracing::warn!(session_id = %event.session_id, %reason, "progress update transport failed");
        }
    }

    fn send_complete(&self, session_id: &str, message: &str) {
        let body = json!({
            "sessionId": session_id,
            "result": message,
            "percentageComplete": 100,
            "currentStage": "Completed",
            "statusMessage": message,
        });
        // Terminal completion events retry once on failure (§5).
        if self.post("/progress/complete", body.clone(), COMPLETE_TIMEOUT).is_err() {
            if let Err(reason) = self.post("/progress/complete", body, COMPLETE_TIMEOUT) {
                tracing::warn!(session_id, %reason, "progress completion transport failed after retry");
            }
        }
    }

    fn send_error(&self, session_id: &str, message: &str) {
        let body = json!({
            "sessionId": session_id,
            "error": message,
            "percentageComplete": 100,
            "currentStage": "Error",
            "errorMessage": message,
            "statusMessage": message,
        });
        if let Err(reason) = self.post("/progress/error", body, COMPLETE_TIMEOUT) {
            tracing::warn!(session_id, %reason, "progress error transport failed");
        }
    }

    fn send_processed_file(&self, session_id: &str, file_hash: &str, stored_file_name: &str, original_file_name: &str) {
        let body = json!({
            "file_hash": file_hash,
            "stored_file_name": stored_file_name,
            "original_file_name": original_file_name,
            "session_id": session_id,
        });
        if let Err(reason) = self.post("/progress/processed-file", body, UPDATE_TIMEOUT) {
            tracing::warn!(session_id, %reason, "processed-file transport failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_transport_never_panics() {
        let transport = NullTransport;
        transport.send_complete("s1", "done");
        transport.send_error("s1", "oops");
        transport.send_processed_file("s1", "abc", "f.jpg", "orig.jpg");
    }
}
