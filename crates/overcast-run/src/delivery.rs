//! HTTP transport for result delivery.

use std::time::Duration;

use log::info;
use overcast_core::error::SinkError;
use overcast_core::sinks::Transport;

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SinkError::Delivery(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout_secs })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, endpoint: &str, body: &str) -> Result<u16, SinkError> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    SinkError::Delivery(format!("connection to {endpoint} failed: {e}"))
                } else if e.is_timeout() {
                    SinkError::Delivery(format!("request timed out after {}s", self.timeout_secs))
                } else {
                    SinkError::Delivery(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(SinkError::Delivery(format!("status {}: {text}", status.as_u16())));
        }

        info!("delivery response ({}): {}", status.as_u16(), pretty_body(&text));
        Ok(status.as_u16())
    }
}

/// Pretty-print JSON responses; leave anything else as it came.
fn pretty_body(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| text.to_string())
}
