//! Webhook delivery: canonical body, HMAC signature, bounded retries

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookConfig;
use crate::model::{DeliveryResult, WebhookPayload};

type HmacSha256 = Hmac<Sha256>;

/// Delay in seconds before each attempt; the first attempt is immediate
const RETRY_DELAYS: [u64; 4] = [0, 1, 5, 15];

/// Transport seam for the alert pipeline
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Send one payload to one target, retrying per the schedule
    async fn deliver(&self, payload: &WebhookPayload, target: &WebhookConfig) -> DeliveryResult;
}

/// HTTP delivery client
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn attempt(
        &self,
        body: &str,
        payload: &WebhookPayload,
        target: &WebhookConfig,
    ) -> Result<u16, String> {
        let mut request = self
            .client
            .post(&target.url)
            .timeout(Duration::from_secs(target.timeout_seconds))
            .header("Content-Type", "application/json")
            .header("X-Event", payload.event_type.as_str())
            .header("X-Source", payload.source.name.as_str());

        if let Some(secret) = &target.secret {
            request = request.header("X-Signature", format!("sha256={}", sign(body, secret)));
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(describe_error)?;

        Ok(response.status().as_u16())
    }
}

impl Default for DeliveryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deliverer for DeliveryClient {
    async fn deliver(&self, payload: &WebhookPayload, target: &WebhookConfig) -> DeliveryResult {
        let body = payload.canonical_json();
        let started = Instant::now();
        let mut last_error: Option<String> = None;
        let mut last_status: Option<u16> = None;
        let mut attempts = 0u32;

        for delay in RETRY_DELAYS {
            if delay > 0 {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            attempts += 1;

            match self.attempt(&body, payload, target).await {
                Ok(status) => {
                    last_status = Some(status);
                    let latency_ms = started.elapsed().as_millis() as u64;

                    if (200..300).contains(&status) {
                        tracing::debug!(
                            target = %target.name,
                            status,
                            latency_ms,
                            "webhook delivered"
                        );
                        return DeliveryResult::succeeded(status, latency_ms, attempts);
                    }

                    if !is_retryable(status) {
                        return DeliveryResult::failed(
                            Some(status),
                            latency_ms,
                            format!("HTTP {status}"),
                            attempts,
                        );
                    }

                    last_error = Some(format!("HTTP {status}"));
                }
                Err(message) => {
                    last_error = Some(message);
                }
            }
        }

        DeliveryResult::failed(
            last_status,
            started.elapsed().as_millis() as u64,
            last_error.unwrap_or_else(|| "delivery failed".to_string()),
            attempts,
        )
    }
}

/// Network errors, timeouts, server errors, and throttling retry;
/// everything else is terminal.
fn is_retryable(status: u16) -> bool {
    status >= 500 || matches!(status, 408 | 425 | 429)
}

fn describe_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", truncate(&e.to_string()))
    } else {
        truncate(&e.to_string())
    }
}

fn truncate(message: &str) -> String {
    const MAX: usize = 200;
    if message.len() <= MAX {
        message.to_string()
    } else {
        message.chars().take(MAX).collect()
    }
}

/// Hex HMAC-SHA256 of the body keyed by the target secret
pub fn sign(body: &str, secret: &str) -> String {
    // HMAC-SHA256 accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
