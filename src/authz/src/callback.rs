//! Callback delivery with bounded retries and exponential backoff
//!
//! Each decision is POSTed as a [`CallbackPayload`] to the caller's URL. Any
//! 2xx response counts as delivered. Non-2xx responses and transport errors
//! are retried until `max_retries` attempts have been made in total, sleeping
//! `base_delay * 2^(attempt-1)` between attempts. Exhausted deliveries are
//! logged and counted; they are never re-enqueued.

use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CallbackSection;
use crate::error::{PipelineError, Result};
use crate::metrics::{category, MetricsRegistry};
use crate::types::{AuthorizationDecision, CallbackPayload};

/// Callback dispatcher configuration
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Per-attempt HTTP timeout
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub user_agent: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        (&CallbackSection::default()).into()
    }
}

impl From<&CallbackSection> for CallbackConfig {
    fn from(section: &CallbackSection) -> Self {
        Self {
            timeout: section.timeout(),
            max_retries: section.max_retries,
            base_delay: section.base_delay(),
            user_agent: section.user_agent.clone(),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Result of a single POST
#[derive(Debug)]
enum Attempt {
    Delivered(StatusCode),
    HttpError(StatusCode),
    NetworkError(String),
}

/// Delivers authorization decisions to caller-supplied URLs
#[derive(Clone)]
pub struct CallbackDispatcher {
    client: Client,
    config: CallbackConfig,
    metrics: Arc<MetricsRegistry>,
}

impl CallbackDispatcher {
    /// Create a dispatcher with its own HTTP client
    pub fn new(config: CallbackConfig, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            base_delay_ms = config.base_delay.as_millis() as u64,
            "CallbackDispatcher initialized"
        );

        Ok(Self {
            client,
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &CallbackConfig {
        &self.config
    }

    /// Deliver a decision; `true` once any attempt gets a 2xx response
    pub async fn dispatch(
        &self,
        decision: &AuthorizationDecision,
        callback_url: &str,
        driver_token: &str,
    ) -> bool {
        match self.deliver(decision, callback_url, driver_token).await {
            Ok(attempts) => {
                debug!(
                    request_id = %decision.request_id,
                    attempts,
                    "Callback delivered"
                );
                true
            }
            Err(e) => {
                warn!(
                    request_id = %decision.request_id,
                    callback_url = %callback_url,
                    error = %e,
                    "Callback delivery abandoned"
                );
                false
            }
        }
    }

    /// Deliver a decision, returning the number of attempts it took
    ///
    /// Fails with [`PipelineError::CallbackDelivery`] once every attempt has
    /// failed.
    pub async fn deliver(
        &self,
        decision: &AuthorizationDecision,
        callback_url: &str,
        driver_token: &str,
    ) -> Result<u32> {
        let payload = CallbackPayload::new(decision, driver_token);
        let max_attempts = self.config.max_retries.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(callback_url, &payload).await {
                Attempt::Delivered(status) => {
                    self.metrics.increment(category::CALLBACK, "success");
                    debug!(
                        request_id = %decision.request_id,
                        attempt,
                        status = status.as_u16(),
                        "Callback attempt succeeded"
                    );
                    return Ok(attempt);
                }
                Attempt::HttpError(status) => {
                    self.metrics.increment(category::CALLBACK, "http_error");
                    last_failure = format!("HTTP {}", status.as_u16());
                }
                Attempt::NetworkError(reason) => {
                    self.metrics.increment(category::CALLBACK, "network_error");
                    last_failure = reason;
                }
            }

            warn!(
                request_id = %decision.request_id,
                attempt,
                max_attempts,
                reason = %last_failure,
                "Callback attempt failed"
            );

            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(self.config.base_delay, attempt)).await;
            }
        }

        self.metrics.increment(category::CALLBACK, "max_retries_exceeded");

        Err(PipelineError::CallbackDelivery {
            attempts: max_attempts,
            reason: last_failure,
        })
    }

    async fn attempt(&self, callback_url: &str, payload: &CallbackPayload) -> Attempt {
        match self.client.post(callback_url).json(payload).send().await {
            Ok(response) if response.status().is_success() => Attempt::Delivered(response.status()),
            Ok(response) => Attempt::HttpError(response.status()),
            Err(e) => Attempt::NetworkError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let delay = backoff_delay(Duration::from_secs(1), u32::MAX);
        assert!(delay >= Duration::from_secs(1 << 31));
    }

    #[test]
    fn test_config_from_section() {
        let config = CallbackConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert!(config.user_agent.starts_with("voltgate/"));
    }

    #[tokio::test]
    async fn test_unreachable_url_counts_network_errors() {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let config = CallbackConfig {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            ..CallbackConfig::default()
        };
        let dispatcher = CallbackDispatcher::new(config, metrics.clone()).unwrap();
        let request = crate::types::ChargingRequest::new("station-1", "token", "http://127.0.0.1:1/cb");
        let decision = AuthorizationDecision::new(
            &request,
            crate::types::AuthorizationStatus::Allowed,
            None,
            1,
        );

        let delivered = dispatcher
            .dispatch(&decision, &request.callback_url, &request.driver_token)
            .await;

        assert!(!delivered);
        assert_eq!(metrics.counter(category::CALLBACK, "network_error"), 2);
        assert_eq!(metrics.counter(category::CALLBACK, "max_retries_exceeded"), 1);
    }
}
