//! Authorization engine
//!
//! Turns a [`ChargingRequest`] into an [`AuthorizationDecision`]. The ACL
//! lookup is bounded by a timeout and optionally guarded by the
//! `"authorization"` circuit breaker. Every outcome, including timeouts,
//! open circuits and lookup failures, resolves to a decision; `authorize`
//! never returns an error.
//!
//! ```text
//! Request → [validity check] → CircuitBreaker → timeout(ACL lookup) → Decision
//!                                                                       ↓
//!                                                                   [Metrics]
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::acl::AclStore;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::config::AuthorizationSection;
use crate::error::{PipelineError, Result};
use crate::metrics::{category, MetricsRegistry};
use crate::types::{AuthorizationDecision, AuthorizationStatus, ChargingRequest};

/// Circuit breaker resource name for ACL lookups
pub const AUTHORIZATION_RESOURCE: &str = "authorization";

pub const REASON_NOT_IN_ACL: &str = "Driver not in ACL";
pub const REASON_TIMEOUT: &str = "Authorization service timeout";
pub const REASON_CIRCUIT_OPEN: &str = "Authorization circuit open";
pub const REASON_INVALID: &str = "Invalid request";

/// Authorization engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on one ACL lookup
    pub timeout: Duration,

    /// Guard lookups with the "authorization" circuit breaker
    pub use_circuit_breaker: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            use_circuit_breaker: true,
        }
    }
}

impl From<&AuthorizationSection> for EngineConfig {
    fn from(section: &AuthorizationSection) -> Self {
        Self {
            timeout: section.timeout(),
            use_circuit_breaker: section.use_circuit_breaker,
        }
    }
}

/// ACL-backed authorization engine
pub struct AuthorizationEngine {
    acl: Arc<dyn AclStore>,
    breaker: Option<Arc<CircuitBreaker>>,
    metrics: Arc<MetricsRegistry>,
    config: EngineConfig,
}

impl AuthorizationEngine {
    /// Create an engine; the breaker is taken from `breakers` when enabled
    pub fn new(
        config: EngineConfig,
        acl: Arc<dyn AclStore>,
        breakers: &CircuitBreakerRegistry,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let breaker = config
            .use_circuit_breaker
            .then(|| breakers.get(AUTHORIZATION_RESOURCE));

        info!(
            timeout_ms = config.timeout.as_millis() as u64,
            circuit_breaker = config.use_circuit_breaker,
            "AuthorizationEngine initialized"
        );

        Self {
            acl,
            breaker,
            metrics,
            config,
        }
    }

    /// Decide one request
    pub async fn authorize(&self, request: &ChargingRequest) -> AuthorizationDecision {
        let start = Instant::now();

        if request.station_id.trim().is_empty() || request.driver_token.trim().is_empty() {
            return self.finalize(
                request,
                AuthorizationStatus::Invalid,
                Some(REASON_INVALID.to_string()),
                elapsed_ms(start),
                start,
            );
        }

        let (status, reason, processing_time_ms) = match self.lookup(&request.driver_token).await {
            Ok(true) => (AuthorizationStatus::Allowed, None, elapsed_ms(start)),
            Ok(false) => (
                AuthorizationStatus::NotAllowed,
                Some(REASON_NOT_IN_ACL.to_string()),
                elapsed_ms(start),
            ),
            Err(PipelineError::AuthorizationTimeout(timeout)) => {
                warn!(
                    request_id = %request.request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Authorization lookup timed out"
                );
                (
                    AuthorizationStatus::Unknown,
                    Some(REASON_TIMEOUT.to_string()),
                    timeout.as_millis() as u64,
                )
            }
            Err(PipelineError::CircuitOpen(resource)) => {
                warn!(
                    request_id = %request.request_id,
                    resource = %resource,
                    "Authorization skipped, circuit open"
                );
                (
                    AuthorizationStatus::Unknown,
                    Some(REASON_CIRCUIT_OPEN.to_string()),
                    elapsed_ms(start),
                )
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Authorization lookup failed");
                (
                    AuthorizationStatus::Unknown,
                    Some(format!("Authorization error: {}", e)),
                    elapsed_ms(start),
                )
            }
        };

        self.finalize(request, status, reason, processing_time_ms, start)
    }

    /// The breaker this engine reports to, if enabled
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn lookup(&self, driver_token: &str) -> Result<bool> {
        let timeout = self.config.timeout;
        let bounded = || async move {
            match tokio::time::timeout(timeout, self.acl.contains(driver_token)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::AuthorizationTimeout(timeout)),
            }
        };

        match &self.breaker {
            Some(breaker) => breaker.call(bounded).await,
            None => bounded().await,
        }
    }

    fn finalize(
        &self,
        request: &ChargingRequest,
        status: AuthorizationStatus,
        reason: Option<String>,
        processing_time_ms: u64,
        start: Instant,
    ) -> AuthorizationDecision {
        self.metrics.increment(category::AUTHORIZATION, status.as_str());
        self.metrics.record_authorization_latency(start.elapsed());

        debug!(
            request_id = %request.request_id,
            station_id = %request.station_id,
            status = %status,
            processing_time_ms,
            "Authorization decided"
        );

        AuthorizationDecision::new(request, status, reason, processing_time_ms)
    }
}

/// Elapsed time rounded up to whole milliseconds
fn elapsed_ms(start: Instant) -> u64 {
    let nanos = start.elapsed().as_nanos().max(1);
    nanos.div_ceil(1_000_000) as u64
}
