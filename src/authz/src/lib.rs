//! # VoltGate Authorization Pipeline
//!
//! Asynchronous EV-charging authorization: requests are admitted into a
//! bounded queue and acknowledged immediately, then background workers
//! authorize them against an ACL, audit the decision and deliver it to the
//! caller's callback URL.
//!
//! ## Features
//!
//! - **Bounded admission** with a typed `QueueFull` backpressure signal
//! - **Timeout and circuit breaker** around every ACL lookup
//! - **Retrying callbacks** with exponential backoff
//! - **Audit trail** that never stores raw driver tokens
//! - **Prometheus metrics** and a threshold-based health verdict
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltgate_authz::{Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = PipelineConfig::default();
//!     config.acl.tokens.push("ABCD-efgh1234567890_~valid.token".to_string());
//!
//!     let pipeline = Pipeline::from_config(config)?;
//!     pipeline.start();
//!
//!     let request = pipeline
//!         .submit(
//!             "8a4f2c1e-0c5b-4c7e-9a0e-3f1d2b6a7c90",
//!             "ABCD-efgh1234567890_~valid.token",
//!             "https://csms.example.com/callbacks",
//!         )
//!         .await?;
//!     println!("accepted {}", request.request_id);
//!
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

pub mod acl;
pub mod audit;
pub mod callback;
pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod types;

// Re-export commonly used types
pub use acl::{AclStore, InMemoryAcl};
pub use audit::{hash_token, AuditEntry, AuditLog, CsvAuditLog, MemoryAuditLog};
pub use callback::{backoff_delay, CallbackConfig, CallbackDispatcher};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitConfig, CircuitState, CircuitStats};
pub use config::PipelineConfig;
pub use engine::{AuthorizationEngine, EngineConfig, AUTHORIZATION_RESOURCE};
pub use error::{PipelineError, Result};
pub use health::{ComponentHealth, HealthAggregator, HealthReport, HealthStatus};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use pipeline::{Pipeline, StatusSnapshot};
pub use processor::{PipelineProcessor, ProcessedRequest, ProcessorConfig, ProcessorState};
pub use queue::{InMemoryWorkQueue, WorkQueue};
pub use types::{AuthorizationDecision, AuthorizationStatus, CallbackPayload, ChargingRequest};
