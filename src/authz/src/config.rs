//! Pipeline configuration loading and validation
//!
//! All durations are expressed in milliseconds. Every section is optional in
//! the TOML file and falls back to its defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueSection,
    pub processor: ProcessorSection,
    pub authorization: AuthorizationSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub callback: CallbackSection,
    pub audit: AuditSection,
    pub health: HealthSection,
    pub acl: AclSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_size: usize,
    pub enqueue_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            enqueue_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorSection {
    pub poll_timeout_ms: u64,
    pub workers: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for ProcessorSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 5_000,
            workers: 1,
            shutdown_grace_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationSection {
    pub timeout_ms: u64,
    /// Wrap the ACL lookup in the "authorization" circuit breaker
    pub use_circuit_breaker: bool,
}

impl Default for AuthorizationSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            use_circuit_breaker: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackSection {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub user_agent: String,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            base_delay_ms: 1_000,
            user_agent: format!("voltgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Where audit records go
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "sink", rename_all = "lowercase")]
pub enum AuditSection {
    /// Append CSV records to a file
    File { path: PathBuf },
    /// Keep records in process memory
    Memory,
}

impl Default for AuditSection {
    fn default() -> Self {
        AuditSection::File {
            path: PathBuf::from("authorization_audit.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSection {
    /// Queue is degraded once depth reaches this fraction of capacity
    pub queue_degraded_fraction: f64,
    /// Maximum tolerated share of UNKNOWN decisions
    pub authorization_error_rate: f64,
    /// Maximum tolerated share of failed callback attempts
    pub callback_error_rate: f64,
    /// Error rates only cover outcomes observed within this window
    pub rate_window_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            queue_degraded_fraction: 0.8,
            authorization_error_rate: 0.1,
            callback_error_rate: 0.2,
            rate_window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AclSection {
    /// Driver tokens recognised by the in-memory ACL
    pub tokens: Vec<String>,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {}", path.as_ref().display()))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(contents).context("Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_size == 0 {
            anyhow::bail!("queue.max_size must be greater than 0");
        }

        if self.processor.workers == 0 {
            anyhow::bail!("processor.workers must be at least 1");
        }

        if self.processor.poll_timeout_ms == 0 {
            anyhow::bail!("processor.poll_timeout_ms must be greater than 0");
        }

        if self.authorization.timeout_ms == 0 {
            anyhow::bail!("authorization.timeout_ms must be greater than 0");
        }

        if self.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!("circuit_breaker.failure_threshold must be at least 1");
        }

        if self.callback.max_retries == 0 {
            anyhow::bail!("callback.max_retries must be at least 1");
        }

        if self.callback.timeout_ms == 0 {
            anyhow::bail!("callback.timeout_ms must be greater than 0");
        }

        let fraction = self.health.queue_degraded_fraction;
        if !(0.0..=1.0).contains(&fraction) || fraction == 0.0 {
            anyhow::bail!("health.queue_degraded_fraction must be in (0.0, 1.0]");
        }

        for (name, rate) in [
            ("health.authorization_error_rate", self.health.authorization_error_rate),
            ("health.callback_error_rate", self.health.callback_error_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }

        if self.health.rate_window_ms == 0 {
            anyhow::bail!("health.rate_window_ms must be greater than 0");
        }

        Ok(())
    }
}

impl HealthSection {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}

impl QueueSection {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

impl ProcessorSection {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl AuthorizationSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CircuitBreakerSection {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl CallbackSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}
