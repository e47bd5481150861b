//! Pipeline assembly
//!
//! [`Pipeline`] owns one instance of every component, wired together from a
//! [`PipelineConfig`]. There is no process-wide state: tests and the server
//! each build their own pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::acl::{AclStore, InMemoryAcl};
use crate::audit::{AuditLog, CsvAuditLog, MemoryAuditLog};
use crate::callback::{CallbackConfig, CallbackDispatcher};
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitConfig, CircuitStats};
use crate::config::{AuditSection, PipelineConfig};
use crate::engine::{AuthorizationEngine, EngineConfig};
use crate::error::{PipelineError, Result};
use crate::health::{HealthAggregator, HealthReport};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::processor::{PipelineProcessor, ProcessorConfig, ProcessorState};
use crate::queue::{InMemoryWorkQueue, WorkQueue};
use crate::types::ChargingRequest;

/// Queue occupancy
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub capacity: usize,
}

/// Operator view of the whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub processor: ProcessorState,
    pub workers: usize,
    pub queue: QueueStatus,
    pub metrics: MetricsSnapshot,
    pub circuit_breakers: BTreeMap<String, CircuitStats>,
    pub health: HealthReport,
    pub timestamp: DateTime<Utc>,
}

/// Fully wired authorization pipeline
pub struct Pipeline {
    config: PipelineConfig,
    metrics: Arc<MetricsRegistry>,
    queue: Arc<dyn WorkQueue>,
    breakers: Arc<CircuitBreakerRegistry>,
    engine: Arc<AuthorizationEngine>,
    audit: Arc<dyn AuditLog>,
    processor: PipelineProcessor,
    health: HealthAggregator,
}

impl Pipeline {
    /// Build a pipeline whose ACL is the configured token list
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let acl = Arc::new(InMemoryAcl::from_tokens(config.acl.tokens.iter().cloned()));
        Self::new(config, acl)
    }

    /// Build a pipeline around an ACL store, with the configured audit sink
    pub fn new(config: PipelineConfig, acl: Arc<dyn AclStore>) -> Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new()?);

        let audit: Arc<dyn AuditLog> = match &config.audit {
            AuditSection::File { path } => Arc::new(CsvAuditLog::open(path, metrics.clone())?),
            AuditSection::Memory => Arc::new(MemoryAuditLog::new()),
        };

        Self::with_components(config, acl, audit, metrics)
    }

    /// Build a pipeline with an explicit audit sink and metrics registry
    pub fn with_components(
        config: PipelineConfig,
        acl: Arc<dyn AclStore>,
        audit: Arc<dyn AuditLog>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new(
            config.queue.max_size,
            config.queue.enqueue_timeout(),
            metrics.clone(),
        ));

        let breakers = Arc::new(CircuitBreakerRegistry::with_metrics(
            CircuitConfig::from(&config.circuit_breaker),
            metrics.clone(),
        ));

        let engine = Arc::new(AuthorizationEngine::new(
            EngineConfig::from(&config.authorization),
            acl,
            &breakers,
            metrics.clone(),
        ));

        let dispatcher = Arc::new(CallbackDispatcher::new(
            CallbackConfig::from(&config.callback),
            metrics.clone(),
        )?);

        let processor = PipelineProcessor::new(
            ProcessorConfig::from(&config.processor),
            queue.clone(),
            engine.clone(),
            audit.clone(),
            dispatcher,
            metrics.clone(),
        );

        let health = HealthAggregator::new(config.health.clone(), queue.capacity(), metrics.clone());

        info!(
            queue_capacity = queue.capacity(),
            workers = config.processor.workers,
            "Authorization pipeline assembled"
        );

        Ok(Self {
            config,
            metrics,
            queue,
            breakers,
            engine,
            audit,
            processor,
            health,
        })
    }

    /// Create and enqueue a request for the given inputs
    ///
    /// Fails only with [`PipelineError::QueueFull`] (or an internal error if
    /// the queue has been torn down).
    pub async fn submit(
        &self,
        station_id: impl Into<String>,
        driver_token: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Result<ChargingRequest> {
        let request = ChargingRequest::new(station_id, driver_token, callback_url);
        self.queue.enqueue(request.clone()).await?;
        Ok(request)
    }

    /// Enqueue a prepared request; false means the caller should retry later
    pub async fn enqueue(&self, request: ChargingRequest) -> bool {
        let request_id = request.request_id;
        match self.queue.enqueue(request).await {
            Ok(()) => true,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Request not admitted");
                false
            }
        }
    }

    pub fn start(&self) -> bool {
        self.processor.start()
    }

    pub async fn stop(&self) {
        self.processor.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.processor.is_running()
    }

    pub fn health(&self) -> HealthReport {
        self.health.check()
    }

    /// Counters, health, processor state and breaker stats in one read
    pub fn snapshot(&self) -> StatusSnapshot {
        let metrics = self.metrics.snapshot();
        let health = self.health.evaluate(&metrics);

        StatusSnapshot {
            processor: self.processor.state(),
            workers: self.processor.config().workers,
            queue: QueueStatus {
                depth: self.queue.len(),
                capacity: self.queue.capacity(),
            },
            metrics,
            circuit_breakers: self.breakers.all_stats().into_iter().collect(),
            health,
            timestamp: Utc::now(),
        }
    }

    /// Prometheus text exposition of every pipeline metric
    pub fn export_prometheus(&self) -> Result<String> {
        self.metrics.export_prometheus()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    pub fn processor(&self) -> &PipelineProcessor {
        &self.processor
    }
}
