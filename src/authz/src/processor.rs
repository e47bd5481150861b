//! Background processing loop
//!
//! Each worker repeatedly dequeues a request and drives it through
//! authorize → audit → dispatch. The audit write happens before dispatch so
//! the decision is recorded whatever happens to the callback. A panic in any
//! stage is caught and logged; the worker moves on to the next item.
//!
//! Workers only observe cancellation while waiting in `dequeue`, so an item
//! that has been taken off the queue is always finished.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::callback::CallbackDispatcher;
use crate::config::ProcessorSection;
use crate::engine::AuthorizationEngine;
use crate::metrics::{category, MetricsRegistry};
use crate::queue::WorkQueue;
use crate::types::{AuthorizationDecision, AuthorizationStatus, ChargingRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessorState {
    Stopped,
    Running,
}

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Longest a worker waits in `dequeue` before re-checking cancellation
    pub poll_timeout: Duration,
    pub workers: usize,
    /// How long `stop` waits for in-flight items
    pub shutdown_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        (&ProcessorSection::default()).into()
    }
}

impl From<&ProcessorSection> for ProcessorConfig {
    fn from(section: &ProcessorSection) -> Self {
        Self {
            poll_timeout: section.poll_timeout(),
            workers: section.workers,
            shutdown_grace: section.shutdown_grace(),
        }
    }
}

/// Outcome of one processing cycle
#[derive(Debug, Clone)]
pub struct ProcessedRequest {
    pub decision: AuthorizationDecision,
    pub delivered: bool,
    /// A stage panicked and was isolated
    pub failed: bool,
}

/// Everything a worker needs to process one item
struct Stages {
    queue: Arc<dyn WorkQueue>,
    engine: Arc<AuthorizationEngine>,
    audit: Arc<dyn AuditLog>,
    dispatcher: Arc<CallbackDispatcher>,
    metrics: Arc<MetricsRegistry>,
}

struct Workers {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Drives queued requests through the pipeline on background tasks
pub struct PipelineProcessor {
    stages: Arc<Stages>,
    config: ProcessorConfig,
    workers: Mutex<Option<Workers>>,
}

impl PipelineProcessor {
    pub fn new(
        config: ProcessorConfig,
        queue: Arc<dyn WorkQueue>,
        engine: Arc<AuthorizationEngine>,
        audit: Arc<dyn AuditLog>,
        dispatcher: Arc<CallbackDispatcher>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            stages: Arc::new(Stages {
                queue,
                engine,
                audit,
                dispatcher,
                metrics,
            }),
            config,
            workers: Mutex::new(None),
        }
    }

    /// Spawn the worker loops; returns false if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            warn!("Pipeline processor already running, ignoring start");
            return false;
        }

        let token = CancellationToken::new();
        let count = self.config.workers.max(1);
        let handles = (0..count)
            .map(|worker_id| {
                let stages = self.stages.clone();
                let token = token.clone();
                let poll_timeout = self.config.poll_timeout;
                tokio::spawn(async move { stages.run(worker_id, token, poll_timeout).await })
            })
            .collect();

        *workers = Some(Workers { token, handles });
        info!(workers = count, "Pipeline processor started");
        true
    }

    /// Signal cancellation and wait up to the grace period for workers
    pub async fn stop(&self) {
        let Some(workers) = self.workers.lock().take() else {
            debug!("Pipeline processor already stopped");
            return;
        };

        info!("Stopping pipeline processor");
        workers.token.cancel();

        let joined = tokio::time::timeout(
            self.config.shutdown_grace,
            futures::future::join_all(workers.handles),
        )
        .await;

        match joined {
            Ok(results) => {
                for result in results.into_iter().filter_map(|r| r.err()) {
                    error!(error = %result, "Pipeline worker terminated abnormally");
                }
                info!("Pipeline processor stopped");
            }
            Err(_) => warn!(
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "Shutdown grace period elapsed, detaching in-flight workers"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    pub fn state(&self) -> ProcessorState {
        if self.is_running() {
            ProcessorState::Running
        } else {
            ProcessorState::Stopped
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one request through the pipeline on the current task
    pub async fn process(&self, request: ChargingRequest) -> ProcessedRequest {
        self.stages.process(request).await
    }
}

impl Stages {
    async fn run(&self, worker_id: usize, token: CancellationToken, poll_timeout: Duration) {
        debug!(worker_id, "Pipeline worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = self.queue.dequeue(poll_timeout) => next,
            };

            if let Some(request) = next {
                self.process(request).await;
            }
        }

        debug!(worker_id, "Pipeline worker exited");
    }

    async fn process(&self, request: ChargingRequest) -> ProcessedRequest {
        let request_id = request.request_id;
        let mut failed = false;

        let decision = match isolate(self.engine.authorize(&request)).await {
            Ok(decision) => decision,
            Err(panic) => {
                failed = true;
                error!(request_id = %request_id, panic = %panic, "Authorization stage panicked");
                AuthorizationDecision::new(
                    &request,
                    AuthorizationStatus::Unknown,
                    Some(format!("Processing error: {}", panic)),
                    0,
                )
            }
        };

        if let Err(panic) = isolate(self.audit.record(&request, &decision)).await {
            failed = true;
            self.metrics.increment(category::AUDIT, "write_error");
            error!(request_id = %request_id, panic = %panic, "Audit stage panicked");
        }

        let delivered = match isolate(self.dispatcher.dispatch(
            &decision,
            &request.callback_url,
            &request.driver_token,
        ))
        .await
        {
            Ok(delivered) => delivered,
            Err(panic) => {
                failed = true;
                error!(request_id = %request_id, panic = %panic, "Callback stage panicked");
                false
            }
        };

        if failed {
            self.metrics.increment(category::PIPELINE, "failed");
        } else {
            self.metrics.increment(category::PIPELINE, "processed");
        }

        debug!(
            request_id = %request_id,
            status = %decision.status,
            delivered,
            "Request processed"
        );

        ProcessedRequest {
            decision,
            delivered,
            failed,
        }
    }
}

/// Await `fut`, turning a panic into its message
async fn isolate<F: Future>(fut: F) -> std::result::Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
