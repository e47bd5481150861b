//! Bounded work queue decoupling admission from processing
//!
//! The in-memory implementation is backed by a bounded tokio channel. The
//! receiving half sits behind an async mutex so any number of processor
//! workers can consume from the same queue; each item is handed to exactly
//! one of them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::{category, MetricsRegistry};
use crate::types::ChargingRequest;

/// Bounded FIFO buffer of pending charging requests
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a request, waiting a bounded time for space
    ///
    /// Fails with [`PipelineError::QueueFull`] rather than blocking forever.
    async fn enqueue(&self, request: ChargingRequest) -> Result<()>;

    /// Take the oldest request, waiting at most `timeout`
    async fn dequeue(&self, timeout: Duration) -> Option<ChargingRequest>;

    /// Requests currently held
    fn len(&self) -> usize;

    /// Maximum requests held at once
    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory-only work queue; contents are lost on restart
pub struct InMemoryWorkQueue {
    sender: mpsc::Sender<ChargingRequest>,
    receiver: Mutex<mpsc::Receiver<ChargingRequest>>,
    capacity: usize,
    enqueue_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl InMemoryWorkQueue {
    /// Create a queue holding at most `capacity` requests
    pub fn new(capacity: usize, enqueue_timeout: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        metrics.set_queue_depth(0);

        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
            enqueue_timeout,
            metrics,
        }
    }

    fn report_depth(&self) {
        self.metrics.set_queue_depth(self.len());
    }

    fn reject(&self, request: &ChargingRequest) -> PipelineError {
        self.metrics.increment(category::QUEUE, "rejected");
        self.report_depth();
        warn!(
            request_id = %request.request_id,
            capacity = self.capacity,
            "Work queue full, rejecting request"
        );
        PipelineError::QueueFull {
            capacity: self.capacity,
        }
    }

    fn accepted(&self, request_id: uuid::Uuid) {
        self.metrics.increment(category::QUEUE, "enqueued");
        self.report_depth();
        debug!(request_id = %request_id, depth = self.len(), "Request enqueued");
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, request: ChargingRequest) -> Result<()> {
        let request_id = request.request_id;

        let request = match self.sender.try_send(request) {
            Ok(()) => {
                self.accepted(request_id);
                return Ok(());
            }
            Err(TrySendError::Full(request)) => request,
            Err(TrySendError::Closed(_)) => {
                return Err(PipelineError::Internal("work queue closed".to_string()));
            }
        };

        match self.sender.send_timeout(request, self.enqueue_timeout).await {
            Ok(()) => {
                self.accepted(request_id);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(request)) => Err(self.reject(&request)),
            Err(SendTimeoutError::Closed(_)) => {
                Err(PipelineError::Internal("work queue closed".to_string()))
            }
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Option<ChargingRequest> {
        let received = tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await;

        match received {
            Ok(Some(request)) => {
                self.metrics.increment(category::QUEUE, "dequeued");
                self.report_depth();
                Some(request)
            }
            Ok(None) | Err(_) => None,
        }
    }

    fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
