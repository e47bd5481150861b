use std::sync::Arc;
use std::time::Instant;
use voltgate_authz::Pipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The authorization pipeline requests are admitted into
    pub pipeline: Arc<Pipeline>,

    /// Server start time for uptime calculation
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
