//! Shared fixtures for the pipeline integration tests
//!
//! Provides ACL stubs with controllable latency and failure behavior, and
//! wiremock responders for callback targets.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use voltgate_authz::error::{PipelineError, Result};
use voltgate_authz::AclStore;
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const VALID_TOKEN: &str = "ABCD-efgh1234567890_~valid.token";
pub const UNKNOWN_TOKEN: &str = "unknownToken12345678901234";
pub const STATION_ID: &str = "8a4f2c1e-0c5b-4c7e-9a0e-3f1d2b6a7c90";

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// ACL stubs
// ---------------------------------------------------------------------------

/// Recognizes a fixed token after an artificial delay
pub struct SlowAcl {
    pub delay: Duration,
    pub calls: AtomicU32,
}

impl SlowAcl {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AclStore for SlowAcl {
    async fn contains(&self, driver_token: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(driver_token == VALID_TOKEN)
    }
}

/// Fails every lookup and counts how often it was asked
#[derive(Default)]
pub struct FailingAcl {
    pub calls: AtomicU32,
}

impl FailingAcl {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AclStore for FailingAcl {
    async fn contains(&self, _driver_token: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::AclLookup("acl backend unavailable".to_string()))
    }
}

/// Panics for one poisoned token, answers normally otherwise
pub struct PanickingAcl {
    pub poisoned: String,
}

#[async_trait]
impl AclStore for PanickingAcl {
    async fn contains(&self, driver_token: &str) -> Result<bool> {
        if driver_token == self.poisoned {
            panic!("acl lookup exploded");
        }
        Ok(driver_token == VALID_TOKEN)
    }
}

// ---------------------------------------------------------------------------
// Callback responders
// ---------------------------------------------------------------------------

/// Records every callback body and answers with a fixed status
#[derive(Clone)]
pub struct CaptureResponder {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    response_code: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            bodies: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null);
        self.bodies.lock().unwrap().push(body);
        ResponseTemplate::new(self.response_code)
    }
}

/// Fails a number of times with a status code, then succeeds
#[derive(Clone)]
pub struct FailingResponder {
    attempts: Arc<AtomicU32>,
    arrivals: Arc<Mutex<Vec<Instant>>>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            arrivals: Arc::new(Mutex::new(Vec::new())),
            failures_before_success: n,
            failure_code: 500,
        }
    }

    pub fn always() -> Self {
        Self::fail_times(u32::MAX)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive attempts
    pub fn intervals(&self) -> Vec<Duration> {
        let arrivals = self.arrivals.lock().unwrap();
        arrivals.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}
