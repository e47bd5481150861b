//! Core pipeline types: requests, decisions, callback payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A charging authorization request accepted at admission
///
/// The admission layer has already validated `station_id`, `driver_token`
/// and `callback_url` before this value is built.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChargingRequest {
    /// Unique request identifier, generated at admission
    pub request_id: Uuid,

    /// Charging station identifier (UUID-shaped)
    pub station_id: String,

    /// Driver credential checked against the ACL
    pub driver_token: String,

    /// Where the decision is delivered
    pub callback_url: String,

    /// Admission timestamp
    pub enqueued_at: DateTime<Utc>,
}

impl ChargingRequest {
    /// Create a new request with a fresh id and the current timestamp
    pub fn new(
        station_id: impl Into<String>,
        driver_token: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            station_id: station_id.into(),
            driver_token: driver_token.into(),
            callback_url: callback_url.into(),
            enqueued_at: Utc::now(),
        }
    }
}

// The driver token stays out of Debug output so it never reaches the logs.
impl fmt::Debug for ChargingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChargingRequest")
            .field("request_id", &self.request_id)
            .field("station_id", &self.station_id)
            .field("driver_token", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    /// Driver token is in the ACL
    Allowed,
    /// Driver token is not in the ACL
    NotAllowed,
    /// Timeout, open circuit or internal error
    Unknown,
    /// Request could not be evaluated
    Invalid,
}

impl AuthorizationStatus {
    pub const ALL: [AuthorizationStatus; 4] = [
        AuthorizationStatus::Allowed,
        AuthorizationStatus::NotAllowed,
        AuthorizationStatus::Unknown,
        AuthorizationStatus::Invalid,
    ];

    /// Lower-case wire form used in callbacks and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Allowed => "allowed",
            AuthorizationStatus::NotAllowed => "not_allowed",
            AuthorizationStatus::Unknown => "unknown",
            AuthorizationStatus::Invalid => "invalid",
        }
    }

    /// Upper-case form written to the audit trail
    pub fn as_audit_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Allowed => "ALLOWED",
            AuthorizationStatus::NotAllowed => "NOT_ALLOWED",
            AuthorizationStatus::Unknown => "UNKNOWN",
            AuthorizationStatus::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_audit_str())
    }
}

/// Authorization decision for one request
///
/// Deliberately has no driver token field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub request_id: Uuid,
    pub station_id: String,
    pub status: AuthorizationStatus,
    pub reason: Option<String>,
    pub processing_time_ms: u64,
    pub decided_at: DateTime<Utc>,
}

impl AuthorizationDecision {
    pub fn new(
        request: &ChargingRequest,
        status: AuthorizationStatus,
        reason: Option<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id: request.request_id,
            station_id: request.station_id.clone(),
            status,
            reason,
            processing_time_ms,
            decided_at: Utc::now(),
        }
    }
}

/// JSON body posted to the caller's callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub station_id: String,
    pub driver_token: String,
    pub status: String,
}

impl CallbackPayload {
    pub fn new(decision: &AuthorizationDecision, driver_token: &str) -> Self {
        Self {
            station_id: decision.station_id.clone(),
            driver_token: driver_token.to_string(),
            status: decision.status.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requests_get_unique_ids() {
        let a = ChargingRequest::new("station", "token", "http://localhost/cb");
        let b = ChargingRequest::new("station", "token", "http://localhost/cb");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_debug_redacts_token() {
        let request = ChargingRequest::new("station", "super-secret-token-value", "http://cb");
        let debug = format!("{:?}", request);
        assert!(!debug.contains("super-secret-token-value"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_callback_payload_lowercases_status() {
        let request = ChargingRequest::new("station-1", "token-1", "http://cb");
        let decision = AuthorizationDecision::new(&request, AuthorizationStatus::NotAllowed, None, 3);
        let payload = CallbackPayload::new(&decision, &request.driver_token);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "not_allowed");
        assert_eq!(json["station_id"], "station-1");
        assert_eq!(json["driver_token"], "token-1");
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_decision_serializes_without_token() {
        let request = ChargingRequest::new("station-1", "token-abc", "http://cb");
        let decision = AuthorizationDecision::new(&request, AuthorizationStatus::Allowed, None, 1);
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("token-abc"));
        assert!(json.contains("\"ALLOWED\""));
    }
}
