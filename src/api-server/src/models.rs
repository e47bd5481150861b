//! Request and response models for the admission API

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Driver tokens are 20 to 80 URL-safe characters
static DRIVER_TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9\-._~]{20,80}$").expect("DRIVER_TOKEN_PATTERN is a valid regex pattern")
});

/// Charging authorization request body
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AuthorizeChargingRequest {
    /// Charging station identifier (UUID)
    #[schema(example = "8a4f2c1e-0c5b-4c7e-9a0e-3f1d2b6a7c90")]
    #[validate(custom(function = "validate_station_id"))]
    pub station_id: String,

    /// Driver credential
    #[schema(example = "ABCD-efgh1234567890_~valid.token")]
    #[validate(regex(
        path = *DRIVER_TOKEN_PATTERN,
        message = "driver_token must be 20-80 characters of [A-Za-z0-9-._~]"
    ))]
    pub driver_token: String,

    /// Where the decision is POSTed once made
    #[schema(example = "https://csms.example.com/callbacks/authorization")]
    #[validate(
        url(message = "callback_url must be a valid URL"),
        custom(function = "validate_callback_scheme")
    )]
    pub callback_url: String,
}

/// Returned once a request is queued
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeChargingResponse {
    /// Always "accepted"
    pub status: String,
    pub request_id: Uuid,
    pub message: String,
}

impl AuthorizeChargingResponse {
    pub fn accepted(request_id: Uuid) -> Self {
        Self {
            status: "accepted".to_string(),
            request_id,
            message: "Request is being processed asynchronously. The result will be sent to the callback URL."
                .to_string(),
        }
    }
}

/// Error body shared by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

fn validate_station_id(station_id: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(station_id).map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("station_id");
        err.message = Some("station_id must be a valid UUID".into());
        err
    })
}

fn validate_callback_scheme(callback_url: &str) -> Result<(), ValidationError> {
    let lower = callback_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("callback_url");
        err.message = Some("callback_url must use http or https".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AuthorizeChargingRequest {
        AuthorizeChargingRequest {
            station_id: "8a4f2c1e-0c5b-4c7e-9a0e-3f1d2b6a7c90".to_string(),
            driver_token: "ABCD-efgh1234567890_~valid.token".to_string(),
            callback_url: "https://csms.example.com/cb".to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_station_id_must_be_uuid() {
        let mut req = valid();
        req.station_id = "station-42".to_string();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("station_id"));
    }

    #[test]
    fn test_token_length_bounds() {
        let mut req = valid();
        req.driver_token = "a".repeat(19);
        assert!(req.validate().is_err());

        req.driver_token = "a".repeat(20);
        assert!(req.validate().is_ok());

        req.driver_token = "a".repeat(80);
        assert!(req.validate().is_ok());

        req.driver_token = "a".repeat(81);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_token_rejects_other_characters() {
        let mut req = valid();
        req.driver_token = "ABCD efgh1234567890!valid".to_string();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("driver_token"));
    }

    #[test]
    fn test_callback_must_be_http() {
        let mut req = valid();
        req.callback_url = "ftp://csms.example.com/cb".to_string();
        assert!(req.validate().is_err());

        req.callback_url = "not a url".to_string();
        assert!(req.validate().is_err());

        req.callback_url = "http://localhost:9000/cb".to_string();
        assert!(req.validate().is_ok());
    }
}
