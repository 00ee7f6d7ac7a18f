use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use broker_bus::BrokerError;
use diet_proto::{FieldViolation, ValidationError};
use serde_json::json;
use thiserror::Error;

/// Where a publish call was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Serializing,
    Publishing,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::Serializing => "serializing",
            PublishStage::Publishing => "publishing",
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("broker could not route message to {target}")]
    Unroutable { target: String },
}

impl PublishError {
    pub fn stage(&self) -> PublishStage {
        match self {
            PublishError::Serialization(_) => PublishStage::Serializing,
            PublishError::Broker(_) | PublishError::Unroutable { .. } => PublishStage::Publishing,
        }
    }

    /// Serialization and routing failures are contract errors; only broker
    /// transport trouble is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Broker(err) => err.is_retryable(),
            PublishError::Serialization(_) | PublishError::Unroutable { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("broker connection failed: {0}")]
    Connect(#[source] BrokerError),
    #[error("topology provisioning failed: {0}")]
    Topology(#[source] BrokerError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Failures surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Malformed(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Publish(err) if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Malformed(reason) => json!({
                "errors": [FieldViolation { field: "body", message: reason.clone() }]
            }),
            ApiError::Validation(err) => json!({ "errors": err.violations }),
            ApiError::Publish(err) => json!({
                "error": err.to_string(),
                "retryable": err.is_retryable(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn transport_failures_are_retryable_5xx() {
        let err = ApiError::from(PublishError::from(BrokerError::Timeout(Duration::from_secs(5))));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn contract_failures_are_plain_5xx() {
        let unroutable = PublishError::Unroutable {
            target: "queue:userParams".into(),
        };
        assert_eq!(unroutable.stage(), PublishStage::Publishing);
        assert_eq!(
            ApiError::from(unroutable).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let conflict = PublishError::from(BrokerError::UnknownExchange("gone".into()));
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn serialization_failures_report_their_stage() {
        let err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
        let err = PublishError::from(err);
        assert_eq!(err.stage(), PublishStage::Serializing);
        assert!(!err.is_retryable());
    }
}
