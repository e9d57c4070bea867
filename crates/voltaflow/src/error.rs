use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::tracking::TrackingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Tracking(TrackingError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Tracking(err) => write!(f, "tracking error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Tracking(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Tracking(ref err) => match err {
                TrackingError::ValidationFailed(_) | TrackingError::ConsentInvalid(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                TrackingError::InvalidTransition { .. } | TrackingError::VersionConflict { .. } => {
                    StatusCode::CONFLICT
                }
                TrackingError::NotFound(_) | TrackingError::ExternalDataAbsent(_) => {
                    StatusCode::NOT_FOUND
                }
                TrackingError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                TrackingError::ConsentExpired(_) => StatusCode::GONE,
                TrackingError::Unauthorized => StatusCode::UNAUTHORIZED,
                TrackingError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<TrackingError> for AppError {
    fn from(value: TrackingError) -> Self {
        Self::Tracking(value)
    }
}
