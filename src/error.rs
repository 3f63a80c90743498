use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::device::DeviceId;
use crate::registry::ConfigViolations;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Device not found: {0}")]
    NotFoundDevice(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid device configuration: {0}")]
    InvalidConfig(ConfigViolations),
    #[error("Pin {pin} unavailable: {reason}")]
    PinUnavailable { pin: u32, reason: String },
    #[error("Actuation failed on pin {pin}: {reason}")]
    Actuation { pin: u32, reason: String },
    #[error("Device '{name}' ({id}): {source}")]
    Device {
        id: DeviceId,
        name: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Attaches device identity to a backend error.
    pub fn for_device(self, id: &DeviceId, name: &str) -> Self {
        match self {
            err @ AppError::Device { .. } => err,
            err => AppError::Device {
                id: id.clone(),
                name: name.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFoundDevice(_) => "not_found",
            AppError::InvalidValue(_) => "invalid_value",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Config(_) | AppError::InvalidConfig(_) => "config",
            AppError::PinUnavailable { .. } => "pin_unavailable",
            AppError::Actuation { .. } => "actuation",
            AppError::Device { source, .. } => source.kind(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundDevice(_) => StatusCode::NOT_FOUND,
            AppError::InvalidValue(_) | AppError::InvalidState(_) | AppError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PinUnavailable { .. } => StatusCode::CONFLICT,
            AppError::Config(_) | AppError::Actuation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Device { source, .. } => source.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Device { id, name, .. } => json!({
                "error": self.to_string(),
                "kind": self.kind(),
                "device": { "id": id, "name": name },
            }),
            AppError::InvalidConfig(violations) => json!({
                "error": self.to_string(),
                "kind": self.kind(),
                "violations": violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
            _ => json!({ "error": self.to_string(), "kind": self.kind() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
