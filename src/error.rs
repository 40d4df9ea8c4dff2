use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::conflict::ConflictResource;
use crate::models::{ClassStatus, Id};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },
    #[error("client {client_id} already has a booking for class {class_id}")]
    AlreadyBooked { class_id: Id, client_id: Id },
    #[error("capacity invariant violated on class {class_id}: {detail}")]
    CapacityInvariantViolation { class_id: Id, detail: String },
    #[error("schedule conflict: the {resource} is already taken by class {class_id}")]
    ConflictDetected {
        resource: ConflictResource,
        class_id: Id,
    },
    #[error("{0}")]
    PolicyViolation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("class {class_id} is {status:?} and cannot be booked")]
    NotBookable { class_id: Id, status: ClassStatus },
    #[error("{0}")]
    InUse(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl Into<Id>) -> Self {
        BookingError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::NotFound { .. } => ApiError::NotFound(value.to_string()),
            BookingError::AlreadyBooked { .. }
            | BookingError::ConflictDetected { .. }
            | BookingError::NotBookable { .. }
            | BookingError::InUse(_) => ApiError::Conflict(value.to_string()),
            BookingError::PolicyViolation(_) => ApiError::Unprocessable(value.to_string()),
            BookingError::Forbidden(msg) => ApiError::Forbidden(msg),
            BookingError::Validation(msg) => ApiError::BadRequest(msg),
            BookingError::CapacityInvariantViolation { .. } => {
                error!("Refused mutation: {value}");
                ApiError::Internal("Booking state is inconsistent".into())
            }
            BookingError::Storage(err) => {
                error!("Storage error: {err}");
                ApiError::Internal("Storage unavailable".into())
            }
        }
    }
}
