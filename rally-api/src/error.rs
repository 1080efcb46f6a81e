use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rally_core::member::MemberError;
use rally_core::payment::PaymentError;
use rally_core::slot::SlotError;
use rally_engine::{BookingError, RegistryError, ScheduleError, SeriesError};
use serde_json::json;

/// HTTP-facing error. The `error` field in the body carries a stable
/// machine-readable code, `message` the human-readable detail.
#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    InvalidToken(String),
    SlotConflict(String),
    AlreadyConfirmed(String),
    AlreadyPaid(String),
    NotFoundError(String),
    AuthenticationError(String),
    MembershipInactive(String),
    PaymentNotCompleted(String),
    ExternalServiceError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "ValidationError", msg),
            AppError::InvalidToken(msg) => (StatusCode::BAD_REQUEST, "InvalidToken", msg),
            AppError::SlotConflict(msg) => (StatusCode::CONFLICT, "SlotConflict", msg),
            AppError::AlreadyConfirmed(msg) => (StatusCode::CONFLICT, "AlreadyConfirmed", msg),
            AppError::AlreadyPaid(msg) => (StatusCode::BAD_REQUEST, "AlreadyPaid", msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "NotFound", msg),
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized", msg),
            AppError::MembershipInactive(msg) => (StatusCode::FORBIDDEN, "MembershipInactive", msg),
            AppError::PaymentNotCompleted(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "PaymentNotCompleted", msg)
            }
            AppError::ExternalServiceError(msg) => {
                tracing::error!("External service error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ExternalServiceError",
                    msg,
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::Slot(SlotError::Conflict(key)) => {
                AppError::SlotConflict(format!("Slot already taken: {}", key))
            }
            BookingError::Slot(e) => AppError::Anyhow(anyhow::anyhow!(e)),
            BookingError::InvalidToken => {
                AppError::InvalidToken("Invalid or expired confirmation token".into())
            }
            BookingError::NotFound(id) => AppError::NotFoundError(format!("Booking {}", id)),
            BookingError::AlreadyConfirmed(id) => {
                AppError::AlreadyConfirmed(format!("Booking {} is already confirmed", id))
            }
            BookingError::AlreadyCancelled(id) => {
                AppError::ValidationError(format!("Booking {} is cancelled", id))
            }
            BookingError::Member(e) => member_error(e),
            BookingError::Storage(msg) => AppError::Anyhow(anyhow::anyhow!(msg)),
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotFound(id) => AppError::NotFoundError(format!("Booking {}", id)),
            ScheduleError::AlreadyPaid(id) => {
                AppError::AlreadyPaid(format!("Booking {} is already paid", id))
            }
            ScheduleError::Storage(msg) => AppError::Anyhow(anyhow::anyhow!(msg)),
        }
    }
}

impl From<SeriesError> for AppError {
    fn from(err: SeriesError) -> Self {
        match err {
            SeriesError::NotFound(id) => AppError::NotFoundError(format!("Series {}", id)),
            SeriesError::EmptySeries => {
                AppError::ValidationError("Recurrence rule expands to no dates".into())
            }
            SeriesError::Storage(msg) => AppError::Anyhow(anyhow::anyhow!(msg)),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Member(e) => member_error(e),
            RegistryError::Payment(e) => payment_error(e),
            RegistryError::Validation(msg) => AppError::ValidationError(msg),
            RegistryError::Storage(msg) => AppError::Anyhow(anyhow::anyhow!(msg)),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        payment_error(err)
    }
}

fn member_error(err: MemberError) -> AppError {
    match err {
        MemberError::NotFound(code) => AppError::NotFoundError(format!("Member {}", code)),
        MemberError::Inactive(_) => {
            AppError::MembershipInactive("This membership is no longer active".into())
        }
        MemberError::Storage(msg) => AppError::Anyhow(anyhow::anyhow!(msg)),
    }
}

fn payment_error(err: PaymentError) -> AppError {
    match err {
        PaymentError::NotCompleted(msg) => AppError::PaymentNotCompleted(msg),
        PaymentError::Unsupported => {
            AppError::ValidationError("Operation not supported by this payment rail".into())
        }
        PaymentError::Provider(msg) => AppError::ExternalServiceError(msg),
    }
}
