use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::UnknownVariant;
use crate::seating::SeatingError;
use crate::services::{booking::BookingError, payment::PaymentError};

/// Error type returned by every HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Seating(#[from] SeatingError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
}

pub type ApiResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Payment(PaymentError::Declined(_)) => StatusCode::PAYMENT_REQUIRED,
            AppError::Payment(_) => StatusCode::BAD_GATEWAY,
            AppError::Seating(SeatingError::NoAvailableSeats) => StatusCode::CONFLICT,
            AppError::Seating(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to the customer.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            AppError::Seating(SeatingError::NoAvailableSeats) => "This trip is sold out".to_string(),
            AppError::Seating(_) => "Seat layout is misconfigured for this trip".to_string(),
            AppError::Payment(PaymentError::CircuitOpen) => {
                "Mobile money provider temporarily unavailable, try again later".to_string()
            }
            AppError::Payment(PaymentError::Transport(_)) => "Mobile money provider error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::TripNotFound | BookingError::BookingNotFound => AppError::NotFound(err.to_string()),
            BookingError::Departed | BookingError::NoSeatsRequested | BookingError::DuplicateSeat(_) => {
                AppError::BadRequest(err.to_string())
            }
            BookingError::AlreadyCancelled
            | BookingError::TooManySeats { .. }
            | BookingError::SeatsUnavailable(_)
            | BookingError::SoldOut => AppError::Conflict(err.to_string()),
            BookingError::Seating(e) => AppError::Seating(e),
            BookingError::Database(e) => AppError::Database(e),
            BookingError::Redis(e) => AppError::Redis(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {:?}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }

        let body = ApiError {
            success: false,
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_statuses() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Seating(SeatingError::NoAvailableSeats).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::Payment(PaymentError::CircuitOpen).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn booking_conflicts_become_409() {
        let err: AppError = BookingError::SeatsUnavailable(vec!["A1".into(), "B2".into()]).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.public_message(), "seats no longer available: A1, B2");

        let err: AppError = BookingError::TripNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_enum_values_are_bad_requests() {
        let err: AppError = "gold".parse::<crate::models::TicketStatus>().unwrap_err().into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::Internal("pool exhausted on db-2".into());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
