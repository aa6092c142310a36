use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tripdesk_checkout::{AvailabilityError, CheckoutError, NextStep, Severity};

#[derive(Debug)]
pub enum AppError {
    NotFoundError(String),
    Checkout(CheckoutError),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::Validation(_) | CheckoutError::RosterIncomplete { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::Expired(_) | CheckoutError::SessionClosed => StatusCode::GONE,
        CheckoutError::Availability(AvailabilityError::CheckFailed { .. }) => StatusCode::BAD_GATEWAY,
        CheckoutError::Availability(_)
        | CheckoutError::NoFlightSelected
        | CheckoutError::CommitInFlight
        | CheckoutError::ReservationHeld { .. }
        | CheckoutError::StaleResponse { .. } => StatusCode::CONFLICT,
        CheckoutError::ReservationFailed { .. } | CheckoutError::PaymentSessionFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        CheckoutError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, severity, next_step) = match self {
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, Severity::Info, NextStep::StartOver),
            AppError::Checkout(err) => {
                let severity = err.severity();
                if severity >= Severity::Error {
                    tracing::warn!("Checkout failed ({:?}): {}", severity, err);
                }
                (checkout_status(&err), err.to_string(), severity, err.next_step())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    Severity::Error,
                    NextStep::Retry,
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    Severity::Error,
                    NextStep::Retry,
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "severity": severity,
            "next_step": next_step,
        }));

        (status, body).into_response()
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        Self::Checkout(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
