use chrono::{DateTime, Utc};
use serde::Serialize;
use tripdesk_core::TravelerType;
use uuid::Uuid;

use crate::scheduler::SchedulerError;

/// Date of birth does not fit the traveler type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct AgeMismatchError {
    pub traveler_type: TravelerType,
    pub age_years: u32,
    pub reason: String,
}

/// Local input problems. The user corrects the input and retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    AgeMismatch(#[from] AgeMismatchError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Date of birth is not a valid YYYY-MM-DD date: {0}")]
    InvalidDate(String),

    #[error("Date of birth {0} is in the future")]
    DateInFuture(String),

    #[error("Roster is full: the selected flight is priced for {capacity} passengers")]
    RosterFull { capacity: usize },

    #[error("No more {traveler_type} passengers allowed: the selected flight is priced for {allowed}")]
    TravelerTypeFull { traveler_type: TravelerType, allowed: usize },

    #[error("The selected flight is priced for {allowed} {traveler_type} passenger(s) but {entered} are entered; remove some first")]
    RosterExceedsOffer { traveler_type: TravelerType, entered: usize, allowed: usize },

    #[error("The selected flight is priced for {expected} {traveler_type} passenger(s) but {entered} are entered")]
    TravelerMixMismatch { traveler_type: TravelerType, expected: usize, entered: usize },

    #[error("A held infant must be associated with an adult passenger")]
    MissingAssociatedAdult { infant_id: Option<Uuid> },

    #[error("Only held infants can be associated with an adult")]
    UnexpectedAssociatedAdult,

    #[error("Associated adult {0} is not in the roster")]
    AssociatedAdultNotFound(Uuid),

    #[error("Associated passenger {0} is not an adult")]
    AssociatedPassengerNotAdult(Uuid),

    #[error("Associated adult {0} must be entered before the infant")]
    AssociatedAdultNotEarlier(Uuid),

    #[error("Adult {0} already holds another infant")]
    AdultAlreadyAccompanying(Uuid),

    #[error("Adult {adult_id} holds infant {infant_id}; reassign the infant first")]
    AdultHoldsInfant { adult_id: Uuid, infant_id: Uuid },

    #[error("Infant {infant_id} lost its associated adult {adult_id}; choose another adult")]
    OrphanedInfant { infant_id: Uuid, adult_id: Uuid },

    #[error("Passenger {0} not found")]
    PassengerNotFound(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Availability has not been checked for this flight")]
    NotChecked,

    #[error("An availability check is already in progress")]
    CheckInProgress,

    #[error("Availability confirmed at {checked_at} is no longer fresh; check again")]
    Stale { checked_at: DateTime<Utc> },

    #[error("This flight is no longer available: {reason}")]
    Unavailable { reason: String },

    #[error("Availability check failed: {message}")]
    CheckFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryKind {
    FlightHold,
    PassengerRetention,
    AvailabilityFreshness,
}

/// User-visible notice that one of the session windows elapsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryNotice {
    pub kind: ExpiryKind,
    pub expired_at: DateTime<Utc>,
    pub message: String,
}

impl ExpiryNotice {
    pub fn new(kind: ExpiryKind, expired_at: DateTime<Utc>) -> Self {
        let message = match kind {
            ExpiryKind::FlightHold => {
                "Your flight selection has expired. Please search again."
            }
            ExpiryKind::PassengerRetention => {
                "Passenger details were cleared after a period of inactivity. Please enter them again."
            }
            ExpiryKind::AvailabilityFreshness => {
                "Seat availability needs to be confirmed again before payment."
            }
        };
        Self { kind, expired_at, message: message.to_string() }
    }

    /// Flight-hold expiry sends the user back to search
    pub fn redirects_to_search(&self) -> bool {
        self.kind == ExpiryKind::FlightHold
    }

    pub fn next_step(&self) -> NextStep {
        match self.kind {
            ExpiryKind::FlightHold => NextStep::ReSearch,
            ExpiryKind::PassengerRetention => NextStep::CorrectInput,
            ExpiryKind::AvailabilityFreshness => NextStep::Recheck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// What the user can do about an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    CorrectInput,
    ReSearch,
    Recheck,
    Retry,
    Wait,
    StartOver,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("{}", .0.message)]
    Expired(ExpiryNotice),

    #[error("No flight is selected")]
    NoFlightSelected,

    #[error("The selected flight needs {need} passengers but {have} are entered")]
    RosterIncomplete { have: usize, need: usize },

    #[error("A booking is already being committed")]
    CommitInFlight,

    #[error("Reservation {reservation_id} is awaiting payment; passengers cannot be changed")]
    ReservationHeld { reservation_id: String },

    #[error("Reservation failed: {detail}")]
    ReservationFailed { detail: String },

    #[error("Reservation {reservation_id} was created but the payment session failed: {detail}")]
    PaymentSessionFailed { reservation_id: String, detail: String },

    #[error("Checkout session is closed")]
    SessionClosed,

    #[error("Response arrived for a superseded checkout attempt")]
    StaleResponse { reservation_id: Option<String> },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl CheckoutError {
    /// A failed payment session outranks a failed reservation because it
    /// leaves a live unpaid reservation behind.
    pub fn severity(&self) -> Severity {
        match self {
            CheckoutError::PaymentSessionFailed { .. } => Severity::Critical,
            CheckoutError::ReservationFailed { .. } | CheckoutError::Scheduler(_) => Severity::Error,
            CheckoutError::StaleResponse { reservation_id: Some(_) } => Severity::Error,
            CheckoutError::Expired(_) | CheckoutError::Availability(_) => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn next_step(&self) -> NextStep {
        match self {
            CheckoutError::Validation(_) | CheckoutError::RosterIncomplete { .. } => NextStep::CorrectInput,
            CheckoutError::Expired(notice) => notice.next_step(),
            CheckoutError::Availability(AvailabilityError::Unavailable { .. }) => NextStep::ReSearch,
            CheckoutError::Availability(AvailabilityError::CheckInProgress) => NextStep::Wait,
            CheckoutError::Availability(_) => NextStep::Recheck,
            CheckoutError::NoFlightSelected => NextStep::ReSearch,
            CheckoutError::CommitInFlight => NextStep::Wait,
            CheckoutError::ReservationHeld { .. }
            | CheckoutError::ReservationFailed { .. }
            | CheckoutError::PaymentSessionFailed { .. } => NextStep::Retry,
            CheckoutError::SessionClosed
            | CheckoutError::StaleResponse { .. }
            | CheckoutError::Scheduler(_) => NextStep::StartOver,
        }
    }
}
