pub mod error;
pub mod rules;
pub mod scheduler;
pub mod selection;
pub mod validation;
pub mod roster;
pub mod availability;
pub mod orchestrator;
pub mod session;

pub use error::{
    AgeMismatchError, AvailabilityError, CheckoutError, ExpiryKind, ExpiryNotice, NextStep,
    Severity, ValidationError,
};
pub use rules::CheckoutRules;
pub use scheduler::{ExpirationScheduler, SchedulerError, SubscriptionToken};
pub use selection::FlightSelectionHolder;
pub use roster::{PassengerRoster, RemovalOutcome};
pub use availability::{AvailabilityReconciler, AvailabilityState, AvailabilityStatus, ProbeOutcome};
pub use orchestrator::{
    AbandonedReservation, BookingCommitOrchestrator, CheckoutUrls, CommitReceipt, CommitStep,
    CommitTicket, Reservation,
};
pub use session::{AvailabilityTicket, BookingSession, SessionSnapshot};

#[cfg(test)]
mod fixtures;
