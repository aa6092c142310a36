use uuid::Uuid;

/// Change notification emitted by a checkout session.
/// Passenger events carry ids only, never passenger data.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutEvent {
    FlightSelected {
        offer_id: String,
        required_passengers: usize,
        hold_expires_at: i64,
    },
    FlightHoldExpired {
        offer_id: String,
    },
    PassengerAdded {
        passenger_id: Uuid,
        traveler_type: String,
    },
    PassengerUpdated {
        passenger_id: Uuid,
    },
    PassengerRemoved {
        passenger_id: Uuid,
        orphaned_infants: Vec<Uuid>,
    },
    RosterCleared {
        removed: usize,
    },
    RosterExpired {
        removed: usize,
    },
    AvailabilityChanged {
        status: String,
        message: Option<String>,
        checked_at: Option<i64>,
    },
    AvailabilityExpired {
        checked_at: i64,
    },
    ReservationCreated {
        reservation_id: String,
        grand_total: String,
        currency: String,
    },
    ReservationFailed {
        detail: String,
    },
    PaymentSessionCreated {
        reservation_id: String,
        redirect_url: String,
    },
    /// A live, unpaid reservation exists remotely
    PaymentSessionFailed {
        reservation_id: String,
        detail: String,
    },
    ReservationAbandoned {
        reservation_id: String,
        reason: String,
    },
    SessionClosed {
        reason: String,
    },
}

impl CheckoutEvent {
    /// Stable name used as the event type on the wire
    pub fn name(&self) -> &'static str {
        match self {
            CheckoutEvent::FlightSelected { .. } => "flight_selected",
            CheckoutEvent::FlightHoldExpired { .. } => "flight_hold_expired",
            CheckoutEvent::PassengerAdded { .. } => "passenger_added",
            CheckoutEvent::PassengerUpdated { .. } => "passenger_updated",
            CheckoutEvent::PassengerRemoved { .. } => "passenger_removed",
            CheckoutEvent::RosterCleared { .. } => "roster_cleared",
            CheckoutEvent::RosterExpired { .. } => "roster_expired",
            CheckoutEvent::AvailabilityChanged { .. } => "availability_changed",
            CheckoutEvent::AvailabilityExpired { .. } => "availability_expired",
            CheckoutEvent::ReservationCreated { .. } => "reservation_created",
            CheckoutEvent::ReservationFailed { .. } => "reservation_failed",
            CheckoutEvent::PaymentSessionCreated { .. } => "payment_session_created",
            CheckoutEvent::PaymentSessionFailed { .. } => "payment_session_failed",
            CheckoutEvent::ReservationAbandoned { .. } => "reservation_abandoned",
            CheckoutEvent::SessionClosed { .. } => "session_closed",
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct EventEnvelope {
    pub session_id: Uuid,
    pub emitted_at: i64,
    pub event: CheckoutEvent,
}
