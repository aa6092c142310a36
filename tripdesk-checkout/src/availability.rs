use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tripdesk_core::supplier::{
    AvailabilityProbeRequest, TravelerContact, TravelerName, TravelerRecord,
};
use tripdesk_core::{FlightOffer, Gender, ReservationClient, TravelerType};
use tripdesk_shared::Masked;

use crate::error::{AvailabilityError, ExpiryKind, ExpiryNotice};

const CHECK_FAILED_MESSAGE: &str = "We could not confirm seat availability. Please try again.";
const UNAVAILABLE_FALLBACK: &str = "The airline reports this offer can no longer be booked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    Idle,
    Checking,
    Available,
    Unavailable,
    Error,
}

impl AvailabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityState::Idle => "idle",
            AvailabilityState::Checking => "checking",
            AvailabilityState::Available => "available",
            AvailabilityState::Unavailable => "unavailable",
            AvailabilityState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityStatus {
    pub state: AvailabilityState,
    pub message: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl AvailabilityStatus {
    fn idle() -> Self {
        Self {
            state: AvailabilityState::Idle,
            message: None,
            checked_at: None,
        }
    }
}

/// What a single probe against the reservation system said
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    /// The reservation system's own reason, surfaced as is
    Unavailable(String),
    /// Network or decode failure; the message is safe to show
    Failed(String),
}

/// Tracks whether the held offer is still bookable.
///
/// `idle -> checking -> {available | unavailable | error}`. An `available`
/// result is trusted only inside the freshness window and drops back to
/// `idle` on the first tick past it. Leaving `unavailable` or `error` always
/// takes an explicit new check.
#[derive(Debug, Clone)]
pub struct AvailabilityReconciler {
    status: AvailabilityStatus,
    freshness: Duration,
}

impl AvailabilityReconciler {
    pub fn new(freshness: Duration) -> Self {
        Self {
            status: AvailabilityStatus::idle(),
            freshness,
        }
    }

    pub fn status(&self) -> &AvailabilityStatus {
        &self.status
    }

    pub fn state(&self) -> AvailabilityState {
        self.status.state
    }

    pub fn begin_check(&mut self) -> Result<(), AvailabilityError> {
        if self.status.state == AvailabilityState::Checking {
            return Err(AvailabilityError::CheckInProgress);
        }
        self.status = AvailabilityStatus {
            state: AvailabilityState::Checking,
            message: None,
            checked_at: None,
        };
        Ok(())
    }

    pub fn record(&mut self, outcome: ProbeOutcome, now: DateTime<Utc>) -> &AvailabilityStatus {
        let (state, message) = match outcome {
            ProbeOutcome::Available => (AvailabilityState::Available, None),
            ProbeOutcome::Unavailable(reason) => (AvailabilityState::Unavailable, Some(reason)),
            ProbeOutcome::Failed(message) => (AvailabilityState::Error, Some(message)),
        };
        self.status = AvailabilityStatus {
            state,
            message,
            checked_at: Some(now),
        };
        &self.status
    }

    /// True iff the last result is `available` and `now - checked_at` is
    /// inside the freshness window
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (self.status.state, self.status.checked_at) {
            (AvailabilityState::Available, Some(checked_at)) => now - checked_at < self.freshness,
            _ => false,
        }
    }

    /// Gate for commit. Only a fresh `available` passes.
    pub fn require_fresh(&self, now: DateTime<Utc>) -> Result<(), AvailabilityError> {
        match self.status.state {
            AvailabilityState::Idle => Err(AvailabilityError::NotChecked),
            AvailabilityState::Checking => Err(AvailabilityError::CheckInProgress),
            AvailabilityState::Unavailable => Err(AvailabilityError::Unavailable {
                reason: self.message_or(UNAVAILABLE_FALLBACK),
            }),
            AvailabilityState::Error => Err(AvailabilityError::CheckFailed {
                message: self.message_or(CHECK_FAILED_MESSAGE),
            }),
            AvailabilityState::Available if self.is_fresh(now) => Ok(()),
            AvailabilityState::Available => match self.status.checked_at {
                Some(checked_at) => Err(AvailabilityError::Stale { checked_at }),
                None => Err(AvailabilityError::NotChecked),
            },
        }
    }

    /// Called on every tick
    pub fn expire_if_stale(&mut self, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        if self.status.state != AvailabilityState::Available || self.is_fresh(now) {
            return None;
        }

        let checked_at = self.status.checked_at.unwrap_or(now);
        let expired_at = checked_at + self.freshness;
        self.reset();
        tracing::info!("Availability confirmed at {} is no longer fresh", checked_at);
        Some(ExpiryNotice::new(ExpiryKind::AvailabilityFreshness, expired_at))
    }

    pub fn reset(&mut self) {
        self.status = AvailabilityStatus::idle();
    }

    /// Probe and record in one step. Only usable when the caller owns the
    /// reconciler across the await; a checkout session goes through
    /// `BookingSession::begin_availability_check` instead.
    pub async fn check(
        &mut self,
        client: &dyn ReservationClient,
        offer: &FlightOffer,
        now: DateTime<Utc>,
    ) -> Result<&AvailabilityStatus, AvailabilityError> {
        self.begin_check()?;
        let outcome = probe(client, &probe_request(offer)).await;
        Ok(self.record(outcome, now))
    }

    fn message_or(&self, fallback: &str) -> String {
        self.status
            .message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Placeholder traveler for the availability probe. Never a real passenger.
pub fn synthetic_traveler() -> TravelerRecord {
    TravelerRecord {
        id: "1".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
        name: TravelerName {
            first_name: "AVAILABILITY".to_string(),
            last_name: "CHECK".to_string(),
        },
        gender: Gender::Male,
        contact: TravelerContact {
            email_address: Masked::from("availability-check@tripdesk.invalid"),
            phones: vec![Masked::from("+10000000000")],
        },
        documents: vec![],
        traveler_type: TravelerType::Adult,
        associated_adult_id: None,
    }
}

pub fn probe_request(offer: &FlightOffer) -> AvailabilityProbeRequest {
    AvailabilityProbeRequest {
        offer: offer.clone(),
        travelers: vec![synthetic_traveler()],
        availability_only: true,
    }
}

/// Run one probe. Transport and decode failures collapse into an opaque
/// message; the details only go to the log.
pub async fn probe(client: &dyn ReservationClient, request: &AvailabilityProbeRequest) -> ProbeOutcome {
    match client.probe_availability(request).await {
        Ok(response) if response.available => {
            tracing::info!("Offer {} is available", request.offer.id);
            ProbeOutcome::Available
        }
        Ok(response) => {
            let reason = response.detail.unwrap_or_else(|| UNAVAILABLE_FALLBACK.to_string());
            tracing::info!("Offer {} is unavailable: {}", request.offer.id, reason);
            ProbeOutcome::Unavailable(reason)
        }
        Err(e) => {
            tracing::warn!("Availability probe for offer {} failed: {}", request.offer.id, e);
            ProbeOutcome::Failed(CHECK_FAILED_MESSAGE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::offer;
    use tripdesk_core::mock::MockReservationClient;
    use tripdesk_core::supplier::ProbeResponse;
    use tripdesk_core::GatewayError;

    fn reconciler() -> AvailabilityReconciler {
        AvailabilityReconciler::new(Duration::minutes(10))
    }

    #[test]
    fn test_fresh_strictly_inside_window() {
        let mut availability = reconciler();
        let checked_at = Utc::now();
        availability.begin_check().unwrap();
        availability.record(ProbeOutcome::Available, checked_at);

        assert!(availability.is_fresh(checked_at));
        assert!(availability.is_fresh(checked_at + Duration::minutes(10) - Duration::milliseconds(1)));
        assert!(!availability.is_fresh(checked_at + Duration::minutes(10)));
    }

    #[test]
    fn test_reverts_to_idle_at_boundary() {
        let mut availability = reconciler();
        let checked_at = Utc::now();
        availability.begin_check().unwrap();
        availability.record(ProbeOutcome::Available, checked_at);

        let before = checked_at + Duration::minutes(10) - Duration::seconds(1);
        assert!(availability.expire_if_stale(before).is_none());
        assert_eq!(availability.state(), AvailabilityState::Available);

        let notice = availability.expire_if_stale(checked_at + Duration::minutes(10)).unwrap();
        assert_eq!(notice.kind, ExpiryKind::AvailabilityFreshness);
        assert_eq!(notice.expired_at, checked_at + Duration::minutes(10));
        assert_eq!(availability.state(), AvailabilityState::Idle);
        assert_eq!(availability.require_fresh(checked_at), Err(AvailabilityError::NotChecked));
    }

    #[test]
    fn test_only_fresh_available_passes_gate() {
        let now = Utc::now();
        let mut availability = reconciler();
        assert_eq!(availability.require_fresh(now), Err(AvailabilityError::NotChecked));

        availability.begin_check().unwrap();
        assert_eq!(availability.require_fresh(now), Err(AvailabilityError::CheckInProgress));
        assert_eq!(availability.begin_check(), Err(AvailabilityError::CheckInProgress));

        availability.record(ProbeOutcome::Unavailable("NO SEATS IN CLASS".into()), now);
        assert_eq!(
            availability.require_fresh(now),
            Err(AvailabilityError::Unavailable { reason: "NO SEATS IN CLASS".into() })
        );

        availability.begin_check().unwrap();
        availability.record(ProbeOutcome::Failed("boom".into()), now);
        assert!(matches!(availability.require_fresh(now), Err(AvailabilityError::CheckFailed { .. })));

        availability.begin_check().unwrap();
        availability.record(ProbeOutcome::Available, now);
        assert_eq!(availability.require_fresh(now), Ok(()));
        assert_eq!(
            availability.require_fresh(now + Duration::minutes(11)),
            Err(AvailabilityError::Stale { checked_at: now })
        );
    }

    #[test]
    fn test_unavailable_is_not_expired_by_ticks() {
        let now = Utc::now();
        let mut availability = reconciler();
        availability.begin_check().unwrap();
        availability.record(ProbeOutcome::Unavailable("SOLD OUT".into()), now);

        assert!(availability.expire_if_stale(now + Duration::hours(1)).is_none());
        assert_eq!(availability.state(), AvailabilityState::Unavailable);
    }

    #[test]
    fn test_probe_uses_synthetic_traveler_only() {
        let request = probe_request(&offer("9", &[TravelerType::Adult, TravelerType::Adult]));
        assert!(request.availability_only);
        assert_eq!(request.travelers, vec![synthetic_traveler()]);
    }

    #[tokio::test]
    async fn test_check_maps_remote_outcomes() {
        let client = MockReservationClient::new();
        client.queue_probe(Ok(ProbeResponse { available: false, detail: Some("SEGMENT CLOSED".into()) }));
        client.queue_probe(Err(GatewayError::Transport("connection reset".into())));

        let flight = offer("1", &[TravelerType::Adult]);
        let now = Utc::now();
        let mut availability = reconciler();

        let status = availability.check(&client, &flight, now).await.unwrap();
        assert_eq!(status.state, AvailabilityState::Unavailable);
        assert_eq!(status.message.as_deref(), Some("SEGMENT CLOSED"));

        let status = availability.check(&client, &flight, now).await.unwrap();
        assert_eq!(status.state, AvailabilityState::Error);
        assert!(!status.message.as_deref().unwrap_or_default().contains("connection reset"));

        let status = availability.check(&client, &flight, now).await.unwrap();
        assert_eq!(status.state, AvailabilityState::Available);
        assert_eq!(status.checked_at, Some(now));
        assert_eq!(client.probe_calls(), 3);
    }
}
