use chrono::{DateTime, Utc};
use serde::Serialize;
use tripdesk_core::payment::{PaymentSession, PaymentSessionRequest};
use tripdesk_core::repository::{CachedPassengers, CachedSelection};
use tripdesk_core::supplier::{AvailabilityProbeRequest, ReservationResponse};
use tripdesk_core::{FlightOffer, GatewayError, Passenger, PassengerData, TravelerType};
use tripdesk_shared::CheckoutEvent;
use uuid::Uuid;

use crate::availability::{self, AvailabilityReconciler, AvailabilityStatus, ProbeOutcome};
use crate::error::{CheckoutError, ExpiryKind, ExpiryNotice, ValidationError};
use crate::orchestrator::{
    self, AbandonedReservation, CheckoutUrls, CommitReceipt, CommitState, CommitStep, CommitTicket,
    Reservation,
};
use crate::roster::{PassengerRoster, RemovalOutcome};
use crate::rules::CheckoutRules;
use crate::scheduler::ExpirationScheduler;
use crate::selection::FlightSelectionHolder;

/// Issued by `BookingSession::begin_availability_check`
#[derive(Debug, Clone)]
pub struct AvailabilityTicket {
    generation: u64,
    request: AvailabilityProbeRequest,
}

impl AvailabilityTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn request(&self) -> &AvailabilityProbeRequest {
        &self.request
    }
}

/// Everything the expiry timers act on
struct CheckoutState {
    selection: FlightSelectionHolder,
    roster: PassengerRoster,
    availability: AvailabilityReconciler,
    commit: CommitState,
    events: Vec<CheckoutEvent>,
    generation: u64,
}

impl CheckoutState {
    fn emit(&mut self, event: CheckoutEvent) {
        self.events.push(event);
    }

    fn emit_availability(&mut self) {
        let status = self.availability.status();
        let event = CheckoutEvent::AvailabilityChanged {
            status: status.state.as_str().to_string(),
            message: status.message.clone(),
            checked_at: status.checked_at.map(|at| at.timestamp()),
        };
        self.emit(event);
    }

    fn abandon_reservation(&mut self, reason: &str, now: DateTime<Utc>) -> Option<AbandonedReservation> {
        let abandoned = self.commit.abandon(reason, now)?;
        tracing::warn!(
            "Reservation {} abandoned unpaid ({})",
            abandoned.reservation_id,
            abandoned.reason
        );
        self.emit(CheckoutEvent::ReservationAbandoned {
            reservation_id: abandoned.reservation_id.clone(),
            reason: abandoned.reason.clone(),
        });
        Some(abandoned)
    }
}

fn flight_hold_tick(state: &mut CheckoutState, now: DateTime<Utc>) -> Option<ExpiryNotice> {
    let offer_id = state.selection.get().map(|offer| offer.id.clone())?;
    let notice = state.selection.clear_if_expired(now)?;

    state.availability.reset();
    state.generation += 1;
    state.abandon_reservation("flight hold expired", now);
    state.emit(CheckoutEvent::FlightHoldExpired { offer_id });
    Some(notice)
}

fn passenger_retention_tick(state: &mut CheckoutState, now: DateTime<Utc>) -> Option<ExpiryNotice> {
    let removed = state.roster.len();
    let notice = state.roster.clear_if_expired(now)?;

    if state.commit.in_flight {
        state.generation += 1;
    }
    state.abandon_reservation("passenger details expired", now);
    state.emit(CheckoutEvent::RosterExpired { removed });
    Some(notice)
}

fn availability_freshness_tick(state: &mut CheckoutState, now: DateTime<Utc>) -> Option<ExpiryNotice> {
    let checked_at = state.availability.status().checked_at;
    let notice = state.availability.expire_if_stale(now)?;

    state.emit(CheckoutEvent::AvailabilityExpired {
        checked_at: checked_at.unwrap_or(notice.expired_at).timestamp(),
    });
    Some(notice)
}

/// Read-only view of a session for observers
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub closed: bool,
    pub offer: Option<FlightOffer>,
    pub required_passengers: usize,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub hold_seconds_remaining: Option<i64>,
    pub passengers: Vec<Passenger>,
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub retention_seconds_remaining: Option<i64>,
    pub availability: AvailabilityStatus,
    pub availability_fresh: bool,
    pub reservation_id: Option<String>,
    pub commit_in_flight: bool,
    pub abandoned_reservations: Vec<AbandonedReservation>,
}

/// One checkout attempt: the held offer, the passenger roster, the
/// availability status and the commit progress, plus the scheduler that
/// drives their timers. State changes only through the methods below, and
/// every change is queued as a [`CheckoutEvent`] for observers.
///
/// Operations take `now` explicitly. Network calls are split into a
/// `begin_*` step that hands out a ticket and a `finish_*` step that
/// applies the response, so the caller never holds the session across a
/// remote call. A ticket from an older generation (teardown, new offer,
/// expiry during the call) is rejected with `StaleResponse`.
pub struct BookingSession {
    id: Uuid,
    rules: CheckoutRules,
    state: CheckoutState,
    scheduler: ExpirationScheduler<CheckoutState>,
    closed: bool,
}

impl BookingSession {
    pub fn new(rules: CheckoutRules) -> Result<Self, CheckoutError> {
        Self::with_id(Uuid::new_v4(), rules)
    }

    pub fn with_id(id: Uuid, rules: CheckoutRules) -> Result<Self, CheckoutError> {
        let mut scheduler: ExpirationScheduler<CheckoutState> = ExpirationScheduler::new();
        scheduler.subscribe("flight-hold", flight_hold_tick)?;
        scheduler.subscribe("passenger-retention", passenger_retention_tick)?;
        scheduler.subscribe("availability-freshness", availability_freshness_tick)?;

        Ok(Self {
            id,
            rules,
            state: CheckoutState {
                selection: FlightSelectionHolder::new(rules.flight_hold),
                roster: PassengerRoster::new(rules.passenger_retention),
                availability: AvailabilityReconciler::new(rules.availability_freshness),
                commit: CommitState::default(),
                events: Vec::new(),
                generation: 0,
            },
            scheduler,
            closed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn rules(&self) -> &CheckoutRules {
        &self.rules
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn selection(&self) -> &FlightSelectionHolder {
        &self.state.selection
    }

    pub fn roster(&self) -> &PassengerRoster {
        &self.state.roster
    }

    pub fn availability(&self) -> &AvailabilityReconciler {
        &self.state.availability
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        self.state.commit.reservation.as_ref()
    }

    pub fn abandoned_reservations(&self) -> &[AbandonedReservation] {
        &self.state.commit.abandoned
    }

    pub fn commit_in_flight(&self) -> bool {
        self.state.commit.in_flight
    }

    pub fn subscription_count(&self) -> usize {
        self.scheduler.subscription_count()
    }

    /// Nothing left worth keeping: no offer, no passengers, no reservation
    /// and no commit outstanding.
    pub fn is_idle(&self) -> bool {
        self.state.selection.get().is_none()
            && self.state.roster.is_empty()
            && self.state.commit.reservation.is_none()
            && !self.state.commit.in_flight
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// One scheduler tick. Every timer is evaluated against the same `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<ExpiryNotice> {
        if self.closed {
            return Vec::new();
        }
        self.scheduler.tick(&mut self.state, now)
    }

    /// Navigation away. Releases every timer subscription and invalidates
    /// outstanding tickets. Returns how many subscriptions were released.
    pub fn teardown(&mut self, now: DateTime<Utc>) -> usize {
        if self.closed {
            return 0;
        }
        let released = self.scheduler.subscription_count();
        self.close("checkout abandoned", now);
        released
    }

    fn close(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        self.state.abandon_reservation(reason, now);
        self.scheduler.teardown();
        self.closed = true;
        self.state.generation += 1;
        tracing::info!("Checkout session {} closed: {}", self.id, reason);
        self.state.emit(CheckoutEvent::SessionClosed { reason: reason.to_string() });
    }

    pub fn drain_events(&mut self) -> Vec<CheckoutEvent> {
        std::mem::take(&mut self.state.events)
    }

    // ------------------------------------------------------------------
    // Flight selection
    // ------------------------------------------------------------------

    pub fn select_flight(&mut self, offer: FlightOffer, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;
        self.state.roster.check_fits(&offer.traveler_mix())?;

        self.state.abandon_reservation("a different flight was selected", now);
        let offer_id = offer.id.clone();
        let required_passengers = offer.required_passenger_count();
        if let Some(previous) = self.state.selection.select(offer, now) {
            tracing::debug!("Offer {} replaced by {}", previous.id, offer_id);
        }
        self.state.availability.reset();
        self.state.generation += 1;

        tracing::info!("Session {} holds offer {} for {} passenger(s)", self.id, offer_id, required_passengers);
        let hold_expires_at = self.state.selection.expires_at().unwrap_or(now).timestamp();
        self.state.emit(CheckoutEvent::FlightSelected {
            offer_id,
            required_passengers,
            hold_expires_at,
        });
        Ok(())
    }

    /// Resume a cached selection. The hold runs from `selected_at`, not from
    /// when the cache entry was written.
    pub fn restore_selection(&mut self, cached: CachedSelection, now: DateTime<Utc>) -> Result<Option<ExpiryNotice>, CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;
        self.state.roster.check_fits(&cached.offer.traveler_mix())?;

        let offer_id = cached.offer.id.clone();
        let required_passengers = cached.offer.required_passenger_count();
        let notice = self.state.selection.restore(cached.offer, cached.selected_at, now);
        self.state.availability.reset();
        self.state.generation += 1;

        match &notice {
            Some(_) => self.state.emit(CheckoutEvent::FlightHoldExpired { offer_id }),
            None => {
                let hold_expires_at = self.state.selection.expires_at().unwrap_or(now).timestamp();
                self.state.emit(CheckoutEvent::FlightSelected {
                    offer_id,
                    required_passengers,
                    hold_expires_at,
                });
            }
        }
        Ok(notice)
    }

    // ------------------------------------------------------------------
    // Passengers
    // ------------------------------------------------------------------

    /// Resume cached passengers against the original retention start
    pub fn restore_passengers(&mut self, cached: CachedPassengers, now: DateTime<Utc>) -> Result<Option<ExpiryNotice>, CheckoutError> {
        self.ensure_roster_editable()?;

        let count = cached.passengers.len();
        let notice = self
            .state
            .roster
            .restore(cached.passengers, cached.retention_started_at, now);

        match &notice {
            Some(_) => self.state.emit(CheckoutEvent::RosterExpired { removed: count }),
            None => {
                let added: Vec<CheckoutEvent> = self
                    .state
                    .roster
                    .passengers()
                    .iter()
                    .map(|p| CheckoutEvent::PassengerAdded {
                        passenger_id: p.id,
                        traveler_type: p.traveler_type().to_string(),
                    })
                    .collect();
                self.state.events.extend(added);
            }
        }
        Ok(notice)
    }

    /// Advisory check while the form is being filled in
    pub fn validate_passenger(&self, data: &PassengerData, traveler_type: TravelerType, now: DateTime<Utc>) -> Result<(), CheckoutError> {
        PassengerRoster::validate(data, traveler_type, now).map_err(CheckoutError::from)
    }

    pub fn add_passenger(&mut self, data: PassengerData, now: DateTime<Utc>) -> Result<Passenger, CheckoutError> {
        self.ensure_roster_editable()?;
        let mix = self.live_offer(now)?.traveler_mix();

        let passenger = self.state.roster.add(data, &mix, now)?.clone();
        self.state.emit(CheckoutEvent::PassengerAdded {
            passenger_id: passenger.id,
            traveler_type: passenger.traveler_type().to_string(),
        });
        Ok(passenger)
    }

    pub fn update_passenger(&mut self, id: Uuid, data: PassengerData, now: DateTime<Utc>) -> Result<Passenger, CheckoutError> {
        self.ensure_roster_editable()?;
        let mix = self.live_offer(now)?.traveler_mix();

        let passenger = self.state.roster.update(id, data, &mix, now)?.clone();
        self.state.emit(CheckoutEvent::PassengerUpdated { passenger_id: id });
        Ok(passenger)
    }

    pub fn remove_passenger(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<RemovalOutcome, CheckoutError> {
        self.ensure_roster_editable()?;

        let outcome = self.state.roster.remove(id, now)?;
        let orphaned_infants = outcome
            .issues
            .iter()
            .filter_map(|issue| match issue {
                ValidationError::OrphanedInfant { infant_id, .. } => Some(*infant_id),
                _ => None,
            })
            .collect();
        self.state.emit(CheckoutEvent::PassengerRemoved {
            passenger_id: id,
            orphaned_infants,
        });
        Ok(outcome)
    }

    /// Explicit user clear. Returns how many passengers were removed.
    pub fn clear_passengers(&mut self) -> Result<usize, CheckoutError> {
        self.ensure_roster_editable()?;

        let removed = self.state.roster.clear();
        self.state.emit(CheckoutEvent::RosterCleared { removed });
        Ok(removed)
    }

    /// Give up a reservation left by a failed payment session so the roster
    /// can be edited again. The reservation stays listed as abandoned.
    pub fn release_reservation(&mut self, now: DateTime<Utc>) -> Result<Option<AbandonedReservation>, CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;
        Ok(self.state.abandon_reservation("released by user", now))
    }

    // ------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------

    pub fn begin_availability_check(&mut self, now: DateTime<Utc>) -> Result<AvailabilityTicket, CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;

        let request = availability::probe_request(self.live_offer(now)?);
        self.state.availability.begin_check()?;
        self.state.emit_availability();

        Ok(AvailabilityTicket {
            generation: self.state.generation,
            request,
        })
    }

    pub fn finish_availability_check(
        &mut self,
        ticket: AvailabilityTicket,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityStatus, CheckoutError> {
        if self.closed || ticket.generation != self.state.generation {
            tracing::debug!(
                "Discarding availability result for offer {} on session {}: attempt superseded",
                ticket.request.offer.id,
                self.id
            );
            return Err(CheckoutError::StaleResponse { reservation_id: None });
        }

        let status = self.state.availability.record(outcome, now).clone();
        self.state.emit_availability();
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Check every commit precondition and mark the commit in flight.
    /// A held reservation skips phase 1.
    pub fn begin_commit(&mut self, now: DateTime<Utc>) -> Result<CommitTicket, CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;

        let offer = self.live_offer(now)?;
        let roster = &self.state.roster;
        if roster.is_expired(now) {
            let expired_at = roster.expires_at().unwrap_or(now);
            return Err(CheckoutError::Expired(ExpiryNotice::new(ExpiryKind::PassengerRetention, expired_at)));
        }

        let need = offer.required_passenger_count();
        let have = roster.len();
        if need == 0 || have != need {
            return Err(CheckoutError::RosterIncomplete { have, need });
        }
        roster.check_ready(&offer.traveler_mix(), now)?;
        self.state.availability.require_fresh(now)?;

        let step = match &self.state.commit.reservation {
            Some(reservation) => CommitStep::Pay {
                reservation_id: reservation.reservation_id.clone(),
            },
            None => CommitStep::Reserve {
                offer: offer.clone(),
                travelers: orchestrator::build_travelers(roster.passengers())?,
            },
        };

        self.state.commit.in_flight = true;
        Ok(CommitTicket {
            generation: self.state.generation,
            step,
        })
    }

    /// Apply the phase-1 response. On success the reservation is held until
    /// paid or abandoned; on failure nothing is reserved and the roster stays.
    pub fn finish_reservation(
        &mut self,
        generation: u64,
        result: Result<ReservationResponse, GatewayError>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, CheckoutError> {
        let created_id = match &result {
            Ok(response) if response.success => response.reservation_id.clone(),
            _ => None,
        };
        if self.closed || generation != self.state.generation {
            return Err(self.discard_late_reservation(created_id, now));
        }

        let outcome = match result {
            Ok(response) if response.success => match (response.reservation_id, response.confirmed_offer) {
                (Some(reservation_id), Some(confirmed_offer)) => Ok(Reservation {
                    reservation_id,
                    confirmed_offer,
                    created_at: now,
                }),
                (Some(reservation_id), None) => {
                    tracing::error!("Reservation {} came back without a confirmed price", reservation_id);
                    self.state.commit.record_abandoned(reservation_id.clone(), "no confirmed price", now);
                    self.state.emit(CheckoutEvent::ReservationAbandoned {
                        reservation_id,
                        reason: "no confirmed price".to_string(),
                    });
                    Err("The reservation system did not confirm a price".to_string())
                }
                (None, _) => Err("The reservation system returned no reservation id".to_string()),
            },
            Ok(response) => Err(response
                .detail
                .unwrap_or_else(|| "The airline did not accept the reservation".to_string())),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(reservation) => {
                let price = &reservation.confirmed_offer.price;
                tracing::info!(
                    "Reservation {} created, confirmed total {} {}",
                    reservation.reservation_id,
                    price.amount_due(),
                    price.currency
                );
                self.state.emit(CheckoutEvent::ReservationCreated {
                    reservation_id: reservation.reservation_id.clone(),
                    grand_total: price.amount_due().to_string(),
                    currency: price.currency.clone(),
                });
                self.state.commit.reservation = Some(reservation.clone());
                Ok(reservation)
            }
            Err(detail) => {
                self.state.commit.in_flight = false;
                tracing::warn!("Reservation failed for session {}: {}", self.id, detail);
                self.state.emit(CheckoutEvent::ReservationFailed { detail: detail.clone() });
                Err(CheckoutError::ReservationFailed { detail })
            }
        }
    }

    /// Build the phase-2 request from the held reservation
    pub fn prepare_payment(&mut self, generation: u64, urls: &CheckoutUrls, now: DateTime<Utc>) -> Result<PaymentSessionRequest, CheckoutError> {
        if self.closed || generation != self.state.generation {
            return Err(self.discard_late_reservation(None, now));
        }

        let reservation = match self.state.commit.reservation.clone() {
            Some(reservation) => reservation,
            None => {
                self.state.commit.in_flight = false;
                return Err(CheckoutError::ReservationFailed {
                    detail: "No reservation is held for this session".to_string(),
                });
            }
        };

        let customer = match orchestrator::lead_customer(self.state.roster.passengers()) {
            Some(customer) => customer,
            None => {
                return Err(self.payment_failed(reservation.reservation_id, "No passenger to bill".to_string()));
            }
        };

        orchestrator::payment_request(&reservation, customer, urls)
            .map_err(|e| self.payment_failed(reservation.reservation_id.clone(), e.to_string()))
    }

    /// Apply the phase-2 response. Success purges passenger data and closes
    /// the session; failure keeps both the roster and the reservation.
    pub fn finish_payment(
        &mut self,
        generation: u64,
        request: &PaymentSessionRequest,
        result: Result<PaymentSession, GatewayError>,
        now: DateTime<Utc>,
    ) -> Result<CommitReceipt, CheckoutError> {
        let reservation_id = request.reservation_id.clone();
        if self.closed || generation != self.state.generation {
            self.state.commit.in_flight = false;
            tracing::warn!(
                "Late payment response for reservation {} on session {} discarded",
                reservation_id,
                self.id
            );
            return Err(CheckoutError::StaleResponse {
                reservation_id: Some(reservation_id),
            });
        }

        let session = match result {
            Ok(session) => session,
            Err(e) => return Err(self.payment_failed(reservation_id, e.to_string())),
        };

        let receipt = CommitReceipt {
            reservation_id: reservation_id.clone(),
            payment_session_id: session.id,
            redirect_url: session.redirect_url,
            amount_minor: request.total_minor(),
            currency: request
                .line_items
                .first()
                .map(|item| item.currency.clone())
                .unwrap_or_default(),
        };

        let purged = self.state.roster.clear();
        self.state.selection.clear();
        self.state.availability.reset();
        self.state.commit.reservation = None;
        self.state.commit.in_flight = false;

        tracing::info!(
            "Payment session {} created for reservation {}; purged {} passenger(s)",
            receipt.payment_session_id,
            reservation_id,
            purged
        );
        self.state.emit(CheckoutEvent::PaymentSessionCreated {
            reservation_id,
            redirect_url: receipt.redirect_url.clone(),
        });
        self.close("booking handed off to payment", now);
        Ok(receipt)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let selection = &self.state.selection;
        let roster = &self.state.roster;
        SessionSnapshot {
            session_id: self.id,
            closed: self.closed,
            offer: selection.get().cloned(),
            required_passengers: selection.required_passenger_count(),
            hold_expires_at: selection.expires_at(),
            hold_seconds_remaining: selection.time_remaining(now).map(|d| d.num_seconds()),
            passengers: roster.passengers().to_vec(),
            retention_expires_at: roster.expires_at(),
            retention_seconds_remaining: roster.time_remaining(now).map(|d| d.num_seconds()),
            availability: self.state.availability.status().clone(),
            availability_fresh: self.state.availability.is_fresh(now),
            reservation_id: self.state.commit.reservation_id().map(str::to_string),
            commit_in_flight: self.state.commit.in_flight,
            abandoned_reservations: self.state.commit.abandoned.clone(),
        }
    }

    fn ensure_open(&self) -> Result<(), CheckoutError> {
        if self.closed {
            return Err(CheckoutError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_no_commit(&self) -> Result<(), CheckoutError> {
        if self.state.commit.in_flight {
            return Err(CheckoutError::CommitInFlight);
        }
        Ok(())
    }

    /// The held reservation was built from the current roster, so the roster
    /// is frozen until the reservation is paid or released.
    fn ensure_roster_editable(&self) -> Result<(), CheckoutError> {
        self.ensure_open()?;
        self.ensure_no_commit()?;
        if let Some(reservation_id) = self.state.commit.reservation_id() {
            return Err(CheckoutError::ReservationHeld {
                reservation_id: reservation_id.to_string(),
            });
        }
        Ok(())
    }

    fn live_offer(&self, now: DateTime<Utc>) -> Result<&FlightOffer, CheckoutError> {
        let selection = &self.state.selection;
        if selection.get().is_none() {
            return Err(CheckoutError::NoFlightSelected);
        }
        selection.live_offer(now).ok_or_else(|| {
            let expired_at = selection.expires_at().unwrap_or(now);
            CheckoutError::Expired(ExpiryNotice::new(ExpiryKind::FlightHold, expired_at))
        })
    }

    fn payment_failed(&mut self, reservation_id: String, detail: String) -> CheckoutError {
        self.state.commit.in_flight = false;
        tracing::error!(
            "Payment session failed for reservation {} on session {}: {}. Reservation is held unpaid.",
            reservation_id,
            self.id,
            detail
        );
        self.state.emit(CheckoutEvent::PaymentSessionFailed {
            reservation_id: reservation_id.clone(),
            detail: detail.clone(),
        });
        CheckoutError::PaymentSessionFailed { reservation_id, detail }
    }

    /// A reservation response for a superseded attempt. A reservation it
    /// created is recorded as abandoned so it can still be found.
    fn discard_late_reservation(&mut self, created_id: Option<String>, now: DateTime<Utc>) -> CheckoutError {
        self.state.commit.in_flight = false;
        match &created_id {
            Some(reservation_id) => {
                tracing::warn!(
                    "Late reservation {} for session {} discarded; it exists remotely unpaid",
                    reservation_id,
                    self.id
                );
                self.state
                    .commit
                    .record_abandoned(reservation_id.clone(), "response arrived after the attempt was superseded", now);
            }
            None => tracing::debug!("Discarding late commit response for session {}", self.id),
        }
        CheckoutError::StaleResponse { reservation_id: created_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AvailabilityError;
    use crate::fixtures::{adult, born_years_ago, offer, passenger};
    use chrono::Duration;

    fn session() -> BookingSession {
        BookingSession::new(CheckoutRules::default()).unwrap()
    }

    fn ready_session(now: DateTime<Utc>) -> BookingSession {
        let mut session = session();
        session.select_flight(offer("1", &[TravelerType::Adult]), now).unwrap();
        session.add_passenger(adult("Ada"), now).unwrap();
        let ticket = session.begin_availability_check(now).unwrap();
        session.finish_availability_check(ticket, ProbeOutcome::Available, now).unwrap();
        session
    }

    fn reserved(id: &str) -> Result<ReservationResponse, GatewayError> {
        Ok(ReservationResponse {
            success: true,
            reservation_id: Some(id.to_string()),
            confirmed_offer: Some(offer("1", &[TravelerType::Adult])),
            detail: None,
        })
    }

    #[test]
    fn test_new_session_subscribes_three_timers() {
        let mut session = session();
        assert_eq!(session.subscription_count(), 3);
        assert_eq!(session.teardown(Utc::now()), 3);
        assert_eq!(session.subscription_count(), 0);
        assert!(session.is_closed());
        assert_eq!(session.teardown(Utc::now()), 0);
    }

    #[test]
    fn test_passengers_need_a_live_offer() {
        let now = Utc::now();
        let mut session = session();
        assert_eq!(session.add_passenger(adult("Ada"), now).unwrap_err(), CheckoutError::NoFlightSelected);

        session.select_flight(offer("1", &[TravelerType::Adult]), now).unwrap();
        let err = session.add_passenger(adult("Ada"), now + Duration::minutes(20)).unwrap_err();
        assert!(matches!(err, CheckoutError::Expired(ref n) if n.kind == ExpiryKind::FlightHold));
    }

    #[test]
    fn test_one_tick_expires_every_due_timer() {
        let start = Utc::now();
        let mut session = ready_session(start);
        session.drain_events();

        let notices = session.tick(start + Duration::minutes(20));
        let kinds: Vec<ExpiryKind> = notices.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![ExpiryKind::FlightHold, ExpiryKind::PassengerRetention]);
        assert!(session.selection().get().is_none());
        assert!(session.roster().is_empty());
        assert_eq!(session.availability().state(), crate::AvailabilityState::Idle);

        let names: Vec<&str> = session.drain_events().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["flight_hold_expired", "roster_expired"]);
    }

    #[test]
    fn test_freshness_expiry_reported_on_tick() {
        let start = Utc::now();
        let mut session = ready_session(start);

        assert!(session.tick(start + Duration::minutes(9)).is_empty());
        let notices = session.tick(start + Duration::minutes(10));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, ExpiryKind::AvailabilityFreshness);
    }

    #[test]
    fn test_no_tick_after_teardown() {
        let start = Utc::now();
        let mut session = ready_session(start);
        session.teardown(start);

        assert!(session.tick(start + Duration::hours(1)).is_empty());
        assert!(session.selection().get().is_some());
        assert_eq!(session.select_flight(offer("2", &[TravelerType::Adult]), start), Err(CheckoutError::SessionClosed));
    }

    #[test]
    fn test_commit_in_flight_blocks_second_commit_and_edits() {
        let now = Utc::now();
        let mut session = ready_session(now);

        let ticket = session.begin_commit(now).unwrap();
        assert!(matches!(ticket.step(), CommitStep::Reserve { .. }));
        assert_eq!(session.begin_commit(now).unwrap_err(), CheckoutError::CommitInFlight);
        assert_eq!(session.clear_passengers().unwrap_err(), CheckoutError::CommitInFlight);
        assert_eq!(
            session.select_flight(offer("2", &[TravelerType::Adult]), now).unwrap_err(),
            CheckoutError::CommitInFlight
        );
        assert_eq!(session.begin_availability_check(now).unwrap_err(), CheckoutError::CommitInFlight);
    }

    #[test]
    fn test_reservation_failure_keeps_roster() {
        let now = Utc::now();
        let mut session = ready_session(now);
        let ticket = session.begin_commit(now).unwrap();

        let rejected = Ok(ReservationResponse {
            success: false,
            reservation_id: None,
            confirmed_offer: None,
            detail: Some("SEGMENT SELL FAILURE".into()),
        });
        let err = session.finish_reservation(ticket.generation(), rejected, now).unwrap_err();
        assert_eq!(err, CheckoutError::ReservationFailed { detail: "SEGMENT SELL FAILURE".into() });
        assert_eq!(session.roster().len(), 1);
        assert!(!session.commit_in_flight());
        assert!(session.reservation().is_none());
    }

    #[test]
    fn test_held_reservation_freezes_roster_until_released() {
        let now = Utc::now();
        let mut session = ready_session(now);
        let ticket = session.begin_commit(now).unwrap();
        session.finish_reservation(ticket.generation(), reserved("R1"), now).unwrap();

        let urls = CheckoutUrls { success_url: "https://s".into(), cancel_url: "https://c".into() };
        let request = session.prepare_payment(ticket.generation(), &urls, now).unwrap();
        let err = session
            .finish_payment(ticket.generation(), &request, Err(GatewayError::Timeout), now)
            .unwrap_err();
        assert_eq!(err.severity(), crate::Severity::Critical);

        let id = session.roster().passengers()[0].id;
        assert_eq!(
            session.remove_passenger(id, now).unwrap_err(),
            CheckoutError::ReservationHeld { reservation_id: "R1".into() }
        );

        let released = session.release_reservation(now).unwrap().unwrap();
        assert_eq!(released.reservation_id, "R1");
        assert_eq!(session.abandoned_reservations().len(), 1);
        assert!(session.remove_passenger(id, now).is_ok());
    }

    #[test]
    fn test_late_reservation_after_teardown_is_discarded() {
        let now = Utc::now();
        let mut session = ready_session(now);
        let ticket = session.begin_commit(now).unwrap();
        session.teardown(now);

        let err = session.finish_reservation(ticket.generation(), reserved("R7"), now).unwrap_err();
        assert_eq!(err, CheckoutError::StaleResponse { reservation_id: Some("R7".into()) });
        assert!(session.reservation().is_none());
        assert_eq!(session.abandoned_reservations()[0].reservation_id, "R7");
    }

    #[test]
    fn test_stale_availability_result_ignored_after_reselect() {
        let now = Utc::now();
        let mut session = session();
        session.select_flight(offer("1", &[TravelerType::Adult]), now).unwrap();
        let ticket = session.begin_availability_check(now).unwrap();

        session.select_flight(offer("2", &[TravelerType::Adult]), now).unwrap();
        assert_eq!(
            session.finish_availability_check(ticket, ProbeOutcome::Available, now),
            Err(CheckoutError::StaleResponse { reservation_id: None })
        );
        assert_eq!(session.availability().require_fresh(now), Err(AvailabilityError::NotChecked));
    }

    #[test]
    fn test_commit_requires_associated_infant() {
        let now = Utc::now();
        let mut session = session();
        session
            .select_flight(offer("1", &[TravelerType::Adult, TravelerType::HeldInfant]), now)
            .unwrap();
        let adult_id = session.add_passenger(adult("Ada"), now).unwrap().id;
        let mut infant = passenger("Ivy", TravelerType::HeldInfant, &born_years_ago(1));
        infant.associated_adult_id = Some(adult_id);
        let infant_id = session.add_passenger(infant, now).unwrap().id;

        session.remove_passenger(adult_id, now).unwrap();
        session.add_passenger(adult("Grace"), now).unwrap();

        let err = session.begin_commit(now).unwrap_err();
        assert_eq!(
            err,
            CheckoutError::Validation(ValidationError::MissingAssociatedAdult { infant_id: Some(infant_id) })
        );
    }

    #[test]
    fn test_reselect_rejected_when_roster_does_not_fit() {
        let now = Utc::now();
        let mut session = session();
        session
            .select_flight(
                offer("1", &[TravelerType::Adult, TravelerType::Adult, TravelerType::HeldInfant]),
                now,
            )
            .unwrap();
        let adult_id = session.add_passenger(adult("Ada"), now).unwrap().id;
        session.add_passenger(adult("Grace"), now).unwrap();
        let mut infant = passenger("Ivy", TravelerType::HeldInfant, &born_years_ago(1));
        infant.associated_adult_id = Some(adult_id);
        session.add_passenger(infant, now).unwrap();
        let generation = session.generation();

        let err = session
            .select_flight(offer("2", &[TravelerType::Adult, TravelerType::Child, TravelerType::Child]), now)
            .unwrap_err();
        assert_eq!(
            err,
            CheckoutError::Validation(ValidationError::RosterExceedsOffer {
                traveler_type: TravelerType::Adult,
                entered: 2,
                allowed: 1,
            })
        );

        let err = session.select_flight(offer("3", &[TravelerType::Adult]), now).unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(ValidationError::RosterExceedsOffer { .. })));

        assert_eq!(session.selection().get().map(|o| o.id.as_str()), Some("1"));
        assert_eq!(session.roster().len(), 3);
        assert_eq!(session.generation(), generation);

        // a larger offer still accepts the roster but commit wants the exact mix
        session
            .select_flight(
                offer(
                    "4",
                    &[TravelerType::Adult, TravelerType::Adult, TravelerType::Child, TravelerType::HeldInfant],
                ),
                now,
            )
            .unwrap();
        let ticket = session.begin_availability_check(now).unwrap();
        session.finish_availability_check(ticket, ProbeOutcome::Available, now).unwrap();
        let err = session.begin_commit(now).unwrap_err();
        assert_eq!(err, CheckoutError::RosterIncomplete { have: 3, need: 4 });
    }

    #[test]
    fn test_cached_selection_must_fit_roster() {
        let now = Utc::now();
        let mut session = ready_session(now);
        let cached = CachedSelection {
            offer: offer("2", &[TravelerType::Child]),
            selected_at: now,
            written_at: now,
        };

        let err = session.restore_selection(cached, now).unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Validation(ValidationError::RosterExceedsOffer { traveler_type: TravelerType::Adult, .. })
        ));
        assert_eq!(session.selection().get().map(|o| o.id.as_str()), Some("1"));
    }

    #[test]
    fn test_idle_once_both_windows_expire() {
        let start = Utc::now();
        let mut session = session();
        assert!(session.is_idle());

        session.select_flight(offer("1", &[TravelerType::Adult]), start).unwrap();
        session.add_passenger(adult("Ada"), start).unwrap();
        assert!(!session.is_idle());

        session.tick(start + Duration::minutes(20));
        assert!(session.is_idle());
    }

    #[test]
    fn test_restore_reports_elapsed_windows() {
        let now = Utc::now();
        let mut session = session();
        let cached = CachedSelection {
            offer: offer("1", &[TravelerType::Adult]),
            selected_at: now - Duration::minutes(25),
            written_at: now - Duration::minutes(1),
        };

        let notice = session.restore_selection(cached, now).unwrap().unwrap();
        assert_eq!(notice.kind, ExpiryKind::FlightHold);
        assert!(session.selection().get().is_none());
    }
}
