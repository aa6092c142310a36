use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tripdesk_core::payment::{CustomerIdentity, LineItem, PaymentSessionRequest};
use tripdesk_core::supplier::{
    AgencyMetadata, ReservationRequest, TravelerContact, TravelerDocument, TravelerName,
    TravelerRecord,
};
use tripdesk_core::{
    Clock, FlightOffer, Passenger, PaymentGateway, PriceError, ReservationClient, TravelerType,
};
use uuid::Uuid;

use crate::availability::{self, AvailabilityStatus};
use crate::error::{CheckoutError, ValidationError};
use crate::session::BookingSession;
use crate::validation::{self, BirthDate};

/// Reservation created in phase 1 and not yet paid
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub reservation_id: String,
    /// Priced offer as confirmed by the reservation system. Its grand total
    /// is what gets charged.
    pub confirmed_offer: FlightOffer,
    pub created_at: DateTime<Utc>,
}

/// A remote reservation the session stopped tracking without paying it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbandonedReservation {
    pub reservation_id: String,
    pub reason: String,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitState {
    pub in_flight: bool,
    pub reservation: Option<Reservation>,
    pub abandoned: Vec<AbandonedReservation>,
}

impl CommitState {
    pub fn reservation_id(&self) -> Option<&str> {
        self.reservation.as_ref().map(|r| r.reservation_id.as_str())
    }

    pub fn record_abandoned(&mut self, reservation_id: String, reason: &str, now: DateTime<Utc>) -> AbandonedReservation {
        let abandoned = AbandonedReservation {
            reservation_id,
            reason: reason.to_string(),
            abandoned_at: now,
        };
        self.abandoned.push(abandoned.clone());
        abandoned
    }

    /// Stop tracking the held reservation, keeping a record of it
    pub fn abandon(&mut self, reason: &str, now: DateTime<Utc>) -> Option<AbandonedReservation> {
        let reservation = self.reservation.take()?;
        Some(self.record_abandoned(reservation.reservation_id, reason, now))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitStep {
    /// Phase 1 still has to run
    Reserve {
        offer: FlightOffer,
        travelers: Vec<TravelerRecord>,
    },
    /// A reservation is already held; go straight to phase 2
    Pay { reservation_id: String },
}

/// Issued by `BookingSession::begin_commit`. Responses are applied only
/// while the session is still on the same generation.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    pub(crate) generation: u64,
    pub(crate) step: CommitStep,
}

impl CommitTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn step(&self) -> &CommitStep {
        &self.step
    }
}

/// Result of a completed commit: where to send the user to pay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitReceipt {
    pub reservation_id: String,
    pub payment_session_id: String,
    pub redirect_url: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Traveler records in roster order with 1-based ids. An infant's
/// associated adult becomes that adult's position, never the roster uuid.
pub fn build_travelers(passengers: &[Passenger]) -> Result<Vec<TravelerRecord>, ValidationError> {
    let positions: HashMap<Uuid, String> = passengers
        .iter()
        .enumerate()
        .map(|(index, passenger)| (passenger.id, (index + 1).to_string()))
        .collect();

    passengers
        .iter()
        .enumerate()
        .map(|(index, passenger)| {
            let data = &passenger.data;
            let date_of_birth = match validation::parse_birth_date(&data.date_of_birth)? {
                BirthDate::Complete(date) => date,
                BirthDate::Incomplete => {
                    return Err(ValidationError::InvalidDate(data.date_of_birth.clone()))
                }
            };
            let gender = data.gender.ok_or(ValidationError::MissingField("gender"))?;

            let associated_adult_id = match (data.traveler_type, data.associated_adult_id) {
                (TravelerType::HeldInfant, Some(adult_id)) => Some(
                    positions
                        .get(&adult_id)
                        .cloned()
                        .ok_or(ValidationError::AssociatedAdultNotFound(adult_id))?,
                ),
                (TravelerType::HeldInfant, None) => {
                    return Err(ValidationError::MissingAssociatedAdult { infant_id: Some(passenger.id) })
                }
                _ => None,
            };

            Ok(TravelerRecord {
                id: (index + 1).to_string(),
                date_of_birth,
                name: TravelerName {
                    first_name: data.first_name.trim().to_string(),
                    last_name: data.last_name.trim().to_string(),
                },
                gender,
                contact: TravelerContact {
                    email_address: data.email.clone(),
                    phones: vec![data.phone.clone()],
                },
                documents: vec![TravelerDocument {
                    document_type: "PASSPORT".to_string(),
                    number: data.passport_number.clone(),
                    holder: true,
                }],
                traveler_type: data.traveler_type,
                associated_adult_id,
            })
        })
        .collect()
}

/// The paying customer: first adult, else the first passenger
pub fn lead_customer(passengers: &[Passenger]) -> Option<CustomerIdentity> {
    passengers
        .iter()
        .find(|p| p.traveler_type() == TravelerType::Adult)
        .or_else(|| passengers.first())
        .map(|p| CustomerIdentity {
            name: p.data.full_name(),
            email: p.data.email.clone(),
        })
}

/// One line item for the confirmed grand total of the reservation
pub fn payment_request(
    reservation: &Reservation,
    customer: CustomerIdentity,
    urls: &CheckoutUrls,
) -> Result<PaymentSessionRequest, PriceError> {
    let price = &reservation.confirmed_offer.price;
    let amount_minor = price.amount_due_minor_units()?;

    Ok(PaymentSessionRequest {
        reservation_id: reservation.reservation_id.clone(),
        customer,
        line_items: vec![LineItem {
            name: format!("Flight reservation {}", reservation.reservation_id),
            amount_minor,
            currency: price.currency.clone(),
            quantity: 1,
        }],
        success_url: urls.success_url.clone(),
        cancel_url: urls.cancel_url.clone(),
    })
}

/// Drives the availability probe and the reserve-then-pay commit against
/// the remote systems. The session lock is only held between the network
/// calls, never across them.
pub struct BookingCommitOrchestrator {
    reservations: Arc<dyn ReservationClient>,
    payments: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    agency: AgencyMetadata,
    urls: CheckoutUrls,
}

impl BookingCommitOrchestrator {
    pub fn new(
        reservations: Arc<dyn ReservationClient>,
        payments: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        agency: AgencyMetadata,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            reservations,
            payments,
            clock,
            agency,
            urls,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub async fn check_availability(
        &self,
        session: &Mutex<BookingSession>,
    ) -> Result<AvailabilityStatus, CheckoutError> {
        let ticket = session.lock().await.begin_availability_check(self.clock.now())?;
        let outcome = availability::probe(self.reservations.as_ref(), ticket.request()).await;
        session
            .lock()
            .await
            .finish_availability_check(ticket, outcome, self.clock.now())
    }

    /// Two-phase commit. Phase 2 only runs after phase 1 succeeded, and a
    /// reservation left over from a failed phase 2 is reused instead of
    /// reserving again.
    pub async fn commit(&self, session: &Mutex<BookingSession>) -> Result<CommitReceipt, CheckoutError> {
        let ticket = session.lock().await.begin_commit(self.clock.now())?;
        let generation = ticket.generation;

        match ticket.step {
            CommitStep::Reserve { offer, travelers } => {
                let request = ReservationRequest {
                    offer,
                    travelers,
                    agency: self.agency.clone(),
                };
                tracing::info!(
                    "Creating reservation for offer {} with {} traveler(s)",
                    request.offer.id,
                    request.travelers.len()
                );
                let result = self.reservations.create_reservation(&request).await;
                session
                    .lock()
                    .await
                    .finish_reservation(generation, result, self.clock.now())?;
            }
            CommitStep::Pay { reservation_id } => {
                tracing::info!("Retrying payment session for held reservation {}", reservation_id);
            }
        }

        let request = session
            .lock()
            .await
            .prepare_payment(generation, &self.urls, self.clock.now())?;
        let result = self.payments.create_payment_session(&request).await;
        session
            .lock()
            .await
            .finish_payment(generation, &request, result, self.clock.now())
    }
}
