use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::payment::{PaymentGateway, PaymentSession, PaymentSessionRequest};
use crate::supplier::{
    AvailabilityProbeRequest, GatewayError, ProbeResponse, ReservationClient, ReservationRequest,
    ReservationResponse,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process reservation system. Replays queued outcomes in order and
/// falls back to "available" / "reserved" once the queue is empty.
#[derive(Default)]
pub struct MockReservationClient {
    probe_outcomes: Mutex<VecDeque<Result<ProbeResponse, GatewayError>>>,
    reservation_outcomes: Mutex<VecDeque<Result<ReservationResponse, GatewayError>>>,
    reservation_requests: Mutex<Vec<ReservationRequest>>,
    probe_calls: AtomicUsize,
    reservation_calls: AtomicUsize,
}

impl MockReservationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_probe(&self, outcome: Result<ProbeResponse, GatewayError>) {
        lock(&self.probe_outcomes).push_back(outcome);
    }

    pub fn queue_reservation(&self, outcome: Result<ReservationResponse, GatewayError>) {
        lock(&self.reservation_outcomes).push_back(outcome);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn reservation_calls(&self) -> usize {
        self.reservation_calls.load(Ordering::SeqCst)
    }

    /// Every reservation request received, oldest first
    pub fn reservation_requests(&self) -> Vec<ReservationRequest> {
        lock(&self.reservation_requests).clone()
    }
}

#[async_trait]
impl ReservationClient for MockReservationClient {
    async fn probe_availability(
        &self,
        request: &AvailabilityProbeRequest,
    ) -> Result<ProbeResponse, GatewayError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Mock availability probe for offer {}", request.offer.id);

        lock(&self.probe_outcomes).pop_front().unwrap_or(Ok(ProbeResponse {
            available: true,
            detail: None,
        }))
    }

    async fn create_reservation(
        &self,
        request: &ReservationRequest,
    ) -> Result<ReservationResponse, GatewayError> {
        let call = self.reservation_calls.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.reservation_requests).push(request.clone());

        lock(&self.reservation_outcomes).pop_front().unwrap_or_else(|| {
            Ok(ReservationResponse {
                success: true,
                reservation_id: Some(format!("MOCK-{}", call)),
                confirmed_offer: Some(request.offer.clone()),
                detail: None,
            })
        })
    }
}

/// In-process payment provider with the same queue-then-default behavior
#[derive(Default)]
pub struct MockPaymentGateway {
    outcomes: Mutex<VecDeque<Result<PaymentSession, GatewayError>>>,
    requests: Mutex<Vec<PaymentSessionRequest>>,
    calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, outcome: Result<PaymentSession, GatewayError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PaymentSessionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_payment_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        lock(&self.outcomes).pop_front().unwrap_or_else(|| {
            Ok(PaymentSession {
                id: format!("mock_cs_{}", request.reservation_id),
                redirect_url: format!("https://pay.example.test/c/{}", request.reservation_id),
            })
        })
    }
}
