use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_stream::wrappers::BroadcastStream;
use tripdesk_checkout::{
    AbandonedReservation, AvailabilityStatus, BookingSession, CheckoutError, CommitReceipt,
    ExpiryKind, ExpiryNotice, SessionSnapshot,
};
use tripdesk_core::repository::{CachedPassengers, CachedSelection};
use tripdesk_core::{FlightOffer, Passenger, PassengerData};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, SharedSession};
use crate::worker;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub resume_session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    pub session_id: Uuid,
    pub resumed: bool,
    pub notices: Vec<ExpiryNotice>,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    pub session_id: Uuid,
    pub released_subscriptions: usize,
}

#[derive(Debug, Deserialize)]
pub struct SelectFlightRequest {
    pub offer: FlightOffer,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct RemovePassengerResponse {
    pub removed: Passenger,
    /// Infants that lost their associated adult and need another one
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearPassengersResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ReleaseReservationResponse {
    pub abandoned: Option<AbandonedReservation>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout", post(create_checkout))
        .route("/v1/checkout/{id}", get(get_checkout).delete(teardown_checkout))
        .route("/v1/checkout/{id}/selection", put(select_flight))
        .route("/v1/checkout/{id}/passengers", post(add_passenger).delete(clear_passengers))
        .route("/v1/checkout/{id}/passengers/validate", post(validate_passenger))
        .route(
            "/v1/checkout/{id}/passengers/{passenger_id}",
            put(update_passenger).delete(remove_passenger),
        )
        .route("/v1/checkout/{id}/availability", post(check_availability))
        .route("/v1/checkout/{id}/commit", post(commit))
        .route("/v1/checkout/{id}/reservation/release", post(release_reservation))
        .route("/v1/checkout/{id}/events", get(stream_events))
}

// ============================================================================
// Helpers
// ============================================================================

/// Run one synchronous session operation, then publish whatever it emitted
async fn mutate<T, F>(state: &AppState, session_id: Uuid, op: F) -> Result<T, AppError>
where
    F: FnOnce(&mut BookingSession, DateTime<Utc>) -> Result<T, CheckoutError>,
{
    let session = state.session(session_id).await?;
    let (result, events) = {
        let mut session = session.lock().await;
        let result = op(&mut session, state.clock.now());
        (result, session.drain_events())
    };
    state.publish(session_id, events).await;
    result.map_err(AppError::from)
}

/// Run a network-bound operation on its own task so a dropped request can
/// not leave the session stuck mid-call
async fn detached<T, F, Fut>(state: &AppState, session_id: Uuid, session: SharedSession, op: F) -> Result<T, AppError>
where
    F: FnOnce(SharedSession) -> Fut,
    Fut: Future<Output = Result<T, CheckoutError>> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::spawn(op(session.clone()))
        .await
        .map_err(|e| AppError::InternalServerError(format!("Checkout task for {} failed: {}", session_id, e)))?;

    let events = session.lock().await.drain_events();
    state.publish(session_id, events).await;
    result.map_err(AppError::from)
}

fn cached_selection(session: &BookingSession, now: DateTime<Utc>) -> Option<CachedSelection> {
    let offer = session.selection().get()?.clone();
    let selected_at = session.selection().selected_at()?;
    Some(CachedSelection {
        offer,
        selected_at,
        written_at: now,
    })
}

fn cached_passengers(session: &BookingSession, now: DateTime<Utc>) -> Option<CachedPassengers> {
    let retention_started_at = session.roster().retention_started_at()?;
    Some(CachedPassengers {
        passengers: session.roster().passengers().to_vec(),
        retention_started_at,
        written_at: now,
    })
}

async fn sync_selection(state: &AppState, session_id: Uuid, entry: Option<CachedSelection>) {
    let result = match entry {
        Some(entry) => state.cache.save_selection(session_id, &entry).await,
        None => state.cache.delete_selection(session_id).await,
    };
    if let Err(e) = result {
        tracing::warn!("Failed to cache selection for session {}: {}", session_id, e);
    }
}

/// An empty roster has no retention window, so its cache entry goes away
async fn sync_passengers(state: &AppState, session_id: Uuid, entry: Option<CachedPassengers>) {
    let result = match entry {
        Some(entry) => state.cache.save_passengers(session_id, &entry).await,
        None => state.cache.delete_passengers(session_id).await,
    };
    if let Err(e) = result {
        tracing::warn!("Failed to cache passengers for session {}: {}", session_id, e);
    }
}

/// Rebuild a session from the cache. Windows are measured from the cached
/// start times, so anything that lapsed while the user was away is reported
/// straight away.
async fn restore(
    state: &AppState,
    session: &mut BookingSession,
    now: DateTime<Utc>,
) -> Result<Vec<ExpiryNotice>, AppError> {
    let session_id = session.id();
    let mut notices = Vec::new();

    let selection = state
        .cache
        .load_selection(session_id)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to load cached selection: {}", e)))?;
    if let Some(cached) = selection {
        notices.extend(session.restore_selection(cached, now)?);
    }

    let passengers = state
        .cache
        .load_passengers(session_id)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to load cached passengers: {}", e)))?;
    if let Some(cached) = passengers {
        notices.extend(session.restore_passengers(cached, now)?);
    }

    for notice in &notices {
        match notice.kind {
            ExpiryKind::FlightHold => sync_selection(state, session_id, None).await,
            ExpiryKind::PassengerRetention => sync_passengers(state, session_id, None).await,
            ExpiryKind::AvailabilityFreshness => {}
        }
    }
    Ok(notices)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/checkout
/// Start a checkout session, or resume one from the cache
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<CreateCheckoutResponse>), AppError> {
    if let Some(session_id) = req.resume_session_id {
        if let Ok(existing) = state.session(session_id).await {
            let session = existing.lock().await;
            if !session.is_closed() {
                return Ok((
                    StatusCode::OK,
                    Json(CreateCheckoutResponse {
                        session_id,
                        resumed: true,
                        notices: Vec::new(),
                        snapshot: session.snapshot(state.clock.now()),
                    }),
                ));
            }
        }
    }

    let now = state.clock.now();
    let session_id = req.resume_session_id.unwrap_or_else(Uuid::new_v4);
    let mut session = BookingSession::with_id(session_id, state.rules)?;

    let notices = match req.resume_session_id {
        Some(_) => restore(&state, &mut session, now).await?,
        None => Vec::new(),
    };
    let events = session.drain_events();
    let snapshot = session.snapshot(now);

    let shared: SharedSession = std::sync::Arc::new(tokio::sync::Mutex::new(session));
    state.sessions.write().await.insert(session_id, shared.clone());
    worker::start_expiry_ticker(state.clone(), session_id, shared);
    state.publish(session_id, events).await;

    tracing::info!("Checkout session {} opened (resumed: {})", session_id, req.resume_session_id.is_some());
    Ok((
        StatusCode::CREATED,
        Json(CreateCheckoutResponse {
            session_id,
            resumed: req.resume_session_id.is_some(),
            notices,
            snapshot,
        }),
    ))
}

/// GET /v1/checkout/{id}
pub async fn get_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session(session_id).await?;
    let snapshot = session.lock().await.snapshot(state.clock.now());
    Ok(Json(snapshot))
}

/// DELETE /v1/checkout/{id}
/// The user navigated away: release every timer of the session
pub async fn teardown_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<TeardownResponse>, AppError> {
    let session = state
        .forget(session_id)
        .await
        .ok_or_else(|| AppError::NotFoundError(format!("Checkout session {} not found", session_id)))?;

    let (released_subscriptions, events) = {
        let mut session = session.lock().await;
        let released = session.teardown(state.clock.now());
        (released, session.drain_events())
    };
    state.publish(session_id, events).await;

    Ok(Json(TeardownResponse {
        session_id,
        released_subscriptions,
    }))
}

/// PUT /v1/checkout/{id}/selection
pub async fn select_flight(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SelectFlightRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let (snapshot, cached) = mutate(&state, session_id, |session, now| {
        session.select_flight(req.offer, now)?;
        Ok((session.snapshot(now), cached_selection(session, now)))
    })
    .await?;

    sync_selection(&state, session_id, cached).await;
    Ok(Json(snapshot))
}

/// POST /v1/checkout/{id}/passengers
pub async fn add_passenger(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(data): Json<PassengerData>,
) -> Result<(StatusCode, Json<Passenger>), AppError> {
    let (passenger, cached) = mutate(&state, session_id, |session, now| {
        let passenger = session.add_passenger(data, now)?;
        Ok((passenger, cached_passengers(session, now)))
    })
    .await?;

    sync_passengers(&state, session_id, cached).await;
    Ok((StatusCode::CREATED, Json(passenger)))
}

/// POST /v1/checkout/{id}/passengers/validate
/// Advisory check while the form is still being filled in
pub async fn validate_passenger(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(data): Json<PassengerData>,
) -> Result<Json<ValidationResponse>, AppError> {
    let session = state.session(session_id).await?;
    session
        .lock()
        .await
        .validate_passenger(&data, data.traveler_type, state.clock.now())?;
    Ok(Json(ValidationResponse { valid: true }))
}

/// PUT /v1/checkout/{id}/passengers/{passenger_id}
pub async fn update_passenger(
    State(state): State<AppState>,
    Path((session_id, passenger_id)): Path<(Uuid, Uuid)>,
    Json(data): Json<PassengerData>,
) -> Result<Json<Passenger>, AppError> {
    let (passenger, cached) = mutate(&state, session_id, |session, now| {
        let passenger = session.update_passenger(passenger_id, data, now)?;
        Ok((passenger, cached_passengers(session, now)))
    })
    .await?;

    sync_passengers(&state, session_id, cached).await;
    Ok(Json(passenger))
}

/// DELETE /v1/checkout/{id}/passengers/{passenger_id}
pub async fn remove_passenger(
    State(state): State<AppState>,
    Path((session_id, passenger_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RemovePassengerResponse>, AppError> {
    let (outcome, cached) = mutate(&state, session_id, |session, now| {
        let outcome = session.remove_passenger(passenger_id, now)?;
        Ok((outcome, cached_passengers(session, now)))
    })
    .await?;

    sync_passengers(&state, session_id, cached).await;
    Ok(Json(RemovePassengerResponse {
        removed: outcome.removed,
        issues: outcome.issues.iter().map(|issue| issue.to_string()).collect(),
    }))
}

/// DELETE /v1/checkout/{id}/passengers
pub async fn clear_passengers(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ClearPassengersResponse>, AppError> {
    let removed = mutate(&state, session_id, |session, _now| session.clear_passengers()).await?;

    sync_passengers(&state, session_id, None).await;
    Ok(Json(ClearPassengersResponse { removed }))
}

/// POST /v1/checkout/{id}/availability
pub async fn check_availability(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AvailabilityStatus>, AppError> {
    let session = state.session(session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let status = detached(&state, session_id, session, move |session| async move {
        orchestrator.check_availability(&session).await
    })
    .await?;
    Ok(Json(status))
}

/// POST /v1/checkout/{id}/commit
/// Reserve, then open a payment session. On success the session is closed
/// and its cached entries are purged.
pub async fn commit(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CommitReceipt>, AppError> {
    let session = state.session(session_id).await?;
    let orchestrator = state.orchestrator.clone();

    let receipt = detached(&state, session_id, session, move |session| async move {
        orchestrator.commit(&session).await
    })
    .await?;

    if let Err(e) = state.cache.purge(session_id).await {
        tracing::warn!("Failed to purge cache for session {}: {}", session_id, e);
    }
    state.forget(session_id).await;

    tracing::info!(
        "Session {} handed off to payment {} for reservation {}",
        session_id,
        receipt.payment_session_id,
        receipt.reservation_id
    );
    Ok(Json(receipt))
}

/// POST /v1/checkout/{id}/reservation/release
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ReleaseReservationResponse>, AppError> {
    let abandoned = mutate(&state, session_id, |session, now| session.release_reservation(now)).await?;
    Ok(Json(ReleaseReservationResponse { abandoned }))
}

/// GET /v1/checkout/{id}/events
/// Server-sent stream of this session's change notifications
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    state.session(session_id).await?;
    let rx = state.sse_tx.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(envelope) if envelope.session_id == session_id => Some(
                Event::default()
                    .event(envelope.event.name())
                    .json_data(&envelope),
            ),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Event stream for session {} fell behind: {}", session_id, e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
