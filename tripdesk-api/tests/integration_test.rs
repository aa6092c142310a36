use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tripdesk_api::{app, AppState};
use tripdesk_checkout::{BookingCommitOrchestrator, CheckoutRules, CheckoutUrls};
use tripdesk_core::mock::{MockPaymentGateway, MockReservationClient};
use tripdesk_core::repository::SessionCache;
use tripdesk_core::supplier::AgencyMetadata;
use tripdesk_core::ManualClock;
use tripdesk_store::{InMemoryEventLog, InMemorySessionCache};
use uuid::Uuid;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    reservations: Arc<MockReservationClient>,
    cache: Arc<InMemorySessionCache>,
    events: Arc<InMemoryEventLog>,
}

fn test_app(tick_interval: std::time::Duration) -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()));
    let reservations = Arc::new(MockReservationClient::new());
    let payments = Arc::new(MockPaymentGateway::new());
    let cache = Arc::new(InMemorySessionCache::new());
    let events = Arc::new(InMemoryEventLog::new());

    let orchestrator = BookingCommitOrchestrator::new(
        reservations.clone(),
        payments,
        clock.clone(),
        AgencyMetadata {
            name: "Tripdesk Travel".into(),
            email: "bookings@tripdesk.test".into(),
            phone: "+351210000001".into(),
            country_code: "PT".into(),
            remark: "Online booking".into(),
        },
        CheckoutUrls {
            success_url: "http://localhost:3000/checkout/success".into(),
            cancel_url: "http://localhost:3000/checkout/cancel".into(),
        },
    );
    let state = AppState::new(
        orchestrator,
        cache.clone(),
        events.clone(),
        CheckoutRules::default(),
        tick_interval,
    );

    TestApp {
        router: app(state),
        clock,
        reservations,
        cache,
        events,
    }
}

fn offer_json() -> Value {
    json!({
        "type": "flight-offer",
        "id": "OFFER-1",
        "itineraries": [{
            "duration": "PT2H5M",
            "segments": [{
                "departure": { "iataCode": "LIS", "at": "2026-12-01T07:15:00" },
                "arrival": { "iataCode": "AMS", "at": "2026-12-01T11:20:00" },
                "carrierCode": "TP",
                "number": "662"
            }]
        }],
        "price": { "currency": "EUR", "total": "180.00", "grandTotal": "212.40" },
        "travelerPricings": [{ "travelerId": "1", "travelerType": "ADULT" }]
    })
}

fn adult_json(email: &str) -> Value {
    json!({
        "first_name": "Grace",
        "last_name": "Hopper",
        "email": email,
        "phone": "+351210000000",
        "date_of_birth": "1990-12-09",
        "gender": "FEMALE",
        "passport_number": "C01X00T47",
        "traveler_type": "ADULT"
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open_with_passenger(app: &TestApp) -> Uuid {
    let (status, body) = send(&app.router, "POST", "/v1/checkout", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id: Uuid = serde_json::from_value(body["session_id"].clone()).unwrap();

    let uri = format!("/v1/checkout/{}/selection", session_id);
    let (status, _) = send(&app.router, "PUT", &uri, Some(json!({ "offer": offer_json() }))).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/v1/checkout/{}/passengers", session_id);
    let (status, _) = send(&app.router, "POST", &uri, Some(adult_json("grace@example.com"))).await;
    assert_eq!(status, StatusCode::CREATED);

    session_id
}

#[tokio::test]
async fn test_checkout_happy_path() {
    let app = test_app(std::time::Duration::from_secs(3600));
    let session_id = open_with_passenger(&app).await;

    let commit_uri = format!("/v1/checkout/{}/commit", session_id);
    let (status, body) = send(&app.router, "POST", &commit_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["next_step"], "recheck");
    assert_eq!(app.reservations.reservation_calls(), 0);

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/v1/checkout/{}/availability", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "available");

    let (status, body) = send(&app.router, "POST", &commit_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reservation_id"], "MOCK-1");
    assert_eq!(body["amount_minor"], 21240);
    assert_eq!(body["redirect_url"], "https://pay.example.test/c/MOCK-1");

    let (status, _) = send(&app.router, "GET", &format!("/v1/checkout/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.cache.load_selection(session_id).await.unwrap().is_none());
    assert!(app.cache.load_passengers(session_id).await.unwrap().is_none());

    let names: Vec<&str> = app
        .events
        .envelopes()
        .await
        .iter()
        .map(|envelope| envelope.event.name())
        .collect();
    assert!(names.contains(&"reservation_created"));
    assert!(names.contains(&"payment_session_created"));
}

#[tokio::test]
async fn test_invalid_passenger_is_rejected() {
    let app = test_app(std::time::Duration::from_secs(3600));
    let (_, body) = send(&app.router, "POST", "/v1/checkout", Some(json!({}))).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let uri = format!("/v1/checkout/{}/passengers", session_id);
    let (status, body) = send(&app.router, "POST", &uri, Some(adult_json("grace@example.com"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["next_step"], "re_search");

    let uri = format!("/v1/checkout/{}/selection", session_id);
    send(&app.router, "PUT", &uri, Some(json!({ "offer": offer_json() }))).await;

    let uri = format!("/v1/checkout/{}/passengers", session_id);
    let (status, body) = send(&app.router, "POST", &uri, Some(adult_json(""))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["severity"], "info");
    assert_eq!(body["next_step"], "correct_input");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = test_app(std::time::Duration::from_secs(3600));
    let uri = format!("/v1/checkout/{}", Uuid::new_v4());
    let (status, body) = send(&app.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["next_step"], "start_over");
}

#[tokio::test]
async fn test_resume_measures_windows_from_cached_start() {
    let app = test_app(std::time::Duration::from_secs(3600));
    let session_id = open_with_passenger(&app).await;

    let (status, body) = send(&app.router, "DELETE", &format!("/v1/checkout/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released_subscriptions"], 3);

    app.clock.advance(Duration::minutes(5));
    let resume = json!({ "resume_session_id": session_id });
    let (status, body) = send(&app.router, "POST", "/v1/checkout", Some(resume.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["resumed"], true);
    assert_eq!(body["snapshot"]["offer"]["id"], "OFFER-1");
    assert_eq!(body["snapshot"]["passengers"].as_array().unwrap().len(), 1);
    assert_eq!(body["snapshot"]["hold_seconds_remaining"], 15 * 60);

    send(&app.router, "DELETE", &format!("/v1/checkout/{}", session_id), None).await;
    app.clock.advance(Duration::minutes(16));
    let (status, body) = send(&app.router, "POST", "/v1/checkout", Some(resume)).await;
    assert_eq!(status, StatusCode::CREATED);
    let kinds: Vec<&str> = body["notices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|notice| notice["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["flight_hold", "passenger_retention"]);
    assert!(body["snapshot"]["offer"].is_null());
    assert!(app.cache.load_selection(session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ticker_evicts_expired_session() {
    let app = test_app(std::time::Duration::from_millis(10));
    let session_id = open_with_passenger(&app).await;

    app.clock.advance(Duration::minutes(21));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let (status, body) = send(&app.router, "GET", &format!("/v1/checkout/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["next_step"], "start_over");
    assert!(app.cache.load_selection(session_id).await.unwrap().is_none());
    assert!(app.cache.load_passengers(session_id).await.unwrap().is_none());

    let names: Vec<&str> = app
        .events
        .envelopes()
        .await
        .iter()
        .map(|envelope| envelope.event.name())
        .collect();
    assert!(names.contains(&"flight_hold_expired"));
    assert!(names.contains(&"session_closed"));
}

#[tokio::test]
async fn test_ticker_keeps_fresh_session() {
    let app = test_app(std::time::Duration::from_millis(10));
    let (_, body) = send(&app.router, "POST", "/v1/checkout", Some(json!({}))).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    app.clock.advance(Duration::minutes(30));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (status, _) = send(&app.router, "GET", &format!("/v1/checkout/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
}
