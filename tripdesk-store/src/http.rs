use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tripdesk_core::payment::{PaymentGateway, PaymentSession, PaymentSessionRequest};
use tripdesk_core::supplier::{
    AvailabilityProbeRequest, GatewayError, ProbeResponse, ReservationClient, ReservationRequest,
    ReservationResponse,
};
use tripdesk_core::{CoreError, CoreResult};
use tripdesk_shared::Masked;

const PROBE_PATH: &str = "/v1/shopping/flight-offers/pricing";
const RESERVATION_PATH: &str = "/v1/booking/flight-orders";
const PAYMENT_SESSION_PATH: &str = "/v1/checkout/sessions";

/// Longest remote error body carried into an error message
const MAX_DETAIL_LEN: usize = 300;

fn build_client(timeout: Duration) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::InternalError(format!("Failed to build HTTP client: {}", e)))
}

fn endpoint(base_url: &str, path: &str) -> CoreResult<String> {
    let base = base_url.trim().trim_end_matches('/');
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return Err(CoreError::ValidationError(format!("Invalid base url: {}", base_url)));
    }
    Ok(format!("{}{}", base, path))
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

/// Pull a human-readable message out of an error body. Understands
/// `{"errors":[{"detail":..}]}`, `{"error":{"message":..}}`, `{"detail":..}`
/// and `{"error":".."}`, otherwise falls back to the raw text.
pub fn error_detail(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|value| {
        value
            .pointer("/errors/0/detail")
            .or_else(|| value.pointer("/errors/0/title"))
            .or_else(|| value.pointer("/error/message"))
            .or_else(|| value.get("detail"))
            .or_else(|| value.get("error"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });

    let detail = from_json.unwrap_or_else(|| body.trim().to_string());
    if detail.is_empty() {
        return "no detail provided".to_string();
    }
    detail.chars().take(MAX_DETAIL_LEN).collect()
}

/// A 4xx from the pricing call means the offer itself was refused. Auth,
/// timeout and throttling statuses are failures of the call, not answers.
pub fn probe_rejection_means_unavailable(status: u16) -> bool {
    (400..500).contains(&status) && !matches!(status, 401 | 403 | 408 | 429)
}

async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    bearer: &Masked<String>,
    body: &Req,
) -> Result<Resp, GatewayError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client
        .post(url)
        .bearer_auth(bearer.expose())
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }

    response
        .json::<Resp>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Reservation system over JSON/HTTPS with a bearer API key
pub struct HttpReservationClient {
    client: reqwest::Client,
    probe_url: String,
    reservation_url: String,
    api_key: Masked<String>,
}

impl HttpReservationClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> CoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            probe_url: endpoint(base_url, PROBE_PATH)?,
            reservation_url: endpoint(base_url, RESERVATION_PATH)?,
            api_key: Masked::from(api_key),
        })
    }
}

#[async_trait]
impl ReservationClient for HttpReservationClient {
    async fn probe_availability(
        &self,
        request: &AvailabilityProbeRequest,
    ) -> Result<ProbeResponse, GatewayError> {
        match post_json::<_, ProbeResponse>(&self.client, &self.probe_url, &self.api_key, request).await {
            Err(GatewayError::Rejected { status, detail }) if probe_rejection_means_unavailable(status) => {
                Ok(ProbeResponse {
                    available: false,
                    detail: Some(detail),
                })
            }
            other => other,
        }
    }

    async fn create_reservation(
        &self,
        request: &ReservationRequest,
    ) -> Result<ReservationResponse, GatewayError> {
        tracing::debug!("POST {} for offer {}", self.reservation_url, request.offer.id);
        post_json(&self.client, &self.reservation_url, &self.api_key, request).await
    }
}

/// Hosted-checkout payment provider over JSON/HTTPS
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    session_url: String,
    secret_key: Masked<String>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> CoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            session_url: endpoint(base_url, PAYMENT_SESSION_PATH)?,
            secret_key: Masked::from(secret_key),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        tracing::debug!(
            "POST {} for reservation {} ({} minor units)",
            self.session_url,
            request.reservation_id,
            request.total_minor()
        );
        post_json(&self.client, &self.session_url, &self.secret_key, request).await
    }
}
