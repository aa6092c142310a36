use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tripdesk_shared::Masked;

use crate::offer::{FlightOffer, TravelerType};
use crate::passenger::Gender;

/// Failure talking to a remote system (reservation or payment)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Request timed out")]
    Timeout,
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Rejected by remote system ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("Could not decode response: {0}")]
    Decode(String),
}

// ============================================================================
// Reservation system payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TravelerName {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TravelerContact {
    pub email_address: Masked<String>,
    pub phones: Vec<Masked<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TravelerDocument {
    pub document_type: String,
    pub number: Masked<String>,
    pub holder: bool,
}

/// Traveler as the reservation system expects it: ids are 1-based positions
/// and an infant points at its adult by that position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TravelerRecord {
    pub id: String,
    pub date_of_birth: NaiveDate,
    pub name: TravelerName,
    pub gender: Gender,
    pub contact: TravelerContact,
    pub documents: Vec<TravelerDocument>,
    pub traveler_type: TravelerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_adult_id: Option<String>,
}

/// Fixed agency details attached to every reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgencyMetadata {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub country_code: String,
    pub remark: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityProbeRequest {
    pub offer: FlightOffer,
    pub travelers: Vec<TravelerRecord>,
    pub availability_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    pub available: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub offer: FlightOffer,
    pub travelers: Vec<TravelerRecord>,
    pub agency: AgencyMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub success: bool,
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub confirmed_offer: Option<FlightOffer>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[async_trait]
pub trait ReservationClient: Send + Sync {
    /// Ask whether the offer can still be booked. Carries a synthetic
    /// traveler and the availability-only flag, so nothing is reserved.
    async fn probe_availability(
        &self,
        request: &AvailabilityProbeRequest,
    ) -> Result<ProbeResponse, GatewayError>;

    /// Create the reservation for the real travelers
    async fn create_reservation(
        &self,
        request: &ReservationRequest,
    ) -> Result<ReservationResponse, GatewayError>;
}
