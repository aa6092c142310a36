use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tripdesk_shared::EventEnvelope;
use uuid::Uuid;

use crate::offer::FlightOffer;
use crate::passenger::Passenger;

/// Cached selected offer. `selected_at` is the hold timer start,
/// `written_at` only records when the cache entry was refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedSelection {
    pub offer: FlightOffer,
    pub selected_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedPassengers {
    pub passengers: Vec<Passenger>,
    pub retention_started_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
}

/// Advisory cache of checkout state so a session can be resumed.
/// Never authoritative for expiry.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn save_selection(
        &self,
        session_id: Uuid,
        selection: &CachedSelection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn load_selection(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedSelection>, Box<dyn std::error::Error + Send + Sync>>;

    async fn save_passengers(
        &self,
        session_id: Uuid,
        passengers: &CachedPassengers,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn load_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedPassengers>, Box<dyn std::error::Error + Send + Sync>>;

    async fn delete_selection(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn delete_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Drop everything cached for the session
    async fn purge(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.delete_selection(session_id).await?;
        self.delete_passengers(session_id).await
    }
}

/// Outbound sink for checkout change notifications
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
