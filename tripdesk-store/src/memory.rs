use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tripdesk_core::repository::{CachedPassengers, CachedSelection, EventPublisher, SessionCache};
use tripdesk_shared::EventEnvelope;
use uuid::Uuid;

/// Process-local session cache for development and tests
#[derive(Default)]
pub struct InMemorySessionCache {
    selections: RwLock<HashMap<Uuid, CachedSelection>>,
    passengers: RwLock<HashMap<Uuid, CachedPassengers>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn save_selection(
        &self,
        session_id: Uuid,
        selection: &CachedSelection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.selections.write().await.insert(session_id, selection.clone());
        Ok(())
    }

    async fn load_selection(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedSelection>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.selections.read().await.get(&session_id).cloned())
    }

    async fn save_passengers(
        &self,
        session_id: Uuid,
        passengers: &CachedPassengers,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.passengers.write().await.insert(session_id, passengers.clone());
        Ok(())
    }

    async fn load_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedPassengers>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.passengers.read().await.get(&session_id).cloned())
    }

    async fn delete_selection(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.selections.write().await.remove(&session_id);
        Ok(())
    }

    async fn delete_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.passengers.write().await.remove(&session_id);
        Ok(())
    }
}

/// Keeps published envelopes in memory when no broker is configured
#[derive(Default)]
pub struct InMemoryEventLog {
    envelopes: RwLock<Vec<EventEnvelope>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.read().await.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventLog {
    async fn publish(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!("Event {} for session {}", envelope.event.name(), envelope.session_id);
        self.envelopes.write().await.push(envelope.clone());
        Ok(())
    }
}
