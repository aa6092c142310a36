use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;
use tripdesk_core::repository::{CachedPassengers, CachedSelection, SessionCache};
use uuid::Uuid;

fn selection_key(session_id: Uuid) -> String {
    format!("checkout:{}:selection", session_id)
}

fn passengers_key(session_id: Uuid) -> String {
    format!("checkout:{}:passengers", session_id)
}

/// Session cache in Redis. Entries live as long as the window they belong
/// to, so Redis drops them on its own once they could only be expired.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    selection_ttl_seconds: u64,
    passengers_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn new(
        connection_string: &str,
        selection_ttl_seconds: u64,
        passengers_ttl_seconds: u64,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            selection_ttl_seconds,
            passengers_ttl_seconds,
        })
    }

    async fn put(&self, key: String, payload: String, ttl_seconds: u64) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(&key, payload, ttl_seconds.max(1)).await?;
        debug!("Cached {} for {}s", key, ttl_seconds);
        Ok(())
    }

    async fn fetch(&self, key: String) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(key).await
    }

    async fn delete(&self, key: String) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await
    }
}

#[async_trait]
impl SessionCache for RedisClient {
    async fn save_selection(
        &self,
        session_id: Uuid,
        selection: &CachedSelection,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(selection)?;
        self.put(selection_key(session_id), payload, self.selection_ttl_seconds).await?;
        Ok(())
    }

    async fn load_selection(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedSelection>, Box<dyn std::error::Error + Send + Sync>> {
        let payload = self.fetch(selection_key(session_id)).await?;
        let selection = payload.map(|p| serde_json::from_str(&p)).transpose()?;
        Ok(selection)
    }

    async fn save_passengers(
        &self,
        session_id: Uuid,
        passengers: &CachedPassengers,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(passengers)?;
        self.put(passengers_key(session_id), payload, self.passengers_ttl_seconds).await?;
        Ok(())
    }

    async fn load_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<Option<CachedPassengers>, Box<dyn std::error::Error + Send + Sync>> {
        let payload = self.fetch(passengers_key(session_id)).await?;
        let passengers = payload.map(|p| serde_json::from_str(&p)).transpose()?;
        Ok(passengers)
    }

    async fn delete_selection(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.delete(selection_key(session_id)).await?;
        Ok(())
    }

    async fn delete_passengers(
        &self,
        session_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.delete(passengers_key(session_id)).await?;
        Ok(())
    }
}
