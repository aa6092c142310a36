use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, Mutex, RwLock};
use tripdesk_checkout::{BookingCommitOrchestrator, BookingSession, CheckoutRules, CheckoutUrls};
use tripdesk_core::mock::{MockPaymentGateway, MockReservationClient};
use tripdesk_core::repository::{EventPublisher, SessionCache};
use tripdesk_core::{Clock, PaymentGateway, ReservationClient, SystemClock};
use tripdesk_shared::{CheckoutEvent, EventEnvelope};
use tripdesk_store::app_config::{AdapterMode, Config};
use tripdesk_store::{
    EventProducer, HttpPaymentGateway, HttpReservationClient, InMemoryEventLog, InMemorySessionCache,
    RedisClient,
};
use uuid::Uuid;

use crate::error::AppError;

pub type SharedSession = Arc<Mutex<BookingSession>>;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, SharedSession>>>,
    pub orchestrator: Arc<BookingCommitOrchestrator>,
    pub cache: Arc<dyn SessionCache>,
    pub publisher: Arc<dyn EventPublisher>,
    pub sse_tx: broadcast::Sender<EventEnvelope>,
    pub clock: Arc<dyn Clock>,
    pub rules: CheckoutRules,
    pub tick_interval: Duration,
}

impl AppState {
    pub fn new(
        orchestrator: BookingCommitOrchestrator,
        cache: Arc<dyn SessionCache>,
        publisher: Arc<dyn EventPublisher>,
        rules: CheckoutRules,
        tick_interval: Duration,
    ) -> Self {
        let (sse_tx, _) = broadcast::channel(100);
        let clock = orchestrator.clock();
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            orchestrator: Arc::new(orchestrator),
            cache,
            publisher,
            sse_tx,
            clock,
            rules,
            tick_interval,
        }
    }

    /// Wire the adapters named by the configuration
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let reservations: Arc<dyn ReservationClient> = match config.reservation.mode {
            AdapterMode::Mock => {
                tracing::warn!("Reservation system is mocked");
                Arc::new(MockReservationClient::new())
            }
            AdapterMode::Http => Arc::new(
                HttpReservationClient::new(
                    &config.reservation.base_url,
                    &config.reservation.api_key,
                    Duration::from_millis(config.reservation.timeout_ms),
                )
                .context("Failed to create reservation client")?,
            ),
        };

        let payments: Arc<dyn PaymentGateway> = match config.payment.mode {
            AdapterMode::Mock => {
                tracing::warn!("Payment provider is mocked");
                Arc::new(MockPaymentGateway::new())
            }
            AdapterMode::Http => Arc::new(
                HttpPaymentGateway::new(
                    &config.payment.base_url,
                    &config.payment.secret_key,
                    Duration::from_millis(config.payment.timeout_ms),
                )
                .context("Failed to create payment gateway")?,
            ),
        };

        let rules = &config.business_rules;
        let cache: Arc<dyn SessionCache> = if config.redis.enabled() {
            let redis = RedisClient::new(
                &config.redis.url,
                rules.flight_hold_seconds,
                rules.passenger_retention_seconds,
            )
            .await
            .context("Failed to connect to Redis")?;
            Arc::new(redis)
        } else {
            tracing::info!("No Redis url configured, caching sessions in memory");
            Arc::new(InMemorySessionCache::new())
        };

        let publisher: Arc<dyn EventPublisher> = if config.kafka.enabled() {
            let producer = EventProducer::new(&config.kafka.brokers, &config.kafka.topic)
                .context("Failed to create Kafka producer")?;
            tracing::info!("Publishing checkout events to {}", producer.topic());
            Arc::new(producer)
        } else {
            tracing::info!("No Kafka brokers configured, keeping checkout events in memory");
            Arc::new(InMemoryEventLog::new())
        };

        let orchestrator = BookingCommitOrchestrator::new(
            reservations,
            payments,
            Arc::new(SystemClock),
            config.agency.clone().into(),
            CheckoutUrls {
                success_url: config.payment.success_url.clone(),
                cancel_url: config.payment.cancel_url.clone(),
            },
        );

        let checkout_rules = CheckoutRules::from_seconds(
            rules.flight_hold_seconds,
            rules.passenger_retention_seconds,
            rules.availability_freshness_seconds,
        );

        Ok(Self::new(orchestrator, cache, publisher, checkout_rules, rules.tick_interval()))
    }

    pub async fn session(&self, session_id: Uuid) -> Result<SharedSession, AppError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFoundError(format!("Checkout session {} not found", session_id)))
    }

    pub async fn forget(&self, session_id: Uuid) -> Option<SharedSession> {
        self.sessions.write().await.remove(&session_id)
    }

    /// Fan drained session events out to SSE subscribers and the event
    /// publisher. Publishing is best effort.
    pub async fn publish(&self, session_id: Uuid, events: Vec<CheckoutEvent>) {
        let emitted_at = self.clock.now().timestamp();
        for event in events {
            let envelope = EventEnvelope {
                session_id,
                emitted_at,
                event,
            };
            if let Err(e) = self.publisher.publish(&envelope).await {
                tracing::warn!(
                    "Failed to publish {} for session {}: {}",
                    envelope.event.name(),
                    session_id,
                    e
                );
            }
            // No subscribers is fine
            let _ = self.sse_tx.send(envelope);
        }
    }
}
