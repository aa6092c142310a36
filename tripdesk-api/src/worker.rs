use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tripdesk_checkout::ExpiryKind;
use uuid::Uuid;

use crate::state::{AppState, SharedSession};

/// Drive one session's expiry timers at the configured tick interval
/// (1 Hz by default). Stops once the session is closed or no longer
/// registered. A session left idle by an expiry is closed and evicted.
pub fn start_expiry_ticker(state: AppState, session_id: Uuid, session: SharedSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Expiry ticker started for session {}", session_id);

        loop {
            interval.tick().await;

            if !state.sessions.read().await.contains_key(&session_id) {
                break;
            }

            let (notices, events, evict) = {
                let mut session = session.lock().await;
                if session.is_closed() {
                    break;
                }
                let now = state.clock.now();
                let notices = session.tick(now);
                let evict = !notices.is_empty() && session.is_idle();
                if evict {
                    session.teardown(now);
                }
                (notices, session.drain_events(), evict)
            };

            for notice in &notices {
                info!("Session {}: {:?} expired at {}", session_id, notice.kind, notice.expired_at);
                let result = match notice.kind {
                    ExpiryKind::FlightHold => state.cache.delete_selection(session_id).await,
                    ExpiryKind::PassengerRetention => state.cache.delete_passengers(session_id).await,
                    ExpiryKind::AvailabilityFreshness => Ok(()),
                };
                if let Err(e) = result {
                    warn!("Failed to drop expired cache entry for session {}: {}", session_id, e);
                }
            }

            if !events.is_empty() {
                state.publish(session_id, events).await;
            }

            if evict {
                state.forget(session_id).await;
                info!("Session {} evicted after its windows expired", session_id);
                break;
            }
        }

        info!("Expiry ticker stopped for session {}", session_id);
    })
}
