use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::ExpiryNotice;

/// Expiry check run once per tick against the subscriber's state
pub type TickHandler<T> = Box<dyn FnMut(&mut T, DateTime<Utc>) -> Option<ExpiryNotice> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Expiration scheduler has been torn down")]
    TornDown,
}

struct Subscription<T> {
    token: SubscriptionToken,
    label: &'static str,
    handler: TickHandler<T>,
}

/// Single tick source shared by every timer of a checkout session.
/// Handlers run in subscription order and all see the same `now`.
pub struct ExpirationScheduler<T> {
    subscriptions: Vec<Subscription<T>>,
    next_token: u64,
    torn_down: bool,
    last_tick: Option<DateTime<Utc>>,
}

impl<T> ExpirationScheduler<T> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            next_token: 1,
            torn_down: false,
            last_tick: None,
        }
    }

    pub fn subscribe<F>(&mut self, label: &'static str, handler: F) -> Result<SubscriptionToken, SchedulerError>
    where
        F: FnMut(&mut T, DateTime<Utc>) -> Option<ExpiryNotice> + Send + 'static,
    {
        if self.torn_down {
            return Err(SchedulerError::TornDown);
        }

        let token = SubscriptionToken(self.next_token);
        self.next_token += 1;
        self.subscriptions.push(Subscription {
            token,
            label,
            handler: Box::new(handler),
        });
        Ok(token)
    }

    /// Returns false if the token was not subscribed
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.token != token);
        before != self.subscriptions.len()
    }

    /// Evaluate every subscribed timer with one `now` snapshot
    pub fn tick(&mut self, target: &mut T, now: DateTime<Utc>) -> Vec<ExpiryNotice> {
        if self.torn_down {
            return Vec::new();
        }
        self.last_tick = Some(now);

        let mut notices = Vec::new();
        for subscription in self.subscriptions.iter_mut() {
            if let Some(notice) = (subscription.handler)(target, now) {
                tracing::debug!("Timer [{}] expired at {}", subscription.label, now);
                notices.push(notice);
            }
        }
        notices
    }

    /// Release every subscription. No tick fires afterwards.
    pub fn teardown(&mut self) -> usize {
        let released = self.subscriptions.len();
        self.subscriptions.clear();
        self.torn_down = true;
        released
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }
}

impl<T> Default for ExpirationScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ExpirationScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.subscriptions.iter().map(|s| s.label).collect();
        f.debug_struct("ExpirationScheduler")
            .field("subscriptions", &labels)
            .field("torn_down", &self.torn_down)
            .field("last_tick", &self.last_tick)
            .finish()
    }
}
