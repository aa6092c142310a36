use chrono::{DateTime, Duration, Utc};
use tripdesk_core::{FlightOffer, TravelerMix};

use crate::error::{ExpiryKind, ExpiryNotice};

/// Holds the one flight offer the user is checking out, for a fixed hold window
#[derive(Debug, Clone)]
pub struct FlightSelectionHolder {
    offer: Option<FlightOffer>,
    selected_at: Option<DateTime<Utc>>,
    hold: Duration,
}

impl FlightSelectionHolder {
    pub fn new(hold: Duration) -> Self {
        Self {
            offer: None,
            selected_at: None,
            hold,
        }
    }

    /// Replace the held offer and restart the hold window.
    /// Returns the offer that was held before, if any.
    pub fn select(&mut self, offer: FlightOffer, now: DateTime<Utc>) -> Option<FlightOffer> {
        self.selected_at = Some(now);
        self.offer.replace(offer)
    }

    /// Put back a cached offer. The hold runs from the original selection
    /// time, so an offer cached long ago comes back already expired.
    pub fn restore(&mut self, offer: FlightOffer, selected_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        self.offer = Some(offer);
        self.selected_at = Some(selected_at);
        self.clear_if_expired(now)
    }

    pub fn get(&self) -> Option<&FlightOffer> {
        self.offer.as_ref()
    }

    pub fn selected_at(&self) -> Option<DateTime<Utc>> {
        self.offer.as_ref().and(self.selected_at)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.selected_at().map(|at| at + self.hold)
    }

    /// Time left on the hold, floored at zero. `None` means nothing is held.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|expires_at| (expires_at - now).max(Duration::zero()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.time_remaining(now), Some(remaining) if remaining <= Duration::zero())
    }

    /// The offer, unless its hold has elapsed at `now`
    pub fn live_offer(&self, now: DateTime<Utc>) -> Option<&FlightOffer> {
        if self.is_expired(now) {
            None
        } else {
            self.offer.as_ref()
        }
    }

    pub fn required_passenger_count(&self) -> usize {
        self.offer.as_ref().map_or(0, FlightOffer::required_passenger_count)
    }

    pub fn traveler_mix(&self) -> TravelerMix {
        self.offer.as_ref().map(FlightOffer::traveler_mix).unwrap_or_default()
    }

    /// Called on every tick. Drops the offer once the hold is used up;
    /// the caller must tell the user and send them back to search.
    pub fn clear_if_expired(&mut self, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        if !self.is_expired(now) {
            return None;
        }

        let expired_at = self.expires_at().unwrap_or(now);
        if let Some(offer) = self.clear() {
            tracing::info!("Flight hold for offer {} expired at {}", offer.id, expired_at);
        }
        Some(ExpiryNotice::new(ExpiryKind::FlightHold, expired_at))
    }

    pub fn clear(&mut self) -> Option<FlightOffer> {
        self.selected_at = None;
        self.offer.take()
    }
}
