use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Flight offer as returned by the reservation system's shopping step.
// Only the fields the checkout reads are typed; everything else rides along
// in `extra` so the offer can be submitted back untouched.
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelerType {
    Adult,
    Child,
    HeldInfant,
}

impl TravelerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelerType::Adult => "ADULT",
            TravelerType::Child => "CHILD",
            TravelerType::HeldInfant => "HELD_INFANT",
        }
    }
}

impl fmt::Display for TravelerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlightOffer {
    pub id: String,
    #[serde(default)]
    pub itineraries: Vec<Itinerary>,
    pub price: Price,
    pub traveler_pricings: Vec<TravelerPricing>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlightOffer {
    /// One passenger per traveler pricing
    pub fn required_passenger_count(&self) -> usize {
        self.traveler_pricings.len()
    }

    /// How many passengers of each traveler type the offer was priced for
    pub fn traveler_mix(&self) -> TravelerMix {
        let mut mix = TravelerMix::default();
        for pricing in &self.traveler_pricings {
            match pricing.traveler_type {
                TravelerType::Adult => mix.adults += 1,
                TravelerType::Child => mix.children += 1,
                TravelerType::HeldInfant => mix.held_infants += 1,
            }
        }
        mix
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub departure: FlightEndpoint,
    pub arrival: FlightEndpoint,
    pub carrier_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlightEndpoint {
    pub iata_code: String,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub currency: String,
    pub total: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grand_total: Option<String>,
}

impl Price {
    /// The amount to charge: grand total when present, otherwise total
    pub fn amount_due(&self) -> &str {
        self.grand_total.as_deref().unwrap_or(&self.total)
    }

    /// `amount_due` in minor currency units (cents)
    pub fn amount_due_minor_units(&self) -> Result<i64, PriceError> {
        parse_minor_units(self.amount_due())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TravelerPricing {
    pub traveler_id: String,
    pub traveler_type: TravelerType,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Passenger quota per traveler type derived from an offer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelerMix {
    pub adults: usize,
    pub children: usize,
    pub held_infants: usize,
}

impl TravelerMix {
    pub fn total(&self) -> usize {
        self.adults + self.children + self.held_infants
    }

    pub fn allowed(&self, traveler_type: TravelerType) -> usize {
        match traveler_type {
            TravelerType::Adult => self.adults,
            TravelerType::Child => self.children,
            TravelerType::HeldInfant => self.held_infants,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("Price is not a decimal amount: {0}")]
    Malformed(String),
    #[error("Price has more than two decimal places: {0}")]
    Precision(String),
    #[error("Price must not be negative: {0}")]
    Negative(String),
}

/// Parse a decimal amount such as "512.40" into minor units (51240)
pub fn parse_minor_units(amount: &str) -> Result<i64, PriceError> {
    let trimmed = amount.trim();
    if trimmed.starts_with('-') {
        return Err(PriceError::Negative(amount.to_string()));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(PriceError::Malformed(amount.to_string()));
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(PriceError::Malformed(amount.to_string()));
    }
    if fraction.len() > 2 {
        return Err(PriceError::Precision(amount.to_string()));
    }

    let whole: i64 = whole
        .parse()
        .map_err(|_| PriceError::Malformed(amount.to_string()))?;
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| PriceError::Malformed(amount.to_string()))? * 10,
        _ => fraction.parse().map_err(|_| PriceError::Malformed(amount.to_string()))?,
    };

    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(|| PriceError::Malformed(amount.to_string()))
}
