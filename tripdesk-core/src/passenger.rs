use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tripdesk_shared::Masked;
use uuid::Uuid;

use crate::offer::TravelerType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

/// Passenger details as entered on the form.
/// `date_of_birth` stays a raw `YYYY-MM-DD` string because it may be
/// incomplete while the user is still typing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassengerData {
    pub first_name: String,
    pub last_name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub date_of_birth: String,
    pub gender: Option<Gender>,
    pub passport_number: Masked<String>,
    pub traveler_type: TravelerType,
    /// Roster id of the ADULT holding this infant. Only valid for HELD_INFANT.
    #[serde(default)]
    pub associated_adult_id: Option<Uuid>,
}

impl PassengerData {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// A passenger stored in the checkout roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passenger {
    pub id: Uuid,
    pub data: PassengerData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Passenger {
    pub fn new(data: PassengerData, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the entered details, keeping identity and creation time
    pub fn replace(&mut self, data: PassengerData, now: DateTime<Utc>) {
        self.data = data;
        self.updated_at = now;
    }

    pub fn traveler_type(&self) -> TravelerType {
        self.data.traveler_type
    }

    pub fn associated_adult_id(&self) -> Option<Uuid> {
        self.data.associated_adult_id
    }
}
