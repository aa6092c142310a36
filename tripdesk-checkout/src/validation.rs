use chrono::{Datelike, NaiveDate};
use tripdesk_core::{PassengerData, TravelerType};

use crate::error::{AgeMismatchError, ValidationError};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date-of-birth input while the user may still be typing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirthDate {
    Incomplete,
    Complete(NaiveDate),
}

/// `YYYY-MM-DD` with any component missing or short is incomplete;
/// a full-length string that is not a real date is an error.
pub fn parse_birth_date(raw: &str) -> Result<BirthDate, ValidationError> {
    let trimmed = raw.trim();
    let parts: Vec<&str> = trimmed.split('-').collect();
    let incomplete = trimmed.len() < 10
        || parts.len() < 3
        || parts.iter().any(|part| part.is_empty());
    if incomplete {
        return Ok(BirthDate::Incomplete);
    }

    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map(BirthDate::Complete)
        .map_err(|_| ValidationError::InvalidDate(trimmed.to_string()))
}

/// Whole years between `date_of_birth` and `on`. `None` for future dates.
pub fn age_on(date_of_birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    if date_of_birth > on {
        return None;
    }
    let mut years = on.year() - date_of_birth.year();
    if (on.month(), on.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// ADULT is 12 or older, CHILD is 2 to 11, HELD_INFANT is under 2
pub fn check_age(traveler_type: TravelerType, date_of_birth: NaiveDate, today: NaiveDate) -> Result<u32, ValidationError> {
    let age = age_on(date_of_birth, today)
        .ok_or_else(|| ValidationError::DateInFuture(date_of_birth.format(DATE_FORMAT).to_string()))?;

    let reason = match traveler_type {
        TravelerType::Adult if age < 12 => {
            Some(format!("An adult must be at least 12 years old (passenger is {})", age))
        }
        TravelerType::Child if !(2..12).contains(&age) => {
            Some(format!("A child must be between 2 and 11 years old (passenger is {})", age))
        }
        TravelerType::HeldInfant if age >= 2 => {
            Some(format!("A held infant must be under 2 years old (passenger is {})", age))
        }
        _ => None,
    };

    match reason {
        Some(reason) => Err(AgeMismatchError { traveler_type, age_years: age, reason }.into()),
        None => Ok(age),
    }
}

/// Advisory check while the form is being filled in: an incomplete date
/// passes so the user is not nagged mid-typing.
pub fn validate(data: &PassengerData, traveler_type: TravelerType, today: NaiveDate) -> Result<(), ValidationError> {
    match parse_birth_date(&data.date_of_birth)? {
        BirthDate::Incomplete => Ok(()),
        BirthDate::Complete(date_of_birth) => check_age(traveler_type, date_of_birth, today).map(|_| ()),
    }
}

pub fn validate_fields(data: &PassengerData) -> Result<(), ValidationError> {
    if data.first_name.trim().is_empty() {
        return Err(ValidationError::MissingField("first_name"));
    }
    if data.last_name.trim().is_empty() {
        return Err(ValidationError::MissingField("last_name"));
    }
    if data.email.is_blank() {
        return Err(ValidationError::MissingField("email"));
    }
    if data.phone.is_blank() {
        return Err(ValidationError::MissingField("phone"));
    }
    if data.date_of_birth.trim().is_empty() {
        return Err(ValidationError::MissingField("date_of_birth"));
    }
    if data.gender.is_none() {
        return Err(ValidationError::MissingField("gender"));
    }
    if data.passport_number.is_blank() {
        return Err(ValidationError::MissingField("passport_number"));
    }
    Ok(())
}

/// Mandatory check on submit: every field present, a complete date, and an
/// age that fits the traveler type.
pub fn validate_for_submission(data: &PassengerData, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    validate_fields(data)?;
    match parse_birth_date(&data.date_of_birth)? {
        BirthDate::Incomplete => Err(ValidationError::InvalidDate(data.date_of_birth.trim().to_string())),
        BirthDate::Complete(date_of_birth) => {
            check_age(data.traveler_type, date_of_birth, today)?;
            Ok(date_of_birth)
        }
    }
}
