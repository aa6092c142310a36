use chrono::{Datelike, NaiveDate, Utc};
use tripdesk_core::{FlightOffer, Gender, PassengerData, Price, TravelerPricing, TravelerType};

pub fn offer(id: &str, travelers: &[TravelerType]) -> FlightOffer {
    FlightOffer {
        id: id.to_string(),
        itineraries: vec![],
        price: Price {
            currency: "EUR".into(),
            total: "480.00".into(),
            grand_total: Some("512.40".into()),
        },
        traveler_pricings: travelers
            .iter()
            .enumerate()
            .map(|(i, t)| TravelerPricing {
                traveler_id: (i + 1).to_string(),
                traveler_type: *t,
                extra: Default::default(),
            })
            .collect(),
        extra: Default::default(),
    }
}

/// Birth date that makes the passenger `years` old today (birthday was 30 days ago)
pub fn born_years_ago(years: i32) -> String {
    let today = Utc::now().date_naive();
    let anchor = today - chrono::Duration::days(30);
    let dob = NaiveDate::from_ymd_opt(anchor.year() - years, anchor.month(), anchor.day().min(28))
        .unwrap_or(anchor);
    dob.format("%Y-%m-%d").to_string()
}

pub fn passenger(first_name: &str, traveler_type: TravelerType, date_of_birth: &str) -> PassengerData {
    PassengerData {
        first_name: first_name.to_string(),
        last_name: "Lovelace".to_string(),
        email: format!("{}@example.com", first_name.to_lowercase()).into(),
        phone: "+441632960000".into(),
        date_of_birth: date_of_birth.to_string(),
        gender: Some(Gender::Female),
        passport_number: "P1234567".into(),
        traveler_type,
        associated_adult_id: None,
    }
}

pub fn adult(first_name: &str) -> PassengerData {
    passenger(first_name, TravelerType::Adult, &born_years_ago(30))
}
