use chrono::Duration;

/// Lengths of the three validity windows of a checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutRules {
    pub flight_hold: Duration,
    pub passenger_retention: Duration,
    pub availability_freshness: Duration,
}

impl CheckoutRules {
    pub fn from_seconds(flight_hold: u64, passenger_retention: u64, availability_freshness: u64) -> Self {
        Self {
            flight_hold: seconds(flight_hold),
            passenger_retention: seconds(passenger_retention),
            availability_freshness: seconds(availability_freshness),
        }
    }
}

impl Default for CheckoutRules {
    fn default() -> Self {
        Self {
            flight_hold: Duration::minutes(20),
            passenger_retention: Duration::minutes(20),
            availability_freshness: Duration::minutes(10),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}
