pub mod clock;
pub mod offer;
pub mod passenger;
pub mod supplier;
pub mod payment;
pub mod repository;
pub mod mock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use offer::{FlightOffer, Price, PriceError, TravelerMix, TravelerPricing, TravelerType};
pub use passenger::{Gender, Passenger, PassengerData};
pub use supplier::{GatewayError, ReservationClient};
pub use payment::PaymentGateway;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Remote gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

pub type CoreResult<T> = Result<T, CoreError>;
