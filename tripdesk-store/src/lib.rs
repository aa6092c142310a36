pub mod app_config;
pub mod redis_repo;
pub mod events;
pub mod memory;
pub mod http;

pub use redis_repo::RedisClient;
pub use events::EventProducer;
pub use memory::{InMemoryEventLog, InMemorySessionCache};
pub use http::{HttpPaymentGateway, HttpReservationClient};
