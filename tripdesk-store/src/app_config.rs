use serde::Deserialize;
use std::env;
use std::time::Duration;
use tripdesk_core::supplier::AgencyMetadata;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub business_rules: BusinessRules,
    pub reservation: ReservationConfig,
    pub payment: PaymentConfig,
    pub agency: AgencyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: String,
}

impl RedisConfig {
    pub fn enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    #[serde(default)]
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl KafkaConfig {
    pub fn enabled(&self) -> bool {
        !self.brokers.trim().is_empty()
    }
}

fn default_topic() -> String {
    "checkout.events".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub flight_hold_seconds: u64,
    pub passenger_retention_seconds: u64,
    pub availability_freshness_seconds: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 { 1000 }

impl BusinessRules {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// `mock` wires the in-process adapters, `http` the real remote systems
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    Mock,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub mode: AdapterMode,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub mode: AdapterMode,
    pub base_url: String,
    #[serde(default)]
    pub secret_key: String,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgencyConfig {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub country_code: String,
    pub remark: String,
}

impl From<AgencyConfig> for AgencyMetadata {
    fn from(agency: AgencyConfig) -> Self {
        AgencyMetadata {
            name: agency.name,
            email: agency.email,
            phone: agency.phone,
            country_code: agency.country_code,
            remark: agency.remark,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TRIPDESK_PAYMENT__SECRET_KEY=sk_live_...`
            .add_source(config::Environment::with_prefix("TRIPDESK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
