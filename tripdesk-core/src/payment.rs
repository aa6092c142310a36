use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tripdesk_shared::Masked;

use crate::supplier::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub name: String,
    pub amount_minor: i64,
    pub currency: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerIdentity {
    pub name: String,
    pub email: Masked<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSessionRequest {
    pub reservation_id: String,
    pub customer: CustomerIdentity,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
}

impl PaymentSessionRequest {
    pub fn total_minor(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.amount_minor * i64::from(item.quantity))
            .sum()
    }
}

/// Hosted payment page created by the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSession {
    pub id: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted payment session for a reservation
    async fn create_payment_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError>;
}
