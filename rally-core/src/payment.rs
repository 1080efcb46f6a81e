use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of verifying a payment with the provider.
/// Only `Paid` ever advances a booking to paid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentVerdict {
    Paid,
    Pending,
    Failed,
}

/// Checkout flavour: `Payment` charges now, `Setup` stores a reusable
/// payment method without charging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutMode {
    Payment,
    Setup,
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub mode: CheckoutMode,
    /// Minor units. Required for `Payment`, ignored for `Setup`.
    pub amount: Option<i64>,
    pub currency: String,
    pub description: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Caller-side reference (booking id) carried through the provider.
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub reference: String,
    pub verdict: PaymentVerdict,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment not completed: {0}")]
    NotCompleted(String),

    #[error("Operation not supported by this payment rail")]
    Unsupported,

    #[error("Payment provider error: {0}")]
    Provider(String),
}

/// Uniform capability over the payment backends. Callers depend on this
/// set only, never on provider-specific types.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Open a hosted checkout (payment or setup mode) and return the
    /// redirect session.
    async fn create_session(&self, req: &SessionRequest) -> Result<CheckoutSession, PaymentError>;

    /// Register a customer with the provider, returning its id.
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<String, PaymentError>;

    /// Charge the customer's saved payment method off-session.
    async fn charge_saved_method(
        &self,
        customer_id: &str,
        amount: i64,
        currency: &str,
        description: &str,
    ) -> Result<ChargeOutcome, PaymentError>;

    /// Query the provider for the state of a payment or session id.
    async fn verify(&self, payment_id: &str) -> Result<PaymentVerdict, PaymentError>;
}

/// Ledger row for a provider charge or refund. Amount is signed:
/// positive for charges, negative for refunds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub posted: bool,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn charge(booking_id: Uuid, amount: i64, currency: String, reference: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            amount: amount.abs(),
            currency,
            reference,
            posted: true,
            created_at: Utc::now(),
        }
    }

    pub fn refund(booking_id: Uuid, amount: i64, currency: String, reference: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            amount: -amount.abs(),
            currency,
            reference,
            posted: true,
            created_at: Utc::now(),
        }
    }
}
