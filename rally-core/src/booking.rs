use crate::slot::SlotKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a booking gets billed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingMode {
    /// Charged at checkout time.
    Immediate,
    /// Charged automatically at the cutoff before the lesson, cancellable until then.
    Deferred,
    /// Paid out-of-band; the server only verifies the provider's order status.
    ManualThirdParty,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMode::Immediate => "IMMEDIATE",
            BillingMode::Deferred => "DEFERRED",
            BillingMode::ManualThirdParty => "MANUAL_THIRD_PARTY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IMMEDIATE" => Some(BillingMode::Immediate),
            "DEFERRED" => Some(BillingMode::Deferred),
            "MANUAL_THIRD_PARTY" => Some(BillingMode::ManualThirdParty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "REQUESTED",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUESTED" => Some(BookingStatus::Requested),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    AuthorizedPending,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::AuthorizedPending => "AUTHORIZED_PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNPAID" => Some(PaymentStatus::Unpaid),
            "AUTHORIZED_PENDING" => Some(PaymentStatus::AuthorizedPending),
            "PAID" => Some(PaymentStatus::Paid),
            "CANCELLED" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

/// The durable record of a reservation. The booking outlives every
/// notification and payment attempt around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub slot: SlotKey,
    pub slot_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub billing_mode: BillingMode,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub auto_charge_cancelled: bool,
    pub charge_attempts: i32,
    pub needs_attention: bool,
    pub last_charge_error: Option<String>,
    /// Provider customer holding the saved payment method (deferred billing).
    pub payment_customer_id: Option<String>,
    /// Provider-side reference of the last session or charge.
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_name: String,
        client_email: String,
        client_phone: Option<String>,
        slot: SlotKey,
        slot_id: Uuid,
        amount: i64,
        currency: String,
        billing_mode: BillingMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_name,
            client_email,
            client_phone,
            slot,
            slot_id,
            amount,
            currency,
            billing_mode,
            status: BookingStatus::Requested,
            payment_status: PaymentStatus::Unpaid,
            auto_charge_cancelled: false,
            charge_attempts: 0,
            needs_attention: false,
            last_charge_error: None,
            payment_customer_id: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_status(&mut self, status: BookingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn mark_paid(&mut self, reference: Option<String>) {
        self.payment_status = PaymentStatus::Paid;
        if reference.is_some() {
            self.payment_reference = reference;
        }
        self.updated_at = Utc::now();
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Instant at which the auto-charge becomes due.
    pub fn charge_due_at(&self, lead_hours: i64) -> DateTime<Utc> {
        self.slot.starts_at() - Duration::hours(lead_hours)
    }
}
