use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical form of a member code: trimmed, upper-cased.
/// Lookups are case-insensitive by contract.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A club member bound to a payment-provider customer.
///
/// Members are never hard-deleted in a way that orphans bookings;
/// deactivation flips `active` and removes registry visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub member_code: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub active: bool,
    pub payment_customer_id: String,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(
        member_code: String,
        name: String,
        email: String,
        phone: Option<String>,
        payment_customer_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_code: normalize_code(&member_code),
            name,
            email,
            phone,
            active: true,
            payment_customer_id,
            created_at: Utc::now(),
        }
    }

    /// Partial update: absent fields stay untouched.
    pub fn apply(&mut self, patch: MemberUpdate) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(phone) = patch.phone {
            self.phone = Some(phone);
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("Member not found: {0}")]
    NotFound(String),

    #[error("This membership is no longer active")]
    Inactive(String),

    #[error("Member storage error: {0}")]
    Storage(String),
}
