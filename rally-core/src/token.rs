use crate::booking::BillingMode;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimal booking snapshot carried inside a confirmation token.
/// The token is the only transport of pending-booking state between the
/// request and the admin's confirmation click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub booking_id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub resource: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub amount: i64,
    pub billing_mode: BillingMode,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    #[serde(flatten)]
    booking: BookingSnapshot,
    iat: i64,
    exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid or expired confirmation token")]
    Invalid,

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// Signed, expiring codec for confirmation tokens (HS256).
/// A forged or stale token fails `decode` before any slot mutation.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn encode(&self, booking: &BookingSnapshot) -> Result<String, TokenError> {
        self.encode_at(booking, Utc::now())
    }

    fn encode_at(
        &self,
        booking: &BookingSnapshot,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            booking: booking.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<BookingSnapshot, TokenError> {
        decode::<TokenClaims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.booking)
            .map_err(|_| TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> BookingSnapshot {
        BookingSnapshot {
            booking_id: Uuid::new_v4(),
            client_name: "Ada".into(),
            client_email: "a@b.com".into(),
            resource: "court-1".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            hour: 10,
            amount: 2500,
            billing_mode: BillingMode::Deferred,
        }
    }

    #[test]
    fn round_trip() {
        let codec = TokenCodec::new("test-secret", 72);
        let snap = snapshot();
        let token = codec.encode(&snap).unwrap();
        assert_eq!(codec.decode(&token).unwrap(), snap);
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = TokenCodec::new("test-secret", 1);
        // Issued long enough ago that the 1h ttl is past any decode leeway.
        let token = codec
            .encode_at(&snapshot(), Utc::now() - Duration::hours(3))
            .unwrap();
        assert!(matches!(codec.decode(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let codec = TokenCodec::new("test-secret", 72);
        let token = codec.encode(&snapshot()).unwrap();
        let mut tampered = token.clone();
        // Flip a payload character; the signature no longer matches.
        let mid = token.len() / 2;
        let replacement = if &token[mid..=mid] == "A" { "B" } else { "A" };
        tampered.replace_range(mid..=mid, replacement);
        assert!(codec.decode(&tampered).is_err());
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let codec = TokenCodec::new("test-secret", 72);
        let other = TokenCodec::new("other-secret", 72);
        let token = other.encode(&snapshot()).unwrap();
        assert!(matches!(codec.decode(&token), Err(TokenError::Invalid)));
    }
}
