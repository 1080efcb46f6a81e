use chrono::NaiveDate;
use rally_core::booking::{BillingMode, Booking, BookingStatus};
use rally_core::member::MemberError;
use rally_core::notify::{Notifier, OutboundMail};
use rally_core::repository::{BookingRepository, MemberRepository, RepoError, SlotRepository};
use rally_core::slot::{SlotError, SlotKey};
use rally_core::token::{BookingSnapshot, TokenCodec};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Client-side submission of a booking request.
#[derive(Debug, Clone)]
pub struct BookingInput {
    pub client_name: Option<String>,
    pub client_email: String,
    pub client_phone: Option<String>,
    pub resource: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub amount: i64,
    pub currency: String,
    pub billing_mode: BillingMode,
    pub member_code: Option<String>,
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub booking_id: Uuid,
    pub token: String,
    pub email_sent: bool,
    pub email_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EmailsSent {
    pub client: bool,
    pub admin: bool,
}

#[derive(Debug)]
pub struct ConfirmOutcome {
    pub booking: Booking,
    pub emails_sent: EmailsSent,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("Invalid or expired confirmation token")]
    InvalidToken,

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Booking already confirmed: {0}")]
    AlreadyConfirmed(Uuid),

    #[error("Booking already cancelled: {0}")]
    AlreadyCancelled(Uuid),

    #[error(transparent)]
    Member(#[from] MemberError),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn storage(e: RepoError) -> BookingError {
    BookingError::Storage(e.to_string())
}

/// Drives the two-step booking handshake:
/// request -> pending reservation -> emailed token -> admin confirmation.
///
/// The booking row is the durable record; every email around it is
/// best-effort and reported back as a flag.
pub struct BookingProcessor {
    slots: Arc<dyn SlotRepository>,
    bookings: Arc<dyn BookingRepository>,
    members: Arc<dyn MemberRepository>,
    notifier: Arc<dyn Notifier>,
    tokens: TokenCodec,
    admin_email: String,
    confirm_base_url: String,
}

impl BookingProcessor {
    pub fn new(
        slots: Arc<dyn SlotRepository>,
        bookings: Arc<dyn BookingRepository>,
        members: Arc<dyn MemberRepository>,
        notifier: Arc<dyn Notifier>,
        tokens: TokenCodec,
        admin_email: String,
        confirm_base_url: String,
    ) -> Self {
        Self {
            slots,
            bookings,
            members,
            notifier,
            tokens,
            admin_email,
            confirm_base_url: confirm_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn submit(&self, input: BookingInput) -> Result<SubmitOutcome, BookingError> {
        let email = input.client_email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(BookingError::Validation(
                "a valid client email is required".into(),
            ));
        }
        let resource = input.resource.trim().to_string();
        if resource.is_empty() {
            return Err(BookingError::Validation("resource is required".into()));
        }
        if input.hour > 23 {
            return Err(BookingError::Validation(format!(
                "hour out of range: {}",
                input.hour
            )));
        }
        if input.amount < 0 {
            return Err(BookingError::Validation("amount must not be negative".into()));
        }

        // Deferred billing charges a stored payment method later, so the
        // request must resolve to an active member up front.
        let payment_customer_id = match input.billing_mode {
            BillingMode::Deferred => {
                let code = input.member_code.as_deref().unwrap_or("").trim();
                if code.is_empty() {
                    return Err(BookingError::Validation(
                        "deferred billing requires a member code".into(),
                    ));
                }
                let member = self
                    .bookings_member(code)
                    .await?;
                Some(member)
            }
            _ => None,
        };

        let key = SlotKey::new(resource, input.date, input.hour);
        let handle = self.slots.reserve(&key).await?;

        let mut booking = Booking::new(
            input.client_name.unwrap_or_default(),
            email,
            input.client_phone,
            key,
            handle.id,
            input.amount,
            input.currency,
            input.billing_mode,
        );
        booking.payment_customer_id = payment_customer_id;

        if let Err(e) = self.bookings.create(&booking).await {
            let _ = self.slots.release(handle.id).await;
            return Err(storage(e));
        }

        let token = match self.tokens.encode(&snapshot_of(&booking)) {
            Ok(token) => token,
            Err(e) => {
                booking.update_status(BookingStatus::Cancelled);
                let _ = self.bookings.update(&booking).await;
                let _ = self.slots.release(handle.id).await;
                return Err(BookingError::Storage(e.to_string()));
            }
        };

        let (email_sent, email_error) =
            match self.notifier.send(&self.admin_request_mail(&booking, &token)).await {
                Ok(()) => (true, None),
                Err(e) => {
                    warn!("Admin notification failed for booking {}: {}", booking.id, e);
                    (false, Some(e.to_string()))
                }
            };

        info!("Booking requested: {} for {}", booking.id, booking.slot);

        Ok(SubmitOutcome {
            booking_id: booking.id,
            token,
            email_sent,
            email_error,
        })
    }

    pub async fn confirm(&self, token: &str) -> Result<ConfirmOutcome, BookingError> {
        // Signature and expiry are checked before any slot mutation.
        let snapshot = self
            .tokens
            .decode(token)
            .map_err(|_| BookingError::InvalidToken)?;

        let mut booking = self
            .bookings
            .get(snapshot.booking_id)
            .await
            .map_err(storage)?
            .ok_or(BookingError::NotFound(snapshot.booking_id))?;

        // A token is logically single-use: re-presenting it after
        // confirmation must not re-trigger side effects.
        match booking.status {
            BookingStatus::Confirmed => return Err(BookingError::AlreadyConfirmed(booking.id)),
            BookingStatus::Cancelled => return Err(BookingError::AlreadyCancelled(booking.id)),
            BookingStatus::Requested => {}
        }

        self.slots.finalize(booking.slot_id, booking.id).await?;
        booking.update_status(BookingStatus::Confirmed);
        self.bookings.update(&booking).await.map_err(storage)?;

        if booking.billing_mode == BillingMode::Deferred {
            info!(
                "Booking {} confirmed, auto-charge due at {}",
                booking.id,
                booking.charge_due_at(24)
            );
        } else {
            info!("Booking {} confirmed", booking.id);
        }

        let client = self
            .send_logged(&self.client_confirmation_mail(&booking), booking.id)
            .await;
        let admin = self
            .send_logged(&self.admin_confirmation_mail(&booking), booking.id)
            .await;

        Ok(ConfirmOutcome {
            booking,
            emails_sent: EmailsSent { client, admin },
        })
    }

    async fn bookings_member(&self, code: &str) -> Result<String, BookingError> {
        let member = self
            .members
            .find_by_code(code)
            .await
            .map_err(storage)?
            .ok_or_else(|| MemberError::NotFound(code.to_string()))?;
        if !member.active {
            return Err(MemberError::Inactive(member.member_code).into());
        }
        Ok(member.payment_customer_id)
    }

    async fn send_logged(&self, mail: &OutboundMail, booking_id: Uuid) -> bool {
        match self.notifier.send(mail).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Notification to {} failed for booking {}: {}", mail.to, booking_id, e);
                false
            }
        }
    }

    fn confirm_link(&self, token: &str) -> String {
        format!("{}/confirm-booking?token={}", self.confirm_base_url, token)
    }

    fn admin_request_mail(&self, booking: &Booking, token: &str) -> OutboundMail {
        OutboundMail {
            to: self.admin_email.clone(),
            subject: format!("New booking request: {}", booking.slot),
            body: format!(
                "{} <{}> requested {}.\n\nConfirm this booking:\n{}\n",
                booking.client_name,
                booking.client_email,
                booking.slot,
                self.confirm_link(token)
            ),
        }
    }

    fn client_confirmation_mail(&self, booking: &Booking) -> OutboundMail {
        OutboundMail {
            to: booking.client_email.clone(),
            subject: format!("Booking confirmed: {}", booking.slot),
            body: format!(
                "Hello {},\n\nyour booking for {} is confirmed.\n",
                booking.client_name, booking.slot
            ),
        }
    }

    fn admin_confirmation_mail(&self, booking: &Booking) -> OutboundMail {
        OutboundMail {
            to: self.admin_email.clone(),
            subject: format!("Booking confirmed: {}", booking.slot),
            body: format!(
                "Booking {} for {} <{}> is now confirmed.\n",
                booking.id, booking.client_name, booking.client_email
            ),
        }
    }
}

fn snapshot_of(booking: &Booking) -> BookingSnapshot {
    BookingSnapshot {
        booking_id: booking.id,
        client_name: booking.client_name.clone(),
        client_email: booking.client_email.clone(),
        resource: booking.slot.resource.clone(),
        date: booking.slot.date,
        hour: booking.slot.hour,
        amount: booking.amount,
        billing_mode: booking.billing_mode,
    }
}
