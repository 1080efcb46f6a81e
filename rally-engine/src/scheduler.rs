use chrono::{DateTime, Utc};
use rally_core::booking::{Booking, PaymentStatus};
use rally_core::notify::{Notifier, OutboundMail};
use rally_core::payment::{PaymentRail, PaymentVerdict, Transaction};
use rally_core::repository::{BookingRepository, RepoError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// When and how often deferred bookings get charged.
#[derive(Debug, Clone, Copy)]
pub struct ChargePolicy {
    /// Hours before the slot start at which the charge becomes due.
    pub lead_hours: i64,
    /// Failed attempts tolerated before the booking is escalated.
    pub max_attempts: i32,
}

impl Default for ChargePolicy {
    fn default() -> Self {
        Self {
            lead_hours: 24,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub booking_id: Uuid,
    pub already_cancelled: bool,
}

/// Summary of one billing sweep.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingRunReport {
    pub charged: Vec<Uuid>,
    /// Charges initiated but still settling at the provider.
    pub pending: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
    pub escalated: Vec<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Booking already paid: {0}")]
    AlreadyPaid(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),
}

fn storage(e: RepoError) -> ScheduleError {
    ScheduleError::Storage(e.to_string())
}

/// Charges deferred bookings at their cutoff and lets clients opt out
/// beforehand. A sweep is idempotent: the due query excludes paid,
/// cancelled and escalated bookings, and a charge is recorded before
/// the next sweep can see the booking again.
pub struct AutoChargeScheduler {
    bookings: Arc<dyn BookingRepository>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
    admin_email: String,
    policy: ChargePolicy,
}

impl AutoChargeScheduler {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
        admin_email: String,
        policy: ChargePolicy,
    ) -> Self {
        Self {
            bookings,
            rail,
            notifier,
            admin_email,
            policy,
        }
    }

    /// Opt a booking out of auto-charge. Cancelling twice is a no-op
    /// reported as `already_cancelled`, never an error.
    pub async fn cancel(&self, booking_id: Uuid) -> Result<CancelOutcome, ScheduleError> {
        let mut booking = self
            .bookings
            .get(booking_id)
            .await
            .map_err(storage)?
            .ok_or(ScheduleError::NotFound(booking_id))?;

        if booking.is_paid() {
            return Err(ScheduleError::AlreadyPaid(booking_id));
        }
        if booking.auto_charge_cancelled {
            return Ok(CancelOutcome {
                booking_id,
                already_cancelled: true,
            });
        }

        booking.auto_charge_cancelled = true;
        booking.updated_at = Utc::now();
        self.bookings.update(&booking).await.map_err(storage)?;
        info!("Auto-charge cancelled for booking {}", booking_id);

        Ok(CancelOutcome {
            booking_id,
            already_cancelled: false,
        })
    }

    /// One billing sweep over everything due at `as_of`.
    pub async fn run_due(&self, as_of: DateTime<Utc>) -> Result<BillingRunReport, ScheduleError> {
        let due = self
            .bookings
            .due_for_charge(as_of, self.policy.lead_hours)
            .await
            .map_err(storage)?;

        let mut report = BillingRunReport::default();
        for mut booking in due {
            // The due query already filters these, but a row may have
            // changed between the query and this iteration.
            if booking.is_paid() || booking.auto_charge_cancelled || booking.needs_attention {
                report.skipped.push(booking.id);
                continue;
            }

            // A charge initiated on an earlier sweep may still be
            // settling. Resolve that one instead of opening a second.
            if booking.payment_status == PaymentStatus::AuthorizedPending {
                self.settle_pending(&mut booking, &mut report).await?;
                continue;
            }

            let customer_id = match booking.payment_customer_id.clone() {
                Some(id) => id,
                None => {
                    warn!("Booking {} is due but has no payment customer", booking.id);
                    self.record_failure(&mut booking, "no saved payment method", &mut report)
                        .await?;
                    continue;
                }
            };

            let description = format!("Booking {} ({})", booking.id, booking.slot);
            match self
                .rail
                .charge_saved_method(&customer_id, booking.amount, &booking.currency, &description)
                .await
            {
                Ok(outcome) if outcome.verdict == PaymentVerdict::Paid => {
                    self.post_charge(&mut booking, outcome.reference).await?;
                    report.charged.push(booking.id);
                }
                Ok(outcome) if outcome.verdict == PaymentVerdict::Pending => {
                    // Keep the reference; later sweeps verify it rather
                    // than charging the same booking a second time.
                    booking.payment_status = PaymentStatus::AuthorizedPending;
                    booking.payment_reference = Some(outcome.reference.clone());
                    booking.updated_at = Utc::now();
                    self.bookings.update(&booking).await.map_err(storage)?;
                    info!(
                        "Charge {} for booking {} is settling at the provider",
                        outcome.reference, booking.id
                    );
                    report.pending.push(booking.id);
                }
                Ok(outcome) => {
                    self.record_failure(
                        &mut booking,
                        &format!("charge not completed: {:?}", outcome.verdict),
                        &mut report,
                    )
                    .await?;
                }
                Err(e) => {
                    self.record_failure(&mut booking, &e.to_string(), &mut report)
                        .await?;
                }
            }
        }

        info!(
            "Billing run at {}: {} charged, {} pending, {} failed, {} escalated, {} skipped",
            as_of,
            report.charged.len(),
            report.pending.len(),
            report.failed.len(),
            report.escalated.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Bookings escalated out of the automatic retry loop.
    pub async fn attention_list(&self) -> Result<Vec<Booking>, ScheduleError> {
        self.bookings.needing_attention().await.map_err(storage)
    }

    async fn post_charge(
        &self,
        booking: &mut Booking,
        reference: String,
    ) -> Result<(), ScheduleError> {
        booking.mark_paid(Some(reference.clone()));
        self.bookings.update(booking).await.map_err(storage)?;
        let tx = Transaction::charge(
            booking.id,
            booking.amount,
            booking.currency.clone(),
            reference,
        );
        self.bookings.add_transaction(&tx).await.map_err(storage)?;
        info!("Charged booking {} ({} {})", booking.id, booking.amount, booking.currency);
        Ok(())
    }

    /// Checks on a charge a previous sweep left settling.
    async fn settle_pending(
        &self,
        booking: &mut Booking,
        report: &mut BillingRunReport,
    ) -> Result<(), ScheduleError> {
        let reference = match booking.payment_reference.clone() {
            Some(r) => r,
            None => {
                warn!(
                    "Booking {} is marked settling without a payment reference",
                    booking.id
                );
                booking.payment_status = PaymentStatus::Unpaid;
                booking.updated_at = Utc::now();
                self.bookings.update(booking).await.map_err(storage)?;
                report.skipped.push(booking.id);
                return Ok(());
            }
        };

        match self.rail.verify(&reference).await {
            Ok(PaymentVerdict::Paid) => {
                self.post_charge(booking, reference).await?;
                report.charged.push(booking.id);
            }
            Ok(PaymentVerdict::Pending) => {
                info!(
                    "Charge {} for booking {} is still settling",
                    reference, booking.id
                );
                report.pending.push(booking.id);
            }
            Ok(PaymentVerdict::Failed) => {
                booking.payment_status = PaymentStatus::Unpaid;
                booking.payment_reference = None;
                self.record_failure(booking, "pending charge failed at the provider", report)
                    .await?;
            }
            Err(e) => {
                // Transient provider error: leave the booking settling
                // and try again on the next sweep.
                warn!(
                    "Verification of charge {} for booking {} failed: {}",
                    reference, booking.id, e
                );
                report.pending.push(booking.id);
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        booking: &mut Booking,
        reason: &str,
        report: &mut BillingRunReport,
    ) -> Result<(), ScheduleError> {
        booking.charge_attempts += 1;
        booking.last_charge_error = Some(reason.to_string());
        booking.updated_at = Utc::now();

        warn!(
            "Charge attempt {}/{} failed for booking {}: {}",
            booking.charge_attempts, self.policy.max_attempts, booking.id, reason
        );

        if booking.charge_attempts >= self.policy.max_attempts {
            booking.needs_attention = true;
            report.escalated.push(booking.id);
            error!(
                "Booking {} escalated after {} failed charge attempts",
                booking.id, booking.charge_attempts
            );
            // Alert delivery never blocks the sweep.
            let mail = OutboundMail {
                to: self.admin_email.clone(),
                subject: format!("Auto-charge escalated: booking {}", booking.id),
                body: format!(
                    "Charging booking {} for {} <{}> failed {} times.\nLast error: {}\nManual follow-up required.\n",
                    booking.id,
                    booking.client_name,
                    booking.client_email,
                    booking.charge_attempts,
                    reason
                ),
            };
            if let Err(e) = self.notifier.send(&mail).await {
                warn!("Escalation alert for booking {} failed: {}", booking.id, e);
            }
        } else {
            report.failed.push((booking.id, reason.to_string()));
        }

        self.bookings.update(booking).await.map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockRail, RecordingNotifier};
    use chrono::{NaiveDate, TimeZone};
    use rally_core::booking::{BillingMode, Booking, BookingStatus};
    use rally_core::repository::SlotRepository;
    use rally_core::slot::SlotKey;
    use rally_store::MemoryStore;
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: Arc<MemoryStore>,
        rail: Arc<MockRail>,
        notifier: Arc<RecordingNotifier>,
        scheduler: AutoChargeScheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(MockRail::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = AutoChargeScheduler::new(
            store.clone(),
            rail.clone(),
            notifier.clone(),
            "admin@club.example".into(),
            ChargePolicy::default(),
        );
        Fixture {
            store,
            rail,
            notifier,
            scheduler,
        }
    }

    async fn seed_deferred(store: &MemoryStore) -> Booking {
        let slot = SlotKey::new("court-1", NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), 10);
        let handle = store.reserve(&slot).await.unwrap();
        let mut booking = Booking::new(
            "Ada".into(),
            "a@b.com".into(),
            None,
            slot,
            handle.id,
            2500,
            "EUR".into(),
            BillingMode::Deferred,
        );
        booking.update_status(BookingStatus::Confirmed);
        booking.payment_customer_id = Some("cus_1".into());
        store.create(&booking).await.unwrap();
        booking
    }

    fn after_cutoff() -> DateTime<Utc> {
        // Slot starts 2025-01-10T10:00Z, cutoff with 24h lead is 01-09T10:00Z.
        Utc.with_ymd_and_hms(2025, 1, 9, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn due_booking_is_charged_once() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;

        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.charged, vec![booking.id]);
        assert_eq!(f.rail.charge_count(), 1);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert!(stored.is_paid());
        assert_eq!(f.store.transactions(booking.id).await.unwrap().len(), 1);

        // Second sweep sees nothing due.
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert!(report.charged.is_empty());
        assert_eq!(f.rail.charge_count(), 1);
    }

    #[tokio::test]
    async fn booking_before_cutoff_is_not_charged() {
        let f = fixture();
        seed_deferred(&f.store).await;

        let early = Utc.with_ymd_and_hms(2025, 1, 8, 9, 0, 0).unwrap();
        let report = f.scheduler.run_due(early).await.unwrap();
        assert!(report.charged.is_empty());
        assert_eq!(f.rail.charge_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;

        let first = f.scheduler.cancel(booking.id).await.unwrap();
        assert!(!first.already_cancelled);

        let second = f.scheduler.cancel(booking.id).await.unwrap();
        assert!(second.already_cancelled);

        // Cancelled bookings never get charged.
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert!(report.charged.is_empty());
        assert_eq!(f.rail.charge_count(), 0);
    }

    #[tokio::test]
    async fn cancel_rejects_paid_and_unknown_bookings() {
        let f = fixture();
        let mut booking = seed_deferred(&f.store).await;
        booking.mark_paid(Some("pi_1".into()));
        f.store.update(&booking).await.unwrap();

        assert!(matches!(
            f.scheduler.cancel(booking.id).await,
            Err(ScheduleError::AlreadyPaid(_))
        ));
        assert!(matches!(
            f.scheduler.cancel(Uuid::new_v4()).await,
            Err(ScheduleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_failures_escalate_and_alert_admin() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;
        f.rail.succeed.store(false, Ordering::SeqCst);

        for attempt in 1..=2 {
            let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
            assert_eq!(report.failed.len(), 1);
            assert!(report.escalated.is_empty());
            let stored = f.store.get(booking.id).await.unwrap().unwrap();
            assert_eq!(stored.charge_attempts, attempt);
        }

        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.escalated, vec![booking.id]);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert!(stored.needs_attention);
        assert_eq!(
            stored.last_charge_error.as_deref(),
            Some("Payment provider error: card declined")
        );
        assert_eq!(f.notifier.sent_to("admin@club.example"), 1);

        // Escalated bookings drop out of subsequent sweeps.
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert!(report.failed.is_empty() && report.escalated.is_empty());
        assert_eq!(f.rail.charge_count(), 3);

        let attention = f.scheduler.attention_list().await.unwrap();
        assert_eq!(attention.len(), 1);
        assert_eq!(attention[0].id, booking.id);
    }

    #[tokio::test]
    async fn successful_retry_clears_the_failure_streak() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;

        f.rail.succeed.store(false, Ordering::SeqCst);
        f.scheduler.run_due(after_cutoff()).await.unwrap();

        f.rail.succeed.store(true, Ordering::SeqCst);
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.charged, vec![booking.id]);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert!(stored.is_paid());
        assert!(!stored.needs_attention);
    }

    #[tokio::test]
    async fn settling_charge_is_verified_not_recharged() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;
        *f.rail.charge_verdict.lock().unwrap() = PaymentVerdict::Pending;

        // The charge goes out but does not settle immediately.
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.pending, vec![booking.id]);
        assert!(report.charged.is_empty() && report.failed.is_empty());
        assert_eq!(f.rail.charge_count(), 1);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::AuthorizedPending);
        assert_eq!(stored.payment_reference.as_deref(), Some("pi_mock_1"));
        assert_eq!(stored.charge_attempts, 0);

        // Still settling on the next sweep: verified, never recharged.
        *f.rail.verify_verdict.lock().unwrap() = PaymentVerdict::Pending;
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.pending, vec![booking.id]);
        assert_eq!(f.rail.charge_count(), 1);

        // The provider settles; the original charge is posted as paid.
        *f.rail.verify_verdict.lock().unwrap() = PaymentVerdict::Paid;
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.charged, vec![booking.id]);
        assert_eq!(f.rail.charge_count(), 1);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert!(stored.is_paid());
        let txs = f.store.transactions(booking.id).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].reference, "pi_mock_1");
    }

    #[tokio::test]
    async fn failed_settlement_counts_as_an_attempt() {
        let f = fixture();
        let booking = seed_deferred(&f.store).await;
        *f.rail.charge_verdict.lock().unwrap() = PaymentVerdict::Pending;
        f.scheduler.run_due(after_cutoff()).await.unwrap();

        // The provider ends up rejecting the settling charge.
        *f.rail.verify_verdict.lock().unwrap() = PaymentVerdict::Failed;
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.failed.len(), 1);

        let stored = f.store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
        assert_eq!(stored.charge_attempts, 1);

        // Back in the retry loop: a fresh charge can now succeed.
        *f.rail.charge_verdict.lock().unwrap() = PaymentVerdict::Paid;
        let report = f.scheduler.run_due(after_cutoff()).await.unwrap();
        assert_eq!(report.charged, vec![booking.id]);
        assert_eq!(f.rail.charge_count(), 2);
    }

    #[test]
    fn default_policy() {
        let p = ChargePolicy::default();
        assert_eq!(p.lead_hours, 24);
        assert_eq!(p.max_attempts, 3);
    }
}
