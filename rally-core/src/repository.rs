use crate::booking::Booking;
use crate::lesson::{LessonOccurrence, RecurringLesson};
use crate::member::Member;
use crate::payment::Transaction;
use crate::slot::{SlotError, SlotHandle, SlotKey, SlotState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type RepoError = Box<dyn std::error::Error + Send + Sync>;

/// Exclusive ownership of (resource, date, hour) tuples.
///
/// `reserve` must be atomic against concurrent callers: exactly one
/// caller wins a given tuple, every other caller gets
/// `SlotError::Conflict`. Backed by a uniqueness constraint, not by
/// application-level locking.
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn reserve(&self, key: &SlotKey) -> Result<SlotHandle, SlotError>;

    /// Reserved -> Booked, binding the slot to its booking.
    async fn finalize(&self, slot_id: Uuid, booking_id: Uuid) -> Result<(), SlotError>;

    /// Reserved/Booked -> Free. Releasing an already-free slot is a no-op.
    async fn release(&self, slot_id: Uuid) -> Result<(), SlotError>;

    async fn state(&self, key: &SlotKey) -> Result<Option<SlotState>, SlotError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: &Booking) -> Result<(), RepoError>;

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, RepoError>;

    async fn update(&self, booking: &Booking) -> Result<(), RepoError>;

    /// Deferred, confirmed bookings whose charge cutoff has passed and
    /// whose charge is unresolved: unpaid, or initiated but still
    /// settling. Excludes cancelled and escalated bookings.
    async fn due_for_charge(
        &self,
        as_of: DateTime<Utc>,
        lead_hours: i64,
    ) -> Result<Vec<Booking>, RepoError>;

    /// Bookings escalated after exhausting charge attempts.
    async fn needing_attention(&self) -> Result<Vec<Booking>, RepoError>;

    async fn add_transaction(&self, tx: &Transaction) -> Result<(), RepoError>;

    async fn transactions(&self, booking_id: Uuid) -> Result<Vec<Transaction>, RepoError>;
}

#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Lookup by member code; the implementation normalizes the code.
    async fn find_by_code(&self, code: &str) -> Result<Option<Member>, RepoError>;

    async fn get(&self, id: Uuid) -> Result<Option<Member>, RepoError>;

    async fn insert(&self, member: &Member) -> Result<(), RepoError>;

    async fn update(&self, member: &Member) -> Result<(), RepoError>;
}

#[async_trait]
pub trait SeriesRepository: Send + Sync {
    async fn create_series(
        &self,
        series: &RecurringLesson,
        occurrences: &[LessonOccurrence],
    ) -> Result<(), RepoError>;

    async fn get_series(&self, id: Uuid) -> Result<Option<RecurringLesson>, RepoError>;

    async fn occurrences(&self, series_id: Uuid) -> Result<Vec<LessonOccurrence>, RepoError>;

    async fn update_occurrence(&self, occurrence: &LessonOccurrence) -> Result<(), RepoError>;
}
