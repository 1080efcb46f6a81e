use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rally_core::booking::{BillingMode, Booking, BookingStatus, PaymentStatus};
use rally_core::lesson::{LessonOccurrence, RecurringLesson};
use rally_core::member::{normalize_code, Member};
use rally_core::payment::Transaction;
use rally_core::repository::{
    BookingRepository, MemberRepository, RepoError, SeriesRepository, SlotRepository,
};
use rally_core::slot::{SlotError, SlotHandle, SlotKey, SlotState};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SlotRecord {
    id: Uuid,
    state: SlotState,
    #[allow(dead_code)]
    booking_id: Option<Uuid>,
}

/// In-memory implementation of every repository trait, used by the test
/// suites and local runs without a database. The slot map's mutex gives
/// `reserve` the same winner-takes-all behavior the Postgres uniqueness
/// constraint provides.
#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<SlotKey, SlotRecord>>,
    bookings: Mutex<HashMap<Uuid, Booking>>,
    transactions: Mutex<Vec<Transaction>>,
    members: Mutex<HashMap<String, Member>>,
    series: Mutex<HashMap<Uuid, (RecurringLesson, Vec<LessonOccurrence>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SlotRepository for MemoryStore {
    async fn reserve(&self, key: &SlotKey) -> Result<SlotHandle, SlotError> {
        let mut slots = lock(&self.slots);
        if slots.contains_key(key) {
            return Err(SlotError::Conflict(key.clone()));
        }
        let record = SlotRecord {
            id: Uuid::new_v4(),
            state: SlotState::Reserved,
            booking_id: None,
        };
        let handle = SlotHandle {
            id: record.id,
            key: key.clone(),
        };
        slots.insert(key.clone(), record);
        Ok(handle)
    }

    async fn finalize(&self, slot_id: Uuid, booking_id: Uuid) -> Result<(), SlotError> {
        let mut slots = lock(&self.slots);
        for record in slots.values_mut() {
            if record.id == slot_id {
                record.state = SlotState::Booked;
                record.booking_id = Some(booking_id);
                return Ok(());
            }
        }
        Err(SlotError::NotFound(slot_id))
    }

    async fn release(&self, slot_id: Uuid) -> Result<(), SlotError> {
        let mut slots = lock(&self.slots);
        slots.retain(|_, record| record.id != slot_id);
        Ok(())
    }

    async fn state(&self, key: &SlotKey) -> Result<Option<SlotState>, SlotError> {
        Ok(lock(&self.slots).get(key).map(|r| r.state))
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create(&self, booking: &Booking) -> Result<(), RepoError> {
        lock(&self.bookings).insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, RepoError> {
        Ok(lock(&self.bookings).get(&id).cloned())
    }

    async fn update(&self, booking: &Booking) -> Result<(), RepoError> {
        let mut bookings = lock(&self.bookings);
        if !bookings.contains_key(&booking.id) {
            return Err(format!("booking not found: {}", booking.id).into());
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn due_for_charge(
        &self,
        as_of: DateTime<Utc>,
        lead_hours: i64,
    ) -> Result<Vec<Booking>, RepoError> {
        let mut due: Vec<Booking> = lock(&self.bookings)
            .values()
            .filter(|b| {
                b.billing_mode == BillingMode::Deferred
                    && b.status == BookingStatus::Confirmed
                    && matches!(
                        b.payment_status,
                        PaymentStatus::Unpaid | PaymentStatus::AuthorizedPending
                    )
                    && !b.auto_charge_cancelled
                    && !b.needs_attention
                    && b.charge_due_at(lead_hours) <= as_of
            })
            .cloned()
            .collect();
        due.sort_by_key(|b| b.created_at);
        Ok(due)
    }

    async fn needing_attention(&self) -> Result<Vec<Booking>, RepoError> {
        Ok(lock(&self.bookings)
            .values()
            .filter(|b| b.needs_attention)
            .cloned()
            .collect())
    }

    async fn add_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
        lock(&self.transactions).push(tx.clone());
        Ok(())
    }

    async fn transactions(&self, booking_id: Uuid) -> Result<Vec<Transaction>, RepoError> {
        Ok(lock(&self.transactions)
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MemberRepository for MemoryStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Member>, RepoError> {
        Ok(lock(&self.members).get(&normalize_code(code)).cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Member>, RepoError> {
        Ok(lock(&self.members)
            .values()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn insert(&self, member: &Member) -> Result<(), RepoError> {
        let mut members = lock(&self.members);
        let code = normalize_code(&member.member_code);
        if members.contains_key(&code) {
            return Err(format!("member code taken: {code}").into());
        }
        members.insert(code, member.clone());
        Ok(())
    }

    async fn update(&self, member: &Member) -> Result<(), RepoError> {
        let mut members = lock(&self.members);
        let code = normalize_code(&member.member_code);
        if !members.contains_key(&code) {
            return Err(format!("member not found: {code}").into());
        }
        members.insert(code, member.clone());
        Ok(())
    }
}

#[async_trait]
impl SeriesRepository for MemoryStore {
    async fn create_series(
        &self,
        series: &RecurringLesson,
        occurrences: &[LessonOccurrence],
    ) -> Result<(), RepoError> {
        lock(&self.series).insert(series.id, (series.clone(), occurrences.to_vec()));
        Ok(())
    }

    async fn get_series(&self, id: Uuid) -> Result<Option<RecurringLesson>, RepoError> {
        Ok(lock(&self.series).get(&id).map(|(s, _)| s.clone()))
    }

    async fn occurrences(&self, series_id: Uuid) -> Result<Vec<LessonOccurrence>, RepoError> {
        Ok(lock(&self.series)
            .get(&series_id)
            .map(|(_, occ)| occ.clone())
            .unwrap_or_default())
    }

    async fn update_occurrence(&self, occurrence: &LessonOccurrence) -> Result<(), RepoError> {
        let mut series = lock(&self.series);
        let (_, occurrences) = series
            .get_mut(&occurrence.series_id)
            .ok_or_else(|| format!("series not found: {}", occurrence.series_id))?;
        let slot = occurrences
            .iter_mut()
            .find(|o| o.id == occurrence.id)
            .ok_or_else(|| format!("occurrence not found: {}", occurrence.id))?;
        *slot = occurrence.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn key() -> SlotKey {
        SlotKey::new("court-1", NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), 10)
    }

    #[tokio::test]
    async fn concurrent_reserves_have_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.reserve(&key()).await.is_ok() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn released_slot_can_be_reserved_again() {
        let store = MemoryStore::new();
        let handle = store.reserve(&key()).await.unwrap();
        assert!(matches!(
            store.reserve(&key()).await,
            Err(SlotError::Conflict(_))
        ));

        store.release(handle.id).await.unwrap();
        assert!(store.reserve(&key()).await.is_ok());
    }

    #[tokio::test]
    async fn finalize_moves_reserved_to_booked() {
        let store = MemoryStore::new();
        let handle = store.reserve(&key()).await.unwrap();
        assert_eq!(store.state(&key()).await.unwrap(), Some(SlotState::Reserved));

        store.finalize(handle.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(store.state(&key()).await.unwrap(), Some(SlotState::Booked));
    }

    #[tokio::test]
    async fn releasing_a_free_slot_is_a_no_op() {
        let store = MemoryStore::new();
        assert!(store.release(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn member_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        let member = Member::new(
            "M100".into(),
            "Ada".into(),
            "ada@club.example".into(),
            None,
            "cus_1".into(),
        );
        store.insert(&member).await.unwrap();

        let found = store.find_by_code("  m100 ").await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(member.id));
    }
}
