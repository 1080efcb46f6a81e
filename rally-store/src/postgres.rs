use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rally_core::booking::{BillingMode, Booking, BookingStatus, PaymentStatus};
use rally_core::lesson::{
    LessonOccurrence, OccurrenceState, RecurrenceEnd, RecurrenceRule, RecurringLesson,
};
use rally_core::member::{normalize_code, Member};
use rally_core::payment::Transaction;
use rally_core::repository::{
    BookingRepository, MemberRepository, RepoError, SeriesRepository, SlotRepository,
};
use rally_core::slot::{SlotError, SlotHandle, SlotKey, SlotState};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

/// Postgres-backed repositories. Slot exclusivity rides on the unique
/// constraint over (resource, slot_date, slot_hour): the losing writer
/// of a conflicting insert affects zero rows and surfaces `Conflict`.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn booking_from_row(row: &PgRow) -> Result<Booking, RepoError> {
    let billing_mode: String = row.try_get("billing_mode")?;
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    let hour: i16 = row.try_get("slot_hour")?;

    Ok(Booking {
        id: row.try_get("id")?,
        client_name: row.try_get("client_name")?,
        client_email: row.try_get("client_email")?,
        client_phone: row.try_get("client_phone")?,
        slot: SlotKey {
            resource: row.try_get("resource")?,
            date: row.try_get("slot_date")?,
            hour: hour as u8,
        },
        slot_id: row.try_get("slot_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        billing_mode: BillingMode::parse(&billing_mode)
            .ok_or_else(|| format!("unknown billing mode: {billing_mode}"))?,
        status: BookingStatus::parse(&status).ok_or_else(|| format!("unknown status: {status}"))?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| format!("unknown payment status: {payment_status}"))?,
        auto_charge_cancelled: row.try_get("auto_charge_cancelled")?,
        charge_attempts: row.try_get("charge_attempts")?,
        needs_attention: row.try_get("needs_attention")?,
        last_charge_error: row.try_get("last_charge_error")?,
        payment_customer_id: row.try_get("payment_customer_id")?,
        payment_reference: row.try_get("payment_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const BOOKING_COLUMNS: &str = "id, client_name, client_email, client_phone, resource, slot_date, \
     slot_hour, slot_id, amount, currency, billing_mode, status, payment_status, \
     auto_charge_cancelled, charge_attempts, needs_attention, last_charge_error, \
     payment_customer_id, payment_reference, created_at, updated_at";

#[async_trait]
impl SlotRepository for PgStore {
    async fn reserve(&self, key: &SlotKey) -> Result<SlotHandle, SlotError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO time_slots (id, resource, slot_date, slot_hour, state) \
             VALUES ($1, $2, $3, $4, 'RESERVED') \
             ON CONFLICT (resource, slot_date, slot_hour) DO NOTHING",
        )
        .bind(id)
        .bind(&key.resource)
        .bind(key.date)
        .bind(i16::from(key.hour))
        .execute(&self.pool)
        .await
        .map_err(|e| SlotError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SlotError::Conflict(key.clone()));
        }
        Ok(SlotHandle {
            id,
            key: key.clone(),
        })
    }

    async fn finalize(&self, slot_id: Uuid, booking_id: Uuid) -> Result<(), SlotError> {
        let result = sqlx::query(
            "UPDATE time_slots SET state = 'BOOKED', booking_id = $2 WHERE id = $1",
        )
        .bind(slot_id)
        .bind(booking_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SlotError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SlotError::NotFound(slot_id));
        }
        Ok(())
    }

    async fn release(&self, slot_id: Uuid) -> Result<(), SlotError> {
        sqlx::query("DELETE FROM time_slots WHERE id = $1")
            .bind(slot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SlotError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn state(&self, key: &SlotKey) -> Result<Option<SlotState>, SlotError> {
        let row = sqlx::query(
            "SELECT state FROM time_slots WHERE resource = $1 AND slot_date = $2 AND slot_hour = $3",
        )
        .bind(&key.resource)
        .bind(key.date)
        .bind(i16::from(key.hour))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SlotError::Storage(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let state: String = row
                    .try_get("state")
                    .map_err(|e| SlotError::Storage(e.to_string()))?;
                match state.as_str() {
                    "RESERVED" => Ok(Some(SlotState::Reserved)),
                    "BOOKED" => Ok(Some(SlotState::Booked)),
                    other => Err(SlotError::Storage(format!("unknown slot state: {other}"))),
                }
            }
        }
    }
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn create(&self, booking: &Booking) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO bookings (id, client_name, client_email, client_phone, resource, \
             slot_date, slot_hour, slot_id, amount, currency, billing_mode, status, \
             payment_status, auto_charge_cancelled, charge_attempts, needs_attention, \
             last_charge_error, payment_customer_id, payment_reference, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21)",
        )
        .bind(booking.id)
        .bind(&booking.client_name)
        .bind(&booking.client_email)
        .bind(&booking.client_phone)
        .bind(&booking.slot.resource)
        .bind(booking.slot.date)
        .bind(i16::from(booking.slot.hour))
        .bind(booking.slot_id)
        .bind(booking.amount)
        .bind(&booking.currency)
        .bind(booking.billing_mode.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.auto_charge_cancelled)
        .bind(booking.charge_attempts)
        .bind(booking.needs_attention)
        .bind(&booking.last_charge_error)
        .bind(&booking.payment_customer_id)
        .bind(&booking.payment_reference)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn update(&self, booking: &Booking) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $2, payment_status = $3, auto_charge_cancelled = $4, \
             charge_attempts = $5, needs_attention = $6, last_charge_error = $7, \
             payment_customer_id = $8, payment_reference = $9, updated_at = $10 WHERE id = $1",
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.auto_charge_cancelled)
        .bind(booking.charge_attempts)
        .bind(booking.needs_attention)
        .bind(&booking.last_charge_error)
        .bind(&booking.payment_customer_id)
        .bind(&booking.payment_reference)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("booking not found: {}", booking.id).into());
        }
        Ok(())
    }

    async fn due_for_charge(
        &self,
        as_of: DateTime<Utc>,
        lead_hours: i64,
    ) -> Result<Vec<Booking>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE billing_mode = 'DEFERRED' AND status = 'CONFIRMED' \
               AND payment_status IN ('UNPAID', 'AUTHORIZED_PENDING') \
               AND auto_charge_cancelled = FALSE AND needs_attention = FALSE \
               AND (slot_date::timestamp + make_interval(hours => slot_hour::int)) \
                   <= ($1::timestamptz AT TIME ZONE 'UTC') + make_interval(hours => $2::int) \
             ORDER BY created_at"
        ))
        .bind(as_of)
        .bind(lead_hours as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn needing_attention(&self) -> Result<Vec<Booking>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE needs_attention = TRUE \
             ORDER BY updated_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn add_transaction(&self, tx: &Transaction) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO transactions (id, booking_id, amount, currency, reference, posted, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(tx.id)
        .bind(tx.booking_id)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(&tx.reference)
        .bind(tx.posted)
        .bind(tx.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transactions(&self, booking_id: Uuid) -> Result<Vec<Transaction>, RepoError> {
        let rows = sqlx::query(
            "SELECT id, booking_id, amount, currency, reference, posted, created_at \
             FROM transactions WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Transaction {
                    id: row.try_get("id")?,
                    booking_id: row.try_get("booking_id")?,
                    amount: row.try_get("amount")?,
                    currency: row.try_get("currency")?,
                    reference: row.try_get("reference")?,
                    posted: row.try_get("posted")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn member_from_row(row: &PgRow) -> Result<Member, RepoError> {
    Ok(Member {
        id: row.try_get("id")?,
        member_code: row.try_get("member_code")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        active: row.try_get("active")?,
        payment_customer_id: row.try_get("payment_customer_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const MEMBER_COLUMNS: &str =
    "id, member_code, name, email, phone, active, payment_customer_id, created_at";

#[async_trait]
impl MemberRepository for PgStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Member>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE member_code = $1"
        ))
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Member>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn insert(&self, member: &Member) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO members (id, member_code, name, email, phone, active, \
             payment_customer_id, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(member.id)
        .bind(normalize_code(&member.member_code))
        .bind(&member.name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(member.active)
        .bind(&member.payment_customer_id)
        .bind(member.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, member: &Member) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE members SET name = $2, email = $3, phone = $4, active = $5, \
             payment_customer_id = $6 WHERE id = $1",
        )
        .bind(member.id)
        .bind(&member.name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(member.active)
        .bind(&member.payment_customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("member not found: {}", member.id).into());
        }
        Ok(())
    }
}

fn occurrence_from_row(row: &PgRow) -> Result<LessonOccurrence, RepoError> {
    let state: String = row.try_get("state")?;
    Ok(LessonOccurrence {
        id: row.try_get("id")?,
        series_id: row.try_get("series_id")?,
        date: row.try_get("lesson_date")?,
        slot_id: row.try_get("slot_id")?,
        state: OccurrenceState::parse(&state)
            .ok_or_else(|| format!("unknown occurrence state: {state}"))?,
    })
}

#[async_trait]
impl SeriesRepository for PgStore {
    async fn create_series(
        &self,
        series: &RecurringLesson,
        occurrences: &[LessonOccurrence],
    ) -> Result<(), RepoError> {
        let (until_date, occurrence_count) = match series.rule.end {
            RecurrenceEnd::Until(date) => (Some(date), None),
            RecurrenceEnd::Occurrences(n) => (None, Some(n as i32)),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO recurring_lessons (id, client_name, client_email, resource, weekday, \
             hour, start_date, until_date, occurrence_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(series.id)
        .bind(&series.client_name)
        .bind(&series.client_email)
        .bind(&series.resource)
        .bind(i16::from(series.rule.weekday))
        .bind(i16::from(series.rule.hour))
        .bind(series.rule.start)
        .bind(until_date)
        .bind(occurrence_count)
        .bind(series.created_at)
        .execute(&mut *tx)
        .await?;

        for occurrence in occurrences {
            sqlx::query(
                "INSERT INTO lesson_occurrences (id, series_id, lesson_date, slot_id, state) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(occurrence.id)
            .bind(occurrence.series_id)
            .bind(occurrence.date)
            .bind(occurrence.slot_id)
            .bind(occurrence.state.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_series(&self, id: Uuid) -> Result<Option<RecurringLesson>, RepoError> {
        let row = sqlx::query(
            "SELECT id, client_name, client_email, resource, weekday, hour, start_date, \
             until_date, occurrence_count, created_at FROM recurring_lessons WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let weekday: i16 = row.try_get("weekday")?;
        let hour: i16 = row.try_get("hour")?;
        let until_date: Option<chrono::NaiveDate> = row.try_get("until_date")?;
        let occurrence_count: Option<i32> = row.try_get("occurrence_count")?;

        let end = match (until_date, occurrence_count) {
            (Some(date), _) => RecurrenceEnd::Until(date),
            (None, Some(n)) => RecurrenceEnd::Occurrences(n.max(0) as u32),
            (None, None) => return Err("series has neither end date nor count".into()),
        };

        Ok(Some(RecurringLesson {
            id: row.try_get("id")?,
            client_name: row.try_get("client_name")?,
            client_email: row.try_get("client_email")?,
            resource: row.try_get("resource")?,
            rule: RecurrenceRule {
                weekday: weekday as u8,
                hour: hour as u8,
                start: row.try_get("start_date")?,
                end,
            },
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn occurrences(&self, series_id: Uuid) -> Result<Vec<LessonOccurrence>, RepoError> {
        let rows = sqlx::query(
            "SELECT id, series_id, lesson_date, slot_id, state FROM lesson_occurrences \
             WHERE series_id = $1 ORDER BY lesson_date",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(occurrence_from_row).collect()
    }

    async fn update_occurrence(&self, occurrence: &LessonOccurrence) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE lesson_occurrences SET slot_id = $2, state = $3 WHERE id = $1",
        )
        .bind(occurrence.id)
        .bind(occurrence.slot_id)
        .bind(occurrence.state.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(format!("occurrence not found: {}", occurrence.id).into());
        }
        Ok(())
    }
}
