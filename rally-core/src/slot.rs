use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The exclusive reservation unit: one resource, one date, one hour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource: String,
    pub date: NaiveDate,
    pub hour: u8,
}

impl SlotKey {
    pub fn new(resource: impl Into<String>, date: NaiveDate, hour: u8) -> Self {
        Self {
            resource: resource.into(),
            date,
            hour,
        }
    }

    /// Start of the slot on the wall clock (UTC).
    pub fn starts_at(&self) -> DateTime<Utc> {
        let time = chrono::NaiveTime::from_hms_opt(u32::from(self.hour.min(23)), 0, 0)
            .unwrap_or(chrono::NaiveTime::MIN);
        Utc.from_utc_datetime(&self.date.and_time(time))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:02}:00", self.resource, self.date, self.hour)
    }
}

/// Occupancy of a slot. A free slot has no record at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Reserved,
    Booked,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Reserved => "RESERVED",
            SlotState::Booked => "BOOKED",
        }
    }
}

/// Proof of a successful reservation, used to finalize or release it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotHandle {
    pub id: Uuid,
    pub key: SlotKey,
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("Slot already taken: {0}")]
    Conflict(SlotKey),

    #[error("Slot not found: {0}")]
    NotFound(Uuid),

    #[error("Slot storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_start_is_on_the_hour() {
        let key = SlotKey::new("court-1", NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), 10);
        let start = key.starts_at();
        assert_eq!(start.to_rfc3339(), "2025-01-10T10:00:00+00:00");
    }

    #[test]
    fn slot_key_display() {
        let key = SlotKey::new("court-1", NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(), 9);
        assert_eq!(key.to_string(), "court-1 2025-01-10 09:00");
    }
}
