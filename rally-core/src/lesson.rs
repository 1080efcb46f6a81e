use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bound of a recurring series: either a last calendar date or a fixed
/// number of occurrences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceEnd {
    Until(NaiveDate),
    Occurrences(u32),
}

/// Weekly recurrence: same weekday, same hour, starting on or after
/// `start`. Weekday is 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub weekday: u8,
    pub hour: u8,
    pub start: NaiveDate,
    pub end: RecurrenceEnd,
}

impl RecurrenceRule {
    /// Concrete calendar dates the rule expands to, in order.
    /// Hard cap keeps a malformed rule from expanding unbounded.
    pub fn dates(&self) -> Vec<NaiveDate> {
        const MAX_OCCURRENCES: u32 = 104; // two years of weekly lessons

        let target = u32::from(self.weekday.min(6));
        let offset = (7 + target - self.start.weekday().num_days_from_monday()) % 7;
        let mut date = self.start + Duration::days(i64::from(offset));

        let mut out = Vec::new();
        loop {
            match self.end {
                RecurrenceEnd::Until(last) if date > last => break,
                RecurrenceEnd::Occurrences(n) if out.len() as u32 >= n.min(MAX_OCCURRENCES) => {
                    break
                }
                _ if out.len() as u32 >= MAX_OCCURRENCES => break,
                _ => {}
            }
            out.push(date);
            date += Duration::days(7);
        }
        out
    }
}

/// Planned occurrences are mutable future slots; realized ones are
/// billed or attended history and never edited again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccurrenceState {
    Planned,
    Realized,
    Cancelled,
}

impl OccurrenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceState::Planned => "PLANNED",
            OccurrenceState::Realized => "REALIZED",
            OccurrenceState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLANNED" => Some(OccurrenceState::Planned),
            "REALIZED" => Some(OccurrenceState::Realized),
            "CANCELLED" => Some(OccurrenceState::Cancelled),
            _ => None,
        }
    }
}

/// One concrete lesson date inside a series, owning its slot reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonOccurrence {
    pub id: Uuid,
    pub series_id: Uuid,
    pub date: NaiveDate,
    pub slot_id: Option<Uuid>,
    pub state: OccurrenceState,
}

impl LessonOccurrence {
    pub fn planned(series_id: Uuid, date: NaiveDate, slot_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            series_id,
            date,
            slot_id: Some(slot_id),
            state: OccurrenceState::Planned,
        }
    }
}

/// A recurring lesson series and the rule it expands from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringLesson {
    pub id: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub resource: String,
    pub rule: RecurrenceRule,
    pub created_at: DateTime<Utc>,
}

impl RecurringLesson {
    pub fn new(
        client_name: String,
        client_email: String,
        resource: String,
        rule: RecurrenceRule,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_name,
            client_email,
            resource,
            rule,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn expands_weekly_until_end_date() {
        // 2025-01-01 is a Wednesday; weekday 4 = Friday.
        let rule = RecurrenceRule {
            weekday: 4,
            hour: 17,
            start: date(2025, 1, 1),
            end: RecurrenceEnd::Until(date(2025, 1, 31)),
        };
        let dates = rule.dates();
        assert_eq!(
            dates,
            vec![
                date(2025, 1, 3),
                date(2025, 1, 10),
                date(2025, 1, 17),
                date(2025, 1, 24),
                date(2025, 1, 31),
            ]
        );
    }

    #[test]
    fn expands_fixed_occurrence_count() {
        let rule = RecurrenceRule {
            weekday: 0,
            hour: 9,
            start: date(2025, 3, 3), // a Monday
            end: RecurrenceEnd::Occurrences(3),
        };
        let dates = rule.dates();
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], date(2025, 3, 3));
        assert_eq!(dates[2], date(2025, 3, 17));
    }

    #[test]
    fn start_day_matching_rule_weekday_is_included() {
        let rule = RecurrenceRule {
            weekday: 2, // Wednesday
            hour: 9,
            start: date(2025, 1, 1), // Wednesday
            end: RecurrenceEnd::Occurrences(1),
        };
        assert_eq!(rule.dates(), vec![date(2025, 1, 1)]);
    }

    #[test]
    fn runaway_rules_are_capped() {
        let rule = RecurrenceRule {
            weekday: 0,
            hour: 9,
            start: date(2025, 1, 6),
            end: RecurrenceEnd::Occurrences(u32::MAX),
        };
        assert_eq!(rule.dates().len(), 104);
    }
}
