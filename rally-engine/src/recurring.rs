use chrono::NaiveDate;
use rally_core::lesson::{LessonOccurrence, OccurrenceState, RecurringLesson};
use rally_core::repository::{RepoError, SeriesRepository, SlotRepository};
use rally_core::slot::{SlotError, SlotKey};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of expanding a rule into reserved occurrences. Conflicting
/// dates are reported, never fatal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionReport {
    pub series_id: Uuid,
    pub reserved: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesCancelReport {
    pub series_id: Uuid,
    pub cancelled: Vec<NaiveDate>,
    pub untouched: Vec<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("Series not found: {0}")]
    NotFound(Uuid),

    #[error("Recurrence rule expands to no dates")]
    EmptySeries,

    #[error("Storage error: {0}")]
    Storage(String),
}

fn storage(e: RepoError) -> SeriesError {
    SeriesError::Storage(e.to_string())
}

/// Turns a weekly rule into individually reserved slots and scopes
/// series-level cancellation to the future, unrealized part.
pub struct LessonExpander {
    slots: Arc<dyn SlotRepository>,
    series: Arc<dyn SeriesRepository>,
}

impl LessonExpander {
    pub fn new(slots: Arc<dyn SlotRepository>, series: Arc<dyn SeriesRepository>) -> Self {
        Self { slots, series }
    }

    /// Reserve a slot per occurrence date. Dates whose slot is already
    /// taken are skipped and reported; the series is created with the
    /// remainder. Holds nothing if persisting the series fails.
    pub async fn expand(&self, series: RecurringLesson) -> Result<ExpansionReport, SeriesError> {
        let dates = series.rule.dates();
        if dates.is_empty() {
            return Err(SeriesError::EmptySeries);
        }

        let mut occurrences = Vec::new();
        let mut reserved = Vec::new();
        let mut skipped = Vec::new();

        for date in dates {
            let key = SlotKey::new(series.resource.clone(), date, series.rule.hour);
            match self.slots.reserve(&key).await {
                Ok(handle) => {
                    occurrences.push(LessonOccurrence::planned(series.id, date, handle.id));
                    reserved.push(date);
                }
                Err(SlotError::Conflict(_)) => {
                    skipped.push(date);
                }
                Err(e) => {
                    self.release_all(&occurrences).await;
                    return Err(SeriesError::Storage(e.to_string()));
                }
            }
        }

        if let Err(e) = self.series.create_series(&series, &occurrences).await {
            self.release_all(&occurrences).await;
            return Err(storage(e));
        }

        info!(
            "Series {} expanded: {} reserved, {} skipped",
            series.id,
            reserved.len(),
            skipped.len()
        );

        Ok(ExpansionReport {
            series_id: series.id,
            reserved,
            skipped,
        })
    }

    /// Cancel the remaining future part of a series. Only planned
    /// occurrences strictly after `as_of` are touched; realized and
    /// already-cancelled ones stay as they are.
    pub async fn cancel_series(
        &self,
        series_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<SeriesCancelReport, SeriesError> {
        self.series
            .get_series(series_id)
            .await
            .map_err(storage)?
            .ok_or(SeriesError::NotFound(series_id))?;

        let occurrences = self.series.occurrences(series_id).await.map_err(storage)?;

        let mut cancelled = Vec::new();
        let mut untouched = Vec::new();
        for mut occ in occurrences {
            let eligible = occ.state == OccurrenceState::Planned && occ.date > as_of;
            if !eligible {
                untouched.push(occ.date);
                continue;
            }
            if let Some(slot_id) = occ.slot_id.take() {
                if let Err(e) = self.slots.release(slot_id).await {
                    warn!("Releasing slot {} of series {} failed: {}", slot_id, series_id, e);
                    occ.slot_id = Some(slot_id);
                    untouched.push(occ.date);
                    continue;
                }
            }
            occ.state = OccurrenceState::Cancelled;
            self.series.update_occurrence(&occ).await.map_err(storage)?;
            cancelled.push(occ.date);
        }

        info!(
            "Series {} cancelled from {}: {} occurrences released",
            series_id,
            as_of,
            cancelled.len()
        );

        Ok(SeriesCancelReport {
            series_id,
            cancelled,
            untouched,
        })
    }

    /// Mark an occurrence as held. Realized occurrences are history and
    /// out of reach for any later series cancellation.
    pub async fn realize(&self, series_id: Uuid, date: NaiveDate) -> Result<(), SeriesError> {
        let occurrences = self.series.occurrences(series_id).await.map_err(storage)?;
        let mut occ = occurrences
            .into_iter()
            .find(|o| o.date == date && o.state == OccurrenceState::Planned)
            .ok_or(SeriesError::NotFound(series_id))?;
        occ.state = OccurrenceState::Realized;
        self.series.update_occurrence(&occ).await.map_err(storage)
    }

    async fn release_all(&self, occurrences: &[LessonOccurrence]) {
        for occ in occurrences {
            if let Some(slot_id) = occ.slot_id {
                if let Err(e) = self.slots.release(slot_id).await {
                    warn!("Rollback release of slot {} failed: {}", slot_id, e);
                }
            }
        }
    }
}
