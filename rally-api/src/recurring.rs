use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rally_core::lesson::{RecurrenceEnd, RecurrenceRule, RecurringLesson};
use rally_engine::recurring::{ExpansionReport, SeriesCancelReport};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/recurring-lessons", post(create_series))
        .route("/recurring-lessons/{id}/cancel", post(cancel_series))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSeriesRequest {
    client_name: String,
    client_email: String,
    resource: String,
    /// 0 = Monday .. 6 = Sunday.
    weekday: u8,
    hour: u8,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    occurrences: Option<u32>,
}

async fn create_series(
    State(state): State<AppState>,
    Json(req): Json<CreateSeriesRequest>,
) -> Result<Json<ExpansionReport>, AppError> {
    if req.weekday > 6 {
        return Err(AppError::ValidationError(format!(
            "weekday out of range: {}",
            req.weekday
        )));
    }
    if req.hour > 23 {
        return Err(AppError::ValidationError(format!(
            "hour out of range: {}",
            req.hour
        )));
    }
    let end = match (req.end_date, req.occurrences) {
        (Some(date), None) => RecurrenceEnd::Until(date),
        (None, Some(n)) if n > 0 => RecurrenceEnd::Occurrences(n),
        _ => {
            return Err(AppError::ValidationError(
                "exactly one of endDate or occurrences is required".into(),
            ))
        }
    };

    let series = RecurringLesson::new(
        req.client_name,
        req.client_email,
        req.resource,
        RecurrenceRule {
            weekday: req.weekday,
            hour: req.hour,
            start: req.start_date,
            end,
        },
    );

    let report = state.expander.expand(series).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CancelSeriesRequest {
    /// Occurrences strictly after this date are cancelled. Defaults to today.
    from_date: Option<NaiveDate>,
}

async fn cancel_series(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelSeriesRequest>>,
) -> Result<Json<SeriesCancelReport>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let as_of = req.from_date.unwrap_or_else(|| Utc::now().date_naive());
    let report = state.expander.cancel_series(id, as_of).await?;
    Ok(Json(report))
}
