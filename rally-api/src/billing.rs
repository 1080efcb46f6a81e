use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rally_engine::scheduler::BillingRunReport;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/billing/run", get(run_billing).post(run_billing))
        .route("/billing/attention", get(attention))
}

#[derive(Debug, Deserialize)]
struct RunParams {
    /// Override the sweep instant, for backfills and tests.
    date: Option<NaiveDate>,
}

/// Comparison time depends on length only, not on where the secrets
/// first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Trigger one billing sweep. Exposed for external cron; GET and POST
/// behave identically so either scheduler flavour works, and the date
/// override is taken from the query string or the JSON body.
async fn run_billing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RunParams>,
    body: Option<Json<RunParams>>,
) -> Result<Json<BillingRunReport>, AppError> {
    if let Some(expected) = &state.billing.run_secret {
        let presented = headers
            .get("x-billing-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(AppError::AuthenticationError(
                "Missing or invalid billing secret".into(),
            ));
        }
    }

    let date = query.date.or(body.and_then(|Json(params)| params.date));
    let as_of = match date {
        Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
        None => Utc::now(),
    };

    let report = state.scheduler.run_due(as_of).await?;
    Ok(Json(report))
}

async fn attention(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let bookings = state.scheduler.attention_list().await?;
    let items: Vec<_> = bookings
        .into_iter()
        .map(|b| {
            json!({
                "bookingId": b.id,
                "clientName": b.client_name,
                "clientEmail": b.client_email,
                "resource": b.slot.resource,
                "date": b.slot.date,
                "hour": b.slot.hour,
                "amount": b.amount,
                "chargeAttempts": b.charge_attempts,
                "lastChargeError": b.last_charge_error,
            })
        })
        .collect();
    Ok(Json(json!({ "bookings": items })))
}
