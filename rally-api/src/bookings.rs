use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rally_core::booking::{BillingMode, Booking};
use rally_engine::processor::BookingInput;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/booking-request", post(submit_booking))
        .route("/confirm-booking", post(confirm_booking).get(confirm_booking_link))
        .route("/cancel-auto-charge", post(cancel_auto_charge))
        .route("/bookings/{id}", get(get_booking))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingRequest {
    client_name: Option<String>,
    client_email: String,
    client_phone: Option<String>,
    resource: String,
    date: NaiveDate,
    hour: u8,
    amount: i64,
    currency: Option<String>,
    billing_mode: BillingMode,
    member_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingRequestResponse {
    success: bool,
    booking_id: Uuid,
    status: String,
    /// Confirmation token, also delivered in the admin notification.
    token: String,
    email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_error: Option<String>,
}

async fn submit_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> Result<Json<BookingRequestResponse>, AppError> {
    let outcome = state
        .processor
        .submit(BookingInput {
            client_name: req.client_name,
            client_email: req.client_email,
            client_phone: req.client_phone,
            resource: req.resource,
            date: req.date,
            hour: req.hour,
            amount: req.amount,
            currency: req.currency.unwrap_or_else(|| state.billing.currency.clone()),
            billing_mode: req.billing_mode,
            member_code: req.member_code,
        })
        .await?;

    Ok(Json(BookingRequestResponse {
        success: true,
        booking_id: outcome.booking_id,
        status: "REQUESTED".into(),
        token: outcome.token,
        email_sent: outcome.email_sent,
        email_error: outcome.email_error,
    }))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    success: bool,
    booking: BookingView,
    emails_sent: EmailsSentView,
}

#[derive(Debug, Serialize)]
struct EmailsSentView {
    client: bool,
    admin: bool,
}

async fn confirm_booking(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    confirm(state, &req.token).await
}

/// Same operation as the POST, reachable from the emailed link.
async fn confirm_booking_link(
    State(state): State<AppState>,
    Query(req): Query<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    confirm(state, &req.token).await
}

async fn confirm(state: AppState, token: &str) -> Result<Json<ConfirmResponse>, AppError> {
    let outcome = state.processor.confirm(token).await?;
    Ok(Json(ConfirmResponse {
        success: true,
        booking: outcome.booking.into(),
        emails_sent: EmailsSentView {
            client: outcome.emails_sent.client,
            admin: outcome.emails_sent.admin,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelAutoChargeRequest {
    booking_id: Uuid,
}

async fn cancel_auto_charge(
    State(state): State<AppState>,
    Json(req): Json<CancelAutoChargeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.scheduler.cancel(req.booking_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "bookingId": outcome.booking_id,
        "autoChargeCancelled": true,
        "alreadyCancelled": outcome.already_cancelled,
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingView {
    id: Uuid,
    client_name: String,
    client_email: String,
    resource: String,
    date: NaiveDate,
    hour: u8,
    amount: i64,
    currency: String,
    billing_mode: String,
    status: String,
    payment_status: String,
    auto_charge_cancelled: bool,
    charge_attempts: i32,
    needs_attention: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_charge_error: Option<String>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            client_name: b.client_name,
            client_email: b.client_email,
            resource: b.slot.resource,
            date: b.slot.date,
            hour: b.slot.hour,
            amount: b.amount,
            currency: b.currency,
            billing_mode: b.billing_mode.as_str().into(),
            status: b.status.as_str().into(),
            payment_status: b.payment_status.as_str().into(),
            auto_charge_cancelled: b.auto_charge_cancelled,
            charge_attempts: b.charge_attempts,
            needs_attention: b.needs_attention,
            last_charge_error: b.last_charge_error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingDetail {
    #[serde(flatten)]
    booking: BookingView,
    transactions: Vec<TransactionView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionView {
    id: Uuid,
    amount: i64,
    currency: String,
    reference: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingDetail>, AppError> {
    let booking = state
        .bookings
        .get(id)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?
        .ok_or_else(|| AppError::NotFoundError(format!("Booking {}", id)))?;
    let transactions = state
        .bookings
        .transactions(id)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?
        .into_iter()
        .map(|t| TransactionView {
            id: t.id,
            amount: t.amount,
            currency: t.currency,
            reference: t.reference,
            created_at: t.created_at,
        })
        .collect();
    Ok(Json(BookingDetail {
        booking: booking.into(),
        transactions,
    }))
}
