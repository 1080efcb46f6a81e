use axum::{extract::State, routing::post, Json, Router};
use rally_core::booking::{Booking, BookingStatus};
use rally_core::payment::{CheckoutMode, PaymentVerdict, SessionRequest, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments/stripe/create-checkout", post(create_checkout))
        .route("/payments/paypal", post(record_paypal_payment))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCheckoutRequest {
    booking_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCheckoutResponse {
    session_id: String,
    checkout_url: String,
}

/// Open a hosted card checkout for an immediate-billing booking.
/// If the provider refuses the session, the reservation is unwound so
/// the slot does not stay blocked by an unpayable booking.
async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CreateCheckoutResponse>, AppError> {
    let mut booking = load_booking(&state, req.booking_id).await?;
    if booking.is_paid() {
        return Err(AppError::AlreadyPaid(format!(
            "Booking {} is already paid",
            booking.id
        )));
    }

    let session = state
        .card_rail
        .create_session(&SessionRequest {
            mode: CheckoutMode::Payment,
            amount: Some(booking.amount),
            currency: booking.currency.clone(),
            description: format!("Booking {}", booking.slot),
            customer_id: booking.payment_customer_id.clone(),
            customer_email: Some(booking.client_email.clone()),
            success_url: state.checkout_urls.success.clone(),
            cancel_url: state.checkout_urls.cancel.clone(),
            reference: Some(booking.id.to_string()),
        })
        .await;

    let session = match session {
        Ok(session) => session,
        Err(e) => {
            warn!(
                "Checkout session for booking {} failed, unwinding reservation: {}",
                booking.id, e
            );
            if let Err(release_err) = state.slots.release(booking.slot_id).await {
                warn!("Releasing slot {} failed: {}", booking.slot_id, release_err);
            }
            booking.update_status(BookingStatus::Cancelled);
            if let Err(update_err) = state.bookings.update(&booking).await {
                warn!("Cancelling booking {} failed: {}", booking.id, update_err);
            }
            return Err(e.into());
        }
    };

    booking.payment_reference = Some(session.id.clone());
    state
        .bookings
        .update(&booking)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(CreateCheckoutResponse {
        session_id: session.id,
        checkout_url: session.url,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaypalPaymentRequest {
    booking_id: Uuid,
    /// Provider-side order id approved in the client.
    payment_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaypalPaymentResponse {
    success: bool,
    booking_id: Uuid,
    payment_status: String,
}

/// Record an out-of-band wallet payment. The client claims an order id;
/// the server believes only the provider's own answer. Anything short
/// of a completed order leaves the booking untouched.
async fn record_paypal_payment(
    State(state): State<AppState>,
    Json(req): Json<PaypalPaymentRequest>,
) -> Result<Json<PaypalPaymentResponse>, AppError> {
    let mut booking = load_booking(&state, req.booking_id).await?;
    if booking.is_paid() {
        return Err(AppError::AlreadyPaid(format!(
            "Booking {} is already paid",
            booking.id
        )));
    }

    let verdict = state.wallet_rail.verify(&req.payment_id).await?;
    if verdict != PaymentVerdict::Paid {
        return Err(AppError::PaymentNotCompleted(format!(
            "Order {} is not completed ({:?})",
            req.payment_id, verdict
        )));
    }

    booking.mark_paid(Some(req.payment_id.clone()));
    state
        .bookings
        .update(&booking)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?;

    let tx = Transaction::charge(
        booking.id,
        booking.amount,
        booking.currency.clone(),
        req.payment_id,
    );
    state
        .bookings
        .add_transaction(&tx)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?;

    info!("Booking {} paid via wallet order {}", booking.id, tx.reference);

    Ok(Json(PaypalPaymentResponse {
        success: true,
        booking_id: booking.id,
        payment_status: booking.payment_status.as_str().into(),
    }))
}

async fn load_booking(state: &AppState, id: Uuid) -> Result<Booking, AppError> {
    state
        .bookings
        .get(id)
        .await
        .map_err(|e| AppError::Anyhow(anyhow::anyhow!(e.to_string())))?
        .ok_or_else(|| AppError::NotFoundError(format!("Booking {}", id)))
}
