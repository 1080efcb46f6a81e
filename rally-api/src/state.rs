use rally_core::payment::PaymentRail;
use rally_core::repository::{BookingRepository, SlotRepository};
use rally_engine::{AutoChargeScheduler, BookingProcessor, LessonExpander, MemberRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<BookingProcessor>,
    pub scheduler: Arc<AutoChargeScheduler>,
    pub expander: Arc<LessonExpander>,
    pub registry: Arc<MemberRegistry>,
    pub bookings: Arc<dyn BookingRepository>,
    pub slots: Arc<dyn SlotRepository>,
    /// Card rail used for hosted checkouts and saved-method charges.
    pub card_rail: Arc<dyn PaymentRail>,
    /// Verify-only rail for out-of-band wallet payments.
    pub wallet_rail: Arc<dyn PaymentRail>,
    pub billing: BillingSettings,
    pub checkout_urls: CheckoutUrls,
}

#[derive(Clone)]
pub struct BillingSettings {
    /// Shared secret expected in `x-billing-secret` on the run endpoint.
    pub run_secret: Option<String>,
    pub currency: String,
}

#[derive(Clone)]
pub struct CheckoutUrls {
    pub success: String,
    pub cancel: String,
}
