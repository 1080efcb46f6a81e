use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rally_api::state::{AppState, BillingSettings, CheckoutUrls};
use rally_api::app;
use rally_core::notify::{Notifier, NotifyError, OutboundMail};
use rally_core::payment::{
    ChargeOutcome, CheckoutSession, PaymentError, PaymentRail, PaymentVerdict, SessionRequest,
};
use rally_core::repository::MemberRepository;
use rally_core::token::TokenCodec;
use rally_engine::{
    AutoChargeScheduler, BookingProcessor, ChargePolicy, LessonExpander, MemberRegistry,
};
use rally_store::MemoryStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

struct StubRail {
    verify_verdict: Mutex<PaymentVerdict>,
    fail_sessions: AtomicBool,
}

impl StubRail {
    fn new() -> Self {
        Self {
            verify_verdict: Mutex::new(PaymentVerdict::Paid),
            fail_sessions: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PaymentRail for StubRail {
    async fn create_session(&self, _req: &SessionRequest) -> Result<CheckoutSession, PaymentError> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("session refused".into()));
        }
        Ok(CheckoutSession {
            id: "cs_test_1".into(),
            url: "https://checkout.test/cs_test_1".into(),
        })
    }

    async fn create_customer(
        &self,
        _name: &str,
        _email: &str,
        _phone: Option<&str>,
    ) -> Result<String, PaymentError> {
        Ok("cus_test_1".into())
    }

    async fn charge_saved_method(
        &self,
        _customer_id: &str,
        _amount: i64,
        _currency: &str,
        _description: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        Ok(ChargeOutcome {
            reference: "pi_test_1".into(),
            verdict: PaymentVerdict::Paid,
        })
    }

    async fn verify(&self, _payment_id: &str) -> Result<PaymentVerdict, PaymentError> {
        Ok(*self.verify_verdict.lock().unwrap())
    }
}

struct CapturingNotifier {
    fail: AtomicBool,
    sent: Mutex<Vec<OutboundMail>>,
}

impl CapturingNotifier {
    fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn last_body(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|m| m.body.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, mail: &OutboundMail) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("smtp unreachable".into()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    rail: Arc<StubRail>,
    notifier: Arc<CapturingNotifier>,
    state: AppState,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let rail = Arc::new(StubRail::new());
    let notifier = Arc::new(CapturingNotifier::new());
    let tokens = TokenCodec::new("test-secret", 72);

    let processor = Arc::new(BookingProcessor::new(
        store.clone(),
        store.clone(),
        store.clone(),
        notifier.clone(),
        tokens,
        "admin@club.example".into(),
        "http://localhost:8080".into(),
    ));
    let scheduler = Arc::new(AutoChargeScheduler::new(
        store.clone(),
        rail.clone(),
        notifier.clone(),
        "admin@club.example".into(),
        ChargePolicy::default(),
    ));
    let expander = Arc::new(LessonExpander::new(store.clone(), store.clone()));
    let registry = Arc::new(MemberRegistry::new(
        store.clone(),
        rail.clone(),
        "http://localhost:8080/card-saved".into(),
        "http://localhost:8080/card-cancelled".into(),
    ));

    let state = AppState {
        processor,
        scheduler,
        expander,
        registry,
        bookings: store.clone(),
        slots: store.clone(),
        card_rail: rail.clone(),
        wallet_rail: rail.clone(),
        billing: BillingSettings {
            run_secret: Some("cron-secret".into()),
            currency: "EUR".into(),
        },
        checkout_urls: CheckoutUrls {
            success: "http://localhost:8080/payment-success".into(),
            cancel: "http://localhost:8080/payment-cancelled".into(),
        },
    };

    Harness {
        store,
        rail,
        notifier,
        state,
    }
}

async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn booking_request() -> Value {
    json!({
        "clientName": "Ada",
        "clientEmail": "a@b.com",
        "resource": "court-1",
        "date": "2025-01-10",
        "hour": 10,
        "amount": 2500,
        "billingMode": "IMMEDIATE"
    })
}

fn token_from_mail(body: &str) -> String {
    body.split("token=")
        .nth(1)
        .map(|rest| rest.split_whitespace().next().unwrap_or_default())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let h = harness();
    let (status, _) = call(&h.state, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn booking_request_then_confirm() {
    let h = harness();

    let (status, body) = call(&h.state, post("/booking-request", booking_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "REQUESTED");
    assert_eq!(body["emailSent"], true);
    let booking_id = body["bookingId"].as_str().unwrap().to_string();
    let token = body["token"].as_str().unwrap().to_string();

    // The same token also travels in the admin mail.
    assert_eq!(token_from_mail(&h.notifier.last_body()), token);

    let (status, body) = call(&h.state, post("/confirm-booking", json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["booking"]["status"], "CONFIRMED");
    assert_eq!(body["booking"]["resource"], "court-1");
    assert_eq!(body["emailsSent"]["client"], true);
    assert_eq!(body["emailsSent"]["admin"], true);

    // The token is spent.
    let (status, body) = call(&h.state, post("/confirm-booking", json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyConfirmed");

    let (status, body) = call(&h.state, get(&format!("/bookings/{}", booking_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"], "court-1");
    assert_eq!(body["status"], "CONFIRMED");
    assert!(body["transactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_slot_request_conflicts() {
    let h = harness();

    let (status, _) = call(&h.state, post("/booking-request", booking_request())).await;
    assert_eq!(status, StatusCode::OK);

    let mut second = booking_request();
    second["clientEmail"] = json!("rival@b.com");
    let (status, body) = call(&h.state, post("/booking-request", second)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "SlotConflict");
}

#[tokio::test]
async fn cancel_auto_charge_is_idempotent() {
    let h = harness();

    let (_, member) = call(
        &h.state,
        post(
            "/create-member",
            json!({ "name": "Ada", "email": "ada@club.example" }),
        ),
    )
    .await;
    let code = member["memberCode"].as_str().unwrap().to_string();

    let mut req = booking_request();
    req["billingMode"] = json!("DEFERRED");
    req["memberCode"] = json!(code);
    let (status, body) = call(&h.state, post("/booking-request", req)).await;
    assert_eq!(status, StatusCode::OK);
    let booking_id = body["bookingId"].as_str().unwrap().to_string();
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _) = call(&h.state, post("/confirm-booking", json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::OK);

    let cancel = json!({ "bookingId": booking_id });
    let (status, body) = call(&h.state, post("/cancel-auto-charge", cancel.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyCancelled"], false);

    let (status, body) = call(&h.state, post("/cancel-auto-charge", cancel)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyCancelled"], true);
}

#[tokio::test]
async fn member_validation_contract() {
    let h = harness();

    let (status, body) = call(
        &h.state,
        post("/validate-member", json!({ "memberCode": "M999999" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["valid"], false);

    let (_, member) = call(
        &h.state,
        post(
            "/create-member",
            json!({ "name": "Ada", "email": "ada@club.example" }),
        ),
    )
    .await;
    let code = member["memberCode"].as_str().unwrap().to_string();

    // Case-insensitive match.
    let (status, body) = call(
        &h.state,
        post("/validate-member", json!({ "memberCode": code.to_lowercase() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["member"]["memberCode"], code.as_str());

    // Deactivated members are rejected with the fixed message.
    let mut stored = h.store.find_by_code(&code).await.unwrap().unwrap();
    stored.active = false;
    h.store.update(&stored).await.unwrap();

    let (status, body) = call(
        &h.state,
        post("/validate-member", json!({ "memberCode": code })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"], "This membership is no longer active");
}

#[tokio::test]
async fn billing_run_requires_shared_secret() {
    let h = harness();

    let (status, body) = call(&h.state, post("/billing/run", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let request = Request::builder()
        .method("POST")
        .uri("/billing/run")
        .header("x-billing-secret", "cron-secret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&h.state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["charged"].is_array());
}

#[tokio::test]
async fn billing_run_takes_the_date_from_the_post_body() {
    let h = harness();

    let (_, member) = call(
        &h.state,
        post(
            "/create-member",
            json!({ "name": "Ada", "email": "ada@club.example" }),
        ),
    )
    .await;
    let code = member["memberCode"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h.state,
        post(
            "/booking-request",
            json!({
                "clientName": "Ada",
                "clientEmail": "a@b.com",
                "resource": "court-1",
                "date": "2030-06-14",
                "hour": 10,
                "amount": 2500,
                "billingMode": "DEFERRED",
                "memberCode": code
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let booking_id = body["bookingId"].as_str().unwrap().to_string();
    let token = body["token"].as_str().unwrap().to_string();
    let (status, _) = call(&h.state, post("/confirm-booking", json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::OK);

    let run = |body: Value| {
        Request::builder()
            .method("POST")
            .uri("/billing/run")
            .header("content-type", "application/json")
            .header("x-billing-secret", "cron-secret")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    // Sweeping at the wall clock leaves the far-future booking alone.
    let (status, report) = call(&h.state, run(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(report["charged"].as_array().unwrap().is_empty());

    // The logical billing date in the body brings it into scope.
    let (status, report) = call(&h.state, run(json!({ "date": "2030-06-14" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["charged"], json!([booking_id]));
}

#[tokio::test]
async fn incomplete_paypal_order_leaves_booking_unpaid() {
    let h = harness();

    let (_, body) = call(&h.state, post("/booking-request", booking_request())).await;
    let booking_id = body["bookingId"].as_str().unwrap().to_string();

    *h.rail.verify_verdict.lock().unwrap() = PaymentVerdict::Pending;
    let (status, body) = call(
        &h.state,
        post(
            "/payments/paypal",
            json!({ "bookingId": booking_id, "paymentId": "ORDER-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "PaymentNotCompleted");

    let (_, body) = call(&h.state, get(&format!("/bookings/{}", booking_id))).await;
    assert_eq!(body["paymentStatus"], "UNPAID");

    // Completed order flips the booking to paid and posts a ledger row.
    *h.rail.verify_verdict.lock().unwrap() = PaymentVerdict::Paid;
    let (status, body) = call(
        &h.state,
        post(
            "/payments/paypal",
            json!({ "bookingId": booking_id, "paymentId": "ORDER-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["paymentStatus"], "PAID");

    let (_, body) = call(&h.state, get(&format!("/bookings/{}", booking_id))).await;
    assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(body["transactions"][0]["amount"], 2500);
}

#[tokio::test]
async fn stripe_checkout_session_for_immediate_booking() {
    let h = harness();

    let (_, body) = call(&h.state, post("/booking-request", booking_request())).await;
    let booking_id = body["bookingId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h.state,
        post(
            "/payments/stripe/create-checkout",
            json!({ "bookingId": booking_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "cs_test_1");
    assert!(body["checkoutUrl"].as_str().unwrap().starts_with("https://"));
}

#[tokio::test]
async fn refused_checkout_session_unwinds_the_reservation() {
    let h = harness();

    let (_, body) = call(&h.state, post("/booking-request", booking_request())).await;
    let booking_id = body["bookingId"].as_str().unwrap().to_string();

    h.rail.fail_sessions.store(true, Ordering::SeqCst);
    let (status, body) = call(
        &h.state,
        post(
            "/payments/stripe/create-checkout",
            json!({ "bookingId": booking_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "ExternalServiceError");

    // The slot is free again for the next client.
    let (_, body) = call(&h.state, get(&format!("/bookings/{}", booking_id))).await;
    assert_eq!(body["status"], "CANCELLED");

    h.rail.fail_sessions.store(false, Ordering::SeqCst);
    let (status, _) = call(&h.state, post("/booking-request", booking_request())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn recurring_series_expansion_and_cancel() {
    let h = harness();

    // Friday slot blocked in advance.
    let (status, _) = call(
        &h.state,
        post(
            "/booking-request",
            json!({
                "clientEmail": "rival@b.com",
                "resource": "court-2",
                "date": "2025-01-10",
                "hour": 17,
                "amount": 2500,
                "billingMode": "IMMEDIATE"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &h.state,
        post(
            "/recurring-lessons",
            json!({
                "clientName": "Ada",
                "clientEmail": "a@b.com",
                "resource": "court-2",
                "weekday": 4,
                "hour": 17,
                "startDate": "2025-01-01",
                "endDate": "2025-01-31"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(["2025-01-10"]));
    assert_eq!(body["reserved"].as_array().unwrap().len(), 4);
    let series_id = body["seriesId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h.state,
        post(
            &format!("/recurring-lessons/{}/cancel", series_id),
            json!({ "fromDate": "2025-01-17" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], json!(["2025-01-24", "2025-01-31"]));
}
