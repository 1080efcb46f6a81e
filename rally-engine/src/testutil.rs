use async_trait::async_trait;
use rally_core::notify::{Notifier, NotifyError, OutboundMail};
use rally_core::payment::{
    ChargeOutcome, CheckoutSession, PaymentError, PaymentRail, PaymentVerdict, SessionRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Payment rail double: records every call, outcome switchable per test.
pub struct MockRail {
    pub succeed: AtomicBool,
    pub charge_verdict: Mutex<PaymentVerdict>,
    pub verify_verdict: Mutex<PaymentVerdict>,
    pub charges: Mutex<Vec<(String, i64)>>,
    pub sessions: Mutex<Vec<SessionRequest>>,
}

impl MockRail {
    pub fn new() -> Self {
        Self {
            succeed: AtomicBool::new(true),
            charge_verdict: Mutex::new(PaymentVerdict::Paid),
            verify_verdict: Mutex::new(PaymentVerdict::Paid),
            charges: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentRail for MockRail {
    async fn create_session(&self, req: &SessionRequest) -> Result<CheckoutSession, PaymentError> {
        self.sessions.lock().unwrap().push(req.clone());
        Ok(CheckoutSession {
            id: "cs_mock_1".into(),
            url: "https://checkout.mock/cs_mock_1".into(),
        })
    }

    async fn create_customer(
        &self,
        _name: &str,
        _email: &str,
        _phone: Option<&str>,
    ) -> Result<String, PaymentError> {
        Ok("cus_mock_1".into())
    }

    async fn charge_saved_method(
        &self,
        customer_id: &str,
        amount: i64,
        _currency: &str,
        _description: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        self.charges
            .lock()
            .unwrap()
            .push((customer_id.to_string(), amount));
        if self.succeed.load(Ordering::SeqCst) {
            Ok(ChargeOutcome {
                reference: format!("pi_mock_{}", self.charge_count()),
                verdict: *self.charge_verdict.lock().unwrap(),
            })
        } else {
            Err(PaymentError::Provider("card declined".into()))
        }
    }

    async fn verify(&self, _payment_id: &str) -> Result<PaymentVerdict, PaymentError> {
        Ok(*self.verify_verdict.lock().unwrap())
    }
}

/// Notifier double: captures mail, optionally failing every send.
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    pub sent: Mutex<Vec<OutboundMail>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_to(&self, address: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == address)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, mail: &OutboundMail) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("smtp unreachable".into()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}
