use async_trait::async_trait;
use rally_core::payment::{
    ChargeOutcome, CheckoutMode, CheckoutSession, PaymentError, PaymentRail, PaymentVerdict,
    SessionRequest,
};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// Stripe-backed card rail. Hosted checkout for payment and setup,
/// off-session payment intents for saved-method charges.
pub struct StripeRail {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
    #[serde(default)]
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodList {
    data: Vec<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
struct PaymentMethod {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
}

impl StripeRail {
    pub fn new(secret_key: String) -> Self {
        Self::with_base_url(secret_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, PaymentError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        Self::decode(response).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, PaymentError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, PaymentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "Stripe returned {}: {}",
                status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))
    }
}

#[async_trait]
impl PaymentRail for StripeRail {
    async fn create_session(&self, req: &SessionRequest) -> Result<CheckoutSession, PaymentError> {
        let mut form: Vec<(String, String)> = vec![
            ("success_url".into(), req.success_url.clone()),
            ("cancel_url".into(), req.cancel_url.clone()),
        ];

        match req.mode {
            CheckoutMode::Payment => {
                let amount = req.amount.ok_or_else(|| {
                    PaymentError::Provider("payment session requires an amount".into())
                })?;
                form.push(("mode".into(), "payment".into()));
                form.push((
                    "line_items[0][price_data][currency]".into(),
                    req.currency.to_lowercase(),
                ));
                form.push((
                    "line_items[0][price_data][unit_amount]".into(),
                    amount.to_string(),
                ));
                form.push((
                    "line_items[0][price_data][product_data][name]".into(),
                    req.description.clone(),
                ));
                form.push(("line_items[0][quantity]".into(), "1".into()));
            }
            CheckoutMode::Setup => {
                form.push(("mode".into(), "setup".into()));
            }
        }

        if let Some(customer) = &req.customer_id {
            form.push(("customer".into(), customer.clone()));
        } else if let Some(email) = &req.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }
        if let Some(reference) = &req.reference {
            form.push(("client_reference_id".into(), reference.clone()));
        }

        let session: SessionResponse = self.post_form("/v1/checkout/sessions", &form).await?;
        debug!("Created checkout session {}", session.id);
        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<String, PaymentError> {
        let mut form: Vec<(String, String)> = vec![
            ("name".into(), name.to_string()),
            ("email".into(), email.to_string()),
        ];
        if let Some(phone) = phone {
            form.push(("phone".into(), phone.to_string()));
        }
        let customer: CustomerResponse = self.post_form("/v1/customers", &form).await?;
        Ok(customer.id)
    }

    async fn charge_saved_method(
        &self,
        customer_id: &str,
        amount: i64,
        currency: &str,
        description: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        let methods: PaymentMethodList = self
            .get(&format!(
                "/v1/payment_methods?customer={}&type=card",
                customer_id
            ))
            .await?;
        let method = methods.data.first().ok_or_else(|| {
            PaymentError::NotCompleted("no saved payment method for customer".into())
        })?;

        let form: Vec<(String, String)> = vec![
            ("amount".into(), amount.to_string()),
            ("currency".into(), currency.to_lowercase()),
            ("customer".into(), customer_id.to_string()),
            ("payment_method".into(), method.id.clone()),
            ("description".into(), description.to_string()),
            ("off_session".into(), "true".into()),
            ("confirm".into(), "true".into()),
        ];
        let intent: PaymentIntentResponse = self.post_form("/v1/payment_intents", &form).await?;

        let verdict = match intent.status.as_str() {
            "succeeded" => PaymentVerdict::Paid,
            "processing" | "requires_action" | "requires_confirmation" => PaymentVerdict::Pending,
            _ => PaymentVerdict::Failed,
        };
        Ok(ChargeOutcome {
            reference: intent.id,
            verdict,
        })
    }

    async fn verify(&self, payment_id: &str) -> Result<PaymentVerdict, PaymentError> {
        let session: SessionResponse = self
            .get(&format!("/v1/checkout/sessions/{}", payment_id))
            .await?;
        Ok(match session.payment_status.as_deref() {
            Some("paid") | Some("no_payment_required") => PaymentVerdict::Paid,
            Some("unpaid") => PaymentVerdict::Pending,
            _ => PaymentVerdict::Failed,
        })
    }
}
