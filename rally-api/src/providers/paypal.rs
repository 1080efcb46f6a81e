use async_trait::async_trait;
use rally_core::payment::{
    ChargeOutcome, CheckoutSession, PaymentError, PaymentRail, PaymentVerdict, SessionRequest,
};
use rally_store::app_config::PaypalConfig;
use serde::Deserialize;
use tracing::debug;

/// Verify-only PayPal rail. Orders are created and approved in the
/// client; the server's job is deciding whether an order id the client
/// presents has actually completed.
pub struct PaypalRail {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    status: String,
}

impl PaypalRail {
    pub fn new(config: &PaypalConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "PayPal auth returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentRail for PaypalRail {
    async fn create_session(&self, _req: &SessionRequest) -> Result<CheckoutSession, PaymentError> {
        Err(PaymentError::Unsupported)
    }

    async fn create_customer(
        &self,
        _name: &str,
        _email: &str,
        _phone: Option<&str>,
    ) -> Result<String, PaymentError> {
        Err(PaymentError::Unsupported)
    }

    async fn charge_saved_method(
        &self,
        _customer_id: &str,
        _amount: i64,
        _currency: &str,
        _description: &str,
    ) -> Result<ChargeOutcome, PaymentError> {
        Err(PaymentError::Unsupported)
    }

    async fn verify(&self, payment_id: &str) -> Result<PaymentVerdict, PaymentError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/v2/checkout/orders/{}", self.base_url, payment_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::NotCompleted(format!(
                "Order {} not found",
                payment_id
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Provider(format!(
                "PayPal returned {}: {}",
                status, body
            )));
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        debug!("Order {} is {}", payment_id, order.status);

        // Only a completed capture counts as payment.
        Ok(match order.status.as_str() {
            "COMPLETED" => PaymentVerdict::Paid,
            "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => PaymentVerdict::Pending,
            _ => PaymentVerdict::Failed,
        })
    }
}
