use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub stripe: StripeConfig,
    pub paypal: PaypalConfig,
    pub billing: BillingConfig,
    pub token: TokenConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Public origin used when building confirmation links.
    pub public_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub admin_email: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_paypal_base")]
    pub base_url: String,
}

fn default_paypal_base() -> String {
    "https://api-m.paypal.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_lead_hours")]
    pub lead_hours: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Shared secret expected on the billing trigger endpoint.
    pub run_secret: Option<String>,
    /// If set, an in-process worker invokes the billing run at this cadence.
    pub worker_interval_seconds: Option<u64>,
}

fn default_lead_hours() -> i64 {
    24
}

fn default_max_attempts() -> i32 {
    3
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub secret: String,
    #[serde(default = "default_token_ttl")]
    pub ttl_hours: i64,
}

fn default_token_ttl() -> i64 {
    72
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // `RALLY__SERVER__PORT=9000` style environment overrides.
            .add_source(config::Environment::with_prefix("RALLY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
