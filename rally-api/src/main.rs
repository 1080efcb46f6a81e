use anyhow::Context;
use rally_api::providers::{PaypalRail, StripeRail};
use rally_api::state::{AppState, BillingSettings, CheckoutUrls};
use rally_api::{app, notify::SmtpNotifier, worker};
use rally_core::token::TokenCodec;
use rally_engine::{
    AutoChargeScheduler, BookingProcessor, ChargePolicy, LessonExpander, MemberRegistry,
};
use rally_store::PgStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rally_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = rally_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!("Starting Rally API on port {}", config.server.port);

    let store = PgStore::connect(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;
    store.migrate().await.context("Failed to run migrations")?;
    let store = Arc::new(store);

    let notifier = Arc::new(SmtpNotifier::new(&config.smtp).context("Failed to set up SMTP")?);
    let card_rail = Arc::new(StripeRail::new(config.stripe.secret_key.clone()));
    let wallet_rail = Arc::new(PaypalRail::new(&config.paypal));
    let tokens = TokenCodec::new(&config.token.secret, config.token.ttl_hours);

    let processor = Arc::new(BookingProcessor::new(
        store.clone(),
        store.clone(),
        store.clone(),
        notifier.clone(),
        tokens,
        config.smtp.admin_email.clone(),
        config.server.public_base_url.clone(),
    ));
    let scheduler = Arc::new(AutoChargeScheduler::new(
        store.clone(),
        card_rail.clone(),
        notifier.clone(),
        config.smtp.admin_email.clone(),
        ChargePolicy {
            lead_hours: config.billing.lead_hours,
            max_attempts: config.billing.max_attempts,
        },
    ));
    let expander = Arc::new(LessonExpander::new(store.clone(), store.clone()));
    let registry = Arc::new(MemberRegistry::new(
        store.clone(),
        card_rail.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
    ));

    if let Some(interval) = config.billing.worker_interval_seconds {
        tokio::spawn(worker::start_billing_worker(scheduler.clone(), interval));
    }

    let app_state = AppState {
        processor,
        scheduler,
        expander,
        registry,
        bookings: store.clone(),
        slots: store,
        card_rail,
        wallet_rail,
        billing: BillingSettings {
            run_secret: config.billing.run_secret.clone(),
            currency: config.billing.currency.clone(),
        },
        checkout_urls: CheckoutUrls {
            success: config.stripe.success_url.clone(),
            cancel: config.stripe.cancel_url.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
