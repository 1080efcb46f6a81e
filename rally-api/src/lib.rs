use axum::{http::Method, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod billing;
pub mod bookings;
pub mod error;
pub mod members;
pub mod notify;
pub mod payments;
pub mod providers;
pub mod recurring;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(bookings::routes())
        .merge(members::routes())
        .merge(payments::routes())
        .merge(billing::routes())
        .merge(recurring::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
