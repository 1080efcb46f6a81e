pub mod paypal;
pub mod stripe;

pub use paypal::PaypalRail;
pub use stripe::StripeRail;
