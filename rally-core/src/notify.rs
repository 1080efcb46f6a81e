use async_trait::async_trait;

/// A single outbound email. Plain text; templating happens at the
/// call site that owns the wording.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Mail transport error: {0}")]
    Transport(String),
}

/// Delivery of notification email. Failures here are recorded by
/// callers and never roll back booking state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), NotifyError>;
}
