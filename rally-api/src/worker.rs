use chrono::Utc;
use rally_engine::AutoChargeScheduler;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// In-process fallback for deployments without an external cron hitting
/// the billing endpoint. Runs one sweep per tick, forever.
pub async fn start_billing_worker(scheduler: Arc<AutoChargeScheduler>, interval_seconds: u64) {
    info!("Billing worker started, sweeping every {}s", interval_seconds);

    let mut ticker = interval(Duration::from_secs(interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match scheduler.run_due(Utc::now()).await {
            Ok(report) => {
                if !report.charged.is_empty()
                    || !report.failed.is_empty()
                    || !report.escalated.is_empty()
                {
                    info!(
                        "Billing sweep: {} charged, {} failed, {} escalated",
                        report.charged.len(),
                        report.failed.len(),
                        report.escalated.len()
                    );
                }
            }
            Err(e) => error!("Billing sweep failed: {}", e),
        }
    }
}
