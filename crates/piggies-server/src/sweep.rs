use std::time::Duration;

use chrono::Utc;
use piggies_api::referrals::notify_rewards;
use piggies_api::state::{AppState, with_db};
use tracing::{info, warn};

/// Background task that activates or expires pending referrals.
///
/// Runs on an interval. Each referral is evaluated in its own transaction,
/// so a failure part way through leaves earlier results committed.
pub async fn run_sweep_loop(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        match with_db(&state, |db| db.run_activation_sweep(Utc::now())).await {
            Ok(report) => {
                if !report.rewards.is_empty() {
                    info!("Sweep: notifying {} rewarded referrers", report.rewards.len());
                }
                notify_rewards(&state, &report.rewards).await;
            }
            Err(e) => {
                warn!("Referral sweep error: {:?}", e);
            }
        }
    }
}
