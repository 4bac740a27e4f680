use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use crate::settlement::{ReapSummary, SettlementEngine};

/// Periodically expires intents a diner abandoned at checkout, so their items
/// become payable again.
pub struct IntentReaper {
    engine: SettlementEngine,
    timeout: chrono::Duration,
    every: Duration,
}

impl IntentReaper {
    pub fn new(engine: SettlementEngine, timeout: chrono::Duration, every: Duration) -> Self {
        Self { engine, timeout, every }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.every);

        loop {
            interval.tick().await;

            match self.engine.reap_stale_intents(self.timeout).await {
                Ok(summary) if summary == ReapSummary::default() => {}
                Ok(summary) => info!(
                    "Reaped stale payment intents: {} expired, {} settled, {} deferred",
                    summary.expired, summary.settled, summary.deferred
                ),
                Err(e) => error!("Error reaping stale intents: {}", e),
            }
        }
    }
}
