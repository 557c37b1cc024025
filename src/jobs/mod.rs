/// Background maintenance jobs
///
/// None of these are needed for correctness: every read path prunes or
/// ignores expired entries itself. The sweeps just keep idle per-IP state
/// and the fallback cache from growing without bound.
use crate::context::AppContext;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct JobScheduler {
    ctx: AppContext,
}

impl JobScheduler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Spawn the periodic sweep loops
    pub fn start(&self) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                ctx.security.sweep();
                ctx.tokens.sweep_fallback();
                tracing::debug!("Security state sweep complete");
            }
        });

        tracing::info!("Background jobs started");
    }
}
