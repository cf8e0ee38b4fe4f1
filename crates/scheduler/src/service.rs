//! The monitor loop: immediate pass at startup, then ticks on a jittered
//! interval. Targets are processed strictly sequentially; a failing target
//! never stops the loop or its siblings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{error, info};

use slotwatch_core::{Config, Notifier, PipelineResult, PipelineRunner, Target};
use slotwatch_notify::messages;

use crate::admission::{HealthCheckLedger, Windows};

pub struct Monitor<R, N> {
    runner: R,
    notifier: N,
    targets: Vec<Target>,
    windows: Windows,
    interval_minutes: u64,
    jitter_minutes: u64,
    operator_id: i64,
    ledger: HealthCheckLedger,
}

impl<R, N> Monitor<R, N>
where
    R: PipelineRunner,
    N: Notifier,
{
    pub fn new(cfg: &Config, runner: R, notifier: N) -> Self {
        Self {
            runner,
            notifier,
            targets: cfg.targets.clone(),
            windows: Windows::from_config(cfg),
            interval_minutes: cfg.interval_minutes,
            jitter_minutes: cfg.jitter_minutes,
            operator_id: cfg.operator_id,
            ledger: HealthCheckLedger::new(),
        }
    }

    /// Run until the process is terminated.
    pub async fn run(mut self) {
        info!(
            targets = self.targets.len(),
            interval_minutes = self.interval_minutes,
            jitter_minutes = self.jitter_minutes,
            "Monitor started"
        );

        self.pass(Utc::now()).await;
        loop {
            let wait = self.next_interval();
            info!(wait_secs = wait.as_secs(), "Sleeping until next tick");
            tokio::time::sleep(wait).await;
            self.pass(Utc::now()).await;
        }
    }

    /// Uniform draw from `[interval, interval + jitter)` minutes, re-drawn
    /// after every tick.
    fn next_interval(&self) -> Duration {
        let minutes = rand::thread_rng()
            .gen_range(self.interval_minutes..self.interval_minutes + self.jitter_minutes);
        Duration::from_secs(minutes * 60)
    }

    /// One pass over all enabled targets.
    async fn pass(&mut self, now: DateTime<Utc>) {
        for target in self.targets.clone() {
            if !target.enabled {
                continue;
            }
            self.tick_target(&target, now).await;
        }
    }

    async fn tick_target(&mut self, target: &Target, now: DateTime<Utc>) {
        if !self.windows.admits(now) {
            info!(name = %target.name, "Skipping request outside of allowed hours");
            return;
        }

        // Stamped before the run so a second tick in the same window
        // cannot double-send.
        let notify_negative = self.ledger.claim(target.fingerprint(), now, &self.windows);
        if notify_negative {
            info!(name = %target.name, "Will send health check regardless of result");
        }

        match self.runner.run(target).await {
            Ok(result) => {
                info!(name = %target.name, availability = %result, "Pipeline finished");
                if result == PipelineResult::SlotAvailable || notify_negative {
                    self.notify(target, result).await;
                }
            }
            Err(e) => {
                error!(name = %target.name, error = %e, "Pipeline run failed");
            }
        }
    }

    /// Fan out to the target's recipient and the operator, independently;
    /// a failed send is logged and does not block the sibling.
    async fn notify(&self, target: &Target, result: PipelineResult) {
        let text = messages::render(result, &target.name, &target.url);
        for chat_id in [target.recipient_id, self.operator_id] {
            if let Err(e) = self.notifier.send(chat_id, &text).await {
                error!(name = %target.name, chat_id, error = %e, "Failed to send notification");
            }
        }
    }
}
