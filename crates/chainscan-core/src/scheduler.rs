//! Timer-driven tick scheduling.
//!
//! One task per (chain, tick kind). Each fires on a fixed interval and spawns
//! the tick; the tick's own guard drops overlapping runs. Tick errors are
//! logged and never stop a schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::{ScanEngine, TickOutcome};
use crate::guard::TickKind;

pub struct Scheduler {
    engine: Arc<ScanEngine>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(engine: Arc<ScanEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    /// Spawn every schedule. They stop once `cancel` fires, after their
    /// in-flight ticks finish.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for chain in self.engine.registry().ids() {
            for (kind, period) in [
                (TickKind::Height, self.config.height_interval()),
                (TickKind::Scan, self.config.scan_interval()),
            ] {
                handles.push(tokio::spawn(run_schedule(
                    self.engine.clone(),
                    chain.clone(),
                    kind,
                    period,
                    cancel.clone(),
                )));
            }
        }
        info!(
            chains = self.engine.registry().len(),
            height_interval_ms = self.config.height_interval_ms,
            scan_interval_ms = self.config.scan_interval_ms,
            "Scheduler started"
        );
        handles
    }
}

async fn run_schedule(
    engine: Arc<ScanEngine>,
    chain: String,
    kind: TickKind,
    period: Duration,
    cancel: CancellationToken,
) {
    debug!(chain = %chain, kind = %kind, period_ms = period.as_millis() as u64, "Schedule running");
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                while in_flight.try_join_next().is_some() {}
                let engine = engine.clone();
                let chain = chain.clone();
                in_flight.spawn(async move { run_tick(&engine, &chain, kind).await });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!(chain = %chain, kind = %kind, "Schedule stopped");
}

/// Run one tick and log its outcome. Errors are swallowed here.
pub async fn run_tick(engine: &ScanEngine, chain: &str, kind: TickKind) {
    match kind {
        TickKind::Height => match engine.height_tick(chain).await {
            Ok(TickOutcome::Ran(tick)) if !tick.is_noop() => debug!(
                chain,
                head = tick.head,
                checkpoint = tick.checkpoint,
                enqueued = tick.enqueued,
                "Height tick"
            ),
            Ok(_) => {}
            Err(e) => warn!(chain, kind = %kind, error = %e, "Tick failed"),
        },
        TickKind::Scan => match engine.scan_tick(chain).await {
            Ok(TickOutcome::Ran(report)) if !report.is_idle() => debug!(
                chain,
                acked = report.acked.len(),
                noacked = report.noacked.len(),
                transfers = report.transfers,
                "Scan tick"
            ),
            Ok(_) => {}
            Err(e) => warn!(chain, kind = %kind, error = %e, "Tick failed"),
        },
    }
}
