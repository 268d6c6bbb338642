//! Fixed-cadence scheduling of entity pollers
//!
//! Each host gets its own ticker. A tick claims the host's poll guard and
//! hands the pass to the blocking pool; the ticker keeps running, so a pass
//! that outlives the interval causes later ticks for that host to be
//! skipped rather than queued.

use super::{EntityPoller, PollGuard, TickOutcome};
use crate::health::{components, HealthRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Delay before the first tick of every host
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

pub struct PollScheduler {
    pollers: Vec<Arc<EntityPoller>>,
    interval: Duration,
    initial_delay: Duration,
    max_concurrent_polls: usize,
    health: HealthRegistry,
}

impl PollScheduler {
    pub fn new(pollers: Vec<Arc<EntityPoller>>, interval: Duration, health: HealthRegistry) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_concurrent_polls = pollers.len().clamp(1, parallelism.max(1));

        Self {
            pollers,
            interval,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_concurrent_polls,
            health,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Upper bound on passes running on the blocking pool at once
    pub fn with_max_concurrent_polls(mut self, limit: usize) -> Self {
        self.max_concurrent_polls = limit.max(1);
        self
    }

    /// Run until `shutdown` fires, then wait for in-flight passes
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        info!(
            hosts = self.pollers.len(),
            interval_ms = self.interval.as_millis() as u64,
            max_concurrent_polls = self.max_concurrent_polls,
            "Starting poll scheduler"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_polls));
        let mut tasks = JoinSet::new();

        for poller in &self.pollers {
            tasks.spawn(run_entity(
                Arc::clone(poller),
                Arc::clone(&semaphore),
                self.health.clone(),
                self.interval,
                self.initial_delay,
                shutdown.resubscribe(),
            ));
        }
        drop(shutdown);

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Poll task terminated abnormally");
            }
        }

        self.health
            .set_unhealthy(components::SCHEDULER, "poll scheduler stopped")
            .await;
        info!("Poll scheduler stopped");
    }
}

async fn run_entity(
    poller: Arc<EntityPoller>,
    semaphore: Arc<Semaphore>,
    health: HealthRegistry,
    period: Duration,
    initial_delay: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A refused claim is already logged and counted by the poller
                if let Ok(guard) = poller.try_begin() {
                    in_flight = Some(tokio::spawn(run_pass(
                        guard,
                        Arc::clone(&semaphore),
                        health.clone(),
                    )));
                }
            }
            _ = shutdown.recv() => {
                info!(host = %poller.host(), "Stopping poller");
                break;
            }
        }
    }

    if let Some(handle) = in_flight {
        if let Err(e) = handle.await {
            error!(host = %poller.host(), error = %e, "Poll pass terminated abnormally");
        }
    }
}

async fn run_pass(guard: PollGuard, semaphore: Arc<Semaphore>, health: HealthRegistry) {
    let component = components::host(guard.host());

    let Ok(permit) = semaphore.acquire_owned().await else {
        return;
    };

    let pass = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        guard.run()
    })
    .await;

    let outcome = match pass {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(component = %component, error = %e, "Poll pass panicked");
            health
                .set_unhealthy(&component, format!("poll pass panicked: {}", e))
                .await;
            return;
        }
    };

    match outcome {
        TickOutcome::Published { .. } => health.set_healthy(&component).await,
        TickOutcome::Empty => {
            health
                .set_degraded(&component, "poll produced no measurements")
                .await
        }
        TickOutcome::Failed { reason } => health.set_degraded(&component, reason).await,
        TickOutcome::Skipped => {}
    }
}
