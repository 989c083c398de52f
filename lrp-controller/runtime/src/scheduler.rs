use crate::{core::Emit, routes};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error};

/// Periodically runs the route collector and emits its snapshot.
pub struct Scheduler {
    collector: routes::Collector,
    emitter: Arc<dyn Emit>,
    metrics: routes::RouteMetrics,
    interval: time::Duration,
}

impl Scheduler {
    pub fn new(
        collector: routes::Collector,
        emitter: Arc<dyn Emit>,
        metrics: routes::RouteMetrics,
        interval: time::Duration,
    ) -> Self {
        Self {
            collector,
            emitter,
            metrics,
            interval,
        }
    }

    pub async fn run(self, drain: drain::Watch) {
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);
        let mut ticks = time::interval(self.interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                _ = ticks.tick() => {}
            }
            if let Err(error) = self.collect_once().await {
                error!(error = %format_args!("{error:#}"), "Route collection failed");
                self.metrics.handler_error("collector");
            }
        }
    }

    /// Runs a single collection pass, emitting every message it produces.
    pub async fn collect_once(&self) -> Result<usize> {
        let messages = self
            .collector
            .collect()
            .await
            .context("failed to collect routes")?;
        let emitted = messages.len();
        for message in messages {
            self.emitter.emit(message);
        }
        debug!(emitted, "Collected routes");
        Ok(emitted)
    }
}
