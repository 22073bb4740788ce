use super::orchestrator::{Pipeline, RunError};
use crate::feed::FeedDate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Pending on-demand runs beyond this are rejected by [`TriggerHandle::trigger`].
const TRIGGER_CAPACITY: usize = 8;

/// Requests on-demand runs from a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<FeedDate>,
}

impl TriggerHandle {
    /// Queues a run for `date`. Returns false if the scheduler is gone or backed up.
    pub fn trigger(&self, date: FeedDate) -> bool {
        match self.tx.try_send(date) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not queue triggered run");
                false
            }
        }
    }
}

/// Runs the pipeline on a fixed interval and on demand until shut down.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    grace: Duration,
    triggers: mpsc::Receiver<FeedDate>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration, grace: Duration) -> (Self, TriggerHandle) {
        let (tx, triggers) = mpsc::channel(TRIGGER_CAPACITY);
        let scheduler = Self {
            pipeline,
            interval,
            grace,
            triggers,
        };
        (scheduler, TriggerHandle { tx })
    }

    /// Loops until `shutdown` resolves, then closes the broker connection.
    ///
    /// The first scheduled run starts immediately. Runs that overlap a tick are
    /// not made up afterwards. A failed run is logged and the loop keeps going.
    /// Shutdown abandons an in-flight run.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            let date = tokio::select! {
                biased;

                _ = &mut shutdown => break,

                _ = ticker.tick() => FeedDate::Today,

                Some(date) = self.triggers.recv() => {
                    tracing::info!(date = %date, "Triggered run");
                    date
                }
            };

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::warn!(date = %date, "Shutdown requested during run, abandoning it");
                    break;
                }

                result = self.pipeline.run(&date) => {
                    if let Err(e) = result {
                        log_run_error(&e);
                    }
                }
            }
        }

        tracing::info!("Scheduler stopping");
        self.pipeline.shutdown(self.grace).await;
    }
}

fn log_run_error(e: &RunError) {
    match e {
        RunError::AlreadyRunning => tracing::debug!("Skipping run, one is already in progress"),
        _ => tracing::warn!(error = %e, "Scheduled run failed, waiting for next trigger"),
    }
}
