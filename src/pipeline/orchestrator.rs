use crate::delivery::{PublishError, Publisher};
use crate::feed::{feed_url, fetch_reports, FeedDate, FeedLimits, FetchError, LocatorError};
use crate::report::{Category, NormalizedReport, Normalizer, RawReport};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

/// Where a run currently is. `Failed` is not terminal: the next run starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Publishing,
    Failed,
}

impl RunState {
    fn in_progress(self) -> bool {
        matches!(
            self,
            RunState::Fetching | RunState::Normalizing | RunState::Publishing
        )
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    /// Another run holds the run guard
    #[error("A run is already in progress")]
    AlreadyRunning,
    /// Feed URL could not be built
    #[error("Invalid {category} feed location: {source}")]
    Locator {
        category: Category,
        #[source]
        source: LocatorError,
    },
    /// One category's fetch or parse failed; the whole run is abandoned
    #[error("Failed to fetch {category} feed: {source}")]
    Fetch {
        category: Category,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Shutdown was requested before the run finished
    #[error("Run interrupted by shutdown")]
    Interrupted,
}

/// Counts from one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tornado: usize,
    pub hail: usize,
    pub wind: usize,
    /// Rows carrying valid Lat/Lon.
    pub located: usize,
    /// Messages acknowledged by the broker this run.
    pub delivered: usize,
    /// Reports dropped for exceeding the message size limit.
    pub dropped: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.tornado + self.hail + self.wind
    }
}

/// Composes fetch, normalize and publish for one run at a time.
pub struct Pipeline {
    client: reqwest::Client,
    base_url: Url,
    limits: FeedLimits,
    normalizer: Normalizer,
    publisher: Arc<Publisher>,
    topic: String,
    running: AtomicBool,
    state: watch::Sender<RunState>,
}

/// Held for the duration of a run. Releasing it mid-run (the run future was
/// dropped) marks the run failed.
struct RunGuard<'a> {
    pipeline: &'a Pipeline,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.pipeline.state.send_if_modified(|state| {
            if state.in_progress() {
                *state = RunState::Failed;
                true
            } else {
                false
            }
        });
        self.pipeline.running.store(false, Ordering::Release);
    }
}

impl Pipeline {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        limits: FeedLimits,
        normalizer: Normalizer,
        publisher: Arc<Publisher>,
        topic: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            client,
            base_url,
            limits,
            normalizer,
            publisher,
            topic: topic.into(),
            running: AtomicBool::new(false),
            state,
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch run state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RunState) {
        self.state.send_replace(state);
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { pipeline: self })
    }

    /// Fetches all category feeds for `date`, normalizes and publishes them as one batch.
    ///
    /// The three fetches run concurrently. Any one failing fails the run and
    /// the other categories' rows are discarded.
    ///
    /// # Errors
    ///
    /// - [`RunError::AlreadyRunning`] - another run is active; nothing was done
    /// - [`RunError::Fetch`] - a feed could not be fetched or parsed; nothing was published
    /// - [`RunError::Publish`] - delivery retries were exhausted
    pub async fn run(&self, date: &FeedDate) -> Result<RunSummary, RunError> {
        let _guard = self.try_begin().ok_or(RunError::AlreadyRunning)?;

        tracing::info!(date = %date, "Starting run");
        let result = self.execute(date).await;
        match &result {
            Ok(summary) => {
                self.set_state(RunState::Idle);
                tracing::info!(
                    date = %date,
                    tornado = summary.tornado,
                    hail = summary.hail,
                    wind = summary.wind,
                    delivered = summary.delivered,
                    dropped = summary.dropped,
                    "Run complete"
                );
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                tracing::error!(date = %date, error = %e, "Run failed");
            }
        }
        result
    }

    async fn execute(&self, date: &FeedDate) -> Result<RunSummary, RunError> {
        self.set_state(RunState::Fetching);
        let (tornado, hail, wind) = futures::try_join!(
            self.fetch(Category::Tornado, date),
            self.fetch(Category::Hail, date),
            self.fetch(Category::Wind, date),
        )?;

        self.set_state(RunState::Normalizing);
        let mut summary = RunSummary {
            tornado: tornado.len(),
            hail: hail.len(),
            wind: wind.len(),
            ..RunSummary::default()
        };
        let stamp = date.explicit_timestamp();
        let mut batch: Vec<NormalizedReport> = Vec::with_capacity(summary.total());
        for (category, rows) in [
            (Category::Tornado, tornado),
            (Category::Hail, hail),
            (Category::Wind, wind),
        ] {
            batch.extend(self.normalizer.normalize_all(rows, category, stamp));
        }
        summary.located = batch
            .iter()
            .filter(|r| r.fields().coordinates().is_some())
            .count();
        tracing::info!(
            reports = batch.len(),
            located = summary.located,
            topic = %self.topic,
            "Fetched reports, publishing"
        );

        self.set_state(RunState::Publishing);
        let outcome = self.publisher.publish_batch(&batch, &self.topic).await?;
        summary.delivered = outcome.delivered;
        summary.dropped = outcome.dropped;
        Ok(summary)
    }

    async fn fetch(&self, category: Category, date: &FeedDate) -> Result<Vec<RawReport>, RunError> {
        let url = feed_url(&self.base_url, category, date)
            .map_err(|source| RunError::Locator { category, source })?;
        tracing::debug!(category = %category, url = %url, "Fetching feed");

        fetch_reports(&self.client, url.as_str(), self.limits)
            .await
            .map_err(|source| RunError::Fetch { category, source })
    }

    /// Runs once unless `shutdown` resolves first, then closes the broker
    /// connection either way.
    ///
    /// An interrupted run is abandoned: undelivered messages stay queued and
    /// the run ends in [`RunState::Failed`].
    pub async fn run_to_completion<F>(
        &self,
        date: &FeedDate,
        shutdown: F,
        grace: Duration,
    ) -> Result<RunSummary, RunError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            biased;

            _ = shutdown => {
                tracing::warn!(date = %date, "Shutdown requested during run, abandoning it");
                Err(RunError::Interrupted)
            }

            result = self.run(date) => result,
        };
        self.shutdown(grace).await;
        result
    }

    /// Closes the broker connection, waiting at most `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.publisher.close()).await.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Timed out closing broker connection"
            );
        }
    }
}
