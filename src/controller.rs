//! Refresh controller.
//!
//! Owns the changeset collection for one session and drives it through its
//! lifecycle:
//!
//! ```text
//! Uninitialized ─▶ CacheCheck ─┬─ fresh snapshot ─────────────▶ Ready(cache)
//!                              └─ stale / missing ─▶ Fetching ─┬▶ Ready(live)
//!                                                              └▶ Errored
//! Ready(polling) ─ every interval ─▶ poll_pending ─▶ Ready(polling | idle)
//! ```
//!
//! A failed fetch clears the data and shows a fixed message. A failed poll
//! pass only switches polling off. Nothing is retried automatically.

use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::cache;
use crate::config::Config;
use crate::error::RefreshError;
use crate::models::{Changeset, ChangesetCollection, ViewModel};
use crate::pipeline::{self, ChangesetFilter};
use crate::traits::{CacheStore, CoverageSource, PushSource};

/// Message shown when the initial load fails.
pub const FETCH_ERROR_MESSAGE: &str = "We have failed to fetch coverage data.";

/// Where the current collection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Cache,
    Live,
}

/// Lifecycle state of a [`RefreshController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet activated.
    Uninitialized,
    /// Reading the cached snapshot.
    CacheCheck,
    /// Fetching pushes and coverage live.
    Fetching,
    /// Data loaded; `polling` mirrors whether pending changesets are re-queried.
    Ready { source: DataSource, polling: bool },
    /// The live fetch failed; the collection is empty.
    Errored,
}

/// Result of one polling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Polling was already off; nothing was requested.
    Idle,
    /// Some changesets are still pending; polling continues.
    StillPending(usize),
    /// Nothing is pending anymore; polling is now off.
    Resolved,
}

/// Controller knobs, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Repository name passed to the push source.
    pub repo: String,
    /// Initial `hidden` flag for fresh changesets.
    pub hide_csets_with_no_coverage: bool,
    /// Delay between polling passes.
    pub poll_interval: Duration,
    /// Maximum age of a usable cache snapshot.
    pub cache_ttl: Duration,
    pub filter: ChangesetFilter,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            repo: config.repo.name.clone(),
            hide_csets_with_no_coverage: config.polling.hide_csets_with_no_coverage,
            poll_interval: config.polling.interval(),
            cache_ttl: config.cache.ttl(),
            filter: ChangesetFilter::new(&config.filter),
        }
    }
}

/// Loads changesets for one repository and keeps pending ones up to date.
pub struct RefreshController {
    settings: ControllerSettings,
    pushes: Arc<dyn PushSource>,
    coverage: Arc<dyn CoverageSource>,
    cache: Arc<dyn CacheStore>,
    changesets: ChangesetCollection,
    polling_enabled: bool,
    error_message: String,
    phase: Phase,
}

impl RefreshController {
    pub fn new(
        settings: ControllerSettings,
        pushes: Arc<dyn PushSource>,
        coverage: Arc<dyn CoverageSource>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            settings,
            pushes,
            coverage,
            cache,
            changesets: ChangesetCollection::new(),
            polling_enabled: false,
            error_message: String::new(),
            phase: Phase::Uninitialized,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn polling_enabled(&self) -> bool {
        self.polling_enabled
    }

    /// Empty unless the last fetch failed.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn changesets(&self) -> &ChangesetCollection {
        &self.changesets
    }

    /// Snapshot for the presentation layer: visible changesets only.
    pub fn view(&self) -> ViewModel {
        ViewModel {
            visible_changesets: self
                .changesets
                .iter()
                .filter(|c| !c.hidden)
                .cloned()
                .collect(),
            polling_enabled: self.polling_enabled,
            error_message: self.error_message.clone(),
        }
    }

    /// Load from a fresh cache snapshot, or fetch live.
    pub async fn activate(&mut self) -> Result<(), RefreshError> {
        self.activate_at(Utc::now()).await
    }

    /// [`activate`](Self::activate) with an explicit clock for the freshness check.
    pub async fn activate_at(&mut self, now: DateTime<Utc>) -> Result<(), RefreshError> {
        self.phase = Phase::CacheCheck;
        match self.load_fresh_snapshot(now).await {
            Some(csets) => {
                tracing::info!(count = csets.len(), "using cached changesets");
                self.adopt(csets, DataSource::Cache);
                Ok(())
            }
            None => self.fetch_pushes().await.map(|_| ()),
        }
    }

    async fn load_fresh_snapshot(&self, now: DateTime<Utc>) -> Option<Vec<Changeset>> {
        let cached_time = match cache::read_cached_time(self.cache.as_ref()).await {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed");
                return None;
            }
        };
        if !cache::is_fresh(cached_time, now, self.settings.cache_ttl) {
            tracing::debug!(cached_time, "cache is stale");
            return None;
        }
        match cache::read_changesets(self.cache.as_ref()).await {
            Ok(Some(csets)) if !csets.is_empty() => Some(csets),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed");
                None
            }
        }
    }

    /// Fetch pushes, run the pipeline, and store the snapshot.
    ///
    /// On failure the collection is cleared, polling is switched off and
    /// [`FETCH_ERROR_MESSAGE`] is exposed.
    pub async fn fetch_pushes(&mut self) -> Result<usize, RefreshError> {
        self.phase = Phase::Fetching;
        let result: anyhow::Result<Vec<Changeset>> = async {
            let log = self.pushes.get_pushes(&self.settings.repo).await?;
            pipeline::build_changesets(
                &log,
                self.settings.hide_csets_with_no_coverage,
                &self.settings.filter,
                self.coverage.as_ref(),
            )
            .await
        }
        .await;

        match result {
            Ok(csets) => {
                tracing::info!(count = csets.len(), repo = %self.settings.repo, "fetched changesets");
                if let Err(e) = cache::write_snapshot(self.cache.as_ref(), &csets, Utc::now()).await
                {
                    tracing::warn!(error = %e, "failed to write cache snapshot");
                }
                let count = csets.len();
                self.adopt(csets, DataSource::Live);
                Ok(count)
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "fetching changesets failed");
                self.changesets = ChangesetCollection::new();
                self.polling_enabled = false;
                self.error_message = FETCH_ERROR_MESSAGE.to_string();
                self.phase = Phase::Errored;
                Err(RefreshError::Fetch(e))
            }
        }
    }

    fn adopt(&mut self, csets: Vec<Changeset>, source: DataSource) {
        self.changesets = csets.into_iter().collect();
        self.polling_enabled = self.changesets.pending_count() > 0;
        self.error_message.clear();
        self.phase = Phase::Ready {
            source,
            polling: self.polling_enabled,
        };
    }

    fn set_polling(&mut self, enabled: bool) {
        self.polling_enabled = enabled;
        if let Phase::Ready { polling, .. } = &mut self.phase {
            *polling = enabled;
        }
    }

    /// Re-query coverage for pending changesets.
    ///
    /// A failed pass switches polling off and keeps the current data.
    pub async fn poll_pending(&mut self) -> Result<PollOutcome, RefreshError> {
        if !self.polling_enabled {
            return Ok(PollOutcome::Idle);
        }
        tracing::debug!(
            pending = self.changesets.pending_count(),
            "polling changesets without coverage"
        );
        match pipeline::refresh_pending(self.coverage.as_ref(), self.changesets.to_vec()).await {
            Ok(csets) => {
                self.changesets = csets.into_iter().collect();
                let pending = self.changesets.pending_count();
                if pending == 0 {
                    tracing::info!("no more polling required");
                    self.set_polling(false);
                    Ok(PollOutcome::Resolved)
                } else {
                    Ok(PollOutcome::StillPending(pending))
                }
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "polling pass failed, giving up");
                self.set_polling(false);
                Err(RefreshError::Poll(e))
            }
        }
    }

    /// Poll every interval while polling is enabled.
    ///
    /// A pass is awaited before the next tick is armed, so passes never
    /// overlap. `on_pass` sees the view after each pass and may stop the
    /// loop early. Returns the number of passes run.
    pub async fn run_polling<F>(&mut self, mut on_pass: F) -> usize
    where
        F: FnMut(&ViewModel) -> ControlFlow<()>,
    {
        let period = self.settings.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut passes = 0;
        while self.polling_enabled {
            ticker.tick().await;
            if let Err(e) = self.poll_pending().await {
                tracing::debug!(error = %e, "polling stopped");
            }
            passes += 1;
            if on_pass(&self.view()).is_break() {
                break;
            }
        }
        passes
    }
}
