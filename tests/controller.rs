//! Refresh controller tests against in-memory collaborators.
//!
//! Push retrieval and coverage annotation are replaced by scripted fakes;
//! the cache is an [`InMemoryCache`]. Polling tests run with tokio's clock
//! paused so intervals elapse instantly.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pushcov::cache::{self, InMemoryCache};
use pushcov::config::Config;
use pushcov::controller::{
    ControllerSettings, DataSource, Phase, PollOutcome, RefreshController, FETCH_ERROR_MESSAGE,
};
use pushcov::coverage::{apply_response, CoverageResponse};
use pushcov::models::{Changeset, Push, PushLog, RawChangeset, Summary};
use pushcov::traits::{CacheStore, CoverageSource, PushSource};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ─── Fakes ──────────────────────────────────────────────────────────

struct FakePushes {
    log: Option<PushLog>,
    calls: AtomicUsize,
}

impl FakePushes {
    fn ok(log: PushLog) -> Arc<Self> {
        Arc::new(Self {
            log: Some(log),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            log: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSource for FakePushes {
    async fn get_pushes(&self, _repo: &str) -> Result<PushLog> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .clone()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))
    }
}

/// Reports a node as pending for its first `pending_calls` requests, then
/// resolves it. Nodes listed in `never` stay pending forever. Once
/// `fail_from_call` total requests have been served, every request fails.
struct ScriptedCoverage {
    pending_calls: usize,
    never: Vec<String>,
    fail_from_call: Option<usize>,
    per_node: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedCoverage {
    fn new(pending_calls: usize) -> Self {
        Self {
            pending_calls,
            never: Vec::new(),
            fail_from_call: None,
            per_node: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoverageSource for ScriptedCoverage {
    async fn annotate(&self, mut cset: Changeset) -> Result<Changeset> {
        let n = self.total.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_from_call {
            if n >= limit {
                anyhow::bail!("coverage backend unavailable");
            }
        }
        let seen = {
            let mut per_node = self.per_node.lock().unwrap();
            let count = per_node.entry(cset.node.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if self.never.contains(&cset.node) || seen <= self.pending_calls {
            cset.summary = Summary::Pending;
            cset.summary_class_name = "pending".to_string();
        } else {
            cset.summary = Summary::Resolved("75.0%".to_string());
            cset.summary_class_name = "high-coverage".to_string();
            cset.hidden = false;
        }
        Ok(cset)
    }
}

/// Answers every request with a status the backend is not expected to send.
struct UnexpectedStatusCoverage {
    total: AtomicUsize,
}

#[async_trait]
impl CoverageSource for UnexpectedStatusCoverage {
    async fn annotate(&self, cset: Changeset) -> Result<Changeset> {
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(apply_response(cset, CoverageResponse::Unexpected(404), String::new()))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn raw(node: &str, author: &str, desc: &str) -> RawChangeset {
    RawChangeset {
        node: node.to_string(),
        author: author.to_string(),
        desc: desc.to_string(),
    }
}

fn sample_log() -> PushLog {
    let mut pushes = BTreeMap::new();
    pushes.insert(
        41,
        Push {
            changesets: vec![
                raw("aaa111", "Jane <jane@example.com>", "Bug 100 - Add feature r=bob"),
                raw("aaa222", "ffxbld", "No bug, Automated blocklist update"),
            ],
            ..Push::default()
        },
    );
    pushes.insert(
        42,
        Push {
            changesets: vec![raw("bbb111", "Bob <bob@example.com>", "Bug 200 - Fix crash r=jane")],
            ..Push::default()
        },
    );
    PushLog {
        lastpushid: 42,
        pushes,
    }
}

fn settings() -> ControllerSettings {
    let mut config = Config::default();
    config.polling.interval_ms = 30_000;
    ControllerSettings::from_config(&config)
}

fn controller(
    pushes: Arc<FakePushes>,
    coverage: Arc<ScriptedCoverage>,
    cache: Arc<InMemoryCache>,
) -> RefreshController {
    RefreshController::new(settings(), pushes, coverage, cache)
}

fn cached_cset(node: &str, summary: Summary) -> Changeset {
    Changeset {
        node: node.to_string(),
        author: "Jane".to_string(),
        desc: "Bug 1 - cached".to_string(),
        push_id: 9,
        hidden: false,
        bug_url: None,
        linkify: false,
        summary,
        summary_class_name: String::new(),
        coverage: None,
    }
}

// ─── Cache check ────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_cache_is_used_without_fetching() {
    let cache = Arc::new(InMemoryCache::new());
    let now = Utc::now();
    let captured = now - ChronoDuration::hours(23) - ChronoDuration::minutes(59);
    cache::write_snapshot(
        cache.as_ref(),
        &[cached_cset("c1", Summary::Resolved("10.0%".into()))],
        captured,
    )
    .await
    .unwrap();

    let pushes = FakePushes::ok(sample_log());
    let mut ctl = controller(pushes.clone(), Arc::new(ScriptedCoverage::new(0)), cache);
    ctl.activate_at(now).await.unwrap();

    assert_eq!(pushes.calls(), 0);
    assert_eq!(
        ctl.phase(),
        Phase::Ready {
            source: DataSource::Cache,
            polling: false
        }
    );
    assert_eq!(ctl.view().visible_changesets.len(), 1);
}

#[tokio::test]
async fn stale_cache_triggers_live_fetch() {
    let cache = Arc::new(InMemoryCache::new());
    let now = Utc::now();
    let captured = now - ChronoDuration::hours(24) - ChronoDuration::minutes(1);
    cache::write_snapshot(
        cache.as_ref(),
        &[cached_cset("old", Summary::Resolved("10.0%".into()))],
        captured,
    )
    .await
    .unwrap();

    let pushes = FakePushes::ok(sample_log());
    let mut ctl = controller(pushes.clone(), Arc::new(ScriptedCoverage::new(0)), cache.clone());
    ctl.activate_at(now).await.unwrap();

    assert_eq!(pushes.calls(), 1);
    assert!(ctl.changesets().get("old").is_none());
    assert!(ctl.changesets().get("aaa111").is_some());

    let cached_time = cache::read_cached_time(cache.as_ref()).await.unwrap().unwrap();
    assert!(cache::is_fresh(cached_time, Utc::now(), settings().cache_ttl));
}

#[tokio::test]
async fn fresh_time_without_changesets_falls_back_to_fetch() {
    let cache = Arc::new(InMemoryCache::new());
    cache::write_snapshot(cache.as_ref(), &[], Utc::now())
        .await
        .unwrap();

    let pushes = FakePushes::ok(sample_log());
    let mut ctl = controller(pushes.clone(), Arc::new(ScriptedCoverage::new(0)), cache);
    ctl.activate().await.unwrap();

    assert_eq!(pushes.calls(), 1);
    assert_eq!(ctl.changesets().len(), 2);
}

#[tokio::test]
async fn malformed_cached_changesets_fall_back_to_fetch() {
    let cache = Arc::new(InMemoryCache::new());
    cache::write_snapshot(cache.as_ref(), &[], Utc::now())
        .await
        .unwrap();
    cache
        .set(cache::CHANGESETS_KEY, json!({ "not": "a list" }))
        .await
        .unwrap();

    let pushes = FakePushes::ok(sample_log());
    let mut ctl = controller(pushes.clone(), Arc::new(ScriptedCoverage::new(0)), cache.clone());
    ctl.activate().await.unwrap();

    assert_eq!(pushes.calls(), 1);
    assert_eq!(
        ctl.phase(),
        Phase::Ready {
            source: DataSource::Live,
            polling: false
        }
    );
    assert!(ctl.error_message().is_empty());
    let stored = cache::read_changesets(cache.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn cached_pending_changesets_enable_polling() {
    let cache = Arc::new(InMemoryCache::new());
    cache::write_snapshot(
        cache.as_ref(),
        &[
            cached_cset("p", Summary::Pending),
            cached_cset("r", Summary::Resolved("1.0%".into())),
        ],
        Utc::now(),
    )
    .await
    .unwrap();

    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        Arc::new(ScriptedCoverage::new(0)),
        cache,
    );
    ctl.activate().await.unwrap();
    assert!(ctl.polling_enabled());
}

// ─── Fetch ──────────────────────────────────────────────────────────

#[tokio::test]
async fn live_fetch_filters_and_hides_by_default() {
    let cache = Arc::new(InMemoryCache::new());
    // Every changeset stays pending, so nothing gets revealed.
    let coverage = Arc::new(ScriptedCoverage::new(usize::MAX));
    let mut ctl = controller(FakePushes::ok(sample_log()), coverage, cache.clone());
    ctl.activate().await.unwrap();

    let nodes: Vec<_> = ctl.changesets().iter().map(|c| c.node.clone()).collect();
    assert_eq!(nodes, vec!["bbb111", "aaa111"]);
    assert!(ctl.changesets().iter().all(|c| c.hidden));
    assert!(ctl.view().visible_changesets.is_empty());
    assert!(ctl.polling_enabled());

    let stored = cache::read_changesets(cache.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn fetch_failure_clears_data_and_sets_message() {
    let cache = Arc::new(InMemoryCache::new());
    let mut ctl = controller(
        FakePushes::failing(),
        Arc::new(ScriptedCoverage::new(0)),
        cache.clone(),
    );
    let err = ctl.activate().await.unwrap_err();

    assert!(matches!(err, pushcov::error::RefreshError::Fetch(_)));
    assert_eq!(ctl.phase(), Phase::Errored);
    assert_eq!(ctl.error_message(), FETCH_ERROR_MESSAGE);
    let view = ctl.view();
    assert!(view.visible_changesets.is_empty());
    assert!(!view.polling_enabled);
    assert!(cache::read_cached_time(cache.as_ref()).await.unwrap().is_none());
}

#[tokio::test]
async fn coverage_failure_during_fetch_is_fatal() {
    let mut coverage = ScriptedCoverage::new(0);
    coverage.fail_from_call = Some(0);
    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        Arc::new(coverage),
        Arc::new(InMemoryCache::new()),
    );
    assert!(ctl.activate().await.is_err());
    assert_eq!(ctl.error_message(), FETCH_ERROR_MESSAGE);
    assert!(ctl.changesets().is_empty());
}

// ─── Polling ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn polling_stops_after_one_pass_when_all_resolve() {
    let coverage = Arc::new(ScriptedCoverage::new(1));
    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        coverage.clone(),
        Arc::new(InMemoryCache::new()),
    );
    ctl.activate().await.unwrap();
    assert!(ctl.polling_enabled());

    let passes = ctl.run_polling(|_| ControlFlow::Continue(())).await;

    assert_eq!(passes, 1);
    assert!(!ctl.polling_enabled());
    assert_eq!(ctl.view().visible_changesets.len(), 2);
    // Two changesets: one request each during fetch, one each during the pass.
    assert_eq!(coverage.total(), 4);
}

#[tokio::test(start_paused = true)]
async fn polling_continues_while_something_stays_pending() {
    let mut coverage = ScriptedCoverage::new(1);
    coverage.never = vec!["bbb111".to_string()];
    let coverage = Arc::new(coverage);
    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        coverage.clone(),
        Arc::new(InMemoryCache::new()),
    );
    ctl.activate().await.unwrap();

    let started = tokio::time::Instant::now();
    let mut seen = 0;
    let passes = ctl
        .run_polling(|view| {
            seen += 1;
            assert!(view.polling_enabled);
            if seen == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await;

    assert_eq!(passes, 5);
    assert!(ctl.polling_enabled());
    assert!(started.elapsed() >= std::time::Duration::from_millis(5 * 30_000));
    // aaa111 resolves on the first pass and is not requested again.
    assert_eq!(coverage.total(), 2 + 2 + 4);
}

#[tokio::test]
async fn poll_failure_disables_polling_but_keeps_data() {
    let mut coverage = ScriptedCoverage::new(usize::MAX);
    coverage.fail_from_call = Some(2);
    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        Arc::new(coverage),
        Arc::new(InMemoryCache::new()),
    );
    ctl.activate().await.unwrap();
    assert!(ctl.polling_enabled());

    let err = ctl.poll_pending().await.unwrap_err();
    assert!(matches!(err, pushcov::error::RefreshError::Poll(_)));
    assert!(!ctl.polling_enabled());
    assert_eq!(ctl.changesets().len(), 2);
    assert!(ctl.error_message().is_empty());
    assert_eq!(ctl.poll_pending().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn poll_reports_remaining_pending() {
    let mut coverage = ScriptedCoverage::new(1);
    coverage.never = vec!["aaa111".to_string()];
    let mut ctl = controller(
        FakePushes::ok(sample_log()),
        Arc::new(coverage),
        Arc::new(InMemoryCache::new()),
    );
    ctl.activate().await.unwrap();
    assert_eq!(
        ctl.poll_pending().await.unwrap(),
        PollOutcome::StillPending(1)
    );
    let visible: Vec<_> = ctl
        .view()
        .visible_changesets
        .into_iter()
        .map(|c| c.node)
        .collect();
    assert_eq!(visible, vec!["bbb111".to_string()]);
}

#[tokio::test]
async fn unexpected_status_keeps_changeset_pending_and_polling() {
    let cache = Arc::new(InMemoryCache::new());
    cache::write_snapshot(cache.as_ref(), &[cached_cset("p", Summary::Pending)], Utc::now())
        .await
        .unwrap();

    let coverage = Arc::new(UnexpectedStatusCoverage {
        total: AtomicUsize::new(0),
    });
    let mut ctl = RefreshController::new(
        settings(),
        FakePushes::ok(sample_log()),
        coverage.clone(),
        cache,
    );
    ctl.activate().await.unwrap();
    assert!(ctl.polling_enabled());

    for _ in 0..2 {
        assert_eq!(
            ctl.poll_pending().await.unwrap(),
            PollOutcome::StillPending(1)
        );
        assert!(ctl.polling_enabled());
        let cset = ctl.changesets().get("p").unwrap();
        assert_eq!(cset.summary, Summary::Pending);
        assert_eq!(cset.summary_class_name, "pending");
    }
    assert_eq!(coverage.total.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unexpected_status_during_fetch_leaves_changesets_pending() {
    let cache = Arc::new(InMemoryCache::new());
    let mut ctl = RefreshController::new(
        settings(),
        FakePushes::ok(sample_log()),
        Arc::new(UnexpectedStatusCoverage {
            total: AtomicUsize::new(0),
        }),
        cache.clone(),
    );
    ctl.activate().await.unwrap();

    assert!(ctl.polling_enabled());
    assert_eq!(ctl.changesets().pending_count(), 2);
    let stored = cache::read_changesets(cache.as_ref()).await.unwrap().unwrap();
    assert!(stored.iter().all(|c| c.summary.is_pending()));
}
