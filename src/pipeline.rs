//! Changeset pipeline.
//!
//! Turns a [`PushLog`] into the list of changesets shown to the user:
//!
//! 1. Pushes are walked newest first.
//! 2. Each push's changesets are reversed (newest first) and filtered.
//!    Bot pushes, merges and backouts are dropped.
//! 3. Survivors get a bug link derived from a leading `bug NNNN` and the
//!    caller's default visibility.
//! 4. Every survivor is annotated through a [`CoverageSource`]. All requests
//!    run concurrently and are joined fail-fast: one failed request fails
//!    the whole batch.
//!
//! The pipeline keeps no state between calls.

use anyhow::Result;
use futures_util::future::try_join_all;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::FilterConfig;
use crate::models::{Changeset, PushLog, RawChangeset, Summary};
use crate::traits::CoverageSource;

fn bug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^bug\s*(\d+)").expect("bug pattern is a valid regex"))
}

/// Filtering and link rules applied to raw changesets.
#[derive(Debug, Clone)]
pub struct ChangesetFilter {
    bot_authors: Vec<String>,
    bug_url_template: String,
}

impl ChangesetFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            bot_authors: config.bot_authors.clone(),
            bug_url_template: config.bug_url_template.clone(),
        }
    }

    /// True for changesets that never reach the view: bot pushes, merges
    /// and backouts.
    pub fn is_ignored(&self, cset: &RawChangeset) -> bool {
        let desc = cset.desc.as_str();
        self.bot_authors
            .iter()
            .any(|marker| cset.author.contains(marker.as_str()))
            || (desc.contains("a=merge") && desc.contains("r=merge"))
            || (desc.contains("erge") && desc.contains("to"))
            || desc.contains("ack out")
            || desc.contains("acked out")
    }

    /// Bug tracker link for descriptions starting with `bug <digits>`.
    pub fn bug_url(&self, desc: &str) -> Option<String> {
        let caps = bug_regex().captures(desc)?;
        let id = caps.get(1)?.as_str();
        Some(self.bug_url_template.replace("{id}", id))
    }
}

impl Default for ChangesetFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Steps 1-3: order, filter and decorate changesets without touching the
/// coverage backend. Every returned changeset is [`Summary::Loading`].
pub fn filter_pushes(
    pushes: &PushLog,
    hidden_default: bool,
    filter: &ChangesetFilter,
) -> Vec<Changeset> {
    let mut out = Vec::new();
    for (push_id, push) in pushes.pushes.iter().rev() {
        for raw in push.changesets.iter().rev() {
            if filter.is_ignored(raw) {
                tracing::trace!(node = %raw.node, "skipping changeset");
                continue;
            }
            out.push(Changeset {
                node: raw.node.clone(),
                author: raw.author.clone(),
                desc: raw.desc.clone(),
                push_id: *push_id,
                hidden: hidden_default,
                bug_url: filter.bug_url(&raw.desc),
                linkify: false,
                summary: Summary::Loading,
                summary_class_name: String::new(),
                coverage: None,
            });
        }
    }
    out
}

/// Annotate every changeset concurrently; the first failure fails the batch.
pub async fn annotate_all(
    coverage: &dyn CoverageSource,
    csets: Vec<Changeset>,
) -> Result<Vec<Changeset>> {
    try_join_all(csets.into_iter().map(|cset| coverage.annotate(cset))).await
}

/// Full pipeline: [`filter_pushes`] followed by [`annotate_all`].
pub async fn build_changesets(
    pushes: &PushLog,
    hide_csets_with_no_coverage: bool,
    filter: &ChangesetFilter,
    coverage: &dyn CoverageSource,
) -> Result<Vec<Changeset>> {
    let csets = filter_pushes(pushes, hide_csets_with_no_coverage, filter);
    tracing::debug!(count = csets.len(), "annotating changesets");
    annotate_all(coverage, csets).await
}

/// Re-annotate pending changesets; all others pass through untouched.
/// Order is preserved.
pub async fn refresh_pending(
    coverage: &dyn CoverageSource,
    csets: Vec<Changeset>,
) -> Result<Vec<Changeset>> {
    try_join_all(csets.into_iter().map(|mut cset| async move {
        if !cset.summary.is_pending() {
            return Ok(cset);
        }
        cset.summary = Summary::Loading;
        coverage.annotate(cset).await
    }))
    .await
}
