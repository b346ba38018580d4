//! Mercurial pushlog client.
//!
//! Reads recent pushes through the `json-pushes` web command in two steps:
//! a bare `version=2` request reports the id of the newest push, then a
//! `full=1` request fetches the last `push_count` pushes with their
//! changesets. hg treats `startID` as exclusive and `endID` as inclusive.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;
use crate::models::PushLog;
use crate::traits::PushSource;

#[derive(Debug, Deserialize)]
struct LastPush {
    lastpushid: u64,
}

/// [`PushSource`] reading an hg server's `json-pushes` endpoint.
pub struct HgPushlog {
    client: reqwest::Client,
    base_url: String,
    push_count: u64,
}

impl HgPushlog {
    /// Build a client from the `[repo]` section; the timeout is optional.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.repo.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            base_url: config.repo.hg_base_url.trim_end_matches('/').to_string(),
            push_count: config.repo.push_count,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("pushlog request failed: {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("pushlog returned {} for {}", status, url);
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("malformed pushlog response from {}", url))
    }
}

/// Query window `(startID, endID]` covering the newest `count` pushes.
pub fn push_window(lastpushid: u64, count: u64) -> (u64, u64) {
    (lastpushid.saturating_sub(count), lastpushid)
}

#[async_trait]
impl PushSource for HgPushlog {
    async fn get_pushes(&self, repo: &str) -> Result<PushLog> {
        let tip_url = format!("{}/{}/json-pushes?version=2", self.base_url, repo);
        let last: LastPush = self.get_json(&tip_url).await?;

        let (start, end) = push_window(last.lastpushid, self.push_count);
        let url = format!(
            "{}/{}/json-pushes?version=2&full=1&startID={}&endID={}",
            self.base_url, repo, start, end
        );
        let log: PushLog = self.get_json(&url).await?;
        tracing::info!(repo, pushes = log.pushes.len(), "fetched pushlog");
        Ok(log)
    }
}
