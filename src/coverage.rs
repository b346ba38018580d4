//! Coverage backend client.
//!
//! Queries `GET {backend}/coverage/changeset/{node}` and folds the answer
//! into the changeset:
//!
//! | Status | Effect |
//! |--------|--------|
//! | `202` | still processing → [`Summary::Pending`] |
//! | `200` | report → resolved summary, coverage metadata, changeset shown |
//! | `500` | resolved with the HTTP reason phrase, class `error` |
//! | other | logged, changeset stays pending and is retried |
//!
//! Transport and decode failures are returned as errors so the caller's
//! fail-fast join can abort the batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;
use crate::models::{Changeset, CoverageInfo, Summary};
use crate::traits::CoverageSource;

/// Coverage report returned for a changeset once processing is done.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub build_changeset: Option<String>,
    #[serde(default)]
    pub overall_cur: Option<String>,
    #[serde(default)]
    pub overall_prev: Option<String>,
    #[serde(default)]
    pub diffs: Vec<FileDiff>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileDiff {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub changes: Vec<LineChange>,
}

/// One added line. `coverage` is `"Y"` (covered), `"N"` (not covered) or
/// `"?"` (not instrumented).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineChange {
    #[serde(default)]
    pub line: u64,
    #[serde(default)]
    pub coverage: String,
}

/// What the backend said about one changeset.
#[derive(Debug, Clone)]
pub enum CoverageResponse {
    Pending,
    Ready(CoverageReport),
    ServerError(String),
    Unexpected(u16),
}

/// Summary text and class name for a report.
pub fn summarize(report: &CoverageReport) -> (u64, u64, String, &'static str) {
    let mut added = 0u64;
    let mut covered = 0u64;
    for change in report.diffs.iter().flat_map(|d| d.changes.iter()) {
        match change.coverage.as_str() {
            "Y" => {
                added += 1;
                covered += 1;
            }
            "N" => added += 1,
            _ => {}
        }
    }
    if added == 0 {
        return (0, 0, "No coverable changes".to_string(), "no-change");
    }
    let pct = covered as f64 * 100.0 / added as f64;
    let class = if pct < 20.0 {
        "low-coverage"
    } else if pct < 70.0 {
        "medium-coverage"
    } else {
        "high-coverage"
    };
    (added, covered, format!("{:.1}%", pct), class)
}

/// Merge a backend response into a changeset.
pub fn apply_response(mut cset: Changeset, response: CoverageResponse, hg_rev: String) -> Changeset {
    match response {
        CoverageResponse::Pending => {
            cset.summary = Summary::Pending;
            cset.summary_class_name = "pending".to_string();
        }
        CoverageResponse::Ready(report) => {
            let (added, covered, text, class) = summarize(&report);
            cset.summary = Summary::Resolved(text);
            cset.summary_class_name = class.to_string();
            cset.hidden = false;
            cset.coverage = Some(CoverageInfo {
                hg_rev: Some(hg_rev),
                build_changeset: report.build_changeset,
                overall_cur: report.overall_cur,
                overall_prev: report.overall_prev,
                added_lines: added,
                covered_lines: covered,
            });
        }
        CoverageResponse::ServerError(reason) => {
            cset.summary = Summary::Resolved(reason);
            cset.summary_class_name = "error".to_string();
        }
        CoverageResponse::Unexpected(status) => {
            tracing::warn!(node = %cset.node, status, "unexpected coverage backend status");
            cset.summary = Summary::Pending;
            cset.summary_class_name = "pending".to_string();
        }
    }
    cset
}

/// HTTP client for the coverage backend.
pub struct CoverageBackend {
    client: reqwest::Client,
    backend_url: String,
    hg_base_url: String,
    repo: String,
}

impl CoverageBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.coverage.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            backend_url: config.coverage.backend_url.trim_end_matches('/').to_string(),
            hg_base_url: config.repo.hg_base_url.trim_end_matches('/').to_string(),
            repo: config.repo.name.clone(),
        })
    }

    async fn fetch(&self, node: &str) -> Result<CoverageResponse> {
        let url = format!("{}/coverage/changeset/{}", self.backend_url, node);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("coverage request failed: {}", url))?;

        let status = resp.status();
        let response = match status {
            StatusCode::ACCEPTED => CoverageResponse::Pending,
            StatusCode::OK => {
                let report: CoverageReport = resp
                    .json()
                    .await
                    .with_context(|| format!("malformed coverage report for {}", node))?;
                CoverageResponse::Ready(report)
            }
            StatusCode::INTERNAL_SERVER_ERROR => CoverageResponse::ServerError(
                status
                    .canonical_reason()
                    .unwrap_or("Internal Server Error")
                    .to_string(),
            ),
            other => CoverageResponse::Unexpected(other.as_u16()),
        };
        Ok(response)
    }
}

#[async_trait]
impl CoverageSource for CoverageBackend {
    async fn annotate(&self, cset: Changeset) -> Result<Changeset> {
        let response = self.fetch(&cset.node).await?;
        let hg_rev = format!("{}/{}/rev/{}", self.hg_base_url, self.repo, cset.node);
        Ok(apply_response(cset, response, hg_rev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(marks: &[&str]) -> CoverageReport {
        CoverageReport {
            diffs: vec![FileDiff {
                name: "dom/base/Foo.cpp".to_string(),
                changes: marks
                    .iter()
                    .enumerate()
                    .map(|(i, m)| LineChange {
                        line: i as u64 + 1,
                        coverage: m.to_string(),
                    })
                    .collect(),
            }],
            ..CoverageReport::default()
        }
    }

    fn cset() -> Changeset {
        Changeset {
            node: "abcdef012345".to_string(),
            author: "dev".to_string(),
            desc: "Bug 1 - x".to_string(),
            push_id: 7,
            hidden: true,
            bug_url: None,
            linkify: false,
            summary: Summary::Loading,
            summary_class_name: String::new(),
            coverage: None,
        }
    }

    #[test]
    fn summary_thresholds() {
        assert_eq!(summarize(&report(&["Y", "N", "N", "N", "N", "N"])).3, "low-coverage");
        assert_eq!(summarize(&report(&["Y", "N"])).3, "medium-coverage");
        let (added, covered, text, class) = summarize(&report(&["Y", "Y", "Y", "?"]));
        assert_eq!((added, covered), (3, 3));
        assert_eq!(text, "100.0%");
        assert_eq!(class, "high-coverage");
    }

    #[test]
    fn uninstrumented_changes_are_no_change() {
        let (_, _, text, class) = summarize(&report(&["?", "?"]));
        assert_eq!(text, "No coverable changes");
        assert_eq!(class, "no-change");
    }

    #[test]
    fn ready_report_reveals_changeset() {
        let out = apply_response(
            cset(),
            CoverageResponse::Ready(report(&["Y", "N"])),
            "https://hg/rev/abcdef012345".to_string(),
        );
        assert!(!out.hidden);
        assert_eq!(out.summary, Summary::Resolved("50.0%".into()));
        let cov = out.coverage.unwrap();
        assert_eq!(cov.hg_rev.as_deref(), Some("https://hg/rev/abcdef012345"));
        assert_eq!(cov.added_lines, 2);
    }

    #[test]
    fn pending_keeps_visibility() {
        let out = apply_response(cset(), CoverageResponse::Pending, String::new());
        assert!(out.hidden);
        assert!(out.summary.is_pending());
        assert!(out.coverage.is_none());
    }

    #[test]
    fn server_error_resolves_with_reason() {
        let out = apply_response(
            cset(),
            CoverageResponse::ServerError("Internal Server Error".into()),
            String::new(),
        );
        assert_eq!(out.summary, Summary::Resolved("Internal Server Error".into()));
        assert_eq!(out.summary_class_name, "error");
    }

    #[test]
    fn unexpected_status_keeps_changeset_pending() {
        let out = apply_response(cset(), CoverageResponse::Unexpected(404), String::new());
        assert!(out.summary.is_pending());
        assert_eq!(out.summary_class_name, "pending");
        assert!(out.hidden);
        assert!(out.coverage.is_none());
    }
}
