//! Core data models used throughout pushcov.
//!
//! These types represent the pushes returned by the pushlog, the annotated
//! changesets derived from them, and the view model handed to the
//! presentation layer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Pushlog response (`json-pushes?version=2`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PushLog {
    #[serde(default)]
    pub lastpushid: u64,
    /// Pushes keyed by numeric push id, iterated oldest first.
    #[serde(default)]
    pub pushes: BTreeMap<u64, Push>,
}

/// A batch of changesets submitted together.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Push {
    /// Changesets in push order (oldest first).
    #[serde(default)]
    pub changesets: Vec<RawChangeset>,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub user: String,
}

/// Changeset as returned by the pushlog with `full=1`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawChangeset {
    pub node: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub desc: String,
}

/// Coverage status of a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "text")]
pub enum Summary {
    /// The coverage backend has not finished processing the changeset.
    Pending,
    /// A request for coverage data is in flight.
    Loading,
    /// Final summary text, a percentage or an error reason.
    Resolved(String),
}

impl Summary {
    pub fn is_pending(&self) -> bool {
        matches!(self, Summary::Pending)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Pending => f.write_str("Pending"),
            Summary::Loading => f.write_str("Loading..."),
            Summary::Resolved(text) => f.write_str(text),
        }
    }
}

/// Provider-specific coverage metadata attached once a report is available.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CoverageInfo {
    /// Link to the revision on the hg web interface.
    pub hg_rev: Option<String>,
    pub build_changeset: Option<String>,
    pub overall_cur: Option<String>,
    pub overall_prev: Option<String>,
    pub added_lines: u64,
    pub covered_lines: u64,
}

/// A changeset after filtering and annotation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Changeset {
    /// Full changeset hash.
    pub node: String,
    pub author: String,
    /// Commit message; the first line is used as the title.
    pub desc: String,
    /// Id of the push that carried this changeset.
    pub push_id: u64,
    /// Excluded from the view until a coverage report arrives.
    pub hidden: bool,
    /// Bugzilla link derived from a leading `Bug NNN`.
    pub bug_url: Option<String>,
    /// Set when `bug_url` is present.
    pub linkify: bool,
    pub summary: Summary,
    /// Presentation class for the summary (`pending`, `error`, `high-coverage`, ...).
    #[serde(default)]
    pub summary_class_name: String,
    #[serde(default)]
    pub coverage: Option<CoverageInfo>,
}

/// Changesets keyed by `node`, remembering first-insertion order for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangesetCollection {
    order: Vec<String>,
    by_node: HashMap<String, Changeset>,
}

impl ChangesetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by `node`. A replaced changeset keeps its position.
    pub fn insert(&mut self, cset: Changeset) {
        if !self.by_node.contains_key(&cset.node) {
            self.order.push(cset.node.clone());
        }
        self.by_node.insert(cset.node.clone(), cset);
    }

    pub fn get(&self, node: &str) -> Option<&Changeset> {
        self.by_node.get(node)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Changeset> {
        self.order.iter().filter_map(|node| self.by_node.get(node))
    }

    pub fn pending_count(&self) -> usize {
        self.iter().filter(|c| c.summary.is_pending()).count()
    }

    pub fn to_vec(&self) -> Vec<Changeset> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Changeset> for ChangesetCollection {
    fn from_iter<I: IntoIterator<Item = Changeset>>(iter: I) -> Self {
        let mut collection = ChangesetCollection::new();
        for cset in iter {
            collection.insert(cset);
        }
        collection
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub visible_changesets: Vec<Changeset>,
    pub polling_enabled: bool,
    /// Empty when healthy.
    pub error_message: String,
}
