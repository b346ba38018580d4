//! Service traits for the collaborators of the refresh pipeline.
//!
//! The pipeline and the controller never talk to the network or the disk
//! directly. They go through these traits, so tests and embedders can swap
//! in their own implementations.
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌────────────┐
//! │ PushSource │──▶│ build_changesets│──▶│ CacheStore │
//! │ (pushlog)  │   │  + Coverage    │   │ (sqlite)   │
//! └────────────┘   │    Source      │   └────────────┘
//!                  └────────────────┘
//! ```
//!
//! Built-in implementations:
//!
//! | Trait | Implementation |
//! |-------|----------------|
//! | [`PushSource`] | [`crate::hg::HgPushlog`] |
//! | [`CoverageSource`] | [`crate::coverage::CoverageBackend`] |
//! | [`CacheStore`] | [`crate::cache::SqliteCache`], [`crate::cache::InMemoryCache`] |

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Changeset, PushLog};

// ═══════════════════════════════════════════════════════════════════════
// Push retrieval
// ═══════════════════════════════════════════════════════════════════════

/// Source of recent pushes for a repository.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use pushcov::models::PushLog;
/// use pushcov::traits::PushSource;
///
/// struct EmptyPushes;
///
/// #[async_trait]
/// impl PushSource for EmptyPushes {
///     async fn get_pushes(&self, _repo: &str) -> Result<PushLog> {
///         Ok(PushLog::default())
///     }
/// }
/// ```
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Fetch the most recent pushes of `repo`.
    async fn get_pushes(&self, repo: &str) -> Result<PushLog>;
}

// ═══════════════════════════════════════════════════════════════════════
// Coverage annotation
// ═══════════════════════════════════════════════════════════════════════

/// Annotates a changeset with its coverage summary.
///
/// Implementations overwrite `summary`, `summary_class_name` and `coverage`
/// and may reveal the changeset (`hidden = false`) once coverage exists.
/// An `Err` means the request itself failed; a changeset whose coverage is
/// not ready yet is returned with [`crate::models::Summary::Pending`].
#[async_trait]
pub trait CoverageSource: Send + Sync {
    async fn annotate(&self, cset: Changeset) -> Result<Changeset>;
}

// ═══════════════════════════════════════════════════════════════════════
// Cache store
// ═══════════════════════════════════════════════════════════════════════

/// Key-value store for JSON values. Expiry is enforced by callers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}
