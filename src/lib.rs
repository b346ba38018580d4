//! # pushcov
//!
//! Shows the most recent pushes of a Mercurial repository together with the
//! code-coverage summary of each changeset.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Pushlog  │──▶│  Pipeline   │──▶│  Controller  │──▶│ CLI/HTTP │
//! │ (hg)     │   │ filter+ccov │   │ cache+poll   │   │  view    │
//! └──────────┘   └────────────┘   └──────┬───────┘   └──────────┘
//!                                        ▼
//!                                  ┌──────────┐
//!                                  │  SQLite  │
//!                                  │  cache   │
//!                                  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pushcov init                 # create the cache database
//! pushcov show                 # print the current view
//! pushcov watch                # keep polling until coverage is in
//! pushcov serve                # serve the view model over HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`pipeline`] | Changeset filtering and annotation |
//! | [`controller`] | Cache check, fetch and polling lifecycle |
//! | [`hg`] | Pushlog client |
//! | [`coverage`] | Coverage backend client |
//! | [`cache`] | Snapshot cache stores |
//! | [`view`] | Terminal rendering |
//! | [`server`] | HTTP view server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod controller;
pub mod coverage;
pub mod db;
pub mod error;
pub mod hg;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod traits;
pub mod view;
