//! # page-relay
//!
//! Publishes user uploads to GitHub Pages through the GitHub `contents` API.
//!
//! A chat bot receives an `index.html` or a ZIP of a static site, and
//! page-relay mirrors it into a per-user folder of one repository, then
//! replies with the public URL
//! `https://{owner}.github.io/{repo}/user_{id}/`.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │  Upload   │──▶│ Materializer │──▶│ Publisher  │──▶│ ContentStore │
//! │ html/zip  │   │  SiteBundle  │   │ per-entry  │   │ GitHub / mem │
//! └───────────┘   └──────────────┘   └─────┬──────┘   └──────────────┘
//!                                          │
//!                                          ▼
//!                                    reply + site URL
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GITHUB_TOKEN=...
//! pagerelay publish --user 42 ./site.zip
//! pagerelay delete --user 42
//! pagerelay stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Bundles, namespaces, remote records |
//! | [`materialize`] | Upload → [`models::SiteBundle`] |
//! | [`publish`] | Bundle → remote store, per-path outcomes |
//! | [`store`] | Content store trait, GitHub and in-memory backends |
//! | [`relay`] | Access policy and reply text for the chat transport |

pub mod config;
pub mod materialize;
pub mod models;
pub mod publish;
pub mod relay;
pub mod store;
