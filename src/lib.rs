//! # Report Harness
//!
//! Ingests periodic archives of personalized HTML report bulletins and serves
//! per-user views of them.
//!
//! Each period's archive holds one bulletin per user. Bulletins are split
//! into named sections; sections that are the same for everyone are stored
//! once in a content-addressed table, the rest are kept per user.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │   Archive   │──▶│ Reconstructor│──▶│ Segmenter  │──▶│  Store   │
//! │ tar.gz/dir  │   │  per user    │   │  sections  │   │ dedup +  │
//! └─────────────┘   └──────────────┘   └────────────┘   │ periods  │
//!        ▲                                               └────┬─────┘
//!        │ <id>.tar.gz.renew                                  │
//!   ┌─────────┐                                          ┌────▼─────┐
//!   │ watcher │                                          │   HTTP   │
//!   └─────────┘                                          │  (query) │
//!                                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reportd load                  # ingest every archive once, print a summary
//! reportd dump > results.json   # ingest and print the result set
//! reportd serve                 # ingest, watch for reloads, serve HTTP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Ingestion error taxonomy |
//! | [`models`] | Core data types and the dedup table |
//! | [`traits`] | Archive source abstraction |
//! | [`source_tar`] | Gzip tarball archives |
//! | [`source_dir`] | Directory archives |
//! | [`reconstruct`] | Entry stream → per-user records |
//! | [`segment`] | Bulletin → classified sections |
//! | [`store`] | Locked process-wide result store |
//! | [`ingest`] | Period ingestion and bulk load |
//! | [`watch`] | Reload triggers |
//! | [`auth`] | Caller identity |
//! | [`query`] | Access-filtered read views |
//! | [`server`] | HTTP API |

pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod query;
pub mod reconstruct;
pub mod segment;
pub mod server;
pub mod source_dir;
pub mod source_tar;
pub mod store;
pub mod traits;
pub mod watch;
